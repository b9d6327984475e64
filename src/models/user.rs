use std::collections::BTreeMap;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::plan::{self, Plan};
use crate::store::Document;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    /// Argon2 PHC string. Empty for users created by a provider.
    #[serde(default)]
    pub password_hash: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub plan: String,
    /// Provider name to the user's id at that provider.
    #[serde(default)]
    pub providers: BTreeMap<String, String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Document for User {
    const COLLECTION: &'static str = "users";

    fn id(&self) -> &str {
        &self.id
    }
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

impl User {
    pub fn new(name: &str, email: &str, password: &str, plan: &str) -> anyhow::Result<Self> {
        Ok(Self {
            password_hash: hash_password(password)?,
            ..Self::without_password(name, email, plan)
        })
    }

    /// A user that can only log in through a provider.
    pub fn without_password(name: &str, email: &str, plan: &str) -> Self {
        Self {
            id: super::new_id(),
            name: name.to_string(),
            email: email.to_lowercase(),
            password_hash: String::new(),
            roles: vec!["member".to_string()],
            plan: plan.to_string(),
            providers: BTreeMap::new(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn verify_password(&self, password: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(&self.password_hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    pub fn plan(&self) -> Option<&'static Plan> {
        plan::find(&self.plan)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_linked_to(&self, provider: &str) -> bool {
        self.providers.contains_key(provider)
    }

    /// Filter selecting the user known to `provider` as `provider_id`.
    pub fn provider_filter(provider: &str, provider_id: &str) -> Value {
        json!({ "providers": { provider: provider_id } })
    }

    pub fn email_filter(email: &str) -> Value {
        json!({ "email": email.to_lowercase() })
    }

    pub fn name_filter(name: &str) -> Value {
        json!({ "name": name })
    }
}

/// What a user sees about themselves.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileView {
    pub id: String,
    pub name: String,
    pub email: String,
    pub roles: Vec<String>,
    pub plan: Option<&'static Plan>,
    pub providers: BTreeMap<String, String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for ProfileView {
    fn from(u: &User) -> Self {
        Self {
            id: u.id.clone(),
            name: u.name.clone(),
            email: u.email.clone(),
            roles: u.roles.clone(),
            plan: u.plan(),
            providers: u.providers.clone(),
            is_active: u.is_active,
            created_at: u.created_at,
        }
    }
}

/// Public view of another user.
#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub id: String,
    pub name: String,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserView {
    fn from(u: &User) -> Self {
        Self {
            id: u.id.clone(),
            name: u.name.clone(),
            roles: u.roles.clone(),
            created_at: u.created_at,
        }
    }
}
