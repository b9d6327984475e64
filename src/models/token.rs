use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::middleware::scope::Scope;
use crate::store::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// Acts as its owner.
    Personal,
    /// Issued to a provider; acts as a user linked to that provider, or as
    /// nobody for service calls.
    Application,
}

/// A persisted app token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    pub token: String,
    pub label: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub scopes: Vec<Scope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub is_active: bool,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Document for Token {
    const COLLECTION: &'static str = "tokens";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Token {
    /// 32 hex characters of randomness.
    pub fn generate_value() -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn value_filter(value: &str) -> Value {
        json!({ "token": value })
    }

    pub fn owner_filter(user_id: &str) -> Value {
        json!({ "created_by": user_id })
    }
}

/// API representation. The secret value is only revealed on creation.
#[derive(Debug, Clone, Serialize)]
pub struct TokenView {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub scopes: Vec<Scope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub is_active: bool,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl TokenView {
    pub fn new(t: &Token) -> Self {
        Self {
            id: t.id.clone(),
            label: t.label.clone(),
            token_type: t.token_type,
            scopes: t.scopes.clone(),
            provider: t.provider.clone(),
            is_active: t.is_active,
            expires_at: t.expires_at,
            last_used_at: t.last_used_at,
            created_at: t.created_at,
            token: None,
        }
    }

    pub fn revealed(t: &Token) -> Self {
        Self {
            token: Some(t.token.clone()),
            ..Self::new(t)
        }
    }
}
