//! HS256 session and storage tokens.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::scope::Scope;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// User id.
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    /// Issued as a refresh of an earlier token.
    #[serde(default)]
    pub irt: bool,
    #[serde(default)]
    pub scp: Vec<Scope>,
    /// Restricts the token to a single request path (storage tokens).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Claims {
    pub fn lifetime(&self) -> i64 {
        self.exp - self.iat
    }
}

/// A token together with its expiry.
#[derive(Debug, Clone)]
pub struct Issued {
    pub token: String,
    pub expires: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JwtError {
    Expired,
    Invalid(String),
}

impl JwtError {
    pub fn message(&self) -> String {
        match self {
            JwtError::Expired => "JSON Web Token has expired.".to_string(),
            JwtError::Invalid(reason) => format!("Bad JSON Web Token: {}", reason),
        }
    }
}

pub struct TokenSpec<'a> {
    pub user_id: &'a str,
    pub lifetime_secs: i64,
    pub scopes: Vec<Scope>,
    pub path: Option<&'a str>,
    pub refresh: bool,
}

pub fn issue(secret: &str, spec: TokenSpec<'_>) -> anyhow::Result<Issued> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        iss: spec.user_id.to_string(),
        iat: now,
        exp: now + spec.lifetime_secs,
        irt: spec.refresh,
        scp: spec.scopes,
        path: spec.path.map(str::to_string),
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    let expires = Utc
        .timestamp_opt(claims.exp, 0)
        .single()
        .ok_or_else(|| anyhow::anyhow!("token expiry out of range"))?;
    Ok(Issued { token, expires })
}

pub fn verify(secret: &str, token: &str) -> Result<Claims, JwtError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => JwtError::Expired,
        _ => JwtError::Invalid(e.to_string()),
    })
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    fn spec(lifetime_secs: i64) -> TokenSpec<'static> {
        TokenSpec {
            user_id: "u1",
            lifetime_secs,
            scopes: vec![Scope::All],
            path: None,
            refresh: false,
        }
    }

    #[test]
    fn test_issue_and_verify() {
        let issued = issue(SECRET, spec(3600)).unwrap();
        let claims = verify(SECRET, &issued.token).unwrap();
        assert_eq!(claims.iss, "u1");
        assert_eq!(claims.lifetime(), 3600);
        assert_eq!(claims.scp, vec![Scope::All]);
        assert!(claims.path.is_none());
        assert!(!claims.irt);
    }

    #[test]
    fn test_expired_token() {
        let issued = issue(SECRET, spec(-10)).unwrap();
        assert_eq!(verify(SECRET, &issued.token), Err(JwtError::Expired));
    }

    #[test]
    fn test_wrong_secret() {
        let issued = issue(SECRET, spec(3600)).unwrap();
        assert!(matches!(verify("other", &issued.token), Err(JwtError::Invalid(_))));
    }

    #[test]
    fn test_garbage() {
        assert!(matches!(verify(SECRET, "not-a-jwt"), Err(JwtError::Invalid(_))));
    }

    #[test]
    fn test_path_claim() {
        let issued = issue(
            SECRET,
            TokenSpec {
                path: Some("/v1/games/afm"),
                scopes: vec![Scope::Storage],
                ..spec(180)
            },
        )
        .unwrap();
        let claims = verify(SECRET, &issued.token).unwrap();
        assert_eq!(claims.path.as_deref(), Some("/v1/games/afm"));
    }
}
