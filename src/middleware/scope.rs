use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::token::TokenType;

/// Token scopes. A request declares the scopes it accepts; a token passes
/// if it carries at least one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Full access, granted to login sessions.
    All,
    /// May only be exchanged for a session token.
    Login,
    /// Ratings, stars, comments.
    Community,
    /// Provider-to-provider calls that act without a user.
    Service,
    /// Uploading and creating content.
    Create,
    /// Downloading protected files.
    Storage,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::All => "all",
            Scope::Login => "login",
            Scope::Community => "community",
            Scope::Service => "service",
            Scope::Create => "create",
            Scope::Storage => "storage",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Scope::All),
            "login" => Ok(Scope::Login),
            "community" => Ok(Scope::Community),
            "service" => Ok(Scope::Service),
            "create" => Ok(Scope::Create),
            "storage" => Ok(Scope::Storage),
            other => Err(format!("Unknown scope \"{}\".", other)),
        }
    }
}

/// True if there is no restriction, or any required scope was granted.
pub fn is_valid(required: Option<&[Scope]>, granted: &[Scope]) -> bool {
    match required {
        None => true,
        Some(required) => required.iter().any(|s| granted.contains(s)),
    }
}

/// Scopes a token of the given type may be created with.
pub fn scopes_for(token_type: TokenType) -> &'static [Scope] {
    match token_type {
        TokenType::Personal => &[
            Scope::All,
            Scope::Login,
            Scope::Community,
            Scope::Create,
            Scope::Storage,
        ],
        TokenType::Application => &[
            Scope::Community,
            Scope::Create,
            Scope::Storage,
            Scope::Service,
        ],
    }
}

/// Renders a scope list as `["a", "b"]` for error messages.
pub fn describe(scopes: &[Scope]) -> String {
    let names: Vec<String> = scopes.iter().map(|s| format!("\"{}\"", s)).collect();
    format!("[{}]", names.join(", "))
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_requirement_is_always_valid() {
        assert!(is_valid(None, &[]));
        assert!(is_valid(None, &[Scope::Login]));
    }

    #[test]
    fn test_any_required_scope_suffices() {
        let required = [Scope::All, Scope::Create];
        assert!(is_valid(Some(&required), &[Scope::Create, Scope::Storage]));
        assert!(is_valid(Some(&required), &[Scope::All]));
        assert!(!is_valid(Some(&required), &[Scope::Login]));
    }

    #[test]
    fn test_empty_requirement_rejects() {
        assert!(!is_valid(Some(&[]), &[Scope::All]));
    }

    #[test]
    fn test_creation_allow_lists() {
        assert!(scopes_for(TokenType::Personal).contains(&Scope::Login));
        assert!(!scopes_for(TokenType::Personal).contains(&Scope::Service));
        assert!(scopes_for(TokenType::Application).contains(&Scope::Service));
        assert!(!scopes_for(TokenType::Application).contains(&Scope::All));
        assert!(!scopes_for(TokenType::Application).contains(&Scope::Login));
    }

    #[test]
    fn test_parse_and_serialize() {
        assert_eq!("community".parse::<Scope>().unwrap(), Scope::Community);
        assert!("root".parse::<Scope>().is_err());
        assert_eq!(serde_json::to_string(&Scope::Storage).unwrap(), "\"storage\"");
        assert_eq!(describe(&[Scope::All, Scope::Login]), "[\"all\", \"login\"]");
    }
}
