use axum::http::{header, HeaderMap, Uri};
use once_cell::sync::Lazy;
use regex::Regex;

/// Database-backed app tokens are 32+ hex characters; anything else is a JWT.
static APP_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{32,}$").expect("app token pattern is valid")
});

/// A credential pulled off the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawToken {
    pub value: String,
    /// Supplied as `?token=` rather than in the header.
    pub from_url: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalError {
    /// No credential at all.
    Missing,
    /// An `Authorization` header that is not `Bearer <token>`.
    BadHeaderFormat,
}

impl RetrievalError {
    pub fn message(&self) -> &'static str {
        match self {
            RetrievalError::Missing => {
                "Unauthorized. You need to provide credentials for this resource"
            }
            RetrievalError::BadHeaderFormat => {
                "Bad Authorization header format. Format is \"Authorization: Bearer [token]\""
            }
        }
    }
}

/// Extracts the bearer credential. The header wins over the query string.
pub fn retrieve(headers: &HeaderMap, uri: &Uri) -> Result<RawToken, RetrievalError> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let value = value.to_str().map_err(|_| RetrievalError::BadHeaderFormat)?;
        let parts: Vec<&str> = value.split(' ').collect();
        return match parts.as_slice() {
            ["Bearer", token] if !token.is_empty() => Ok(RawToken {
                value: token.to_string(),
                from_url: false,
            }),
            _ => Err(RetrievalError::BadHeaderFormat),
        };
    }

    query_token(uri)
        .map(|value| RawToken {
            value,
            from_url: true,
        })
        .ok_or(RetrievalError::Missing)
}

fn query_token(uri: &Uri) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

/// A credential classified by shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    AppToken { value: String, from_url: bool },
    Jwt { value: String, from_url: bool },
}

impl From<RawToken> for Credential {
    fn from(raw: RawToken) -> Self {
        if APP_TOKEN.is_match(&raw.value) {
            Credential::AppToken {
                value: raw.value,
                from_url: raw.from_url,
            }
        } else {
            Credential::Jwt {
                value: raw.value,
                from_url: raw.from_url,
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────
