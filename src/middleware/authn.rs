//! Request identification.
//!
//! Runs on every API request: pulls the credential, authenticates it with the
//! matching strategy and stores the result as an [`Identity`] extension.
//! Client errors are deferred so that `plain` routes ignore bad credentials
//! while `anon` and `auth` routes reject them. Server errors fail immediately.

use std::sync::Arc;

use axum::extract::{OriginalUri, Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;

use super::credential::{self, Credential, RetrievalError};
use super::jwt::{self, TokenSpec};
use super::scope::Scope;
use crate::errors::ApiError;
use crate::models::token::{Token, TokenType};
use crate::models::user::User;
use crate::AppState;

pub const TOKEN_REFRESH_HEADER: &str = "x-token-refresh";
pub const VPDB_USER_HEADER: &str = "x-vpdb-user-id";
pub const PROVIDER_USER_HEADER: &str = "x-user-id";

pub const APP_TOKENS_DISABLED: &str =
    "Your current plan does not allow the use of app tokens. Upgrade or contact an admin.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Jwt,
    Personal,
    Application,
}

#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub kind: TokenKind,
    pub scopes: Vec<Scope>,
    pub from_url: bool,
    /// Persisted app token id, if any.
    pub token_id: Option<String>,
    pub provider: Option<String>,
}

/// A client error detected during identification, raised later by the route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    pub status: StatusCode,
    pub message: String,
}

impl AuthFailure {
    fn from_error(err: &ApiError) -> Self {
        Self {
            status: err.status(),
            message: err.to_string(),
        }
    }

    pub fn to_error(&self) -> ApiError {
        match self.status {
            StatusCode::FORBIDDEN => ApiError::forbidden(self.message.clone()),
            StatusCode::BAD_REQUEST => ApiError::bad_request(self.message.clone()),
            _ => ApiError::unauthorized(self.message.clone()),
        }
    }
}

/// Who is calling, as far as the credential tells.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub user: Option<User>,
    pub token: Option<TokenInfo>,
    pub failure: Option<AuthFailure>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    fn failed(err: &ApiError) -> Self {
        Self {
            failure: Some(AuthFailure::from_error(err)),
            ..Self::default()
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    /// An application token that named no user. Only service routes take it.
    pub fn is_userless_application(&self) -> bool {
        self.user.is_none()
            && self
                .token
                .as_ref()
                .map_or(false, |t| t.kind == TokenKind::Application)
    }
}

struct Authenticated {
    identity: Identity,
    refresh: Option<String>,
}

/// Middleware: authenticates the credential, if any, and attaches the [`Identity`].
pub async fn identify(State(state): State<Arc<AppState>>, mut req: Request, next: Next) -> Response {
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|u| u.0.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let outcome = authenticate(&state, req.headers(), req.uri(), req.method(), &path).await;
    let (identity, refresh) = match outcome {
        Ok(auth) => (auth.identity, auth.refresh),
        Err(e) if e.is_server_error() => return e.into_response(),
        Err(e) => {
            tracing::debug!(path = %path, "deferring authentication failure: {}", e);
            (Identity::failed(&e), None)
        }
    };

    req.extensions_mut().insert(identity);
    let mut response = next.run(req).await;

    if let Some(token) = refresh {
        if let Ok(value) = HeaderValue::from_str(&token) {
            response.headers_mut().insert(TOKEN_REFRESH_HEADER, value);
        }
    }
    response
}

async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    uri: &axum::http::Uri,
    method: &Method,
    path: &str,
) -> Result<Authenticated, ApiError> {
    let raw = match credential::retrieve(headers, uri) {
        Ok(raw) => raw,
        Err(RetrievalError::Missing) => {
            return Ok(Authenticated {
                identity: Identity::anonymous(),
                refresh: None,
            })
        }
        Err(e) => return Err(ApiError::unauthorized(e.message())),
    };

    match Credential::from(raw) {
        Credential::AppToken { value, from_url } => {
            let identity = authenticate_app_token(state, &value, from_url, headers).await?;
            Ok(Authenticated {
                identity,
                refresh: None,
            })
        }
        Credential::Jwt { value, from_url } => {
            authenticate_jwt(state, &value, from_url, method, path).await
        }
    }
}

async fn authenticate_app_token(
    state: &AppState,
    value: &str,
    from_url: bool,
    headers: &HeaderMap,
) -> Result<Identity, ApiError> {
    if from_url {
        return Err(ApiError::unauthorized(
            "App tokens must be provided in the Authorization header.",
        ));
    }

    let tokens = state.db.repo::<Token>();
    let token = tokens
        .find_one(Token::value_filter(value))
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid app token."))?;

    let now = Utc::now();
    if token.is_expired(now) {
        return Err(ApiError::unauthorized(format!(
            "Token has expired at {}.",
            token.expires_at.to_rfc3339()
        )));
    }
    if !token.is_active {
        return Err(ApiError::unauthorized("Token is inactive."));
    }

    let owner = state
        .db
        .repo::<User>()
        .get(&token.created_by)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Token owner does not exist anymore."))?;
    if !owner.plan().map_or(false, |p| p.enable_app_tokens) {
        return Err(ApiError::unauthorized(APP_TOKENS_DISABLED));
    }

    let user = match token.token_type {
        TokenType::Personal => Some(owner),
        TokenType::Application => resolve_provider_user(state, &token, headers).await?,
    };
    if let Some(user) = &user {
        if !user.is_active {
            return Err(ApiError::forbidden(format!("User <{}> is disabled.", user.name)));
        }
    }

    tokens
        .modify(&token.id, move |t: &mut Token| {
            t.last_used_at = Some(now);
            Ok(())
        })
        .await?;

    Ok(Identity {
        user,
        token: Some(TokenInfo {
            kind: match token.token_type {
                TokenType::Personal => TokenKind::Personal,
                TokenType::Application => TokenKind::Application,
            },
            scopes: token.scopes.clone(),
            from_url,
            token_id: Some(token.id.clone()),
            provider: token.provider.clone(),
        }),
        failure: None,
    })
}

/// Resolves the user a provider token acts for. `None` if no user header is
/// present, which is only acceptable for service calls.
async fn resolve_provider_user(
    state: &AppState,
    token: &Token,
    headers: &HeaderMap,
) -> Result<Option<User>, ApiError> {
    let provider = token
        .provider
        .as_deref()
        .ok_or_else(|| ApiError::unauthorized("Application token has no provider."))?;
    let users = state.db.repo::<User>();

    if let Some(id) = header_str(headers, VPDB_USER_HEADER) {
        let user = users
            .get(id)
            .await?
            .ok_or_else(|| ApiError::bad_request(format!("No user with ID \"{}\".", id)))?;
        if !user.is_linked_to(provider) {
            return Err(ApiError::bad_request(format!(
                "User \"{}\" has never logged in via provider \"{}\".",
                id, provider
            )));
        }
        return Ok(Some(user));
    }

    if let Some(provider_id) = header_str(headers, PROVIDER_USER_HEADER) {
        let user = users
            .find_one(User::provider_filter(provider, provider_id))
            .await?
            .ok_or_else(|| {
                ApiError::bad_request(format!(
                    "No user with ID \"{}\" for provider \"{}\".",
                    provider_id, provider
                ))
            })?;
        return Ok(Some(user));
    }

    Ok(None)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

async fn authenticate_jwt(
    state: &AppState,
    value: &str,
    from_url: bool,
    method: &Method,
    path: &str,
) -> Result<Authenticated, ApiError> {
    let claims = jwt::verify(&state.config.secret, value)
        .map_err(|e| ApiError::unauthorized(e.message()))?;

    if from_url && claims.path.is_none() {
        return Err(ApiError::unauthorized(
            "Tokens that are valid for any path cannot be provided as query parameter.",
        ));
    }
    if let Some(token_path) = &claims.path {
        if token_path != path {
            return Err(ApiError::unauthorized(format!(
                "Token is only valid for \"{}\" but not for \"{}\".",
                token_path, path
            )));
        }
        if method != Method::GET && method != Method::HEAD {
            return Err(ApiError::unauthorized(
                "Path-restricted tokens are only valid for GET and HEAD requests.",
            ));
        }
    }

    let user = match state.db.repo::<User>().get(&claims.iss).await? {
        Some(user) => user,
        None => {
            tracing::warn!(user_id = %claims.iss, "valid JWT for unknown user");
            return Err(ApiError::forbidden(format!(
                "No user with ID {} found.",
                claims.iss
            )));
        }
    };
    if !user.is_active {
        tracing::warn!(user_id = %user.id, "JWT used by disabled user");
        return Err(ApiError::forbidden(format!("User <{}> is disabled.", user.name)));
    }

    let refresh = if claims.lifetime() == state.config.api_token_lifetime {
        let issued = jwt::issue(
            &state.config.secret,
            TokenSpec {
                user_id: &user.id,
                lifetime_secs: state.config.api_token_lifetime,
                scopes: claims.scp.clone(),
                path: None,
                refresh: true,
            },
        )?;
        Some(issued.token)
    } else {
        None
    };

    Ok(Authenticated {
        identity: Identity {
            user: Some(user),
            token: Some(TokenInfo {
                kind: TokenKind::Jwt,
                scopes: claims.scp,
                from_url,
                token_id: None,
                provider: None,
            }),
            failure: None,
        },
        refresh,
    })
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_roundtrips_status() {
        let f = AuthFailure::from_error(&ApiError::forbidden("nope"));
        assert_eq!(f.status, StatusCode::FORBIDDEN);
        assert_eq!(f.to_error().status(), StatusCode::FORBIDDEN);

        let f = AuthFailure::from_error(&ApiError::bad_request("header"));
        assert_eq!(f.to_error().status(), StatusCode::BAD_REQUEST);

        let f = AuthFailure::from_error(&ApiError::unauthorized("expired"));
        assert_eq!(f.to_error().to_string(), "expired");
    }

    #[test]
    fn test_header_str_ignores_blank() {
        let mut headers = HeaderMap::new();
        headers.insert(VPDB_USER_HEADER, HeaderValue::from_static("  "));
        assert!(header_str(&headers, VPDB_USER_HEADER).is_none());
        headers.insert(PROVIDER_USER_HEADER, HeaderValue::from_static(" 42 "));
        assert_eq!(header_str(&headers, PROVIDER_USER_HEADER), Some("42"));
    }
}
