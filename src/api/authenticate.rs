use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::dispatch::{client_ip, success, ApiResult, Body, CurrentUser};
use crate::errors::ApiError;
use crate::middleware::authn::APP_TOKENS_DISABLED;
use crate::middleware::events::log_async;
use crate::middleware::jwt::{self, TokenSpec};
use crate::middleware::scope::Scope;
use crate::models::log_event::LogEvent;
use crate::models::token::{Token, TokenType};
use crate::models::user::{ProfileView, User};
use crate::AppState;

const BAD_CREDENTIALS: &str = "Wrong username or password.";

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Session {
    pub token: String,
    pub expires: DateTime<Utc>,
    pub user: ProfileView,
}

/// Exchanges a username and password, or a personal login token, for an API token.
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Body(creds): Body<Credentials>,
) -> ApiResult {
    let (user, via) = match (&creds.username, &creds.password, &creds.token) {
        (Some(username), Some(password), _) => {
            (by_password(&state, username, password).await?, "password")
        }
        (_, _, Some(token)) => (by_login_token(&state, token).await?, "token"),
        _ => {
            return Err(ApiError::bad_request(
                "You must supply a username and password or a login token.",
            ))
        }
    };

    if !user.is_active {
        tracing::warn!(user = %user.name, "login attempt on disabled account");
        return Err(ApiError::forbidden("Inactive account. Please contact an administrator."));
    }

    let issued = jwt::issue(
        &state.config.secret,
        TokenSpec {
            user_id: &user.id,
            lifetime_secs: state.config.api_token_lifetime,
            scopes: vec![Scope::All],
            path: None,
            refresh: false,
        },
    )?;

    tracing::info!(user = %user.name, via, "user authenticated");
    log_async(
        &state,
        LogEvent::new("authenticate")
            .actor(Some(&user.id))
            .user(&user.id)
            .payload(json!({ "via": via }))
            .ip(client_ip(&headers))
            .private(),
    );

    Ok(success(
        Session {
            token: issued.token,
            expires: issued.expires,
            user: ProfileView::from(&user),
        },
        StatusCode::OK,
    ))
}

async fn by_password(state: &AppState, username: &str, password: &str) -> Result<User, ApiError> {
    let user = state
        .db
        .repo::<User>()
        .find_one(User::name_filter(username))
        .await?;
    match user {
        Some(user) if user.verify_password(password) => Ok(user),
        _ => {
            tracing::warn!(username, "failed login");
            Err(ApiError::unauthorized(BAD_CREDENTIALS))
        }
    }
}

async fn by_login_token(state: &AppState, value: &str) -> Result<User, ApiError> {
    let tokens = state.db.repo::<Token>();
    let token = tokens
        .find_one(Token::value_filter(value))
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid token."))?;

    if token.token_type != TokenType::Personal {
        return Err(ApiError::unauthorized("Only personal tokens can be used to log in."));
    }
    if !token.is_active {
        return Err(ApiError::unauthorized("Token is inactive."));
    }
    let now = Utc::now();
    if token.is_expired(now) {
        return Err(ApiError::unauthorized(format!(
            "Token has expired at {}.",
            token.expires_at.to_rfc3339()
        )));
    }
    if !token.scopes.contains(&Scope::Login) {
        return Err(ApiError::unauthorized("Token must have the login scope."));
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

    tokens
        .modify(&token.id, move |t: &mut Token| {
            t.last_used_at = Some(now);
            Ok(())
        })
        .await?;
    Ok(owner)
}

#[derive(Debug, Deserialize)]
pub struct StorageRequest {
    #[serde(default)]
    pub paths: Vec<String>,
}

/// Issues short-lived tokens bound to single storage paths.
pub async fn storage_tokens(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Body(req): Body<StorageRequest>,
) -> ApiResult {
    if req.paths.is_empty() {
        return Err(ApiError::bad_request("You must provide the paths of the storage tokens."));
    }

    let mut tokens = BTreeMap::new();
    for path in req.paths {
        let issued = jwt::issue(
            &state.config.secret,
            TokenSpec {
                user_id: &user.id,
                lifetime_secs: state.config.storage_token_lifetime,
                scopes: vec![Scope::Storage],
                path: Some(&path),
                refresh: false,
            },
        )?;
        tokens.insert(path, issued.token);
    }
    tracing::debug!(user = %user.name, count = tokens.len(), "issued storage tokens");
    Ok(success(tokens, StatusCode::OK))
}
