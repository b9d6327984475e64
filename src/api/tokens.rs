use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use super::dispatch::{
    check_read_only_fields, ensure_valid, success, ApiResult, Body, CurrentUser, Params, Success,
};
use crate::errors::{ApiError, FieldError};
use crate::middleware::events::log_async;
use crate::middleware::scope::{self, Scope};
use crate::models::log_event::LogEvent;
use crate::models::token::{Token, TokenType, TokenView};
use crate::models::user::User;
use crate::store::Query;
use crate::AppState;

const UPDATABLE_FIELDS: &[&str] = &["label", "is_active", "expires_at"];

#[derive(Debug, Default, Deserialize)]
pub struct TokenFilter {
    #[serde(rename = "type")]
    pub token_type: Option<TokenType>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Params(filter): Params<TokenFilter>,
) -> ApiResult {
    let mut conditions = Token::owner_filter(&user.id);
    if let Some(token_type) = filter.token_type {
        conditions["type"] = json!(token_type);
    }
    let tokens = state.db.repo::<Token>().find(&Query::filter(conditions)).await?;
    let views: Vec<TokenView> = tokens.iter().map(TokenView::new).collect();
    Ok(success(views, StatusCode::OK))
}

#[derive(Debug, Deserialize)]
pub struct NewToken {
    pub label: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(rename = "type", default = "default_type")]
    pub token_type: TokenType,
    pub provider: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_type() -> TokenType {
    TokenType::Personal
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Body(req): Body<NewToken>,
) -> ApiResult {
    let now = Utc::now();
    let mut errors = Vec::new();

    let mut scopes = Vec::new();
    for (i, name) in req.scopes.iter().enumerate() {
        match name.parse::<Scope>() {
            Ok(s) if scope::scopes_for(req.token_type).contains(&s) => scopes.push(s),
            Ok(s) => errors.push(
                FieldError::new(
                    format!("scopes.{}", i),
                    format!(
                        "Scope \"{}\" is not allowed for {} tokens. Valid scopes are {}.",
                        s,
                        type_name(req.token_type),
                        scope::describe(scope::scopes_for(req.token_type))
                    ),
                )
                .with_value(name),
            ),
            Err(message) => {
                errors.push(FieldError::new(format!("scopes.{}", i), message).with_value(name))
            }
        }
    }
    if req.scopes.is_empty() {
        errors.push(FieldError::new("scopes", "You must provide at least one scope."));
    }
    if let Some(expires_at) = req.expires_at {
        if expires_at <= now {
            errors.push(FieldError::new("expires_at", "Expiry must be in the future.").with_value(expires_at));
        }
    }

    let provider = match req.token_type {
        TokenType::Application => {
            if !state.acl.is_allowed(&user, "tokens", "provider-token").await? {
                return Err(ApiError::forbidden("Permission denied to create provider tokens."));
            }
            match req.provider.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
                Some(provider) => Some(provider.to_string()),
                None => {
                    errors.push(FieldError::new("provider", "Provider is required for application tokens."));
                    None
                }
            }
        }
        TokenType::Personal => None,
    };
    ensure_valid(errors)?;

    if scopes.contains(&Scope::Login) {
        check_password(&user, req.password.as_deref())?;
    }

    let token = Token {
        id: crate::models::new_id(),
        token: Token::generate_value(),
        label: req
            .label
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| format!("{} token", type_name(req.token_type))),
        token_type: req.token_type,
        scopes,
        provider,
        is_active: true,
        expires_at: req
            .expires_at
            .unwrap_or_else(|| now + Duration::days(state.config.personal_token_lifetime_days)),
        last_used_at: None,
        created_by: user.id.clone(),
        created_at: now,
    };
    state.db.repo::<Token>().insert(&token).await?;

    tracing::info!(
        user = %user.name,
        token_id = %token.id,
        scopes = %scope::describe(&token.scopes),
        "token created"
    );
    log_async(
        &state,
        LogEvent::new("create_token")
            .actor(Some(&user.id))
            .user(&user.id)
            .payload(json!({ "token_id": token.id, "type": token.token_type, "scopes": token.scopes }))
            .private(),
    );

    Ok(success(TokenView::revealed(&token), StatusCode::CREATED))
}

fn check_password(user: &User, password: Option<&str>) -> Result<(), ApiError> {
    match password {
        None => Err(ApiError::unauthorized(
            "You must supply your password when creating a login token.",
        )),
        Some(password) if !user.verify_password(password) => {
            tracing::warn!(user = %user.name, "wrong password when creating login token");
            Err(ApiError::unauthorized("Wrong password."))
        }
        Some(_) => Ok(()),
    }
}

fn type_name(token_type: TokenType) -> &'static str {
    match token_type {
        TokenType::Personal => "personal",
        TokenType::Application => "application",
    }
}

async fn owned_token(state: &AppState, user: &User, id: &str) -> Result<Token, ApiError> {
    state
        .db
        .repo::<Token>()
        .get(id)
        .await?
        .filter(|t| t.created_by == user.id)
        .ok_or_else(|| ApiError::not_found(format!("No such token with ID \"{}\".", id)))
}

pub async fn view(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult {
    let token = owned_token(&state, &user, &id).await?;
    Ok(success(TokenView::new(&token), StatusCode::OK))
}

#[derive(Debug, Deserialize)]
struct TokenUpdate {
    label: Option<String>,
    is_active: Option<bool>,
    expires_at: Option<DateTime<Utc>>,
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Body(body): Body<Value>,
) -> ApiResult {
    let token = owned_token(&state, &user, &id).await?;
    let old = serde_json::to_value(TokenView::new(&token)).map_err(anyhow::Error::from)?;
    ensure_valid(check_read_only_fields(&body, &old, UPDATABLE_FIELDS))?;

    let update: TokenUpdate =
        serde_json::from_value(body).map_err(|e| ApiError::bad_request(e.to_string()))?;
    if let Some(label) = &update.label {
        if label.trim().is_empty() {
            return Err(ApiError::invalid("label", "Label must not be empty."));
        }
    }

    let updated = state
        .db
        .repo::<Token>()
        .modify(&id, move |t: &mut Token| {
            if let Some(label) = update.label {
                t.label = label;
            }
            if let Some(is_active) = update.is_active {
                t.is_active = is_active;
            }
            if let Some(expires_at) = update.expires_at {
                t.expires_at = expires_at;
            }
            Ok(())
        })
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No such token with ID \"{}\".", id)))?;

    tracing::info!(user = %user.name, token_id = %id, is_active = updated.is_active, "token updated");
    Ok(success(TokenView::new(&updated), StatusCode::OK))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult {
    let token = owned_token(&state, &user, &id).await?;
    state.db.repo::<Token>().delete(&token.id).await?;

    tracing::info!(user = %user.name, token_id = %id, "token deleted");
    log_async(
        &state,
        LogEvent::new("delete_token")
            .actor(Some(&user.id))
            .user(&user.id)
            .payload(json!({ "token_id": id, "label": token.label }))
            .private(),
    );
    Ok(Success::no_content())
}
