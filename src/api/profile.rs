use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use super::dispatch::{check_read_only_fields, ensure_valid, success, ApiResult, Body, CurrentUser};
use crate::errors::{ApiError, FieldError};
use crate::middleware::api_cache::Invalidation;
use crate::middleware::events::log_async;
use crate::models::log_event::LogEvent;
use crate::models::user::{hash_password, ProfileView, User};
use crate::AppState;

const UPDATABLE_FIELDS: &[&str] = &["name", "email", "password", "current_password"];

const MIN_NAME_LENGTH: usize = 3;
const MIN_PASSWORD_LENGTH: usize = 6;

#[derive(Debug, Deserialize)]
struct ProfileUpdate {
    name: Option<String>,
    email: Option<String>,
    password: Option<String>,
    current_password: Option<String>,
}

pub async fn view(CurrentUser(user): CurrentUser) -> ApiResult {
    Ok(success(ProfileView::from(&user), StatusCode::OK))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Body(body): Body<Value>,
) -> ApiResult {
    let old = serde_json::to_value(ProfileView::from(&user)).map_err(anyhow::Error::from)?;
    ensure_valid(check_read_only_fields(&body, &old, UPDATABLE_FIELDS))?;
    let update: ProfileUpdate =
        serde_json::from_value(body).map_err(|e| ApiError::bad_request(e.to_string()))?;

    let mut errors = Vec::new();
    if let Some(name) = &update.name {
        if name.trim().chars().count() < MIN_NAME_LENGTH {
            errors.push(FieldError::new("name", "Username must be at least 3 characters long.").with_value(name));
        } else if name != &user.name && is_taken(&state, User::name_filter(name), &user.id).await? {
            errors.push(FieldError::new("name", "Username is already taken.").with_value(name));
        }
    }
    if let Some(email) = &update.email {
        if !email.contains('@') {
            errors.push(FieldError::new("email", "Email must be a valid address.").with_value(email));
        } else if !email.eq_ignore_ascii_case(&user.email)
            && is_taken(&state, User::email_filter(email), &user.id).await?
        {
            errors.push(FieldError::new("email", "Email is already registered.").with_value(email));
        }
    }
    if let Some(password) = &update.password {
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            errors.push(FieldError::new("password", "Password must be at least 6 characters long."));
        }
        match &update.current_password {
            None => errors.push(FieldError::new(
                "current_password",
                "You must provide your current password.",
            )),
            Some(current) if !user.verify_password(current) => {
                return Err(ApiError::unauthorized("Invalid password."));
            }
            Some(_) => {}
        }
    }
    ensure_valid(errors)?;

    let ProfileUpdate { name, email, password, .. } = update;
    let changed_password = password.is_some();
    let password_hash = password.as_deref().map(hash_password).transpose()?;
    let updated = state
        .db
        .repo::<User>()
        .modify(&user.id, move |u: &mut User| {
            if let Some(name) = name {
                u.name = name.trim().to_string();
            }
            if let Some(email) = email {
                u.email = email.to_lowercase();
            }
            if let Some(hash) = password_hash {
                u.password_hash = hash;
            }
            Ok(())
        })
        .await?
        .ok_or_else(|| ApiError::not_found("User does not exist anymore."))?;

    state
        .cache
        .invalidate(&Invalidation::new().entity("user", &user.id).user(&user.id))
        .await?;
    log_async(
        &state,
        LogEvent::new("update_user")
            .actor(Some(&user.id))
            .user(&user.id)
            .payload(serde_json::json!({ "password_changed": changed_password }))
            .private(),
    );
    tracing::info!(user = %updated.name, "profile updated");

    Ok(success(ProfileView::from(&updated), StatusCode::OK))
}

async fn is_taken(state: &AppState, filter: Value, own_id: &str) -> Result<bool, ApiError> {
    let other = state.db.repo::<User>().find_one(filter).await?;
    Ok(other.map_or(false, |u| u.id != own_id))
}
