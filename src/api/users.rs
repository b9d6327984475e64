use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::dispatch::{
    dirty_key, ensure_valid, success, ApiResult, Body, CurrentUser, MaybeUser, Pagination, Params,
    Provider,
};
use crate::errors::{ApiError, FieldError};
use crate::middleware::acl::find_role;
use crate::middleware::api_cache::Invalidation;
use crate::middleware::events::log_async;
use crate::models::log_event::LogEvent;
use crate::models::plan;
use crate::models::user::{ProfileView, User, UserView};
use crate::store::Query;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct UserFilter {
    pub name: Option<String>,
    pub role: Option<String>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Params(filter): Params<UserFilter>,
    pagination: Pagination,
) -> ApiResult {
    let mut conditions = Map::new();
    if let Some(name) = filter.name {
        conditions.insert("name".into(), json!(name));
    }
    if let Some(role) = filter.role {
        conditions.insert("roles".into(), json!([role]));
    }
    let query = Query::filter(Value::Object(conditions))
        .page(pagination.offset(), pagination.per_page());

    let users = state.db.repo::<User>();
    let count = users.count(&query).await?;
    let views: Vec<ProfileView> = users.find(&query).await?.iter().map(ProfileView::from).collect();
    Ok(success(views, StatusCode::OK).list(&pagination, count))
}

/// Public profile, or the full one for callers allowed to view users.
pub async fn view(
    State(state): State<Arc<AppState>>,
    MaybeUser(caller): MaybeUser,
    Path(id): Path<String>,
) -> ApiResult {
    let user = state
        .db
        .repo::<User>()
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No such user with ID \"{}\".", id)))?;

    let full = match &caller {
        Some(caller) => caller.id == user.id || state.acl.is_allowed(caller, "users", "view").await?,
        None => false,
    };
    if full {
        Ok(success(ProfileView::from(&user), StatusCode::OK))
    } else {
        Ok(success(UserView::from(&user), StatusCode::OK))
    }
}

/// Drops cached responses for the user after an out-of-band change and, if
/// `dirty`, flags them so their client reloads the profile.
pub async fn user_changed(state: &AppState, user_id: &str, dirty: bool) -> Result<(), ApiError> {
    state
        .cache
        .invalidate(&Invalidation::new().entity("user", user_id).user(user_id))
        .await?;
    if dirty {
        state.kv.set(&dirty_key(user_id), "1", None).await?;
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub roles: Option<Vec<String>>,
    pub plan: Option<String>,
    pub is_active: Option<bool>,
}

/// Administrative update. The user is flagged dirty so their client reloads.
pub async fn update(
    State(state): State<Arc<AppState>>,
    CurrentUser(admin): CurrentUser,
    Path(id): Path<String>,
    Body(update): Body<UserUpdate>,
) -> ApiResult {
    let users = state.db.repo::<User>();
    let user = users
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No such user with ID \"{}\".", id)))?;

    let mut errors = Vec::new();
    if let Some(roles) = &update.roles {
        for (i, role) in roles.iter().enumerate() {
            if find_role(role).is_none() {
                errors.push(
                    FieldError::new(format!("roles.{}", i), format!("Unknown role \"{}\".", role))
                        .with_value(role),
                );
            }
        }
        let touches_root = roles.iter().any(|r| r == "root") != user.has_role("root");
        if touches_root && !admin.has_role("root") {
            return Err(ApiError::forbidden("Only root users can change the root role."));
        }
    }
    if let Some(plan) = &update.plan {
        if plan::find(plan).is_none() {
            errors.push(FieldError::new("plan", format!("Unknown plan \"{}\".", plan)).with_value(plan));
        }
    }
    if let Some(email) = &update.email {
        if !email.contains('@') {
            errors.push(FieldError::new("email", "Email must be a valid address.").with_value(email));
        }
    }
    ensure_valid(errors)?;

    let UserUpdate { name, email, roles, plan, is_active } = update;
    let updated = users
        .modify(&id, move |u: &mut User| {
            if let Some(name) = name {
                u.name = name;
            }
            if let Some(email) = email {
                u.email = email.to_lowercase();
            }
            if let Some(roles) = roles {
                u.roles = roles;
            }
            if let Some(plan) = plan {
                u.plan = plan;
            }
            if let Some(is_active) = is_active {
                u.is_active = is_active;
            }
            Ok(())
        })
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No such user with ID \"{}\".", id)))?;

    user_changed(&state, &id, admin.id != id).await?;

    tracing::info!(
        admin = %admin.name,
        user = %updated.name,
        roles = ?updated.roles,
        plan = %updated.plan,
        "user updated"
    );
    log_async(
        &state,
        LogEvent::new("update_user")
            .actor(Some(&admin.id))
            .user(&id)
            .payload(json!({
                "roles": updated.roles,
                "plan": updated.plan,
                "is_active": updated.is_active,
            }))
            .private(),
    );

    Ok(success(ProfileView::from(&updated), StatusCode::OK))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderUser {
    #[serde(default)]
    pub provider_id: String,
    #[serde(default)]
    pub email: String,
    pub username: Option<String>,
}

/// Registers a user logged in at a provider, or links the existing account.
///
/// Lookup is by provider id first, then by email. Unknown users are created
/// without a password on the default plan.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Provider(provider): Provider,
    Body(req): Body<ProviderUser>,
) -> ApiResult {
    let provider_id = req.provider_id.trim().to_string();
    let email = req.email.trim().to_lowercase();
    let mut errors = Vec::new();
    if provider_id.is_empty() {
        errors.push(FieldError::new("provider_id", "Provider ID must be provided."));
    }
    if !email.contains('@') {
        errors.push(FieldError::new("email", "Email must be a valid address.").with_value(&email));
    }
    ensure_valid(errors)?;

    let users = state.db.repo::<User>();
    let existing = match users
        .find_one(User::provider_filter(&provider, &provider_id))
        .await?
    {
        Some(user) => Some(user),
        None => users.find_one(User::email_filter(&email)).await?,
    };

    let (user, status) = match existing {
        Some(user) => {
            if !user.is_active {
                return Err(ApiError::forbidden(format!("User <{}> is disabled.", user.name)));
            }
            let (p, pid) = (provider.clone(), provider_id.clone());
            let linked = users
                .modify(&user.id, move |u: &mut User| {
                    u.providers.insert(p, pid);
                    Ok(())
                })
                .await?
                .ok_or_else(|| ApiError::not_found("User does not exist anymore."))?;
            (linked, StatusCode::OK)
        }
        None => {
            let name =
                available_name(&state, req.username.as_deref(), &email, &provider_id).await?;
            let mut user = User::without_password(&name, &email, &state.config.default_plan);
            user.providers.insert(provider.clone(), provider_id.clone());
            users.insert(&user).await?;
            (user, StatusCode::CREATED)
        }
    };

    user_changed(&state, &user.id, false).await?;

    tracing::info!(
        provider = %provider,
        user = %user.name,
        status = %status,
        "provider user registered"
    );
    log_async(
        &state,
        LogEvent::new(if status == StatusCode::CREATED { "create_user" } else { "update_user" })
            .user(&user.id)
            .payload(json!({ "provider": provider, "provider_id": provider_id }))
            .private(),
    );

    Ok(success(ProfileView::from(&user), status))
}

/// The requested name, or the email's local part, made unique with the
/// provider id if taken.
async fn available_name(
    state: &AppState,
    username: Option<&str>,
    email: &str,
    provider_id: &str,
) -> Result<String, ApiError> {
    let base = username
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .or_else(|| email.split('@').next())
        .unwrap_or(provider_id)
        .to_string();
    let users = state.db.repo::<User>();
    if users.find_one(User::name_filter(&base)).await?.is_none() {
        return Ok(base);
    }
    Ok(format!("{}-{}", base, provider_id))
}
