use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use super::dispatch::{ensure_valid, success, ApiResult, Body, CurrentUser, Pagination, Success};
use super::stars::{find_target, target_event};
use crate::errors::{ApiError, FieldError};
use crate::middleware::api_cache::Invalidation;
use crate::middleware::events::log_async;
use crate::models::medium::{Medium, CATEGORIES};
use crate::models::new_id;
use crate::models::relation::{Kind, Target, TargetKind};
use crate::store::Query;
use crate::AppState;

async fn find_medium(state: &AppState, id: &str) -> Result<Medium, ApiError> {
    state
        .db
        .repo::<Medium>()
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No such medium with ID \"{}\".", id)))
}

pub async fn view(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    Ok(success(find_medium(&state, &id).await?, StatusCode::OK))
}

pub async fn list_for<K: Kind>(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    pagination: Pagination,
) -> ApiResult {
    let target = find_target(&state, K::KIND, &id).await?;
    let query = Query::filter(Medium::target_filter(target.kind, &target.id))
        .page(pagination.offset(), pagination.per_page());

    let media = state.db.repo::<Medium>();
    let count = media.count(&query).await?;
    let page = media.find(&query).await?;
    Ok(success(page, StatusCode::OK).list(&pagination, count))
}

#[derive(Debug, Deserialize)]
pub struct NewMedium {
    pub game_id: Option<String>,
    pub release_id: Option<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub file_id: String,
    pub description: Option<String>,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Body(req): Body<NewMedium>,
) -> ApiResult {
    let mut errors = Vec::new();
    if !CATEGORIES.contains(&req.category.as_str()) {
        errors.push(
            FieldError::new(
                "category",
                format!("Invalid category. Valid categories are: {}.", CATEGORIES.join(", ")),
            )
            .with_value(&req.category),
        );
    }
    if req.file_id.trim().is_empty() {
        errors.push(FieldError::new("file_id", "File ID must be provided."));
    }
    let target = match (&req.game_id, &req.release_id) {
        (Some(game_id), None) => Some((TargetKind::Game, game_id)),
        (None, Some(release_id)) => Some((TargetKind::Release, release_id)),
        _ => {
            errors.push(FieldError::new(
                "game_id",
                "Exactly one of game_id or release_id must be provided.",
            ));
            None
        }
    };
    ensure_valid(errors)?;
    let Some((kind, target_id)) = target else {
        return Err(ApiError::invalid("game_id", "Media must reference a game or a release."));
    };
    let target: Target = find_target(&state, kind, target_id).await?;

    let medium = Medium {
        id: new_id(),
        target: target.clone(),
        category: req.category,
        file_id: req.file_id.trim().to_string(),
        description: req.description,
        created_by: user.id.clone(),
        created_at: Utc::now(),
    };
    state.db.repo::<Medium>().insert(&medium).await?;

    state
        .cache
        .invalidate(
            &Invalidation::new()
                .resource("medium")
                .entity(target.kind.as_str(), &target.id),
        )
        .await?;
    tracing::info!(user = %user.name, medium = %medium.id, target = %target.kind, "medium added");
    log_async(
        &state,
        target_event("create_medium", &target, &user)
            .payload(json!({ "medium": medium.id, "category": medium.category })),
    );

    Ok(success(medium, StatusCode::CREATED))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult {
    let medium = find_medium(&state, &id).await?;
    if medium.created_by != user.id && !state.acl.is_allowed(&user, "media", "delete").await? {
        return Err(ApiError::forbidden("Only the owner can delete a medium."));
    }
    state.db.repo::<Medium>().delete(&id).await?;

    state
        .cache
        .invalidate(
            &Invalidation::new()
                .resource("medium")
                .entity(medium.target.kind.as_str(), &medium.target.id),
        )
        .await?;
    tracing::info!(user = %user.name, medium = %id, "medium deleted");
    log_async(
        &state,
        target_event("delete_medium", &medium.target, &user)
            .payload(json!({ "medium": id })),
    );
    Ok(Success::no_content())
}
