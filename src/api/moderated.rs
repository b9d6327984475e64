//! Handlers shared by every moderated resource (releases, backglasses, ROMs).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::json;

use super::dispatch::{
    success, ApiResult, Body, CurrentUser, MaybeUser, Pagination, Params, Success,
};
use crate::errors::ApiError;
use crate::middleware::api_cache::Invalidation;
use crate::middleware::events::log_async;
use crate::middleware::moderation::{self, Moderated, ModerationAction};
use crate::models::comment::Comment;
use crate::models::log_event::LogEvent;
use crate::models::medium::Medium;
use crate::models::relation::{Rating, Star, Target, TargetKind};
use crate::models::user::User;
use crate::store::Query;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ModeratedFilter {
    pub moderation: Option<String>,
    pub game_id: Option<String>,
}

pub async fn list<T: Moderated>(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    Params(filter): Params<ModeratedFilter>,
    pagination: Pagination,
) -> ApiResult {
    let mut conditions = moderation::list_filter(
        state.acl.as_ref(),
        user.as_ref(),
        T::ACL_RESOURCE,
        filter.moderation.as_deref(),
    )
    .await?
    .unwrap_or_else(|| json!({}));
    if let Some(game_id) = filter.game_id {
        conditions["game_id"] = json!(game_id);
    }
    let query = Query::filter(conditions).page(pagination.offset(), pagination.per_page());

    let repo = state.db.repo::<T>();
    let count = repo.count(&query).await?;
    let page = repo.find(&query).await?;
    Ok(success(page, StatusCode::OK).list(&pagination, count))
}

fn not_found<T: Moderated>(id: &str) -> ApiError {
    ApiError::not_found(format!("No such {} with ID \"{}\".", T::ENTITY, id))
}

pub async fn view<T: Moderated>(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<String>,
) -> ApiResult {
    let entity = state
        .db
        .repo::<T>()
        .get(&id)
        .await?
        .ok_or_else(|| not_found::<T>(&id))?;
    if !moderation::is_visible(state.acl.as_ref(), user.as_ref(), &entity).await? {
        return Err(not_found::<T>(&id));
    }
    Ok(success(entity, StatusCode::OK))
}

/// Creators may delete their own entities; `delete` on the resource allows any.
pub async fn remove<T: Moderated>(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult {
    let entity = state
        .db
        .repo::<T>()
        .get(&id)
        .await?
        .ok_or_else(|| not_found::<T>(&id))?;
    if entity.created_by() != user.id
        && !state.acl.is_allowed(&user, T::ACL_RESOURCE, "delete").await?
    {
        return Err(ApiError::forbidden(format!(
            "Only the owner can delete a {}.",
            T::ENTITY
        )));
    }

    if let Some(kind) = T::TARGET {
        let target = Target::new(kind, &id);
        state.db.relations::<Rating>().delete_for(&target).await?;
        state.db.relations::<Star>().delete_for(&target).await?;
        state
            .db
            .repo::<Medium>()
            .delete_matching(Medium::target_filter(kind, &id))
            .await?;
        if kind == TargetKind::Release {
            state
                .db
                .repo::<Comment>()
                .delete_matching(Comment::release_filter(&id))
                .await?;
        }
    }
    state.db.repo::<T>().delete(&id).await?;

    state.cache.invalidate(&invalidation::<T>(&entity)).await?;
    tracing::info!(user = %user.name, entity = T::ENTITY, id = %id, "moderated entity deleted");
    log_async(
        &state,
        event_for(&format!("delete_{}", T::ENTITY), &entity, &user).payload(json!({ "id": id })),
    );
    Ok(Success::no_content())
}

#[derive(Debug, Deserialize)]
pub struct ModerateRequest {
    pub action: ModerationAction,
    pub message: Option<String>,
}

pub async fn moderate<T: Moderated>(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Body(req): Body<ModerateRequest>,
) -> ApiResult {
    let message = req.message.clone();
    let updated: T = moderation::moderate(&state.db, &id, req.action, req.message, &user).await?;

    state.cache.invalidate(&invalidation::<T>(&updated)).await?;
    tracing::info!(
        moderator = %user.name,
        entity = T::ENTITY,
        id = %id,
        action = ?req.action,
        "moderation applied"
    );
    log_async(
        &state,
        event_for(&format!("moderate_{}", T::ENTITY), &updated, &user)
            .payload(json!({ "id": id, "action": req.action, "message": message })),
    );
    Ok(success(updated, StatusCode::OK))
}

/// Cache sets affected by a change to `entity`.
pub(super) fn invalidation<T: Moderated>(entity: &T) -> Invalidation {
    Invalidation::new()
        .resource(T::ENTITY)
        .entity(T::ENTITY, entity.id())
        .entity("game", entity.game_id())
}

/// A log event referencing `entity` and its game.
pub(super) fn event_for<T: Moderated>(name: &str, entity: &T, actor: &User) -> LogEvent {
    let event = LogEvent::new(name).actor(Some(&actor.id)).game(entity.game_id());
    match T::TARGET {
        Some(TargetKind::Release) => event.release(entity.id()),
        Some(TargetKind::Backglass) => event.backglass(entity.id()),
        _ => event,
    }
}
