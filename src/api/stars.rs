//! Stars on games, releases and backglasses, one per user and target.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde_json::json;

use super::dispatch::{success, ApiResult, CurrentUser, Success};
use crate::errors::ApiError;
use crate::middleware::api_cache::Invalidation;
use crate::middleware::events::log_async;
use crate::models::backglass::Backglass;
use crate::models::game::Game;
use crate::models::log_event::LogEvent;
use crate::models::relation::{Kind, Star, Target, TargetKind};
use crate::models::release::Release;
use crate::models::user::User;
use crate::models::Counter;
use crate::store::{Document, StoreError};
use crate::AppState;

/// Resolves the target entity, or 404.
pub(super) async fn find_target(
    state: &AppState,
    kind: TargetKind,
    id: &str,
) -> Result<Target, ApiError> {
    let exists = match kind {
        TargetKind::Game => state.db.repo::<Game>().get(id).await?.is_some(),
        TargetKind::Release => state.db.repo::<Release>().get(id).await?.is_some(),
        TargetKind::Backglass => state.db.repo::<Backglass>().get(id).await?.is_some(),
    };
    if !exists {
        return Err(ApiError::not_found(format!("No such {} with ID \"{}\".", kind, id)));
    }
    Ok(Target::new(kind, id))
}

/// A log event referencing `target`.
pub(super) fn target_event(name: &str, target: &Target, actor: &User) -> LogEvent {
    let event = LogEvent::new(name).actor(Some(&actor.id));
    match target.kind {
        TargetKind::Game => event.game(&target.id),
        TargetKind::Release => event.release(&target.id),
        TargetKind::Backglass => event.backglass(&target.id),
    }
}

fn game_counter(g: &mut Game) -> &mut Counter {
    &mut g.counter
}

fn release_counter(r: &mut Release) -> &mut Counter {
    &mut r.counter
}

fn backglass_counter(b: &mut Backglass) -> &mut Counter {
    &mut b.counter
}

async fn bump<T: Document>(
    state: &AppState,
    id: &str,
    counter: fn(&mut T) -> &mut Counter,
    delta: i64,
) -> Result<u64, ApiError> {
    let updated = state
        .db
        .repo::<T>()
        .modify(id, move |doc: &mut T| {
            let c = counter(doc);
            c.stars = c.stars.saturating_add_signed(delta);
            Ok(())
        })
        .await?;
    Ok(updated.map_or(0, |mut doc| counter(&mut doc).stars))
}

/// Adjusts the target's star counter and returns the new total.
async fn count_stars(state: &AppState, target: &Target, delta: i64) -> Result<u64, ApiError> {
    match target.kind {
        TargetKind::Game => bump::<Game>(state, &target.id, game_counter, delta).await,
        TargetKind::Release => bump::<Release>(state, &target.id, release_counter, delta).await,
        TargetKind::Backglass => bump::<Backglass>(state, &target.id, backglass_counter, delta).await,
    }
}

async fn invalidate(state: &AppState, target: &Target) -> Result<(), ApiError> {
    state
        .cache
        .invalidate(
            &Invalidation::new()
                .resource(target.kind.as_str())
                .entity(target.kind.as_str(), &target.id),
        )
        .await?;
    Ok(())
}

fn not_starred(target: &Target) -> ApiError {
    ApiError::not_found(format!("You haven't starred this {} yet.", target.kind))
}

pub async fn view<K: Kind>(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult {
    let target = find_target(&state, K::KIND, &id).await?;
    let star = state
        .db
        .relations::<Star>()
        .find(&target, &user.id)
        .await?
        .ok_or_else(|| not_starred(&target))?;
    Ok(success(json!({ "created_at": star.created_at }), StatusCode::OK))
}

pub async fn create<K: Kind>(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult {
    let target = find_target(&state, K::KIND, &id).await?;
    let star = Star::new(target.clone(), &user.id);
    state
        .db
        .relations::<Star>()
        .insert(&star)
        .await
        .map_err(|e| match e {
            StoreError::Conflict(_) => {
                ApiError::bad_request(format!("You've already starred this {}.", target.kind))
            }
            other => other.into(),
        })?;

    let total = count_stars(&state, &target, 1).await?;
    invalidate(&state, &target).await?;
    tracing::debug!(user = %user.name, target = %target.kind, id = %target.id, total, "starred");
    log_async(
        &state,
        target_event(&format!("star_{}", target.kind), &target, &user),
    );

    Ok(success(
        json!({ "created_at": star.created_at, "total_stars": total }),
        StatusCode::CREATED,
    ))
}

pub async fn remove<K: Kind>(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult {
    let target = find_target(&state, K::KIND, &id).await?;
    if !state.db.relations::<Star>().delete(&target, &user.id).await? {
        return Err(not_starred(&target));
    }

    count_stars(&state, &target, -1).await?;
    invalidate(&state, &target).await?;
    log_async(
        &state,
        target_event(&format!("unstar_{}", target.kind), &target, &user),
    );
    Ok(Success::no_content())
}
