use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use super::dispatch::{client_ip, ensure_valid, success, ApiResult, Body, CurrentUser};
use super::moderated::{event_for, invalidation};
use crate::errors::{ApiError, FieldError};
use crate::middleware::events::log_async;
use crate::middleware::moderation::{self, Moderated};
use crate::models::game::Game;
use crate::models::release::Release;
use crate::models::{new_id, Counter, RatingSummary};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct NewRelease {
    #[serde(default)]
    pub game_id: String,
    #[serde(default)]
    pub name: String,
    pub description: Option<String>,
}

/// Checks that the referenced game exists, as a field error on `game_id`.
pub(super) async fn check_game(
    state: &AppState,
    game_id: &str,
) -> Result<Option<FieldError>, ApiError> {
    if game_id.trim().is_empty() {
        return Ok(Some(FieldError::new("game_id", "Game ID must be provided.")));
    }
    match state.db.repo::<Game>().get(game_id).await? {
        Some(_) => Ok(None),
        None => Ok(Some(
            FieldError::new("game_id", format!("No such game with ID \"{}\".", game_id))
                .with_value(game_id),
        )),
    }
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    headers: HeaderMap,
    Body(req): Body<NewRelease>,
) -> ApiResult {
    let mut errors: Vec<FieldError> = check_game(&state, &req.game_id).await?.into_iter().collect();
    if req.name.trim().is_empty() {
        errors.push(FieldError::new("name", "Name must be provided."));
    }
    ensure_valid(errors)?;

    let moderation =
        moderation::on_create(state.acl.as_ref(), &user, Release::ACL_RESOURCE).await?;
    let release = Release {
        id: new_id(),
        game_id: req.game_id,
        name: req.name.trim().to_string(),
        description: req.description,
        moderation,
        counter: Counter::default(),
        rating: RatingSummary::default(),
        created_by: user.id.clone(),
        created_at: Utc::now(),
    };
    state.db.repo::<Release>().insert(&release).await?;

    state.cache.invalidate(&invalidation(&release)).await?;
    tracing::info!(
        user = %user.name,
        release = %release.id,
        auto_approved = release.moderation.auto_approved,
        "release created"
    );
    let event = event_for("create_release", &release, &user)
        .payload(json!({ "name": release.name }))
        .ip(client_ip(&headers));
    log_async(
        &state,
        if release.moderation.is_approved { event } else { event.private() },
    );

    Ok(success(release, StatusCode::CREATED))
}
