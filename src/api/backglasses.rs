use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use serde::Deserialize;

use super::dispatch::{client_ip, ensure_valid, success, ApiResult, Body, CurrentUser};
use super::moderated::{event_for, invalidation};
use super::releases::check_game;
use crate::middleware::events::log_async;
use crate::middleware::moderation::{self, Moderated};
use crate::models::backglass::Backglass;
use crate::models::{new_id, Counter};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct NewBackglass {
    #[serde(default)]
    pub game_id: String,
    pub description: Option<String>,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    headers: HeaderMap,
    Body(req): Body<NewBackglass>,
) -> ApiResult {
    ensure_valid(check_game(&state, &req.game_id).await?.into_iter().collect())?;

    let moderation =
        moderation::on_create(state.acl.as_ref(), &user, Backglass::ACL_RESOURCE).await?;
    let backglass = Backglass {
        id: new_id(),
        game_id: req.game_id,
        description: req.description,
        moderation,
        counter: Counter::default(),
        created_by: user.id.clone(),
        created_at: Utc::now(),
    };
    state.db.repo::<Backglass>().insert(&backglass).await?;

    state.cache.invalidate(&invalidation(&backglass)).await?;
    tracing::info!(
        user = %user.name,
        backglass = %backglass.id,
        auto_approved = backglass.moderation.auto_approved,
        "backglass created"
    );
    let event = event_for("create_backglass", &backglass, &user).ip(client_ip(&headers));
    log_async(
        &state,
        if backglass.moderation.is_approved { event } else { event.private() },
    );

    Ok(success(backglass, StatusCode::CREATED))
}
