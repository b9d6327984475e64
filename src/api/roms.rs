use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use super::dispatch::{client_ip, ensure_valid, success, ApiResult, Body, CurrentUser};
use super::moderated::{event_for, invalidation};
use super::releases::check_game;
use crate::errors::{ApiError, FieldError};
use crate::middleware::events::log_async;
use crate::middleware::moderation::{self, Moderated};
use crate::models::rom::Rom;
use crate::store::StoreError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct NewRom {
    /// ROM set name, e.g. `afm_113b`.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub game_id: String,
    pub version: Option<String>,
    pub language: Option<String>,
    pub notes: Option<String>,
}

fn is_rom_name(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    headers: HeaderMap,
    Body(req): Body<NewRom>,
) -> ApiResult {
    let mut errors: Vec<FieldError> = check_game(&state, &req.game_id).await?.into_iter().collect();
    if !is_rom_name(&req.id) {
        errors.push(
            FieldError::new("id", "ROM name must consist of letters, digits, dashes and underscores.")
                .with_value(&req.id),
        );
    }
    ensure_valid(errors)?;

    let moderation = moderation::on_create(state.acl.as_ref(), &user, Rom::ACL_RESOURCE).await?;
    let rom = Rom {
        id: req.id,
        game_id: req.game_id,
        version: req.version,
        language: req.language,
        notes: req.notes,
        moderation,
        created_by: user.id.clone(),
        created_at: Utc::now(),
    };
    state.db.repo::<Rom>().insert(&rom).await.map_err(|e| match e {
        StoreError::Conflict(_) => {
            ApiError::Conflict(format!("ROM \"{}\" already exists.", rom.id))
        }
        other => other.into(),
    })?;

    state.cache.invalidate(&invalidation(&rom)).await?;
    tracing::info!(user = %user.name, rom = %rom.id, game = %rom.game_id, "rom created");
    let event = event_for("create_rom", &rom, &user)
        .payload(json!({ "rom": rom.id }))
        .ip(client_ip(&headers));
    log_async(&state, if rom.moderation.is_approved { event } else { event.private() });

    Ok(success(rom, StatusCode::CREATED))
}
