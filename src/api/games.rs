use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use chrono::{Datelike, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::dispatch::{
    check_read_only_fields, client_ip, ensure_valid, success, ApiResult, Body, CurrentUser,
    Pagination, Params, Success,
};
use crate::errors::{ApiError, FieldError};
use crate::middleware::api_cache::Invalidation;
use crate::middleware::events::log_async;
use crate::models::game::{slugify, Game, GAME_TYPES};
use crate::models::log_event::LogEvent;
use crate::models::medium::Medium;
use crate::models::relation::{Rating, Star, Target, TargetKind};
use crate::models::release::Release;
use crate::models::{Counter, RatingSummary};
use crate::store::{Query, StoreError};
use crate::AppState;

const UPDATABLE_FIELDS: &[&str] = &["title", "year", "manufacturer", "game_type", "description"];
const FIRST_YEAR: i32 = 1930;

#[derive(Debug, Default, Deserialize)]
pub struct GameFilter {
    pub game_type: Option<String>,
    pub manufacturer: Option<String>,
    pub year: Option<i32>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Params(filter): Params<GameFilter>,
    pagination: Pagination,
) -> ApiResult {
    let mut conditions = Map::new();
    if let Some(game_type) = filter.game_type {
        conditions.insert("game_type".into(), json!(game_type));
    }
    if let Some(manufacturer) = filter.manufacturer {
        conditions.insert("manufacturer".into(), json!(manufacturer));
    }
    if let Some(year) = filter.year {
        conditions.insert("year".into(), json!(year));
    }
    let query = Query::filter(Value::Object(conditions))
        .page(pagination.offset(), pagination.per_page());

    let games = state.db.repo::<Game>();
    let count = games.count(&query).await?;
    let page = games.find(&query).await?;
    Ok(success(page, StatusCode::OK).list(&pagination, count))
}

pub(super) async fn find_game(state: &AppState, id: &str) -> Result<Game, ApiError> {
    state
        .db
        .repo::<Game>()
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No such game with ID \"{}\".", id)))
}

pub async fn view(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let game = find_game(&state, &id).await?;
    Ok(success(game, StatusCode::OK))
}

#[derive(Debug, Deserialize)]
pub struct NewGame {
    pub id: Option<String>,
    #[serde(default)]
    pub title: String,
    pub year: Option<i32>,
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub game_type: String,
    pub description: Option<String>,
}

fn validate(title: &str, year: Option<i32>, game_type: &str) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if title.trim().is_empty() {
        errors.push(FieldError::new("title", "Title must be provided."));
    }
    if !GAME_TYPES.contains(&game_type) {
        errors.push(
            FieldError::new(
                "game_type",
                format!("Invalid game type. Valid types are: {}.", GAME_TYPES.join(", ")),
            )
            .with_value(game_type),
        );
    }
    if let Some(year) = year {
        let this_year = Utc::now().year();
        if !(FIRST_YEAR..=this_year).contains(&year) {
            errors.push(
                FieldError::new(
                    "year",
                    format!("Year must be between {} and {}.", FIRST_YEAR, this_year),
                )
                .with_value(year),
            );
        }
    }
    errors
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    headers: HeaderMap,
    Body(req): Body<NewGame>,
) -> ApiResult {
    let mut errors = validate(&req.title, req.year, &req.game_type);
    let id = req
        .id
        .map(|id| id.trim().to_lowercase())
        .unwrap_or_else(|| slugify(&req.title));
    if id.is_empty() {
        errors.push(FieldError::new("id", "Could not derive an ID from the title."));
    }
    ensure_valid(errors)?;

    let game = Game {
        id,
        title: req.title.trim().to_string(),
        year: req.year,
        manufacturer: req.manufacturer,
        game_type: req.game_type,
        description: req.description,
        counter: Counter::default(),
        rating: RatingSummary::default(),
        created_by: user.id.clone(),
        created_at: Utc::now(),
    };
    state
        .db
        .repo::<Game>()
        .insert(&game)
        .await
        .map_err(|e| match e {
            StoreError::Conflict(_) => {
                ApiError::Conflict(format!("Game with ID \"{}\" already exists.", game.id))
            }
            other => other.into(),
        })?;

    state.cache.invalidate_resource("game").await?;
    tracing::info!(user = %user.name, game = %game.id, "game created");
    log_async(
        &state,
        LogEvent::new("create_game")
            .actor(Some(&user.id))
            .game(&game.id)
            .payload(json!({ "title": game.title }))
            .ip(client_ip(&headers)),
    );

    Ok(success(game, StatusCode::CREATED))
}

#[derive(Debug, Deserialize)]
struct GameUpdate {
    title: Option<String>,
    #[serde(default, with = "double_option")]
    year: Option<Option<i32>>,
    manufacturer: Option<String>,
    game_type: Option<String>,
    description: Option<String>,
}

/// Distinguishes an absent field from an explicit `null`.
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Body(body): Body<Value>,
) -> ApiResult {
    let game = find_game(&state, &id).await?;
    let old = serde_json::to_value(&game).map_err(anyhow::Error::from)?;
    ensure_valid(check_read_only_fields(&body, &old, UPDATABLE_FIELDS))?;

    let update: GameUpdate =
        serde_json::from_value(body).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let title = update.title.clone().unwrap_or_else(|| game.title.clone());
    let year = update.year.unwrap_or(game.year);
    let game_type = update.game_type.clone().unwrap_or_else(|| game.game_type.clone());
    ensure_valid(validate(&title, year, &game_type))?;

    let updated = state
        .db
        .repo::<Game>()
        .modify(&id, move |g: &mut Game| {
            g.title = title.trim().to_string();
            g.year = year;
            g.game_type = game_type;
            if let Some(manufacturer) = update.manufacturer {
                g.manufacturer = Some(manufacturer);
            }
            if let Some(description) = update.description {
                g.description = Some(description);
            }
            Ok(())
        })
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No such game with ID \"{}\".", id)))?;

    state
        .cache
        .invalidate(&Invalidation::new().resource("game").entity("game", &id))
        .await?;
    tracing::info!(user = %user.name, game = %id, "game updated");
    log_async(
        &state,
        LogEvent::new("update_game").actor(Some(&user.id)).game(&id),
    );

    Ok(success(updated, StatusCode::OK))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult {
    let game = find_game(&state, &id).await?;

    let releases = state
        .db
        .repo::<Release>()
        .count(&Query::filter(json!({ "game_id": game.id })))
        .await?;
    if releases > 0 {
        return Err(ApiError::bad_request(format!(
            "Cannot delete a game with {} release(s). Delete the releases first.",
            releases
        )));
    }

    let target = Target::new(TargetKind::Game, &game.id);
    state.db.relations::<Rating>().delete_for(&target).await?;
    state.db.relations::<Star>().delete_for(&target).await?;
    state
        .db
        .repo::<Medium>()
        .delete_matching(Medium::target_filter(TargetKind::Game, &game.id))
        .await?;
    state.db.repo::<Game>().delete(&game.id).await?;

    state
        .cache
        .invalidate(
            &Invalidation::new()
                .resource("game")
                .resource("medium")
                .entity("game", &game.id),
        )
        .await?;
    tracing::info!(user = %user.name, game = %game.id, "game deleted");
    log_async(
        &state,
        LogEvent::new("delete_game")
            .actor(Some(&user.id))
            .game(&game.id)
            .payload(json!({ "title": game.title })),
    );

    Ok(Success::no_content())
}
