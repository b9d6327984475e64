//! Ratings on games and releases, one per user and target.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::dispatch::{success, ApiResult, Body, CurrentUser, Success};
use super::stars::{find_target, target_event};
use crate::errors::{ApiError, FieldError};
use crate::middleware::api_cache::Invalidation;
use crate::middleware::events::log_async;
use crate::models::game::Game;
use crate::models::relation::{Kind, Rating, Target, TargetKind};
use crate::models::release::Release;
use crate::models::RatingSummary;
use crate::store::{Query, Relation, StoreError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RatingRequest {
    pub value: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RatingResult {
    pub value: u8,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    /// The target's rating after this change.
    pub summary: RatingSummary,
}

fn parse_value(req: &RatingRequest) -> Result<u8, ApiError> {
    match req.value {
        Some(v) if (Rating::MIN as i64..=Rating::MAX as i64).contains(&v) => Ok(v as u8),
        Some(v) => Err(ApiError::Validation(vec![FieldError::new(
            "value",
            format!("Rating must be between {} and {}.", Rating::MIN, Rating::MAX),
        )
        .with_value(v)])),
        None => Err(ApiError::invalid("value", "You must provide a value when rating.")),
    }
}

/// Recomputes and stores the target's rating summary.
async fn update_summary(state: &AppState, target: &Target) -> Result<RatingSummary, ApiError> {
    let ratings = state
        .db
        .repo::<Rating>()
        .find(&Query::filter(Rating::target_filter(target)))
        .await?;
    let values: Vec<u8> = ratings.iter().map(|r| r.value).collect();
    let summary = RatingSummary::from_values(&values);

    let stored = summary.clone();
    match target.kind {
        TargetKind::Game => {
            state
                .db
                .repo::<Game>()
                .modify(&target.id, move |g: &mut Game| {
                    g.rating = stored;
                    Ok(())
                })
                .await?;
        }
        TargetKind::Release => {
            state
                .db
                .repo::<Release>()
                .modify(&target.id, move |r: &mut Release| {
                    r.rating = stored;
                    Ok(())
                })
                .await?;
        }
        TargetKind::Backglass => {}
    }
    Ok(summary)
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

fn no_rating(target: &Target) -> ApiError {
    ApiError::not_found(format!("You haven't rated this {} yet.", target.kind))
}

pub async fn view<K: Kind>(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult {
    let target = find_target(&state, K::KIND, &id).await?;
    let rating = state
        .db
        .relations::<Rating>()
        .find(&target, &user.id)
        .await?
        .ok_or_else(|| no_rating(&target))?;
    Ok(success(rating, StatusCode::OK))
}

pub async fn create<K: Kind>(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Body(req): Body<RatingRequest>,
) -> ApiResult {
    let target = find_target(&state, K::KIND, &id).await?;
    let value = parse_value(&req)?;

    let rating = Rating::new(target.clone(), &user.id, value);
    state
        .db
        .relations::<Rating>()
        .insert(&rating)
        .await
        .map_err(|e| match e {
            StoreError::Conflict(_) => ApiError::bad_request(format!(
                "You've already rated this {}. Use PUT to change the rating.",
                target.kind
            )),
            other => other.into(),
        })?;

    let summary = update_summary(&state, &target).await?;
    invalidate(&state, &target).await?;
    tracing::debug!(user = %user.name, target = %target.kind, id = %target.id, value, "rated");
    log_async(
        &state,
        target_event(&format!("rate_{}", target.kind), &target, &user)
            .payload(json!({ "value": value })),
    );

    Ok(success(
        RatingResult {
            value,
            created_at: rating.created_at,
            modified_at: None,
            summary,
        },
        StatusCode::CREATED,
    ))
}

pub async fn update<K: Kind>(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Body(req): Body<RatingRequest>,
) -> ApiResult {
    let target = find_target(&state, K::KIND, &id).await?;
    let value = parse_value(&req)?;

    let rating = state
        .db
        .relations::<Rating>()
        .modify(&target, &user.id, move |r: &mut Rating| {
            r.value = value;
            r.modified_at = Some(Utc::now());
            Ok(())
        })
        .await?
        .ok_or_else(|| no_rating(&target))?;

    let summary = update_summary(&state, &target).await?;
    invalidate(&state, &target).await?;
    log_async(
        &state,
        target_event(&format!("rate_{}", target.kind), &target, &user)
            .payload(json!({ "value": value, "updated": true })),
    );

    Ok(success(
        RatingResult {
            value: rating.value,
            created_at: rating.created_at,
            modified_at: rating.modified_at,
            summary,
        },
        StatusCode::OK,
    ))
}

pub async fn remove<K: Kind>(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult {
    let target = find_target(&state, K::KIND, &id).await?;
    if !state.db.relations::<Rating>().delete(&target, &user.id).await? {
        return Err(no_rating(&target));
    }
    update_summary(&state, &target).await?;
    invalidate(&state, &target).await?;
    tracing::debug!(user = %user.name, target = %target.kind, id = %target.id, "rating removed");
    Ok(Success::no_content())
}
