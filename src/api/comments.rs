use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use super::dispatch::{success, ApiResult, Body, CurrentUser, MaybeUser, Pagination};
use crate::errors::ApiError;
use crate::middleware::api_cache::Invalidation;
use crate::middleware::events::log_async;
use crate::middleware::moderation;
use crate::models::comment::Comment;
use crate::models::log_event::LogEvent;
use crate::models::new_id;
use crate::models::release::Release;
use crate::models::user::User;
use crate::store::Query;
use crate::AppState;

const MAX_MESSAGE_LENGTH: usize = 5000;

async fn visible_release(
    state: &AppState,
    user: Option<&User>,
    id: &str,
) -> Result<Release, ApiError> {
    let not_found = || ApiError::not_found(format!("No such release with ID \"{}\".", id));
    let release = state.db.repo::<Release>().get(id).await?.ok_or_else(not_found)?;
    if !moderation::is_visible(state.acl.as_ref(), user, &release).await? {
        return Err(not_found());
    }
    Ok(release)
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    Path(release_id): Path<String>,
    pagination: Pagination,
) -> ApiResult {
    let release = visible_release(&state, user.as_ref(), &release_id).await?;
    let query = Query::filter(Comment::release_filter(&release.id))
        .page(pagination.offset(), pagination.per_page());

    let comments = state.db.repo::<Comment>();
    let count = comments.count(&query).await?;
    let page = comments.find(&query).await?;
    Ok(success(page, StatusCode::OK).list(&pagination, count))
}

#[derive(Debug, Deserialize)]
pub struct NewComment {
    #[serde(default)]
    pub message: String,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(release_id): Path<String>,
    Body(req): Body<NewComment>,
) -> ApiResult {
    let release = visible_release(&state, Some(&user), &release_id).await?;
    let message = req.message.trim();
    if message.is_empty() {
        return Err(ApiError::invalid("message", "Message must be provided."));
    }
    if message.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(ApiError::invalid(
            "message",
            format!("Message must not be longer than {} characters.", MAX_MESSAGE_LENGTH),
        ));
    }

    let comment = Comment {
        id: new_id(),
        release_id: release.id.clone(),
        message: message.to_string(),
        created_by: user.id.clone(),
        created_at: Utc::now(),
    };
    state.db.repo::<Comment>().insert(&comment).await?;
    state
        .db
        .repo::<Release>()
        .modify(&release.id, |r: &mut Release| {
            r.counter.comments += 1;
            Ok(())
        })
        .await?;

    state
        .cache
        .invalidate(
            &Invalidation::new()
                .resource("comment")
                .resource("release")
                .entity("release", &release.id),
        )
        .await?;
    tracing::debug!(user = %user.name, release = %release.id, "comment added");
    log_async(
        &state,
        LogEvent::new("create_comment")
            .actor(Some(&user.id))
            .release(&release.id)
            .game(&release.game_id)
            .payload(json!({ "comment": comment.id })),
    );

    Ok(success(comment, StatusCode::CREATED))
}
