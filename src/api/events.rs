use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::dispatch::{success, ApiResult, MaybeUser, Pagination, Params};
use crate::errors::ApiError;
use crate::models::log_event::LogEvent;
use crate::models::relation::Kind;
use crate::models::user::User;
use crate::store::Query;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    /// Comma-separated event names.
    pub events: Option<String>,
}

/// Base filter: private events are for moderators only.
async fn base_filter(
    state: &AppState,
    user: Option<&User>,
) -> Result<Map<String, Value>, ApiError> {
    let mut conditions = Map::new();
    let sees_private = match user {
        Some(user) => state.acl.is_allowed(user, "events", "list-private").await?,
        None => false,
    };
    if !sees_private {
        conditions.insert("is_public".into(), json!(true));
    }
    Ok(conditions)
}

async fn respond(
    state: &AppState,
    conditions: Map<String, Value>,
    filter: EventFilter,
    pagination: Pagination,
) -> ApiResult {
    let alternatives: Vec<Value> = filter
        .events
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(|e| json!({ "event": e }))
        .collect();
    let query = Query::filter(Value::Object(conditions))
        .any_of(alternatives)
        .page(pagination.offset(), pagination.per_page());

    let events = state.db.repo::<LogEvent>();
    let count = events.count(&query).await?;
    let page = events.find(&query).await?;
    Ok(success(page, StatusCode::OK).list(&pagination, count))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    Params(filter): Params<EventFilter>,
    pagination: Pagination,
) -> ApiResult {
    let conditions = base_filter(&state, user.as_ref()).await?;
    respond(&state, conditions, filter, pagination).await
}

/// Events referencing one game or release.
pub async fn list_for<K: Kind>(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<String>,
    Params(filter): Params<EventFilter>,
    pagination: Pagination,
) -> ApiResult {
    let mut conditions = base_filter(&state, user.as_ref()).await?;
    let mut refs = Map::new();
    refs.insert(K::KIND.as_str().into(), Value::String(id));
    conditions.insert("refs".into(), Value::Object(refs));
    respond(&state, conditions, filter, pagination).await
}
