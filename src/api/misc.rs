use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use serde_json::json;

use super::dispatch::{success, ApiResult, Success};
use crate::middleware::acl::ROLES;
use crate::models::plan::PLANS;
use crate::AppState;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn index() -> ApiResult {
    Ok(success(
        json!({
            "app_name": "vpdb",
            "app_version": env!("CARGO_PKG_VERSION"),
        }),
        StatusCode::OK,
    ))
}

pub async fn ping() -> ApiResult {
    Ok(success(json!({}), StatusCode::OK))
}

pub async fn plans() -> ApiResult {
    Ok(success(PLANS, StatusCode::OK))
}

pub async fn roles() -> ApiResult {
    Ok(success(ROLES, StatusCode::OK))
}

/// Waits for background jobs, then stops the server.
pub async fn kill(State(state): State<Arc<AppState>>) -> ApiResult {
    tracing::warn!("kill switch triggered, draining background jobs");
    let remaining = state.jobs.drain(DRAIN_TIMEOUT).await;
    if remaining > 0 {
        tracing::warn!(remaining, "shutting down with jobs still running");
    }
    state.shutdown.notify_one();
    Ok(Success::no_content())
}
