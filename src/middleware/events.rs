use std::sync::Arc;

use crate::models::log_event::LogEvent;
use crate::AppState;

/// Records a log event without blocking the response path. Cached event
/// lists are invalidated once the event is stored.
pub fn log_async(state: &Arc<AppState>, event: LogEvent) {
    let jobs = state.jobs.clone();
    let state = state.clone();
    jobs.spawn("log_event", async move {
        state.db.repo::<LogEvent>().insert(&event).await?;
        tracing::debug!(event = %event.event, actor = ?event.actor, "log event recorded");
        state
            .cache
            .invalidate_resource("log_event")
            .await
            .map_err(|e| anyhow::anyhow!("failed to invalidate event cache: {}", e))?;
        Ok(())
    });
}
