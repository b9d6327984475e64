use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::Document;

/// References from an event to the entities it concerns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Refs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backglass: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// An activity log entry, e.g. `create_release` or `star_game`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub id: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    pub is_public: bool,
    #[serde(default)]
    pub refs: Refs,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    pub logged_at: DateTime<Utc>,
}

impl Document for LogEvent {
    const COLLECTION: &'static str = "log_events";

    fn id(&self) -> &str {
        &self.id
    }
}

impl LogEvent {
    pub fn new(event: &str) -> Self {
        Self {
            id: super::new_id(),
            event: event.to_string(),
            payload: Value::Null,
            is_public: true,
            refs: Refs::default(),
            actor: None,
            ip: None,
            logged_at: Utc::now(),
        }
    }

    pub fn actor(mut self, user_id: Option<&str>) -> Self {
        self.actor = user_id.map(str::to_string);
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Marks the event as visible to moderators only.
    pub fn private(mut self) -> Self {
        self.is_public = false;
        self
    }

    pub fn game(mut self, id: &str) -> Self {
        self.refs.game = Some(id.to_string());
        self
    }

    pub fn release(mut self, id: &str) -> Self {
        self.refs.release = Some(id.to_string());
        self
    }

    pub fn backglass(mut self, id: &str) -> Self {
        self.refs.backglass = Some(id.to_string());
        self
    }

    pub fn user(mut self, id: &str) -> Self {
        self.refs.user = Some(id.to_string());
        self
    }

    pub fn ip(mut self, ip: Option<String>) -> Self {
        self.ip = ip;
        self
    }
}
