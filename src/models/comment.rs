use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::store::Document;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub release_id: String,
    pub message: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Document for Comment {
    const COLLECTION: &'static str = "comments";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Comment {
    pub fn release_filter(release_id: &str) -> Value {
        json!({ "release_id": release_id })
    }
}
