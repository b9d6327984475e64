use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::relation::{Target, TargetKind};
use crate::store::Document;

pub const CATEGORIES: &[&str] = &[
    "wheel_image",
    "backglass_image",
    "playfield_image",
    "playfield_video",
    "flyer_image",
    "instruction_card",
];

/// A media file attached to a game or release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Medium {
    pub id: String,
    pub target: Target,
    pub category: String,
    pub file_id: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Document for Medium {
    const COLLECTION: &'static str = "media";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Medium {
    pub fn target_filter(kind: TargetKind, id: &str) -> Value {
        json!({ "target": { "kind": kind, "id": id } })
    }
}
