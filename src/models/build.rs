use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Document;

pub const PLATFORMS: &[&str] = &["vp", "fp"];
pub const BUILD_TYPES: &[&str] = &["release", "nightly", "experimental"];

/// A player build a release is compatible with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    pub id: String,
    pub label: String,
    pub platform: String,
    pub major_version: String,
    pub build_type: String,
    #[serde(default)]
    pub is_range: bool,
    #[serde(default)]
    pub description: Option<String>,
    pub is_active: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Document for Build {
    const COLLECTION: &'static str = "builds";

    fn id(&self) -> &str {
        &self.id
    }
}
