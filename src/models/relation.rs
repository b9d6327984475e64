//! Per-user relations to catalogue entities: ratings and stars.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::store::{Document, Relation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Game,
    Release,
    Backglass,
}

impl TargetKind {
    /// Cache entity name and log event prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Game => "game",
            TargetKind::Release => "release",
            TargetKind::Backglass => "backglass",
        }
    }

    /// ACL resource for permissions on this kind.
    pub fn acl_resource(&self) -> &'static str {
        match self {
            TargetKind::Game => "games",
            TargetKind::Release => "releases",
            TargetKind::Backglass => "backglasses",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selects a target kind at the type level, so one generic handler serves
/// `/games/:id/star`, `/releases/:id/star` and so on.
pub trait Kind: Send + Sync + 'static {
    const KIND: TargetKind;
}

pub struct OnGame;
pub struct OnRelease;
pub struct OnBackglass;

impl Kind for OnGame {
    const KIND: TargetKind = TargetKind::Game;
}

impl Kind for OnRelease {
    const KIND: TargetKind = TargetKind::Release;
}

impl Kind for OnBackglass {
    const KIND: TargetKind = TargetKind::Backglass;
}

/// The entity a relation points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub kind: TargetKind,
    pub id: String,
}

impl Target {
    pub fn new(kind: TargetKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }

    fn filter(&self) -> Value {
        json!({ "target": { "kind": self.kind, "id": self.id } })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rating {
    pub id: String,
    pub target: Target,
    pub user_id: String,
    pub value: u8,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

impl Rating {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    pub fn new(target: Target, user_id: &str, value: u8) -> Self {
        Self {
            id: Self::relation_id(&target, user_id),
            target,
            user_id: user_id.to_string(),
            value,
            created_at: Utc::now(),
            modified_at: None,
        }
    }
}

impl Document for Rating {
    const COLLECTION: &'static str = "ratings";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Relation for Rating {
    type Target = Target;

    fn relation_id(target: &Target, user_id: &str) -> String {
        format!("rating:{}:{}:{}", target.kind, target.id, user_id)
    }

    fn target_filter(target: &Target) -> Value {
        target.filter()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Star {
    pub id: String,
    pub target: Target,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl Star {
    pub fn new(target: Target, user_id: &str) -> Self {
        Self {
            id: Self::relation_id(&target, user_id),
            target,
            user_id: user_id.to_string(),
            created_at: Utc::now(),
        }
    }
}

impl Document for Star {
    const COLLECTION: &'static str = "stars";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Relation for Star {
    type Target = Target;

    fn relation_id(target: &Target, user_id: &str) -> String {
        format!("star:{}:{}:{}", target.kind, target.id, user_id)
    }

    fn target_filter(target: &Target) -> Value {
        target.filter()
    }
}
