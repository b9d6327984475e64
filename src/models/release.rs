use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Counter, RatingSummary};
use super::relation::TargetKind;
use crate::middleware::moderation::{Moderated, Moderation};
use crate::store::Document;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub id: String,
    pub game_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub moderation: Moderation,
    #[serde(default)]
    pub counter: Counter,
    #[serde(default)]
    pub rating: RatingSummary,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Document for Release {
    const COLLECTION: &'static str = "releases";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Moderated for Release {
    const ACL_RESOURCE: &'static str = "releases";
    const ENTITY: &'static str = "release";
    const TARGET: Option<TargetKind> = Some(TargetKind::Release);

    fn moderation(&self) -> &Moderation {
        &self.moderation
    }

    fn moderation_mut(&mut self) -> &mut Moderation {
        &mut self.moderation
    }

    fn created_by(&self) -> &str {
        &self.created_by
    }

    fn game_id(&self) -> &str {
        &self.game_id
    }
}
