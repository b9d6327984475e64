use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Counter;
use super::relation::TargetKind;
use crate::middleware::moderation::{Moderated, Moderation};
use crate::store::Document;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backglass {
    pub id: String,
    pub game_id: String,
    #[serde(default)]
    pub description: Option<String>,
    pub moderation: Moderation,
    #[serde(default)]
    pub counter: Counter,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Document for Backglass {
    const COLLECTION: &'static str = "backglasses";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Moderated for Backglass {
    const ACL_RESOURCE: &'static str = "backglasses";
    const ENTITY: &'static str = "backglass";
    const TARGET: Option<TargetKind> = Some(TargetKind::Backglass);

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
