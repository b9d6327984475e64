use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::middleware::moderation::{Moderated, Moderation};
use crate::store::Document;

/// A ROM dump for a game's original hardware. The id is the ROM set name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rom {
    pub id: String,
    pub game_id: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub moderation: Moderation,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Document for Rom {
    const COLLECTION: &'static str = "roms";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Moderated for Rom {
    const ACL_RESOURCE: &'static str = "roms";
    const ENTITY: &'static str = "rom";

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
