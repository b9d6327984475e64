use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Counter, RatingSummary};
use crate::store::Document;

/// Game types as catalogued by the IPDB.
pub const GAME_TYPES: &[&str] = &["ss", "em", "pm", "og", "na"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    pub game_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub counter: Counter,
    #[serde(default)]
    pub rating: RatingSummary,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Document for Game {
    const COLLECTION: &'static str = "games";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Derives a url-friendly id from the title, e.g. "Attack from Mars" → "attack-from-mars".
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut dash = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            dash = false;
        } else if !dash && !slug.is_empty() {
            slug.push('-');
            dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Attack from Mars"), "attack-from-mars");
        assert_eq!(slugify("  Theatre of Magic (1995)!"), "theatre-of-magic-1995");
        assert_eq!(slugify("!!!"), "");
    }
}
