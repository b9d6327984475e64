use rand::RngCore;
use serde::{Deserialize, Serialize};

pub mod backglass;
pub mod build;
pub mod comment;
pub mod game;
pub mod log_event;
pub mod medium;
pub mod plan;
pub mod relation;
pub mod release;
pub mod rom;
pub mod token;
pub mod user;

/// Random document id (24 hex chars, 96 bits).
pub fn new_id() -> String {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Denormalized counters on rateable/starrable entities.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Counter {
    #[serde(default)]
    pub stars: u64,
    #[serde(default)]
    pub comments: u64,
}

/// Plain mean of all ratings on an entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RatingSummary {
    #[serde(default)]
    pub average: f64,
    #[serde(default)]
    pub votes: u64,
}

impl RatingSummary {
    pub fn from_values(values: &[u8]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let sum: u64 = values.iter().map(|v| *v as u64).sum();
        let average = sum as f64 / values.len() as f64;
        Self {
            average: (average * 1000.0).round() / 1000.0,
            votes: values.len() as u64,
        }
    }
}
