//! Moderation workflow shared by releases, backglasses and ROMs.
//!
//! A moderated entity is pending, approved or refused. Contributors holding
//! `auto-approve` on the entity's resource skip the queue. Every transition
//! is recorded in `history`, most recent first, inside one atomic update.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::acl::Acl;
use crate::errors::ApiError;
use crate::models::relation::TargetKind;
use crate::models::user::User;
use crate::store::{Db, Document, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationEventKind {
    Approved,
    Refused,
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModerationEvent {
    pub event: ModerationEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Moderation {
    pub is_approved: bool,
    pub is_refused: bool,
    pub auto_approved: bool,
    /// Most recent first.
    #[serde(default)]
    pub history: Vec<ModerationEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationAction {
    Approve,
    Refuse,
    Moderate,
}

impl Moderation {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn auto_approved(actor: &str, now: DateTime<Utc>) -> Self {
        Self {
            is_approved: true,
            is_refused: false,
            auto_approved: true,
            history: vec![ModerationEvent {
                event: ModerationEventKind::Approved,
                message: None,
                created_at: now,
                created_by: actor.to_string(),
            }],
        }
    }

    pub fn is_pending(&self) -> bool {
        !self.is_approved && !self.is_refused
    }

    /// Applies `action` and records it. Fails without touching the state if
    /// the transition is not allowed.
    pub fn apply(
        &mut self,
        action: ModerationAction,
        message: Option<String>,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<ModerationEventKind, StoreError> {
        let message = message.filter(|m| !m.trim().is_empty());
        let event = match action {
            ModerationAction::Approve => {
                self.is_approved = true;
                self.is_refused = false;
                ModerationEventKind::Approved
            }
            ModerationAction::Refuse => {
                if message.is_none() {
                    return Err(StoreError::Rejected {
                        path: "message".into(),
                        message: "A message must be provided when refusing.".into(),
                    });
                }
                self.is_approved = false;
                self.is_refused = true;
                ModerationEventKind::Refused
            }
            ModerationAction::Moderate => {
                if self.is_pending() {
                    return Err(StoreError::Rejected {
                        path: "action".into(),
                        message: "Entity is already pending.".into(),
                    });
                }
                self.is_approved = false;
                self.is_refused = false;
                ModerationEventKind::Pending
            }
        };
        self.auto_approved = false;
        self.history.insert(
            0,
            ModerationEvent {
                event,
                message,
                created_at: now,
                created_by: actor.to_string(),
            },
        );
        Ok(event)
    }
}

/// An entity under moderation.
pub trait Moderated: Document {
    /// ACL resource holding `auto-approve` and `moderate`.
    const ACL_RESOURCE: &'static str;
    /// Cache entity and log event name.
    const ENTITY: &'static str;
    /// Kind used by ratings and stars on this entity, if it can have any.
    const TARGET: Option<TargetKind> = None;

    fn moderation(&self) -> &Moderation;
    fn moderation_mut(&mut self) -> &mut Moderation;
    fn created_by(&self) -> &str;
    fn game_id(&self) -> &str;
}

/// Initial moderation state for an entity created by `creator`.
pub async fn on_create(
    acl: &dyn Acl,
    creator: &User,
    resource: &str,
) -> Result<Moderation, ApiError> {
    if acl.is_allowed(creator, resource, "auto-approve").await? {
        Ok(Moderation::auto_approved(&creator.id, Utc::now()))
    } else {
        Ok(Moderation::pending())
    }
}

/// Applies a moderation action atomically and returns the updated entity.
pub async fn moderate<T: Moderated>(
    db: &Db,
    id: &str,
    action: ModerationAction,
    message: Option<String>,
    actor: &User,
) -> Result<T, ApiError> {
    let actor_id = actor.id.clone();
    let updated = db
        .repo::<T>()
        .modify(id, move |entity: &mut T| {
            entity
                .moderation_mut()
                .apply(action, message, &actor_id, Utc::now())
                .map(|_| ())
        })
        .await?;
    updated.ok_or_else(|| ApiError::not_found(format!("No such {} with ID \"{}\".", T::ENTITY, id)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationFilter {
    Refused,
    Pending,
    AutoApproved,
    ManuallyApproved,
    All,
}

impl FromStr for ModerationFilter {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "refused" => Ok(ModerationFilter::Refused),
            "pending" => Ok(ModerationFilter::Pending),
            "auto_approved" => Ok(ModerationFilter::AutoApproved),
            "manually_approved" => Ok(ModerationFilter::ManuallyApproved),
            "all" => Ok(ModerationFilter::All),
            other => Err(ApiError::invalid(
                "moderation",
                format!(
                    "Invalid moderation filter \"{}\". Valid filters are: refused, pending, auto_approved, manually_approved, all.",
                    other
                ),
            )),
        }
    }
}

impl ModerationFilter {
    /// Containment filter on the `moderation` field; `None` selects all.
    pub fn to_filter(self) -> Option<Value> {
        match self {
            ModerationFilter::Refused => Some(json!({ "moderation": { "is_refused": true } })),
            ModerationFilter::Pending => Some(
                json!({ "moderation": { "is_approved": false, "is_refused": false } }),
            ),
            ModerationFilter::AutoApproved => Some(
                json!({ "moderation": { "is_approved": true, "auto_approved": true } }),
            ),
            ModerationFilter::ManuallyApproved => Some(
                json!({ "moderation": { "is_approved": true, "auto_approved": false } }),
            ),
            ModerationFilter::All => None,
        }
    }
}

/// Filter for list queries. Only moderators may look past approved entities.
pub async fn list_filter(
    acl: &dyn Acl,
    user: Option<&User>,
    resource: &str,
    requested: Option<&str>,
) -> Result<Option<Value>, ApiError> {
    let Some(requested) = requested else {
        return Ok(Some(json!({ "moderation": { "is_approved": true } })));
    };
    let filter: ModerationFilter = requested.parse()?;
    let Some(user) = user else {
        return Err(ApiError::unauthorized(
            "Must be logged in order to retrieve moderated items.",
        ));
    };
    if !acl.is_allowed(user, resource, "moderate").await? {
        return Err(ApiError::forbidden(
            "Must be moderator in order to retrieve moderated items.",
        ));
    }
    Ok(filter.to_filter())
}

/// Whether `user` may see `entity` in a detail view.
pub async fn is_visible<T: Moderated>(
    acl: &dyn Acl,
    user: Option<&User>,
    entity: &T,
) -> Result<bool, ApiError> {
    if entity.moderation().is_approved {
        return Ok(true);
    }
    let Some(user) = user else {
        return Ok(false);
    };
    if user.id == entity.created_by() {
        return Ok(true);
    }
    Ok(acl.is_allowed(user, T::ACL_RESOURCE, "moderate").await?)
}

// ── Tests ───────────────────────────────────────────────────────
