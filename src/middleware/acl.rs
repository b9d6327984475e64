//! Role-based access control.
//!
//! Roles grant `resource:permission` pairs and may inherit from parent roles.
//! `root` is allowed everything. Permissions ending in `-own` are checked by
//! the handler against the entity's creator.

use std::collections::HashSet;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Serialize;

use crate::models::user::User;

#[async_trait]
pub trait Acl: Send + Sync + 'static {
    async fn is_allowed(&self, user: &User, resource: &str, permission: &str)
        -> anyhow::Result<bool>;
}

#[derive(Debug, Clone, Serialize)]
pub struct Role {
    pub id: &'static str,
    pub parents: &'static [&'static str],
    #[serde(skip)]
    pub grants: &'static [(&'static str, &'static [&'static str])],
}

pub static ROLES: &[Role] = &[
    Role {
        id: "member",
        parents: &[],
        grants: &[
            ("backglasses", &["add", "delete-own", "star"]),
            ("builds", &["add", "delete-own"]),
            ("comments", &["add"]),
            ("games", &["rate", "star"]),
            ("media", &["add", "delete-own"]),
            ("releases", &["add", "delete-own", "rate", "star"]),
            ("roms", &["add", "delete-own"]),
            ("tokens", &["add", "delete-own", "list", "update-own", "view"]),
            ("user", &["view", "update"]),
        ],
    },
    Role {
        id: "game-contributor",
        parents: &[],
        grants: &[
            ("backglasses", &["auto-approve"]),
            ("games", &["add", "update", "delete"]),
            ("media", &["delete"]),
            ("roms", &["auto-approve"]),
        ],
    },
    Role {
        id: "release-contributor",
        parents: &[],
        grants: &[("releases", &["auto-approve"])],
    },
    Role {
        id: "contributor",
        parents: &["game-contributor", "release-contributor"],
        grants: &[],
    },
    Role {
        id: "moderator",
        parents: &[],
        grants: &[
            ("backglasses", &["moderate"]),
            ("builds", &["delete", "update"]),
            ("events", &["list-private"]),
            ("releases", &["moderate"]),
            ("roms", &["moderate"]),
        ],
    },
    Role {
        id: "admin",
        parents: &[],
        grants: &[
            ("roles", &["list"]),
            ("tokens", &["provider-token"]),
            ("users", &["list", "update", "view"]),
        ],
    },
    Role {
        id: "root",
        parents: &["admin", "moderator", "contributor"],
        grants: &[],
    },
];

pub fn find_role(id: &str) -> Option<&'static Role> {
    ROLES.iter().find(|r| r.id == id)
}

/// Flattened `resource:permission` grants per role, parents resolved.
static GRANTS: Lazy<Vec<(&'static str, HashSet<String>)>> = Lazy::new(|| {
    ROLES
        .iter()
        .map(|role| {
            let mut grants = HashSet::new();
            collect_grants(role, &mut grants);
            (role.id, grants)
        })
        .collect()
});

fn collect_grants(role: &Role, into: &mut HashSet<String>) {
    for (resource, permissions) in role.grants {
        for permission in permissions.iter() {
            into.insert(format!("{}:{}", resource, permission));
        }
    }
    for parent in role.parents {
        if let Some(parent) = find_role(parent) {
            collect_grants(parent, into);
        }
    }
}

/// Static role table.
#[derive(Debug, Clone, Default)]
pub struct RoleAcl;

impl RoleAcl {
    pub fn new() -> Self {
        Self
    }

    pub fn role_allows(role: &str, resource: &str, permission: &str) -> bool {
        if role == "root" {
            return true;
        }
        let key = format!("{}:{}", resource, permission);
        GRANTS
            .iter()
            .find(|(id, _)| *id == role)
            .map_or(false, |(_, grants)| grants.contains(&key))
    }
}

#[async_trait]
impl Acl for RoleAcl {
    async fn is_allowed(
        &self,
        user: &User,
        resource: &str,
        permission: &str,
    ) -> anyhow::Result<bool> {
        Ok(user
            .roles
            .iter()
            .any(|role| Self::role_allows(role, resource, permission)))
    }
}

// ── Tests ───────────────────────────────────────────────────────
