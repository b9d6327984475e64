//! Route authorization: scopes, plan attributes, ACL.

use super::acl::Acl;
use super::authn::{Identity, TokenInfo, PROVIDER_USER_HEADER, VPDB_USER_HEADER};
use super::scope::{self, Scope};
use crate::errors::ApiError;
use crate::models::plan::PlanAttr;
use crate::models::user::User;

/// What a route demands of its caller.
#[derive(Debug, Clone, Default)]
pub struct Requirement {
    pub resource: Option<&'static str>,
    pub permission: Option<&'static str>,
    /// Accepted scopes. Empty means anonymous access.
    pub scopes: Vec<Scope>,
    pub plan: Vec<PlanAttr>,
}

impl Requirement {
    pub fn new(scopes: &[Scope]) -> Self {
        Self {
            scopes: scopes.to_vec(),
            ..Default::default()
        }
    }

    pub fn anon() -> Self {
        Self::default()
    }

    pub fn acl(mut self, resource: &'static str, permission: &'static str) -> Self {
        self.resource = Some(resource);
        self.permission = Some(permission);
        self
    }

    pub fn plan(mut self, attr: PlanAttr) -> Self {
        self.plan.push(attr);
        self
    }

    pub fn is_anonymous(&self) -> bool {
        self.scopes.is_empty() && self.resource.is_none() && self.plan.is_empty()
    }

    /// A call a provider makes on its own behalf, without a user.
    pub fn is_service_only(&self) -> bool {
        self.scopes == [Scope::Service] && self.resource.is_none()
    }
}

/// The authorized caller, attached to the request for handlers.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    pub user: Option<User>,
    pub token: Option<TokenInfo>,
}

fn actor(identity: &Identity) -> &str {
    identity.user.as_ref().map_or("anonymous", |u| u.name.as_str())
}

/// Enforces `requirement` against `identity`: scopes (401), plan (403), ACL (403).
pub async fn authorize(
    acl: &dyn Acl,
    identity: &Identity,
    requirement: &Requirement,
) -> Result<Caller, ApiError> {
    if let Some(failure) = &identity.failure {
        return Err(failure.to_error());
    }

    if identity.is_userless_application() && !requirement.is_service_only() {
        return Err(ApiError::bad_request(format!(
            "Must provide {} or {} header.",
            VPDB_USER_HEADER, PROVIDER_USER_HEADER
        )));
    }

    if requirement.is_anonymous() {
        return Ok(Caller {
            user: identity.user.clone(),
            token: identity.token.clone(),
        });
    }

    let Some(token) = &identity.token else {
        return Err(ApiError::unauthorized(
            "Unauthorized. You need to provide credentials for this resource",
        ));
    };

    if !scope::is_valid(Some(requirement.scopes.as_slice()), &token.scopes) {
        tracing::warn!(
            actor = actor(identity),
            required = %scope::describe(&requirement.scopes),
            granted = %scope::describe(&token.scopes),
            "access denied: invalid scope"
        );
        return Err(ApiError::unauthorized(format!(
            "Your token has an invalid scope: {} (required: {})",
            scope::describe(&token.scopes),
            scope::describe(&requirement.scopes)
        )));
    }

    // Service calls carry no user; everything below needs one.
    let Some(user) = &identity.user else {
        if requirement.is_service_only() {
            return Ok(Caller {
                user: None,
                token: identity.token.clone(),
            });
        }
        return Err(ApiError::unauthorized(
            "Unauthorized. You need to provide credentials for this resource",
        ));
    };

    for attr in &requirement.plan {
        let satisfied = user.plan().map_or(false, |p| p.satisfies(attr));
        if !satisfied {
            tracing::warn!(
                actor = %user.name,
                plan = %user.plan,
                attribute = attr.name(),
                "access denied: plan attribute"
            );
            return Err(ApiError::forbidden(format!(
                "Access denied: your plan does not support \"{}\".",
                attr.name()
            )));
        }
    }

    if let (Some(resource), Some(permission)) = (requirement.resource, requirement.permission) {
        if !acl.is_allowed(user, resource, permission).await? {
            tracing::warn!(
                actor = %user.name,
                resource,
                permission,
                "access denied: ACL"
            );
            return Err(ApiError::forbidden(format!(
                "Access denied: missing permission \"{}\" on \"{}\".",
                permission, resource
            )));
        }
    }

    Ok(Caller {
        user: Some(user.clone()),
        token: identity.token.clone(),
    })
}

// ── Tests ───────────────────────────────────────────────────────
