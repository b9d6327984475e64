//! Handler plumbing: route guards, extractors and response shaping.
//!
//! Routes come in three modes. `plain` routes are bare handlers. `anon` routes
//! accept any valid credential or none. `auth` routes run the full
//! authorization pipeline for their [`Requirement`]. Handlers return
//! [`ApiResult`], and the only way to build a successful response is
//! [`success`].

use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRequest, FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::MethodRouter;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ApiError, FieldError};
use crate::middleware::authn::Identity;
use crate::middleware::authz::{self, Caller, Requirement};
use crate::models::user::User;
use crate::AppState;

pub const USER_DIRTY_HEADER: &str = "x-user-dirty";
pub const LIST_PAGE_HEADER: &str = "x-list-page";
pub const LIST_SIZE_HEADER: &str = "x-list-size";
pub const LIST_COUNT_HEADER: &str = "x-list-count";

const DEFAULT_PER_PAGE: u64 = 10;
const MAX_PER_PAGE: u64 = 50;
/// Largest row offset the store can bind.
const MAX_OFFSET: u64 = i64::MAX as u64;

pub fn dirty_key(user_id: &str) -> String {
    format!("dirty_user:{}", user_id)
}

// ── Responses ───────────────────────────────────────────────────

/// A successful handler response.
pub struct Success(Response);

pub type ApiResult = Result<Success, ApiError>;

pub fn success<T: Serialize>(body: T, status: StatusCode) -> Success {
    if status == StatusCode::NO_CONTENT {
        return Success(status.into_response());
    }
    Success((status, Json(body)).into_response())
}

impl Success {
    pub fn no_content() -> Self {
        Success(StatusCode::NO_CONTENT.into_response())
    }

    pub fn header(mut self, name: &'static str, value: impl ToString) -> Self {
        if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
            self.0.headers_mut().insert(name, value);
        }
        self
    }

    /// Adds the `X-List-*` pagination headers.
    pub fn list(self, pagination: &Pagination, count: u64) -> Self {
        self.header(LIST_PAGE_HEADER, pagination.page())
            .header(LIST_SIZE_HEADER, pagination.per_page())
            .header(LIST_COUNT_HEADER, count)
    }
}

impl IntoResponse for Success {
    fn into_response(self) -> Response {
        self.0
    }
}

// ── Route guards ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Anon,
    Auth,
}

#[derive(Debug)]
struct Guard {
    mode: Mode,
    requirement: Requirement,
}

type GuardState = (Arc<AppState>, Arc<Guard>);

/// Full authorization for `route`.
pub fn auth(
    state: &Arc<AppState>,
    requirement: Requirement,
    route: MethodRouter<Arc<AppState>>,
) -> MethodRouter<Arc<AppState>> {
    guarded(state, Mode::Auth, requirement, route)
}

/// Credentials optional for `route`, but if given they must be valid.
pub fn anon(state: &Arc<AppState>, route: MethodRouter<Arc<AppState>>) -> MethodRouter<Arc<AppState>> {
    guarded(state, Mode::Anon, Requirement::anon(), route)
}

fn guarded(
    state: &Arc<AppState>,
    mode: Mode,
    requirement: Requirement,
    route: MethodRouter<Arc<AppState>>,
) -> MethodRouter<Arc<AppState>> {
    let guard = Arc::new(Guard { mode, requirement });
    route.route_layer(middleware::from_fn_with_state(
        (state.clone(), guard),
        authorize_route,
    ))
}

async fn authorize_route(
    State((state, guard)): State<GuardState>,
    mut req: Request,
    next: Next,
) -> Response {
    let identity = req.extensions().get::<Identity>().cloned().unwrap_or_default();
    let caller = match authz::authorize(state.acl.as_ref(), &identity, &guard.requirement).await {
        Ok(caller) => caller,
        Err(e) => return e.into_response(),
    };

    let dirty = match (guard.mode, caller.user.as_ref()) {
        (Mode::Auth, Some(user)) => match take_dirty_flag(&state, &user.id).await {
            Ok(dirty) => Some(dirty),
            Err(e) => return e.into_response(),
        },
        _ => None,
    };

    req.extensions_mut().insert(caller);
    let mut response = next.run(req).await;
    if let Some(dirty) = dirty {
        let value = if dirty { "1" } else { "0" };
        response
            .headers_mut()
            .insert(USER_DIRTY_HEADER, HeaderValue::from_static(value));
    }
    response
}

/// Reads and clears the flag set when a user was changed by someone else.
async fn take_dirty_flag(state: &AppState, user_id: &str) -> Result<bool, ApiError> {
    let key = dirty_key(user_id);
    let dirty = state.kv.get(&key).await?.is_some();
    if dirty {
        state.kv.del(&[key]).await?;
    }
    Ok(dirty)
}

// ── Extractors ──────────────────────────────────────────────────

/// JSON body; malformed input becomes a 400 `{error}`.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct Body<T>(pub T);

/// Query string; malformed input becomes a 400 `{error}`.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct Params<T>(pub T);

/// The authorized caller, required to be a user.
pub struct CurrentUser(pub User);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Caller>()
            .and_then(|c| c.user.clone())
            .map(CurrentUser)
            .ok_or_else(|| {
                ApiError::unauthorized("Unauthorized. You need to provide credentials for this resource")
            })
    }
}

/// The authorized caller's user, if any.
pub struct MaybeUser(pub Option<User>);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(
            parts.extensions.get::<Caller>().and_then(|c| c.user.clone()),
        ))
    }
}

/// The provider behind the application token that authorized the call.
pub struct Provider(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Provider {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Caller>()
            .and_then(|c| c.token.as_ref())
            .and_then(|t| t.provider.clone())
            .map(Provider)
            .ok_or_else(|| {
                ApiError::unauthorized("Only application tokens can call this resource.")
            })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    page: Option<u64>,
    per_page: Option<u64>,
}

impl Pagination {
    pub fn page(&self) -> u64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn per_page(&self) -> u64 {
        self.per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE)
    }

    pub fn offset(&self) -> u64 {
        (self.page() - 1).saturating_mul(self.per_page())
    }

    fn is_in_range(&self) -> bool {
        (self.page() - 1)
            .checked_mul(self.per_page())
            .map_or(false, |offset| offset <= MAX_OFFSET)
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Pagination {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Params(pagination) = Params::<Pagination>::from_request_parts(parts, state).await?;
        if !pagination.is_in_range() {
            return Err(ApiError::bad_request(format!(
                "Page {} is out of range.",
                pagination.page()
            )));
        }
        Ok(pagination)
    }
}

// ── Helpers ─────────────────────────────────────────────────────

/// Lists every top-level field of `new` that differs from `old` and is not
/// in `allowed`.
pub fn check_read_only_fields(new: &Value, old: &Value, allowed: &[&str]) -> Vec<FieldError> {
    let Some(fields) = new.as_object() else {
        return Vec::new();
    };
    let mut errors: Vec<FieldError> = fields
        .iter()
        .filter(|(name, _)| !allowed.contains(&name.as_str()))
        .filter(|(name, value)| old.get(name.as_str()) != Some(*value))
        .map(|(name, value)| {
            FieldError::new(name.as_str(), "This field is read-only and cannot be changed.")
                .with_value(value)
        })
        .collect();
    errors.sort_by(|a, b| a.path.cmp(&b.path));
    errors
}

/// Returns `Validation` if any field errors were collected.
pub fn ensure_valid(errors: Vec<FieldError>) -> Result<(), ApiError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation(errors))
    }
}

pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ── Tests ───────────────────────────────────────────────────────
