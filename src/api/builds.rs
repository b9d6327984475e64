use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::dispatch::{
    check_read_only_fields, ensure_valid, success, ApiResult, Body, CurrentUser, Pagination,
    Params, Success,
};
use crate::errors::{ApiError, FieldError};
use crate::middleware::api_cache::Invalidation;
use crate::middleware::events::log_async;
use crate::models::build::{Build, BUILD_TYPES, PLATFORMS};
use crate::models::game::slugify;
use crate::models::log_event::LogEvent;
use crate::store::{Query, StoreError};
use crate::AppState;

const UPDATABLE_FIELDS: &[&str] = &[
    "label",
    "platform",
    "major_version",
    "build_type",
    "is_range",
    "description",
    "is_active",
];

#[derive(Debug, Default, Deserialize)]
pub struct BuildFilter {
    pub platform: Option<String>,
    pub build_type: Option<String>,
    pub is_active: Option<bool>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Params(filter): Params<BuildFilter>,
    pagination: Pagination,
) -> ApiResult {
    let mut conditions = Map::new();
    if let Some(platform) = filter.platform {
        conditions.insert("platform".into(), json!(platform));
    }
    if let Some(build_type) = filter.build_type {
        conditions.insert("build_type".into(), json!(build_type));
    }
    if let Some(is_active) = filter.is_active {
        conditions.insert("is_active".into(), json!(is_active));
    }
    let query = Query::filter(Value::Object(conditions))
        .page(pagination.offset(), pagination.per_page());

    let builds = state.db.repo::<Build>();
    let count = builds.count(&query).await?;
    let page = builds.find(&query).await?;
    Ok(success(page, StatusCode::OK).list(&pagination, count))
}

async fn find_build(state: &AppState, id: &str) -> Result<Build, ApiError> {
    state
        .db
        .repo::<Build>()
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No such build with ID \"{}\".", id)))
}

pub async fn view(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    Ok(success(find_build(&state, &id).await?, StatusCode::OK))
}

fn validate(build: &Build) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if build.label.trim().is_empty() {
        errors.push(FieldError::new("label", "Label must be provided."));
    }
    if build.major_version.trim().is_empty() {
        errors.push(FieldError::new("major_version", "Major version must be provided."));
    }
    if !PLATFORMS.contains(&build.platform.as_str()) {
        errors.push(
            FieldError::new(
                "platform",
                format!("Invalid platform. Valid platforms are: {}.", PLATFORMS.join(", ")),
            )
            .with_value(&build.platform),
        );
    }
    if !BUILD_TYPES.contains(&build.build_type.as_str()) {
        errors.push(
            FieldError::new(
                "build_type",
                format!("Invalid build type. Valid types are: {}.", BUILD_TYPES.join(", ")),
            )
            .with_value(&build.build_type),
        );
    }
    errors
}

#[derive(Debug, Deserialize)]
pub struct NewBuild {
    pub id: Option<String>,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub major_version: String,
    #[serde(default)]
    pub build_type: String,
    #[serde(default)]
    pub is_range: bool,
    pub description: Option<String>,
}

/// Builds added by users who may not update builds start out inactive.
pub async fn create(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Body(req): Body<NewBuild>,
) -> ApiResult {
    let is_active = state.acl.is_allowed(&user, "builds", "update").await?;
    let build = Build {
        id: req.id.unwrap_or_else(|| slugify(&req.label)),
        label: req.label.trim().to_string(),
        platform: req.platform,
        major_version: req.major_version,
        build_type: req.build_type,
        is_range: req.is_range,
        description: req.description,
        is_active,
        created_by: user.id.clone(),
        created_at: Utc::now(),
    };
    let mut errors = validate(&build);
    if build.id.is_empty() {
        errors.push(FieldError::new("id", "Could not derive an ID from the label."));
    }
    ensure_valid(errors)?;

    state.db.repo::<Build>().insert(&build).await.map_err(|e| match e {
        StoreError::Conflict(_) => {
            ApiError::Conflict(format!("Build with ID \"{}\" already exists.", build.id))
        }
        other => other.into(),
    })?;

    state.cache.invalidate_resource("build").await?;
    tracing::info!(user = %user.name, build = %build.id, is_active, "build created");
    log_async(
        &state,
        LogEvent::new("create_build")
            .actor(Some(&user.id))
            .payload(json!({ "build": build.id, "label": build.label })),
    );

    Ok(success(build, StatusCode::CREATED))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Body(body): Body<Value>,
) -> ApiResult {
    let build = find_build(&state, &id).await?;
    let mut doc = serde_json::to_value(&build).map_err(anyhow::Error::from)?;
    ensure_valid(check_read_only_fields(&body, &doc, UPDATABLE_FIELDS))?;

    // Merge the allowed fields over the stored document and re-validate.
    if let (Some(target), Some(fields)) = (doc.as_object_mut(), body.as_object()) {
        for (name, value) in fields {
            if UPDATABLE_FIELDS.contains(&name.as_str()) {
                target.insert(name.clone(), value.clone());
            }
        }
    }
    let merged: Build =
        serde_json::from_value(doc).map_err(|e| ApiError::bad_request(e.to_string()))?;
    ensure_valid(validate(&merged))?;

    let updated = state
        .db
        .repo::<Build>()
        .modify(&id, move |b: &mut Build| {
            *b = merged;
            Ok(())
        })
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No such build with ID \"{}\".", id)))?;

    state
        .cache
        .invalidate(&Invalidation::new().resource("build").entity("build", &id))
        .await?;
    tracing::info!(user = %user.name, build = %id, is_active = updated.is_active, "build updated");
    Ok(success(updated, StatusCode::OK))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult {
    let build = find_build(&state, &id).await?;
    if build.created_by != user.id && !state.acl.is_allowed(&user, "builds", "delete").await? {
        return Err(ApiError::forbidden("Only the owner can delete a build."));
    }
    state.db.repo::<Build>().delete(&id).await?;

    state
        .cache
        .invalidate(&Invalidation::new().resource("build").entity("build", &id))
        .await?;
    tracing::info!(user = %user.name, build = %id, "build deleted");
    log_async(
        &state,
        LogEvent::new("delete_build")
            .actor(Some(&user.id))
            .payload(json!({ "build": id, "label": build.label })),
    );
    Ok(Success::no_content())
}
