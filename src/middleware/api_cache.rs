//! Response cache for anonymous-readable GET endpoints.
//!
//! Entries are keyed by caller and normalized URL. Every write registers the
//! key in reverse-index sets (per resource, per user, per entity) so that a
//! mutation can drop exactly the entries it affects.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{OriginalUri, Request, State};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use super::authn::Identity;
use crate::errors::ApiError;
use crate::kv::KvStore;
use crate::AppState;

pub const CACHE_HEADER: &str = "x-cache-api";

const KEY_PREFIX: &str = "api-cache";

/// Responses larger than this are served but not cached.
const MAX_CACHE_ENTRY_BYTES: usize = 1024 * 1024;

/// Response headers worth replaying on a hit.
const CACHED_HEADERS: &[&str] = &["content-type", "x-list-page", "x-list-size", "x-list-count"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Debug, Clone)]
struct CacheRoute {
    segments: Vec<Segment>,
    resources: Vec<&'static str>,
    /// `(entity, route parameter)` pairs.
    entities: Vec<(&'static str, &'static str)>,
}

impl CacheRoute {
    fn parse(pattern: &str) -> Vec<Segment> {
        pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix(':') {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(s.to_string()),
            })
            .collect()
    }

    fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) if lit == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(params)
    }
}

/// Which routes are cached and what they depend on. Built once at startup.
#[derive(Debug, Clone, Default)]
pub struct ApiCacheConfig {
    routes: Vec<CacheRoute>,
    ttl: Option<u64>,
}

impl ApiCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caches `pattern` (e.g. `/games/:id`). The entry is dropped whenever one
    /// of `resources` is invalidated, or one of `entities` for the id taken
    /// from the named route parameter.
    pub fn route(
        mut self,
        pattern: &str,
        resources: &[&'static str],
        entities: &[(&'static str, &'static str)],
    ) -> Self {
        self.routes.push(CacheRoute {
            segments: CacheRoute::parse(pattern),
            resources: resources.to_vec(),
            entities: entities.to_vec(),
        });
        self
    }

    pub fn ttl(mut self, ttl_secs: Option<u64>) -> Self {
        self.ttl = ttl_secs;
        self
    }

    fn find(&self, path: &str) -> Option<(&CacheRoute, HashMap<String, String>)> {
        self.routes
            .iter()
            .find_map(|route| route.matches(path).map(|params| (route, params)))
    }

    pub fn is_cached(&self, path: &str) -> bool {
        self.find(path).is_some()
    }

    /// All resources any route depends on.
    pub fn resources(&self) -> Vec<&'static str> {
        let set: BTreeSet<&'static str> = self
            .routes
            .iter()
            .flat_map(|r| r.resources.iter().copied())
            .collect();
        set.into_iter().collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl CachedResponse {
    fn replay(self, hit: &'static str) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        let mut response = (status, self.body).into_response();
        let headers = response.headers_mut();
        for (name, value) in self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                headers.insert(name, value);
            }
        }
        headers.insert(CACHE_HEADER, HeaderValue::from_static(hit));
        response
    }
}

/// Sets of cache entries to drop.
#[derive(Debug, Clone, Default)]
pub struct Invalidation {
    resources: Vec<String>,
    entities: Vec<(String, String)>,
    users: Vec<String>,
}

impl Invalidation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource(mut self, resource: &str) -> Self {
        self.resources.push(resource.to_string());
        self
    }

    pub fn entity(mut self, entity: &str, id: &str) -> Self {
        self.entities.push((entity.to_string(), id.to_string()));
        self
    }

    pub fn user(mut self, user_id: &str) -> Self {
        self.users.push(user_id.to_string());
        self
    }

    fn set_keys(&self) -> Vec<String> {
        self.resources
            .iter()
            .map(|r| resource_set(r))
            .chain(self.entities.iter().map(|(e, id)| entity_set(e, id)))
            .chain(self.users.iter().map(|u| user_set(u)))
            .collect()
    }
}

fn resource_set(resource: &str) -> String {
    format!("{}-resource:{}", KEY_PREFIX, resource)
}

fn entity_set(entity: &str, id: &str) -> String {
    format!("{}-entity:{}:{}", KEY_PREFIX, entity, id)
}

fn user_set(user_id: &str) -> String {
    format!("{}-user:{}", KEY_PREFIX, user_id)
}

#[derive(Clone)]
pub struct ApiCache {
    config: Arc<ApiCacheConfig>,
    kv: Arc<dyn KvStore>,
}

impl ApiCache {
    pub fn new(config: ApiCacheConfig, kv: Arc<dyn KvStore>) -> Self {
        Self {
            config: Arc::new(config),
            kv,
        }
    }

    pub fn config(&self) -> &ApiCacheConfig {
        &self.config
    }

    /// `api-cache:<user|anon>:<path>?<sorted query>`, ignoring `token`.
    pub fn key(user_id: Option<&str>, path: &str, query: Option<&str>) -> String {
        let mut params: Vec<&str> = query
            .unwrap_or_default()
            .split('&')
            .filter(|p| !p.is_empty() && *p != "token" && !p.starts_with("token="))
            .collect();
        params.sort_unstable();
        format!(
            "{}:{}:{}?{}",
            KEY_PREFIX,
            user_id.unwrap_or("anon"),
            path,
            params.join("&")
        )
    }

    pub async fn get(&self, key: &str) -> Result<Option<CachedResponse>, ApiError> {
        match self.kv.get(key).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(cached) => Ok(Some(cached)),
                Err(e) => {
                    tracing::warn!(key, "dropping unreadable cache entry: {}", e);
                    self.kv.del(&[key.to_string()]).await?;
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        route: &CacheRoute,
        params: &HashMap<String, String>,
        user_id: Option<&str>,
        response: &CachedResponse,
    ) -> Result<(), ApiError> {
        let serialized = serde_json::to_string(response).map_err(anyhow::Error::from)?;
        if serialized.len() > MAX_CACHE_ENTRY_BYTES {
            tracing::debug!(
                key,
                size_bytes = serialized.len(),
                "skipping cache, response exceeds size limit"
            );
            return Ok(());
        }

        let ttl = self.config.ttl;
        self.kv.set(key, &serialized, ttl).await?;
        for resource in &route.resources {
            self.kv.sadd(&resource_set(resource), key, ttl).await?;
        }
        if let Some(user_id) = user_id {
            self.kv.sadd(&user_set(user_id), key, ttl).await?;
        }
        for (entity, param) in &route.entities {
            if let Some(id) = params.get(*param) {
                self.kv.sadd(&entity_set(entity, id), key, ttl).await?;
            }
        }
        Ok(())
    }

    /// Deletes every entry referenced by the given sets and unlinks them.
    /// Returns the number of entries deleted.
    ///
    /// Only the members read here are removed from the sets, and before the
    /// entries go, so a key registered concurrently stays reachable.
    pub async fn invalidate(&self, invalidation: &Invalidation) -> Result<u64, ApiError> {
        let sets = invalidation.set_keys();
        if sets.is_empty() {
            return Ok(0);
        }
        let keys = self.kv.sunion(&sets).await?;
        self.kv.srem(&sets, &keys).await?;
        let deleted = self.kv.del(&keys).await?;
        tracing::debug!(sets = ?sets, deleted, "invalidated API cache");
        Ok(deleted)
    }

    pub async fn invalidate_resource(&self, resource: &str) -> Result<u64, ApiError> {
        self.invalidate(&Invalidation::new().resource(resource)).await
    }

    pub async fn invalidate_entity(&self, entity: &str, id: &str) -> Result<u64, ApiError> {
        self.invalidate(&Invalidation::new().entity(entity, id)).await
    }

    pub async fn invalidate_user(&self, user_id: &str) -> Result<u64, ApiError> {
        self.invalidate(&Invalidation::new().user(user_id)).await
    }

    pub async fn invalidate_all_routes(&self) -> Result<u64, ApiError> {
        let invalidation = self
            .config
            .resources()
            .into_iter()
            .fold(Invalidation::new(), |inv, r| inv.resource(r));
        self.invalidate(&invalidation).await
    }
}

/// Middleware: serves cached responses and records fresh ones.
pub async fn middleware(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    match cached(&state.cache, req, next).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn cached(cache: &ApiCache, req: Request, next: Next) -> Result<Response, ApiError> {
    let method = req.method().clone();
    if method != Method::GET && method != Method::HEAD {
        return Ok(next.run(req).await);
    }
    let Some((route, params)) = cache.config.find(req.uri().path()) else {
        return Ok(next.run(req).await);
    };

    let identity = req.extensions().get::<Identity>().cloned().unwrap_or_default();
    // Callers the route would refuse must reach it so it can reject them.
    if identity.failure.is_some() || identity.is_userless_application() {
        return Ok(next.run(req).await);
    }

    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|u| u.0.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let key = ApiCache::key(identity.user_id(), &path, req.uri().query());

    if let Some(hit) = cache.get(&key).await? {
        tracing::debug!(key = %key, "api cache hit");
        return Ok(hit.replay("HIT"));
    }

    let response = next.run(req).await;
    if method != Method::GET || !response.status().is_success() {
        return Ok(with_cache_header(response, "MISS"));
    }

    let (parts, body) = response.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| anyhow::anyhow!("failed to read response body: {}", e))?;

    if let Ok(text) = std::str::from_utf8(&bytes) {
        let headers = CACHED_HEADERS
            .iter()
            .filter_map(|name| {
                parts
                    .headers
                    .get(*name)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();
        let entry = CachedResponse {
            status: parts.status.as_u16(),
            headers,
            body: text.to_string(),
        };
        cache
            .set(&key, route, &params, identity.user_id(), &entry)
            .await?;
    }

    let response = Response::from_parts(parts, Body::from(bytes));
    Ok(with_cache_header(response, "MISS"))
}

fn with_cache_header(mut response: Response, value: &'static str) -> Response {
    response
        .headers_mut()
        .insert(CACHE_HEADER, HeaderValue::from_static(value));
    response
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn config() -> ApiCacheConfig {
        ApiCacheConfig::new()
            .route("/games", &["game"], &[])
            .route("/games/:id", &["game"], &[("game", "id")])
            .route("/releases/:id", &["release"], &[("release", "id")])
    }

    fn entry(body: &str) -> CachedResponse {
        CachedResponse {
            status: 200,
            headers: vec![("content-type".into(), "application/json".into())],
            body: body.into(),
        }
    }

    #[test]
    fn test_key_sorts_query_and_drops_token() {
        let a = ApiCache::key(None, "/v1/games", Some("per_page=5&page=2"));
        let b = ApiCache::key(None, "/v1/games", Some("page=2&token=abc&per_page=5"));
        assert_eq!(a, b);
        assert_eq!(a, "api-cache:anon:/v1/games?page=2&per_page=5");
        assert_ne!(a, ApiCache::key(Some("u1"), "/v1/games", Some("page=2&per_page=5")));
    }

    #[test]
    fn test_route_matching() {
        let cfg = config();
        let (_, params) = cfg.find("/games/afm").unwrap();
        assert_eq!(params.get("id").map(String::as_str), Some("afm"));
        assert!(cfg.is_cached("/games"));
        assert!(!cfg.is_cached("/games/afm/rating"));
        assert!(!cfg.is_cached("/tokens"));
        assert_eq!(cfg.resources(), vec!["game", "release"]);
    }

    #[tokio::test]
    async fn test_invalidate_resource_only_drops_its_entries() {
        let kv = Arc::new(MemoryKv::new());
        let cache = ApiCache::new(config(), kv.clone());
        let cfg = config();

        let (games, p) = cfg.find("/games").unwrap();
        cache.set("k-games", games, &p, None, &entry("[]")).await.unwrap();
        let (release, p) = cfg.find("/releases/r1").unwrap();
        cache.set("k-release", release, &p, Some("u1"), &entry("{}")).await.unwrap();

        assert_eq!(cache.invalidate_resource("game").await.unwrap(), 1);
        assert!(cache.get("k-games").await.unwrap().is_none());
        assert_eq!(cache.get("k-release").await.unwrap(), Some(entry("{}")));

        // The consumed set is gone; invalidating again is a no-op.
        assert_eq!(cache.invalidate_resource("game").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_leaves_later_registrations_reachable() {
        let kv = Arc::new(MemoryKv::new());
        let cache = ApiCache::new(config(), kv.clone());
        let cfg = config();
        let (games, p) = cfg.find("/games").unwrap();

        cache.set("k-old", games, &p, None, &entry("[]")).await.unwrap();
        let read = kv.sunion(&[resource_set("game")]).await.unwrap();
        // Registered between reading the set and unlinking its members.
        cache.set("k-new", games, &p, None, &entry("[]")).await.unwrap();
        kv.srem(&[resource_set("game")], &read).await.unwrap();
        kv.del(&read).await.unwrap();

        assert_eq!(cache.invalidate_resource("game").await.unwrap(), 1);
        assert!(cache.get("k-new").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalidate_entity_and_user() {
        let kv = Arc::new(MemoryKv::new());
        let cache = ApiCache::new(config(), kv.clone());
        let cfg = config();

        let (route, p) = cfg.find("/games/afm").unwrap();
        cache.set("k-afm", route, &p, Some("u1"), &entry("{}")).await.unwrap();
        let (route, p) = cfg.find("/games/mm").unwrap();
        cache.set("k-mm", route, &p, None, &entry("{}")).await.unwrap();

        assert_eq!(cache.invalidate_entity("game", "afm").await.unwrap(), 1);
        assert!(cache.get("k-mm").await.unwrap().is_some());

        cache.set("k-afm", route, &p, Some("u1"), &entry("{}")).await.unwrap();
        assert_eq!(cache.invalidate_user("u1").await.unwrap(), 1);
        assert_eq!(cache.invalidate_all_routes().await.unwrap(), 1);
        assert!(kv.is_empty());
    }
}
