use std::sync::Arc;

use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post, put};
use axum::{Json, Router};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::middleware::api_cache::{self, ApiCacheConfig, CACHE_HEADER};
use crate::middleware::authn::{self, TOKEN_REFRESH_HEADER};
use crate::middleware::authz::Requirement;
use crate::middleware::scope::Scope;
use crate::models::backglass::Backglass;
use crate::models::plan::PlanAttr;
use crate::models::relation::{OnBackglass, OnGame, OnRelease};
use crate::models::release::Release;
use crate::models::rom::Rom;
use crate::AppState;

pub mod authenticate;
pub mod backglasses;
pub mod builds;
pub mod comments;
pub mod dispatch;
pub mod events;
pub mod games;
pub mod media;
pub mod misc;
pub mod moderated;
pub mod profile;
pub mod ratings;
pub mod releases;
pub mod roms;
pub mod stars;
pub mod tokens;
pub mod users;

use dispatch::{
    anon, auth, LIST_COUNT_HEADER, LIST_PAGE_HEADER, LIST_SIZE_HEADER, USER_DIRTY_HEADER,
};

const ALL_LOGIN: &[Scope] = &[Scope::All, Scope::Login];
const ALL_CREATE: &[Scope] = &[Scope::All, Scope::Create];
const ALL_COMMUNITY: &[Scope] = &[Scope::All, Scope::Community];

/// Cached GET routes and the resources/entities they depend on.
pub fn cache_config(ttl: Option<u64>) -> ApiCacheConfig {
    ApiCacheConfig::new()
        .ttl(ttl)
        .route("/games", &["game"], &[])
        .route("/games/:id", &["game"], &[("game", "id")])
        .route("/releases", &["release"], &[])
        .route("/releases/:id", &["release"], &[("release", "id")])
        .route("/backglasses", &["backglass"], &[])
        .route("/backglasses/:id", &["backglass"], &[("backglass", "id")])
        .route("/roms", &["rom"], &[])
        .route("/roms/:id", &["rom"], &[("rom", "id")])
        .route("/builds", &["build"], &[])
        .route("/builds/:id", &["build"], &[("build", "id")])
        .route("/releases/:id/comments", &["comment"], &[("release", "id")])
        .route("/games/:id/media", &["medium"], &[("game", "id")])
        .route("/releases/:id/media", &["medium"], &[("release", "id")])
        .route("/events", &["log_event"], &[])
        .route("/games/:id/events", &["log_event"], &[("game", "id")])
        .route("/releases/:id/events", &["log_event"], &[("release", "id")])
        .route("/users/:id", &["user"], &[("user", "id")])
}

/// All API routes, relative. Mounted under `/v1` and at the root.
pub fn router(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    let s = state;
    let mut router = Router::new()
        // misc
        .route("/", get(misc::index))
        .route("/ping", get(misc::ping))
        .route("/plans", get(misc::plans))
        .route(
            "/roles",
            auth(s, Requirement::new(&[Scope::All]).acl("roles", "list"), get(misc::roles)),
        )
        // authentication
        .route("/authenticate", post(authenticate::authenticate))
        .route(
            "/authenticate/storage",
            auth(s, Requirement::new(ALL_LOGIN), post(authenticate::storage_tokens)),
        )
        // profile & users
        .route(
            "/profile",
            auth(s, Requirement::new(ALL_LOGIN).acl("user", "view"), get(profile::view))
                .merge(auth(
                    s,
                    Requirement::new(ALL_LOGIN).acl("user", "update"),
                    patch(profile::update),
                )),
        )
        .route(
            "/users",
            auth(s, Requirement::new(&[Scope::All]).acl("users", "list"), get(users::list))
                .merge(auth(s, Requirement::new(&[Scope::Service]), put(users::register))),
        )
        .route(
            "/users/:id",
            anon(s, get(users::view)).merge(auth(
                s,
                Requirement::new(&[Scope::All]).acl("users", "update"),
                patch(users::update),
            )),
        )
        // tokens
        .route(
            "/tokens",
            auth(s, tokens_requirement("list"), get(tokens::list))
                .merge(auth(s, tokens_requirement("add"), post(tokens::create))),
        )
        .route(
            "/tokens/:id",
            auth(s, tokens_requirement("view"), get(tokens::view))
                .merge(auth(s, tokens_requirement("update-own"), patch(tokens::update)))
                .merge(auth(s, tokens_requirement("delete-own"), delete(tokens::remove))),
        )
        // games
        .route(
            "/games",
            anon(s, get(games::list)).merge(auth(
                s,
                Requirement::new(ALL_CREATE).acl("games", "add"),
                post(games::create),
            )),
        )
        .route(
            "/games/:id",
            anon(s, get(games::view))
                .merge(auth(
                    s,
                    Requirement::new(ALL_CREATE).acl("games", "update"),
                    patch(games::update),
                ))
                .merge(auth(
                    s,
                    Requirement::new(ALL_CREATE).acl("games", "delete"),
                    delete(games::remove),
                )),
        )
        // releases
        .route(
            "/releases",
            anon(s, get(moderated::list::<Release>)).merge(auth(
                s,
                Requirement::new(ALL_CREATE).acl("releases", "add"),
                post(releases::create),
            )),
        )
        .route(
            "/releases/:id",
            anon(s, get(moderated::view::<Release>)).merge(auth(
                s,
                Requirement::new(ALL_CREATE).acl("releases", "delete-own"),
                delete(moderated::remove::<Release>),
            )),
        )
        .route(
            "/releases/:id/moderate",
            auth(
                s,
                Requirement::new(&[Scope::All]).acl("releases", "moderate"),
                post(moderated::moderate::<Release>),
            ),
        )
        // backglasses
        .route(
            "/backglasses",
            anon(s, get(moderated::list::<Backglass>)).merge(auth(
                s,
                Requirement::new(ALL_CREATE).acl("backglasses", "add"),
                post(backglasses::create),
            )),
        )
        .route(
            "/backglasses/:id",
            anon(s, get(moderated::view::<Backglass>)).merge(auth(
                s,
                Requirement::new(ALL_CREATE).acl("backglasses", "delete-own"),
                delete(moderated::remove::<Backglass>),
            )),
        )
        .route(
            "/backglasses/:id/moderate",
            auth(
                s,
                Requirement::new(&[Scope::All]).acl("backglasses", "moderate"),
                post(moderated::moderate::<Backglass>),
            ),
        )
        // roms
        .route(
            "/roms",
            anon(s, get(moderated::list::<Rom>)).merge(auth(
                s,
                Requirement::new(ALL_CREATE).acl("roms", "add"),
                post(roms::create),
            )),
        )
        .route(
            "/roms/:id",
            anon(s, get(moderated::view::<Rom>)).merge(auth(
                s,
                Requirement::new(ALL_CREATE).acl("roms", "delete-own"),
                delete(moderated::remove::<Rom>),
            )),
        )
        .route(
            "/roms/:id/moderate",
            auth(
                s,
                Requirement::new(&[Scope::All]).acl("roms", "moderate"),
                post(moderated::moderate::<Rom>),
            ),
        )
        // builds
        .route(
            "/builds",
            anon(s, get(builds::list)).merge(auth(
                s,
                Requirement::new(ALL_CREATE).acl("builds", "add"),
                post(builds::create),
            )),
        )
        .route(
            "/builds/:id",
            anon(s, get(builds::view))
                .merge(auth(
                    s,
                    Requirement::new(&[Scope::All]).acl("builds", "update"),
                    patch(builds::update),
                ))
                .merge(auth(
                    s,
                    Requirement::new(ALL_CREATE).acl("builds", "delete-own"),
                    delete(builds::remove),
                )),
        )
        // comments
        .route(
            "/releases/:id/comments",
            anon(s, get(comments::list)).merge(auth(
                s,
                Requirement::new(ALL_COMMUNITY).acl("comments", "add"),
                post(comments::create),
            )),
        )
        // ratings
        .route(
            "/games/:id/rating",
            auth(s, rate_requirement("games"), get(ratings::view::<OnGame>))
                .merge(auth(s, rate_requirement("games"), post(ratings::create::<OnGame>)))
                .merge(auth(s, rate_requirement("games"), put(ratings::update::<OnGame>)))
                .merge(auth(s, rate_requirement("games"), delete(ratings::remove::<OnGame>))),
        )
        .route(
            "/releases/:id/rating",
            auth(s, rate_requirement("releases"), get(ratings::view::<OnRelease>))
                .merge(auth(s, rate_requirement("releases"), post(ratings::create::<OnRelease>)))
                .merge(auth(s, rate_requirement("releases"), put(ratings::update::<OnRelease>)))
                .merge(auth(s, rate_requirement("releases"), delete(ratings::remove::<OnRelease>))),
        )
        // stars
        .route(
            "/games/:id/star",
            auth(s, star_requirement("games"), get(stars::view::<OnGame>))
                .merge(auth(s, star_requirement("games"), post(stars::create::<OnGame>)))
                .merge(auth(s, star_requirement("games"), delete(stars::remove::<OnGame>))),
        )
        .route(
            "/releases/:id/star",
            auth(s, star_requirement("releases"), get(stars::view::<OnRelease>))
                .merge(auth(s, star_requirement("releases"), post(stars::create::<OnRelease>)))
                .merge(auth(s, star_requirement("releases"), delete(stars::remove::<OnRelease>))),
        )
        .route(
            "/backglasses/:id/star",
            auth(s, star_requirement("backglasses"), get(stars::view::<OnBackglass>))
                .merge(auth(s, star_requirement("backglasses"), post(stars::create::<OnBackglass>)))
                .merge(auth(s, star_requirement("backglasses"), delete(stars::remove::<OnBackglass>))),
        )
        // events
        .route("/events", anon(s, get(events::list)))
        .route("/games/:id/events", anon(s, get(events::list_for::<OnGame>)))
        .route("/releases/:id/events", anon(s, get(events::list_for::<OnRelease>)))
        // media
        .route(
            "/media",
            auth(s, Requirement::new(ALL_CREATE).acl("media", "add"), post(media::create)),
        )
        .route(
            "/media/:id",
            anon(s, get(media::view)).merge(auth(
                s,
                Requirement::new(ALL_CREATE).acl("media", "delete-own"),
                delete(media::remove),
            )),
        )
        .route("/games/:id/media", anon(s, get(media::list_for::<OnGame>)))
        .route("/releases/:id/media", anon(s, get(media::list_for::<OnRelease>)));

    if state.config.enable_kill_switch {
        router = router.route("/kill", post(misc::kill));
    }

    router
        .layer(middleware::from_fn_with_state(state.clone(), api_cache::middleware))
        .layer(middleware::from_fn_with_state(state.clone(), authn::identify))
}

fn tokens_requirement(permission: &'static str) -> Requirement {
    Requirement::new(ALL_LOGIN)
        .acl("tokens", permission)
        .plan(PlanAttr::EnableAppTokens(true))
}

fn rate_requirement(resource: &'static str) -> Requirement {
    Requirement::new(ALL_COMMUNITY).acl(resource, "rate")
}

fn star_requirement(resource: &'static str) -> Requirement {
    Requirement::new(ALL_COMMUNITY).acl(resource, "star")
}

/// The complete application: versioned API, legacy mirror, shared layers.
pub fn app(state: Arc<AppState>) -> Router {
    let api = router(&state);
    Router::new()
        .nest("/v1", api.clone())
        .merge(api)
        .fallback(fallback_404)
        .with_state(state)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id))
        .layer(cors())
}

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Tags every response with a fresh `X-Request-Id` for log correlation.
async fn request_id(req: Request, next: Next) -> Response {
    let id = uuid::Uuid::new_v4().to_string();
    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("authorization"),
            HeaderName::from_static(authn::VPDB_USER_HEADER),
            HeaderName::from_static(authn::PROVIDER_USER_HEADER),
        ])
        .expose_headers([
            HeaderName::from_static(TOKEN_REFRESH_HEADER),
            HeaderName::from_static(USER_DIRTY_HEADER),
            HeaderName::from_static(CACHE_HEADER),
            HeaderName::from_static(LIST_PAGE_HEADER),
            HeaderName::from_static(LIST_SIZE_HEADER),
            HeaderName::from_static(LIST_COUNT_HEADER),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
}

async fn fallback_404() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "No such resource." })),
    )
        .into_response()
}

fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %detail, "handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal server error." })),
    )
        .into_response()
}
