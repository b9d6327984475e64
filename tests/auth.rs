//! Authentication pipeline: sessions, JWT validation, path-bound tokens,
//! route modes and the legacy URL mirror.

mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

use common::{TestApp, PASSWORD};
use vpdb::api::users::user_changed;
use vpdb::middleware::scope::Scope;
use vpdb::models::token::Token;
use vpdb::models::user::User;

#[tokio::test]
async fn test_password_login_issues_session() {
    let app = TestApp::new();
    app.user("alice", &["member"], "free").await;

    let reply = app
        .post(
            "/v1/authenticate",
            None,
            json!({ "username": "alice", "password": PASSWORD }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    assert!(!reply.body["token"].as_str().unwrap().is_empty());
    assert_eq!(reply.body["user"]["name"], "alice");

    // The session works against a protected route.
    let token = reply.body["token"].as_str().unwrap().to_string();
    let profile = app.get("/v1/profile", Some(&token)).await;
    assert_eq!(profile.status, StatusCode::OK);
    assert_eq!(profile.body["email"], "alice@vpdb.test");
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let app = TestApp::new();
    app.user("alice", &["member"], "free").await;

    let reply = app
        .post(
            "/v1/authenticate",
            None,
            json!({ "username": "alice", "password": "nope-nope" }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.error(), "Wrong username or password.");
}

#[tokio::test]
async fn test_missing_credentials_in_body() {
    let app = TestApp::new();
    let reply = app.post("/v1/authenticate", None, json!({})).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_disabled_user_cannot_log_in() {
    let app = TestApp::new();
    let user = app.user("alice", &["member"], "free").await;
    app.state
        .db
        .repo::<User>()
        .modify(&user.id, |u: &mut User| {
            u.is_active = false;
            Ok(())
        })
        .await
        .unwrap();

    let reply = app
        .post(
            "/v1/authenticate",
            None,
            json!({ "username": "alice", "password": PASSWORD }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_expired_jwt_is_401_on_guarded_routes() {
    let app = TestApp::new();
    let user = app.user("alice", &["member"], "free").await;
    let expired = app.jwt_with(&user, -3600, vec![Scope::All], None);

    let reply = app.get("/v1/profile", Some(&expired)).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert!(reply.error().contains("expired"), "{}", reply.error());

    // Anonymous routes still reject bad credentials.
    let reply = app.get("/v1/games", Some(&expired)).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_plain_routes_ignore_bad_credentials() {
    let app = TestApp::new();
    let reply = app.get("/v1/ping", Some("not-a-jwt")).await;
    assert_eq!(reply.status, StatusCode::OK);
}

#[tokio::test]
async fn test_malformed_authorization_header() {
    let app = TestApp::new();
    let request = axum::http::Request::builder()
        .uri("/v1/games")
        .header("authorization", "Basic abc")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(app.router.clone(), request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_guarded_route_needs_credentials() {
    let app = TestApp::new();
    let reply = app.get("/v1/profile", None).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_session_token_is_refreshed() {
    let app = TestApp::new();
    let user = app.user("alice", &["member"], "free").await;
    let reply = app.get("/v1/profile", Some(&app.jwt(&user))).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.header("x-token-refresh").is_some());

    // Tokens of any other lifetime are not refreshed.
    let short = app.jwt_with(&user, 60, vec![Scope::All], None);
    let reply = app.get("/v1/profile", Some(&short)).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.header("x-token-refresh").is_none());
}

#[tokio::test]
async fn test_path_bound_token_in_url() {
    let app = TestApp::new();
    let user = app.user("alice", &["member"], "free").await;

    let bound = app.jwt_with(&user, 120, vec![Scope::Storage], Some("/v1/games"));
    let reply = app.get(&format!("/v1/games?token={}", bound), None).await;
    assert_eq!(reply.status, StatusCode::OK);

    // Other paths are refused.
    let reply = app.get(&format!("/v1/releases?token={}", bound), None).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert!(reply.error().contains("only valid for"), "{}", reply.error());
}

#[tokio::test]
async fn test_path_bound_token_only_for_get() {
    let app = TestApp::new();
    let user = app.user("alice", &["member", "contributor"], "free").await;
    let bound = app.jwt_with(&user, 120, vec![Scope::All], Some("/v1/games"));

    let reply = app
        .post(
            "/v1/games",
            Some(&bound),
            json!({ "title": "Attack from Mars", "game_type": "ss" }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert!(reply.error().contains("GET"), "{}", reply.error());
}

#[tokio::test]
async fn test_unbound_jwt_in_url_is_refused() {
    let app = TestApp::new();
    let user = app.user("alice", &["member"], "free").await;
    let reply = app
        .get(&format!("/v1/games?token={}", app.jwt(&user)), None)
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_storage_tokens_per_path() {
    let app = TestApp::new();
    let user = app.user("alice", &["member"], "free").await;
    let token = app.jwt(&user);

    let reply = app
        .post(
            "/v1/authenticate/storage",
            Some(&token),
            json!({ "paths": ["/v1/games", "/v1/releases"] }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    let games_token = reply.body["/v1/games"].as_str().unwrap().to_string();
    assert!(reply.body["/v1/releases"].is_string());

    let reply = app
        .get(&format!("/v1/games?token={}", games_token), None)
        .await;
    assert_eq!(reply.status, StatusCode::OK);

    let reply = app
        .post("/v1/authenticate/storage", Some(&token), json!({ "paths": [] }))
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_dirty_flag_after_admin_update() {
    let app = TestApp::new();
    let admin = app.user("root", &["admin"], "free").await;
    let member = app.user("alice", &["member"], "free").await;

    let reply = app
        .send(
            Method::PATCH,
            &format!("/v1/users/{}", member.id),
            Some(&app.jwt(&admin)),
            Some(json!({ "plan": "subscribed" })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);

    let token = app.jwt(&member);
    let first = app.get("/v1/profile", Some(&token)).await;
    assert_eq!(first.header("x-user-dirty"), Some("1"));
    assert_eq!(first.body["plan"]["id"], "subscribed");
    let second = app.get("/v1/profile", Some(&token)).await;
    assert_eq!(second.header("x-user-dirty"), Some("0"));
}

#[tokio::test]
async fn test_member_cannot_update_other_users() {
    let app = TestApp::new();
    let member = app.user("alice", &["member"], "free").await;
    let other = app.user("bob", &["member"], "free").await;
    let reply = app
        .send(
            Method::PATCH,
            &format!("/v1/users/{}", other.id),
            Some(&app.jwt(&member)),
            Some(json!({ "plan": "vip" })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_legacy_mirror_and_fallback() {
    let app = TestApp::new();
    assert_eq!(app.get("/v1/games", None).await.status, StatusCode::OK);
    assert_eq!(app.get("/games", None).await.status, StatusCode::OK);

    let index = app.get("/v1", None).await;
    assert_eq!(index.status, StatusCode::OK);
    assert_eq!(index.body["app_name"], "vpdb");

    let missing = app.get("/v1/no-such-thing", None).await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert_eq!(missing.error(), "No such resource.");
    assert!(missing.header("x-request-id").is_some());
}

#[tokio::test]
async fn test_plans_are_public() {
    let app = TestApp::new();
    let reply = app.get("/v1/plans", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body.as_array().unwrap().iter().any(|p| p["id"] == "free"));
}

#[tokio::test]
async fn test_profile_update() {
    let app = TestApp::new();
    let user = app.user("alice", &["member"], "free").await;
    app.user("bob", &["member"], "free").await;
    let token = app.jwt(&user);

    let taken = app
        .send(Method::PATCH, "/v1/profile", Some(&token), Some(json!({ "name": "bob" })))
        .await;
    assert_eq!(taken.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(taken.body["errors"][0]["path"], "name");

    let read_only = app
        .send(Method::PATCH, "/v1/profile", Some(&token), Some(json!({ "roles": ["admin"] })))
        .await;
    assert_eq!(read_only.status, StatusCode::UNPROCESSABLE_ENTITY);

    let no_current = app
        .send(Method::PATCH, "/v1/profile", Some(&token), Some(json!({ "password": "new-secret" })))
        .await;
    assert_eq!(no_current.status, StatusCode::UNPROCESSABLE_ENTITY);

    let changed = app
        .send(
            Method::PATCH,
            "/v1/profile",
            Some(&token),
            Some(json!({ "password": "new-secret", "current_password": PASSWORD })),
        )
        .await;
    assert_eq!(changed.status, StatusCode::OK, "{}", changed.body);

    let login = app
        .post("/v1/authenticate", None, json!({ "username": "alice", "password": "new-secret" }))
        .await;
    assert_eq!(login.status, StatusCode::OK);
}

#[tokio::test]
async fn test_kill_switch() {
    let app = TestApp::new();
    assert_eq!(
        app.send(Method::POST, "/v1/kill", None, None).await.status,
        StatusCode::NOT_FOUND
    );

    let app = TestApp::with_config(vpdb::config::Config {
        enable_kill_switch: true,
        ..Default::default()
    });
    let reply = app.send(Method::POST, "/v1/kill", None, None).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    tokio::time::timeout(
        std::time::Duration::from_secs(1),
        app.state.shutdown.notified(),
    )
    .await
    .expect("shutdown was not signalled");
}

#[tokio::test]
async fn test_provider_registers_and_links_users() {
    let app = TestApp::new();
    let token = app.provider_token("ipdb", &["community", "service"]).await;
    let body = json!({ "provider_id": "42", "email": "Pin@Example.com", "username": "pinhead" });

    let created = app
        .send(Method::PUT, "/v1/users", Some(&token), Some(body.clone()))
        .await;
    assert_eq!(created.status, StatusCode::CREATED, "{}", created.body);
    assert_eq!(created.body["name"], "pinhead");
    assert_eq!(created.body["email"], "pin@example.com");
    assert_eq!(created.body["providers"]["ipdb"], "42");
    let id = created.body["id"].as_str().unwrap().to_string();

    let again = app.send(Method::PUT, "/v1/users", Some(&token), Some(body)).await;
    assert_eq!(again.status, StatusCode::OK, "{}", again.body);
    assert_eq!(again.body["id"], id.as_str());

    // Existing local accounts are linked by email.
    let local = app.user("alice", &["member"], "free").await;
    let linked = app
        .send(
            Method::PUT,
            "/v1/users",
            Some(&token),
            Some(json!({ "provider_id": "7", "email": "alice@vpdb.test" })),
        )
        .await;
    assert_eq!(linked.status, StatusCode::OK, "{}", linked.body);
    assert_eq!(linked.body["id"], local.id.as_str());
    assert_eq!(linked.body["providers"]["ipdb"], "7");

    let invalid = app
        .send(Method::PUT, "/v1/users", Some(&token), Some(json!({ "provider_id": "8" })))
        .await;
    assert_eq!(invalid.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(invalid.body["errors"][0]["path"], "email");
}

#[tokio::test]
async fn test_provider_registration_needs_service_scope() {
    let app = TestApp::new();
    let body = json!({ "provider_id": "42", "email": "pin@example.com" });

    let user = app.user("alice", &["member", "admin"], "subscribed").await;
    let session = app
        .send(Method::PUT, "/v1/users", Some(&app.jwt(&user)), Some(body.clone()))
        .await;
    assert_eq!(session.status, StatusCode::UNAUTHORIZED);
    assert!(session.error().contains("invalid scope"), "{}", session.error());

    let community = app.provider_token("ipdb", &["community"]).await;
    let reply = app
        .send(Method::PUT, "/v1/users", Some(&community), Some(body))
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_application_token_resolves_user_headers() {
    let app = TestApp::new();
    let token = app.provider_token("ipdb", &["community", "service"]).await;
    let registered = app
        .send(
            Method::PUT,
            "/v1/users",
            Some(&token),
            Some(json!({ "provider_id": "42", "email": "pin@example.com" })),
        )
        .await;
    let id = registered.body["id"].as_str().unwrap().to_string();
    let detail = format!("/v1/users/{}", id);

    // Acting as the user shows their full profile.
    let by_provider_id = app
        .send_with(Method::GET, &detail, Some(&token), &[("x-user-id", "42")], None)
        .await;
    assert_eq!(by_provider_id.status, StatusCode::OK, "{}", by_provider_id.body);
    assert_eq!(by_provider_id.body["email"], "pin@example.com");

    let by_vpdb_id = app
        .send_with(Method::GET, &detail, Some(&token), &[("x-vpdb-user-id", id.as_str())], None)
        .await;
    assert_eq!(by_vpdb_id.status, StatusCode::OK, "{}", by_vpdb_id.body);
    assert_eq!(by_vpdb_id.body["email"], "pin@example.com");

    let unknown = app
        .send_with(Method::GET, &detail, Some(&token), &[("x-user-id", "999")], None)
        .await;
    assert_eq!(unknown.status, StatusCode::BAD_REQUEST);
    assert!(unknown.error().contains("No user with ID"), "{}", unknown.error());

    let local = app.user("alice", &["member"], "free").await;
    let unlinked = app
        .send_with(
            Method::GET,
            &detail,
            Some(&token),
            &[("x-vpdb-user-id", local.id.as_str())],
            None,
        )
        .await;
    assert_eq!(unlinked.status, StatusCode::BAD_REQUEST);
    assert!(unlinked.error().contains("never logged in"), "{}", unlinked.error());

    let nobody = app.get(&detail, Some(&token)).await;
    assert_eq!(nobody.status, StatusCode::BAD_REQUEST);
    assert!(nobody.error().contains("x-vpdb-user-id"), "{}", nobody.error());

    let stored = app
        .state
        .db
        .repo::<Token>()
        .find_one(Token::value_filter(&token))
        .await
        .unwrap()
        .unwrap();
    assert!(stored.last_used_at.is_some());
}

#[tokio::test]
async fn test_out_of_band_change_flags_user_dirty() {
    let app = TestApp::new();
    let user = app.user("alice", &["member"], "free").await;
    let token = app.jwt(&user);
    let detail = format!("/v1/users/{}", user.id);
    app.get(&detail, Some(&token)).await;
    assert_eq!(app.get(&detail, Some(&token)).await.header("x-cache-api"), Some("HIT"));

    app.state
        .db
        .repo::<User>()
        .modify(&user.id, |u: &mut User| {
            u.plan = "subscribed".into();
            Ok(())
        })
        .await
        .unwrap();
    user_changed(&app.state, &user.id, true).await.unwrap();

    let fresh = app.get(&detail, Some(&token)).await;
    assert_eq!(fresh.header("x-cache-api"), Some("MISS"));
    assert_eq!(fresh.body["plan"]["id"], "subscribed");
    let profile = app.get("/v1/profile", Some(&token)).await;
    assert_eq!(profile.header("x-user-dirty"), Some("1"));
}
