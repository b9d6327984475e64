//! App tokens: plan gating, scope rules and authenticating with them.

mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

use common::{TestApp, PASSWORD};
use vpdb::models::token::Token;
use vpdb::models::user::User;

#[tokio::test]
async fn test_free_plan_cannot_manage_tokens() {
    let app = TestApp::new();
    let user = app.user("alice", &["member"], "free").await;
    let reply = app
        .post(
            "/v1/tokens",
            Some(&app.jwt(&user)),
            json!({ "label": "cli", "scopes": ["all"] }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert!(reply.error().contains("enable_app_tokens"), "{}", reply.error());
}

#[tokio::test]
async fn test_login_token_has_no_create_scope() {
    let app = TestApp::new();
    let user = app.user("alice", &["member"], "subscribed").await;
    let jwt = app.jwt(&user);

    let created = app
        .post(
            "/v1/tokens",
            Some(&jwt),
            json!({ "label": "login", "password": PASSWORD, "scopes": ["login"] }),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED, "{}", created.body);
    let value = created.body["token"].as_str().unwrap().to_string();
    assert_eq!(created.body["type"], "personal");

    let reply = app
        .post(
            "/v1/backglasses",
            Some(&value),
            json!({ "game_id": "afm", "description": "nope" }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert!(reply.error().contains("invalid scope"), "{}", reply.error());

    // It can still be exchanged for a session.
    let session = app.post("/v1/authenticate", None, json!({ "token": value })).await;
    assert_eq!(session.status, StatusCode::OK, "{}", session.body);
    assert_eq!(session.body["user"]["id"], user.id.as_str());
}

#[tokio::test]
async fn test_login_scope_requires_password() {
    let app = TestApp::new();
    let user = app.user("alice", &["member"], "subscribed").await;
    let jwt = app.jwt(&user);

    let missing = app
        .post("/v1/tokens", Some(&jwt), json!({ "label": "x", "scopes": ["login"] }))
        .await;
    assert_eq!(missing.status, StatusCode::UNAUTHORIZED);

    let wrong = app
        .post(
            "/v1/tokens",
            Some(&jwt),
            json!({ "label": "x", "password": "wrong-one", "scopes": ["login"] }),
        )
        .await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_scope_validation() {
    let app = TestApp::new();
    let user = app.user("alice", &["member"], "subscribed").await;
    let jwt = app.jwt(&user);

    let unknown = app
        .post("/v1/tokens", Some(&jwt), json!({ "label": "x", "scopes": ["all", "root"] }))
        .await;
    assert_eq!(unknown.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(unknown.body["errors"][0]["path"], "scopes.1");

    let empty = app
        .post("/v1/tokens", Some(&jwt), json!({ "label": "x", "scopes": [] }))
        .await;
    assert_eq!(empty.status, StatusCode::UNPROCESSABLE_ENTITY);

    // Personal tokens cannot carry the service scope.
    let service = app
        .post("/v1/tokens", Some(&jwt), json!({ "label": "x", "scopes": ["service"] }))
        .await;
    assert_eq!(service.status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_application_token_needs_provider_permission() {
    let app = TestApp::new();
    let user = app.user("alice", &["member"], "subscribed").await;
    let reply = app
        .post(
            "/v1/tokens",
            Some(&app.jwt(&user)),
            json!({ "label": "x", "type": "application", "provider": "ipdb", "scopes": ["community"] }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_token_lifecycle() {
    let app = TestApp::new();
    let user = app.user("alice", &["member"], "subscribed").await;
    let other = app.user("bob", &["member"], "subscribed").await;
    let jwt = app.jwt(&user);

    let created = app
        .post("/v1/tokens", Some(&jwt), json!({ "label": "ci", "scopes": ["all"] }))
        .await;
    assert_eq!(created.status, StatusCode::CREATED, "{}", created.body);
    let id = created.body["id"].as_str().unwrap().to_string();
    let value = created.body["token"].as_str().unwrap().to_string();

    // A token with the "all" scope acts as its owner.
    let profile = app.get("/v1/profile", Some(&value)).await;
    assert_eq!(profile.status, StatusCode::OK);
    assert_eq!(profile.body["name"], "alice");

    // The secret is never listed again.
    let list = app.get("/v1/tokens", Some(&jwt)).await;
    assert_eq!(list.status, StatusCode::OK);
    assert_eq!(list.body.as_array().unwrap().len(), 1);
    assert!(list.body[0].get("token").is_none());
    assert!(list.body[0]["last_used_at"].is_string());

    // Other users don't see it.
    let foreign = app
        .get(&format!("/v1/tokens/{}", id), Some(&app.jwt(&other)))
        .await;
    assert_eq!(foreign.status, StatusCode::NOT_FOUND);

    // Scopes are read-only.
    let patch = app
        .send(
            Method::PATCH,
            &format!("/v1/tokens/{}", id),
            Some(&jwt),
            Some(json!({ "scopes": ["login"] })),
        )
        .await;
    assert_eq!(patch.status, StatusCode::UNPROCESSABLE_ENTITY);

    let patch = app
        .send(
            Method::PATCH,
            &format!("/v1/tokens/{}", id),
            Some(&jwt),
            Some(json!({ "is_active": false })),
        )
        .await;
    assert_eq!(patch.status, StatusCode::OK, "{}", patch.body);

    let inactive = app.get("/v1/profile", Some(&value)).await;
    assert_eq!(inactive.status, StatusCode::UNAUTHORIZED);

    let deleted = app
        .send(Method::DELETE, &format!("/v1/tokens/{}", id), Some(&jwt), None)
        .await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);
    let gone = app.get("/v1/profile", Some(&value)).await;
    assert_eq!(gone.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_downgraded_plan_disables_tokens() {
    let app = TestApp::new();
    let user = app.user("alice", &["member"], "subscribed").await;
    let created = app
        .post("/v1/tokens", Some(&app.jwt(&user)), json!({ "label": "ci", "scopes": ["all"] }))
        .await;
    let value = created.body["token"].as_str().unwrap().to_string();

    app.state
        .db
        .repo::<User>()
        .modify(&user.id, |u: &mut User| {
            u.plan = "free".into();
            Ok(())
        })
        .await
        .unwrap();

    let reply = app.get("/v1/profile", Some(&value)).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert!(reply.error().contains("plan"), "{}", reply.error());
}

#[tokio::test]
async fn test_login_token_exchange_follows_plan_and_stamps_use() {
    let app = TestApp::new();
    let user = app.user("alice", &["member"], "subscribed").await;
    let created = app
        .post(
            "/v1/tokens",
            Some(&app.jwt(&user)),
            json!({ "label": "login", "password": PASSWORD, "scopes": ["login"] }),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED, "{}", created.body);
    let id = created.body["id"].as_str().unwrap().to_string();
    let value = created.body["token"].as_str().unwrap().to_string();
    assert!(created.body["last_used_at"].is_null());

    let session = app.post("/v1/authenticate", None, json!({ "token": value })).await;
    assert_eq!(session.status, StatusCode::OK, "{}", session.body);
    let stored = app
        .state
        .db
        .repo::<Token>()
        .get(&id)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.last_used_at.is_some());

    app.state
        .db
        .repo::<User>()
        .modify(&user.id, |u: &mut User| {
            u.plan = "free".into();
            Ok(())
        })
        .await
        .unwrap();
    let refused = app.post("/v1/authenticate", None, json!({ "token": value })).await;
    assert_eq!(refused.status, StatusCode::UNAUTHORIZED);
    assert!(refused.error().contains("plan"), "{}", refused.error());
}
