//! Moderation of releases and backglasses, visibility and the event log.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::TestApp;

struct Fixture {
    app: TestApp,
    member: String,
    contributor: String,
    moderator: String,
    game_id: String,
}

async fn fixture() -> Fixture {
    let app = TestApp::new();
    let member = app.jwt(&app.user("alice", &["member"], "free").await);
    let contributor = app.jwt(&app.user("carol", &["member", "contributor"], "free").await);
    let moderator = app.jwt(&app.user("mod", &["member", "moderator"], "free").await);

    let game = app
        .post(
            "/v1/games",
            Some(&contributor),
            json!({ "id": "afm", "title": "Attack from Mars", "game_type": "ss", "year": 1995 }),
        )
        .await;
    assert_eq!(game.status, StatusCode::CREATED, "{}", game.body);

    Fixture {
        app,
        member,
        contributor,
        moderator,
        game_id: "afm".into(),
    }
}

async fn create_release(f: &Fixture, token: &str, name: &str) -> serde_json::Value {
    let reply = f
        .app
        .post(
            "/v1/releases",
            Some(token),
            json!({ "game_id": f.game_id, "name": name }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
    reply.body
}

#[tokio::test]
async fn test_member_release_starts_pending() {
    let f = fixture().await;
    let release = create_release(&f, &f.member, "Pending Edition").await;
    assert_eq!(release["moderation"]["is_approved"], false);
    assert_eq!(release["moderation"]["auto_approved"], false);
    assert!(release["moderation"]["history"].as_array().unwrap().is_empty());

    let id = release["id"].as_str().unwrap();
    let detail = format!("/v1/releases/{}", id);

    // Hidden from the public, visible to its creator and moderators.
    assert_eq!(f.app.get(&detail, None).await.status, StatusCode::NOT_FOUND);
    assert_eq!(f.app.get(&detail, Some(&f.member)).await.status, StatusCode::OK);
    assert_eq!(f.app.get(&detail, Some(&f.moderator)).await.status, StatusCode::OK);
    assert_eq!(f.app.get(&detail, Some(&f.contributor)).await.status, StatusCode::NOT_FOUND);

    let list = f.app.get("/v1/releases", None).await;
    assert_eq!(list.body.as_array().unwrap().len(), 0);
    assert_eq!(list.header("x-list-count"), Some("0"));
}

#[tokio::test]
async fn test_contributor_release_is_auto_approved() {
    let f = fixture().await;
    let release = create_release(&f, &f.contributor, "Auto Edition").await;
    assert_eq!(release["moderation"]["is_approved"], true);
    assert_eq!(release["moderation"]["auto_approved"], true);
    let history = release["moderation"]["history"].as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["event"], "approved");

    let list = f.app.get("/v1/releases", None).await;
    assert_eq!(list.body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_approve_then_refuse_keeps_history_newest_first() {
    let f = fixture().await;
    let release = create_release(&f, &f.member, "Contested").await;
    let moderate = format!("/v1/releases/{}/moderate", release["id"].as_str().unwrap());

    let approved = f
        .app
        .post(&moderate, Some(&f.moderator), json!({ "action": "approve" }))
        .await;
    assert_eq!(approved.status, StatusCode::OK, "{}", approved.body);
    assert_eq!(approved.body["moderation"]["is_approved"], true);

    let refused = f
        .app
        .post(
            &moderate,
            Some(&f.moderator),
            json!({ "action": "refuse", "message": "Broken table script." }),
        )
        .await;
    assert_eq!(refused.status, StatusCode::OK, "{}", refused.body);
    let moderation = &refused.body["moderation"];
    assert_eq!(moderation["is_approved"], false);
    assert_eq!(moderation["is_refused"], true);
    let history = moderation["history"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["event"], "refused");
    assert_eq!(history[0]["message"], "Broken table script.");
    assert_eq!(history[1]["event"], "approved");
}

#[tokio::test]
async fn test_refuse_needs_message_and_moderator() {
    let f = fixture().await;
    let release = create_release(&f, &f.member, "Contested").await;
    let moderate = format!("/v1/releases/{}/moderate", release["id"].as_str().unwrap());

    let reply = f
        .app
        .post(&moderate, Some(&f.moderator), json!({ "action": "refuse" }))
        .await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);

    // Moderating a pending entity again is rejected.
    let reply = f
        .app
        .post(&moderate, Some(&f.moderator), json!({ "action": "moderate" }))
        .await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);

    let reply = f
        .app
        .post(&moderate, Some(&f.member), json!({ "action": "approve" }))
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_moderation_filters_are_for_moderators() {
    let f = fixture().await;
    create_release(&f, &f.member, "Pending Edition").await;

    assert_eq!(
        f.app.get("/v1/releases?moderation=pending", None).await.status,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        f.app
            .get("/v1/releases?moderation=pending", Some(&f.member))
            .await
            .status,
        StatusCode::FORBIDDEN
    );

    let pending = f
        .app
        .get("/v1/releases?moderation=pending", Some(&f.moderator))
        .await;
    assert_eq!(pending.status, StatusCode::OK);
    assert_eq!(pending.body.as_array().unwrap().len(), 1);

    let bogus = f
        .app
        .get("/v1/releases?moderation=maybe", Some(&f.moderator))
        .await;
    assert_eq!(bogus.status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_backglass_moderation() {
    let f = fixture().await;
    let reply = f
        .app
        .post(
            "/v1/backglasses",
            Some(&f.member),
            json!({ "game_id": f.game_id, "description": "Upscaled" }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
    assert_eq!(reply.body["moderation"]["is_approved"], false);

    // Game contributors skip the queue for backglasses.
    let reply = f
        .app
        .post("/v1/backglasses", Some(&f.contributor), json!({ "game_id": f.game_id }))
        .await;
    assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
    assert_eq!(reply.body["moderation"]["auto_approved"], true);

    let missing = f
        .app
        .post("/v1/backglasses", Some(&f.member), json!({ "game_id": "nope" }))
        .await;
    assert_eq!(missing.status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_owner_deletes_release() {
    let f = fixture().await;
    let release = create_release(&f, &f.member, "Short-lived").await;
    let detail = format!("/v1/releases/{}", release["id"].as_str().unwrap());

    let other = f
        .app
        .send(axum::http::Method::DELETE, &detail, Some(&f.contributor), None)
        .await;
    assert_eq!(other.status, StatusCode::FORBIDDEN);

    let own = f
        .app
        .send(axum::http::Method::DELETE, &detail, Some(&f.member), None)
        .await;
    assert_eq!(own.status, StatusCode::NO_CONTENT);
    assert_eq!(f.app.get(&detail, Some(&f.member)).await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_game_with_releases_cannot_be_deleted() {
    let f = fixture().await;
    create_release(&f, &f.contributor, "Keeper").await;
    let reply = f
        .app
        .send(axum::http::Method::DELETE, "/v1/games/afm", Some(&f.contributor), None)
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_private_events_are_for_moderators() {
    let f = fixture().await;
    create_release(&f, &f.member, "Pending Edition").await;
    create_release(&f, &f.contributor, "Public Edition").await;
    f.app.settle().await;

    let public = f.app.get("/v1/events?events=create_release", None).await;
    assert_eq!(public.status, StatusCode::OK);
    assert_eq!(public.body.as_array().unwrap().len(), 1);

    let all = f
        .app
        .get("/v1/events?events=create_release", Some(&f.moderator))
        .await;
    assert_eq!(all.body.as_array().unwrap().len(), 2);

    let game_events = f
        .app
        .get("/v1/games/afm/events?events=create_game,create_release", None)
        .await;
    assert_eq!(game_events.status, StatusCode::OK);
    assert_eq!(game_events.body.as_array().unwrap().len(), 2);
}
