//! Release comments.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::TestApp;

async fn release(app: &TestApp, token: &str) -> String {
    let game = app
        .post(
            "/v1/games",
            Some(token),
            json!({ "id": "mm", "title": "Medieval Madness", "game_type": "ss", "year": 1997 }),
        )
        .await;
    assert_eq!(game.status, StatusCode::CREATED, "{}", game.body);
    let release = app
        .post("/v1/releases", Some(token), json!({ "game_id": "mm", "name": "Remake" }))
        .await;
    assert_eq!(release.status, StatusCode::CREATED, "{}", release.body);
    release.body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_message_length_counts_characters() {
    let app = TestApp::new();
    let token = app.jwt(&app.user("carol", &["member", "contributor"], "free").await);
    let comments = format!("/v1/releases/{}/comments", release(&app, &token).await);

    // Two bytes per character, so the byte length is well over the limit.
    let longest = "ü".repeat(5000);
    let reply = app.post(&comments, Some(&token), json!({ "message": longest })).await;
    assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);

    let too_long = "ü".repeat(5001);
    let reply = app.post(&comments, Some(&token), json!({ "message": too_long })).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(reply.body["errors"][0]["path"], "message");

    let list = app.get(&comments, None).await;
    assert_eq!(list.body.as_array().unwrap().len(), 1);
}
