//! List endpoints: paging bounds and headers.

mod common;

use axum::http::StatusCode;

use common::TestApp;

#[tokio::test]
async fn test_page_beyond_storable_offset_is_rejected() {
    let app = TestApp::new();

    let reply = app.get("/v1/games?page=18446744073709551615", None).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST, "{}", reply.body);
    assert!(reply.error().contains("out of range"), "{}", reply.error());

    let reply = app
        .get("/v1/releases?page=18446744073709551615&per_page=50", None)
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST, "{}", reply.body);
}

#[tokio::test]
async fn test_far_page_is_empty() {
    let app = TestApp::new();
    let reply = app.get("/v1/games?page=1000000&per_page=50", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body.as_array().unwrap().is_empty());
    assert_eq!(reply.header("x-list-page"), Some("1000000"));
    assert_eq!(reply.header("x-list-size"), Some("50"));
}
