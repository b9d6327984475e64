//! Shared fixtures: an in-memory app, seeded users and request helpers.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use vpdb::config::Config;
use vpdb::middleware::jwt::{self, TokenSpec};
use vpdb::middleware::scope::Scope;
use vpdb::models::user::User;
use vpdb::AppState;

pub const PASSWORD: &str = "hunter22";

pub struct TestApp {
    pub state: Arc<AppState>,
    pub router: Router,
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl Reply {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn error(&self) -> &str {
        self.body["error"].as_str().unwrap_or_default()
    }
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let state = Arc::new(AppState::in_memory(config));
        let router = vpdb::api::app(state.clone());
        Self { state, router }
    }

    /// Inserts an active user with the given roles and plan.
    pub async fn user(&self, name: &str, roles: &[&str], plan: &str) -> User {
        let mut user = User::new(name, &format!("{}@vpdb.test", name), PASSWORD, plan).unwrap();
        user.roles = roles.iter().map(|r| r.to_string()).collect();
        self.state.db.repo::<User>().insert(&user).await.unwrap();
        user
    }

    pub fn jwt(&self, user: &User) -> String {
        self.jwt_with(user, self.state.config.api_token_lifetime, vec![Scope::All], None)
    }

    pub fn jwt_with(
        &self,
        user: &User,
        lifetime_secs: i64,
        scopes: Vec<Scope>,
        path: Option<&str>,
    ) -> String {
        jwt::issue(
            &self.state.config.secret,
            TokenSpec {
                user_id: &user.id,
                lifetime_secs,
                scopes,
                path,
                refresh: false,
            },
        )
        .unwrap()
        .token
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Reply {
        self.send_with(method, uri, token, &[], body).await
    }

    /// Like [`send`](Self::send), with extra request headers.
    pub async fn send_with(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        headers: &[(&str, &str)],
        body: Option<Value>,
    ) -> Reply {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        Reply {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> Reply {
        self.send(Method::GET, uri, token, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> Reply {
        self.send(Method::POST, uri, token, Some(body)).await
    }

    /// Creates an application token for `provider`, owned by a fresh admin.
    pub async fn provider_token(&self, provider: &str, scopes: &[&str]) -> String {
        let admin = self
            .user(&format!("{}-admin", provider), &["member", "admin"], "subscribed")
            .await;
        let reply = self
            .post(
                "/v1/tokens",
                Some(&self.jwt(&admin)),
                serde_json::json!({
                    "label": provider,
                    "type": "application",
                    "provider": provider,
                    "scopes": scopes,
                }),
            )
            .await;
        assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
        reply.body["token"].as_str().unwrap().to_string()
    }

    /// Waits for fire-and-forget log events to land.
    pub async fn settle(&self) {
        self.state.jobs.drain(Duration::from_secs(5)).await;
    }
}
