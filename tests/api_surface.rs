//! Status-code contract of the HTTP surface: the paths that must resolve
//! before any store access happens (auth gate, webhook secret, retired
//! endpoints) are exercised against a router wired to an unconnected pool.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;
use std::sync::Arc;
use tokio::sync::watch;
use tower::ServiceExt;

use telewatch::auth::tokens::TokenManager;
use telewatch::forwarding::Forwarder;
use telewatch::monitor::client::DetachedConnector;
use telewatch::monitor::health::HealthMonitor;
use telewatch::monitor::pipeline::Pipeline;
use telewatch::monitor::supervisor::Supervisor;
use telewatch::shared::config::{
    AppConfig, ArtifactConfig, AuthConfig, DatabaseConfig, ForwardingConfig, ServerConfig,
    TelegramConfig,
};
use telewatch::shared::state::AppState;
use telewatch::telegram::bot_api::BotApi;

fn test_config() -> AppConfig {
    AppConfig {
        database: DatabaseConfig {
            url: "postgres://localhost/telewatch_test".into(),
            max_connections: 1,
        },
        server: ServerConfig { port: 0 },
        telegram: TelegramConfig {
            bot_token: "110201543:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw".into(),
            api_id: 0,
            api_hash: String::new(),
            webhook_secret: "topsecret".into(),
            webhook_public_url: None,
        },
        auth: AuthConfig {
            signing_key: "a-test-signing-key-that-is-long-enough".into(),
            token_lifetime_hours: 24,
        },
        artifacts: ArtifactConfig {
            root: "./target/test-artifacts".into(),
        },
        forwarding: ForwardingConfig {
            messages_per_window: 20,
            window_seconds: 60,
            max_attempts: 5,
        },
    }
}

fn app() -> tower_http::normalize_path::NormalizePath<axum::Router> {
    let config = test_config();

    // The pool is never connected; every test here must resolve before
    // touching the store.
    let manager = ConnectionManager::<PgConnection>::new(&config.database.url);
    let pool = Pool::builder().max_size(1).build_unchecked(manager);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    Box::leak(Box::new(shutdown_tx));

    let bot = Arc::new(BotApi::new(&config.telegram.bot_token));
    let forwarder = Arc::new(Forwarder::new(
        pool.clone(),
        Arc::clone(&bot),
        config.forwarding.clone(),
        shutdown_rx.clone(),
    ));
    let pipeline = Arc::new(Pipeline::new(pool.clone(), Arc::clone(&forwarder)));
    let supervisor = Arc::new(Supervisor::new(
        pool.clone(),
        Arc::clone(&pipeline),
        Arc::new(DetachedConnector),
        shutdown_rx.clone(),
    ));
    let health = Arc::new(HealthMonitor::new(Arc::clone(&supervisor), shutdown_rx));

    let state = Arc::new(AppState {
        conn: pool,
        tokens: Arc::new(TokenManager::new(
            &config.auth.signing_key,
            config.auth.token_lifetime_hours,
        )),
        config,
        bot,
        forwarder,
        pipeline,
        supervisor,
        health,
    });

    let router = axum::Router::new()
        .nest("/api", telewatch::api_router::configure_api_routes())
        .with_state(state);
    tower_http::normalize_path::NormalizePathLayer::trim_trailing_slash().layer(router)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).expect("request")
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

#[tokio::test]
async fn test_root_banner() {
    let response = app().oneshot(get("/api/")).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("body");
    let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(body["message"], "telewatch API");
}

#[tokio::test]
async fn test_legacy_login_is_gone() {
    let response = app()
        .oneshot(post_json("/api/auth/login", "{}"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::GONE);
}

#[tokio::test]
async fn test_tenant_endpoints_require_token() {
    for uri in [
        "/api/auth/me",
        "/api/groups",
        "/api/watchlist",
        "/api/forwarding-destinations",
        "/api/messages",
        "/api/accounts",
        "/api/forwarded-messages",
        "/api/stats",
        "/api/organizations/current",
        "/api/users",
    ] {
        let response = app().oneshot(get(uri)).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
    }
}

#[tokio::test]
async fn test_garbage_token_is_unauthorized() {
    let request = Request::builder()
        .uri("/api/groups")
        .header(header::AUTHORIZATION, "Bearer not.a.real.token")
        .body(Body::empty())
        .expect("request");
    let response = app().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_webhook_rejects_wrong_secret() {
    let response = app()
        .oneshot(post_json(
            "/api/telegram/webhook/wrong-secret",
            r#"{"update_id": 1}"#,
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_register_rejects_forged_login_hash() {
    let body = r#"{
        "id": 1001,
        "first_name": "Alice",
        "auth_date": 1700000000,
        "hash": "deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef",
        "organization_name": "Org A"
    }"#;
    let response = app()
        .oneshot(post_json("/api/auth/register", body))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_register_rejects_unknown_fields() {
    let body = r#"{
        "id": 1001,
        "first_name": "Alice",
        "auth_date": 1700000000,
        "hash": "deadbeef",
        "organization_name": "Org A",
        "email": "legacy@example.com"
    }"#;
    let response = app()
        .oneshot(post_json("/api/auth/register", body))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let response = app().oneshot(get("/api/does-not-exist")).await.expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
