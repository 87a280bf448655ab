mod common;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use school_portal::{
    client::{ClientError, PortalClient},
    models::Role,
};
use serde_json::{Value, json};
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::net::TcpListener;

use common::{TEST_PASSWORD, spawn_app_with_access_ttl};

const FRESH_TOKEN: &str = "fresh-access-token";

/// A stand-in portal: `/protected` only accepts `FRESH_TOKEN`, which only the refresh
/// endpoint hands out.
struct StubPortal {
    refreshes: AtomicUsize,
    refresh_delay: Duration,
    refresh_succeeds: bool,
}

fn error(status: StatusCode, code: &str) -> Response {
    (
        status,
        Json(json!({ "success": false, "error": "stub", "message": code, "code": code })),
    )
        .into_response()
}

async fn stub_refresh(State(stub): State<Arc<StubPortal>>) -> Response {
    stub.refreshes.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(stub.refresh_delay).await;
    if stub.refresh_succeeds {
        Json(json!({ "success": true, "message": "ok", "accessToken": FRESH_TOKEN })).into_response()
    } else {
        error(StatusCode::UNAUTHORIZED, "INVALID_TOKEN")
    }
}

async fn stub_protected(headers: HeaderMap) -> Response {
    let expected = format!("Bearer {FRESH_TOKEN}");
    match headers.get(header::AUTHORIZATION) {
        Some(value) if value == expected.as_str() => Json(json!({ "ok": true })).into_response(),
        _ => error(StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED"),
    }
}

async fn stub_slow_unauthorized() -> Response {
    tokio::time::sleep(Duration::from_millis(300)).await;
    error(StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED")
}

async fn stub_always_unauthorized() -> Response {
    error(StatusCode::UNAUTHORIZED, "USER_NOT_FOUND")
}

async fn stub_login() -> Response {
    error(StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS")
}

async fn spawn_stub(refresh_delay: Duration, refresh_succeeds: bool) -> (String, Arc<StubPortal>) {
    let stub = Arc::new(StubPortal {
        refreshes: AtomicUsize::new(0),
        refresh_delay,
        refresh_succeeds,
    });

    let router = Router::new()
        .route("/api/auth/refresh", post(stub_refresh))
        .route("/api/auth/login", post(stub_login))
        .route("/api/protected", get(stub_protected))
        .route("/api/always-401", get(stub_always_unauthorized))
        .route("/api/slow-401", get(stub_slow_unauthorized))
        .with_state(stub.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let address = format!("http://127.0.0.1:{}/api", listener.local_addr().unwrap().port());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (address, stub)
}

async fn fire_concurrently(client: &Arc<PortalClient>, n: usize) -> Vec<Result<Value, ClientError>> {
    let tasks: Vec<_> = (0..n)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.get::<Value>("/protected").await })
        })
        .collect();

    let mut results = Vec::with_capacity(n);
    for task in tasks {
        results.push(task.await.expect("request task panicked"));
    }
    results
}

#[tokio::test]
async fn test_concurrent_401s_share_a_single_refresh() {
    let (address, stub) = spawn_stub(Duration::from_millis(200), true).await;
    let client = Arc::new(PortalClient::new(address).unwrap());

    let results = fire_concurrently(&client, 10).await;

    for result in results {
        assert_eq!(result.unwrap()["ok"], true);
    }
    assert_eq!(stub.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(client.coordinator().refreshes_started(), 1);
    assert_eq!(client.access_token().as_deref(), Some(FRESH_TOKEN));
    assert!(!client.coordinator().is_refreshing());
}

#[tokio::test]
async fn test_failed_refresh_reaches_every_waiter() {
    let (address, stub) = spawn_stub(Duration::from_millis(200), false).await;
    let client = Arc::new(PortalClient::new(address).unwrap());

    let results = fire_concurrently(&client, 5).await;

    for result in results {
        let err = result.unwrap_err();
        assert_eq!(err.code(), Some("INVALID_TOKEN"));
        assert_eq!(err.status(), Some(401));
    }
    assert_eq!(stub.refreshes.load(Ordering::SeqCst), 1);
    assert!(client.access_token().is_none());
}

#[tokio::test]
async fn test_late_401_after_failed_refresh_reuses_the_failure() {
    let (address, stub) = spawn_stub(Duration::from_millis(50), false).await;
    let client = PortalClient::new(address).unwrap();

    // `/protected` fails at once and its refresh is over before `/slow-401` answers.
    let (early, late) = tokio::join!(
        client.get::<Value>("/protected"),
        client.get::<Value>("/slow-401")
    );

    assert_eq!(early.unwrap_err().code(), Some("INVALID_TOKEN"));
    assert_eq!(late.unwrap_err().code(), Some("INVALID_TOKEN"));
    assert_eq!(stub.refreshes.load(Ordering::SeqCst), 1);

    // A request sent after the failure may try again.
    let again = client.get::<Value>("/protected").await.unwrap_err();
    assert_eq!(again.code(), Some("INVALID_TOKEN"));
    assert_eq!(stub.refreshes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_request_is_retried_at_most_once() {
    let (address, stub) = spawn_stub(Duration::ZERO, true).await;
    let client = PortalClient::new(address).unwrap();

    let err = client.get::<Value>("/always-401").await.unwrap_err();

    // The replay's own 401 is returned as-is; no second refresh.
    assert_eq!(err.code(), Some("USER_NOT_FOUND"));
    assert_eq!(stub.refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_public_route_401_is_not_refreshed() {
    let (address, stub) = spawn_stub(Duration::ZERO, true).await;
    let client = PortalClient::new(address).unwrap();

    let err = client.login("STU001", "wrong").await.unwrap_err();

    assert_eq!(err.code(), Some("INVALID_CREDENTIALS"));
    assert_eq!(stub.refreshes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_slow_refresh_times_out() {
    let (address, _stub) = spawn_stub(Duration::from_secs(5), true).await;
    let client = PortalClient::new(address)
        .unwrap()
        .with_refresh_timeout(Duration::from_millis(100));

    let err = client.get::<Value>("/protected").await.unwrap_err();

    assert_eq!(err, ClientError::RefreshTimedOut);
    assert!(!client.coordinator().is_refreshing());
}

#[tokio::test]
async fn test_unreachable_server_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = PortalClient::new(format!("http://127.0.0.1:{port}/api")).unwrap();
    let err = client.get::<Value>("/users/me").await.unwrap_err();

    assert!(matches!(err, ClientError::Transport(_)));
}

#[tokio::test]
async fn test_session_survives_access_token_expiry_against_portal() {
    let app = spawn_app_with_access_ttl(1).await;
    app.seed_user("STU001", Role::Student);
    let client = PortalClient::new(format!("{}/api", app.address)).unwrap();

    let login = client.login("STU001", TEST_PASSWORD).await.unwrap();
    assert!(login.success);

    let me: Value = client.get("/users/me").await.unwrap();
    assert_eq!(me["data"]["regNo"], "STU001");

    // Let the access token and its cookie lapse; the refresh cookie is still valid.
    tokio::time::sleep(Duration::from_millis(2100)).await;

    let me: Value = client.get("/users/me").await.unwrap();
    assert_eq!(me["data"]["regNo"], "STU001");
    assert_eq!(client.coordinator().refreshes_started(), 1);
    assert!(client.access_token().is_some());

    client.logout().await.unwrap();
    assert!(client.access_token().is_none());
}
