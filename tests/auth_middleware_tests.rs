mod common;

use axum::{
    body::{Body, to_bytes},
    extract::FromRequestParts,
    http::{Request, StatusCode, header, request::Parts},
};
use chrono::Utc;
use school_portal::{
    AppState, AuthUser, DbError, MemoryRepository, TokenIssuer, create_router,
    error::ErrorBody,
    models::{Role, User},
    notify::MockNotifier,
};
use std::sync::Arc;
use tower::ServiceExt;

use common::{seed_user, test_state};

struct Harness {
    repo: Arc<MemoryRepository>,
    state: AppState,
}

fn harness() -> Harness {
    let repo = Arc::new(MemoryRepository::new());
    let state = test_state(repo.clone(), Arc::new(MockNotifier::new()));
    Harness { repo, state }
}

fn parts_with(header_pair: Option<(header::HeaderName, String)>) -> Parts {
    let mut builder = Request::builder().uri("/api/users/me");
    if let Some((name, value)) = header_pair {
        builder = builder.header(name, value);
    }
    builder.body(()).unwrap().into_parts().0
}

fn bearer(token: &str) -> Option<(header::HeaderName, String)> {
    Some((header::AUTHORIZATION, format!("Bearer {token}")))
}

async fn extract(h: &Harness, mut parts: Parts) -> Result<AuthUser, (StatusCode, &'static str)> {
    AuthUser::from_request_parts(&mut parts, &h.state)
        .await
        .map_err(|e| (e.status(), e.code()))
}

// --- Extractor ---

#[tokio::test]
async fn test_missing_token_is_rejected() {
    let h = harness();
    let result = extract(&h, parts_with(None)).await;
    assert_eq!(result.unwrap_err(), (StatusCode::UNAUTHORIZED, "NO_TOKEN"));
}

#[tokio::test]
async fn test_bearer_token_resolves_identity_from_store() {
    let h = harness();
    let user = seed_user(&h.repo, "TEA001", Role::Teacher);
    let token = h.state.tokens.issue_access_token(user.id).unwrap();

    let auth = extract(&h, parts_with(bearer(&token))).await.unwrap();

    assert_eq!(auth.id, user.id);
    assert_eq!(auth.role, Role::Teacher);
    assert_eq!(auth.profile.reg_no, "TEA001");
}

#[tokio::test]
async fn test_cookie_token_wins_over_bearer() {
    let h = harness();
    let cookie_user = seed_user(&h.repo, "STU001", Role::Student);
    let header_user = seed_user(&h.repo, "ADM001", Role::Admin);
    let cookie_token = h.state.tokens.issue_access_token(cookie_user.id).unwrap();
    let header_token = h.state.tokens.issue_access_token(header_user.id).unwrap();

    let (mut parts, _) = Request::builder()
        .header(header::COOKIE, format!("accessToken={cookie_token}"))
        .header(header::AUTHORIZATION, format!("Bearer {header_token}"))
        .body(())
        .unwrap()
        .into_parts();

    let auth = AuthUser::from_request_parts(&mut parts, &h.state).await.unwrap();
    assert_eq!(auth.id, cookie_user.id);
}

#[tokio::test]
async fn test_expired_token_is_rejected() {
    let h = harness();
    let user = seed_user(&h.repo, "STU001", Role::Student);
    let issued_long_ago = Utc::now().timestamp() - 3600;
    let pair = h.state.tokens.issue_tokens_at(user.id, issued_long_ago).unwrap();

    let result = extract(&h, parts_with(bearer(&pair.access_token))).await;
    assert_eq!(result.unwrap_err(), (StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED"));
}

#[tokio::test]
async fn test_refresh_token_is_not_an_access_token() {
    let h = harness();
    let user = seed_user(&h.repo, "STU001", Role::Student);
    let pair = h.state.tokens.issue_tokens(user.id).unwrap();

    let result = extract(&h, parts_with(bearer(&pair.refresh_token))).await;
    assert_eq!(result.unwrap_err(), (StatusCode::UNAUTHORIZED, "INVALID_TOKEN"));
}

#[tokio::test]
async fn test_token_from_foreign_issuer_is_rejected() {
    let h = harness();
    let user = seed_user(&h.repo, "STU001", Role::Student);
    let foreign = TokenIssuer::new("someone-elses-access", "someone-elses-refresh").unwrap();
    let token = foreign.issue_access_token(user.id).unwrap();

    let result = extract(&h, parts_with(bearer(&token))).await;
    assert_eq!(result.unwrap_err(), (StatusCode::UNAUTHORIZED, "INVALID_TOKEN"));

    let result = extract(&h, parts_with(bearer("not.a.jwt"))).await;
    assert_eq!(result.unwrap_err(), (StatusCode::UNAUTHORIZED, "INVALID_TOKEN"));
}

#[tokio::test]
async fn test_unknown_user_is_rejected() {
    let h = harness();
    let ghost = User::new("STU404", "No", "One", Role::Student, "hash");
    let token = h.state.tokens.issue_access_token(ghost.id).unwrap();

    let result = extract(&h, parts_with(bearer(&token))).await;
    assert_eq!(result.unwrap_err(), (StatusCode::UNAUTHORIZED, "USER_NOT_FOUND"));
}

#[tokio::test]
async fn test_suspended_account_is_rejected_with_valid_token() {
    let h = harness();
    let mut user = User::new("STU002", "Sus", "Pended", Role::Student, "hash");
    user.is_active = false;
    let user = h.repo.insert_user(user);
    let token = h.state.tokens.issue_access_token(user.id).unwrap();

    let result = extract(&h, parts_with(bearer(&token))).await;
    assert_eq!(result.unwrap_err(), (StatusCode::FORBIDDEN, "ACCOUNT_SUSPENDED"));
}

#[tokio::test]
async fn test_database_failures_are_classified() {
    let h = harness();
    let user = seed_user(&h.repo, "STU001", Role::Student);
    let token = h.state.tokens.issue_access_token(user.id).unwrap();

    h.repo
        .fail_lookups_with(Some(DbError::Connection("connection refused".into())));
    let result = extract(&h, parts_with(bearer(&token))).await;
    assert_eq!(
        result.unwrap_err(),
        (StatusCode::SERVICE_UNAVAILABLE, "DB_CONNECTION_ERROR")
    );

    h.repo
        .fail_lookups_with(Some(DbError::Timeout("pool timed out".into())));
    let result = extract(&h, parts_with(bearer(&token))).await;
    assert_eq!(result.unwrap_err(), (StatusCode::REQUEST_TIMEOUT, "DB_TIMEOUT"));

    // No retries inside the middleware: one lookup per request.
    assert_eq!(h.repo.user_lookups(), 2);
}

#[tokio::test]
async fn test_attached_identity_is_reused() {
    let h = harness();
    let user = seed_user(&h.repo, "STU001", Role::Student);

    let mut parts = parts_with(None);
    parts.extensions.insert(AuthUser::from(&user));

    let auth = AuthUser::from_request_parts(&mut parts, &h.state).await.unwrap();
    assert_eq!(auth.id, user.id);
    assert_eq!(h.repo.user_lookups(), 0);
}

// --- Middleware and role gates through the router ---

async fn call(h: &Harness, method: &str, uri: &str, token: Option<&str>) -> (StatusCode, ErrorBody) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let response = create_router(h.state.clone())
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(ErrorBody {
        success: true,
        error: String::new(),
        message: String::new(),
        code: String::new(),
    });
    (status, body)
}

#[tokio::test]
async fn test_protected_route_without_token() {
    let h = harness();
    let (status, body) = call(&h, "GET", "/api/users/me", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body.code, "NO_TOKEN");
    assert!(!body.success);
}

#[tokio::test]
async fn test_role_gate_rejects_student_on_teacher_route() {
    let h = harness();
    let student = seed_user(&h.repo, "STU001", Role::Student);
    let token = h.state.tokens.issue_access_token(student.id).unwrap();

    let (status, body) = call(&h, "GET", "/api/users/teacher", Some(&token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body.code, "INSUFFICIENT_PERMISSIONS");
    assert!(body.message.contains("TEACHER"));
}

#[tokio::test]
async fn test_role_gate_admits_listed_roles() {
    let h = harness();
    let admin = seed_user(&h.repo, "ADM001", Role::Admin);
    let token = h.state.tokens.issue_access_token(admin.id).unwrap();

    // Admins may not open the teacher dashboard...
    let (status, _) = call(&h, "GET", "/api/users/teacher", Some(&token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // ...but pass the admin gate: a missing body fails validation, not authorization.
    let (status, _) = call(&h, "POST", "/api/auth/adduser", Some(&token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_identity_is_loaded_once_per_request() {
    let h = harness();
    let teacher = seed_user(&h.repo, "TEA001", Role::Teacher);
    let token = h.state.tokens.issue_access_token(teacher.id).unwrap();

    let (status, _) = call(&h, "GET", "/api/users/teacher", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.repo.user_lookups(), 1);
}

#[tokio::test]
async fn test_public_routes_skip_the_session_check() {
    let h = harness();
    let (status, body) = call(&h, "POST", "/api/auth/refresh", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body.code, "NO_REFRESH_TOKEN");

    let (status, _) = call(&h, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
}
