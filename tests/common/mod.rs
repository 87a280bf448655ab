#![allow(dead_code)]

use school_portal::{
    AppConfig, AppState, MemoryRepository, TokenIssuer, create_router,
    models::{Role, User},
    notify::MockNotifier,
};
use std::sync::Arc;
use tokio::net::TcpListener;

pub const TEST_PASSWORD: &str = "Passw0rd!";
// Lowest cost bcrypt accepts; keeps hashing fast in tests.
pub const TEST_HASH_COST: u32 = 4;

/// TestApp
///
/// A portal instance on an ephemeral port, backed by the in-memory repository.
pub struct TestApp {
    pub address: String,
    pub repo: Arc<MemoryRepository>,
    pub tokens: Arc<TokenIssuer>,
    pub notifier: Arc<MockNotifier>,
}

impl TestApp {
    pub fn api(&self, path: &str) -> String {
        format!("{}/api{}", self.address, path)
    }

    /// Stores an active user whose password is `TEST_PASSWORD`.
    pub fn seed_user(&self, reg_no: &str, role: Role) -> User {
        seed_user(&self.repo, reg_no, role)
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        password_hash_cost: TEST_HASH_COST,
        ..AppConfig::default()
    }
}

pub fn seed_user(repo: &MemoryRepository, reg_no: &str, role: Role) -> User {
    let hash = bcrypt::hash(TEST_PASSWORD, TEST_HASH_COST).expect("hashing failed");
    repo.insert_user(User::new(reg_no, "Test", "User", role, hash))
}

pub fn test_state(repo: Arc<MemoryRepository>, notifier: Arc<MockNotifier>) -> AppState {
    let config = test_config();
    let tokens = TokenIssuer::from_config(&config).expect("test secrets are valid");
    AppState {
        repo,
        tokens: Arc::new(tokens),
        notifier,
        config,
    }
}

pub async fn spawn_app() -> TestApp {
    spawn(None).await
}

/// Like `spawn_app`, with access tokens (and their cookie) living `secs` seconds.
pub async fn spawn_app_with_access_ttl(secs: i64) -> TestApp {
    spawn(Some(secs)).await
}

async fn spawn(access_ttl: Option<i64>) -> TestApp {
    let repo = Arc::new(MemoryRepository::new());
    let notifier = Arc::new(MockNotifier::new());
    let mut state = test_state(repo.clone(), notifier.clone());
    if let Some(secs) = access_ttl {
        let issuer = state.tokens.as_ref().clone();
        let refresh_ttl = issuer.refresh_ttl_secs();
        state.tokens = Arc::new(issuer.with_ttls(secs, refresh_ttl));
    }
    let tokens = state.tokens.clone();
    let router = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestApp {
        address,
        repo,
        tokens,
        notifier,
    }
}

/// A browser-like client that keeps the session cookies between requests.
pub fn cookie_client() -> reqwest::Client {
    reqwest::Client::builder()
        .cookie_store(true)
        .build()
        .expect("client builds")
}
