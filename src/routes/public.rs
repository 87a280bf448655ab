use crate::{AppState, handlers};
use axum::{Router, routing::post};

/// Public Router Module
///
/// The session lifecycle endpoints. None of them requires an access token: login takes
/// credentials, refresh reads the refresh cookie and logout only clears cookies.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // POST /api/auth/login
        // Verifies registration number and password, sets both session cookies.
        .route("/auth/login", post(handlers::login))
        // POST /api/auth/refresh
        // Trades the refresh cookie for a new access token.
        .route("/auth/refresh", post(handlers::refresh))
        // POST /api/auth/logout
        .route("/auth/logout", post(handlers::logout))
}
