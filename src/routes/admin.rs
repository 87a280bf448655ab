use crate::{
    AppState,
    auth::{RoleGate, role_gate},
    handlers,
    models::Role,
};
use axum::{
    Router, middleware,
    routing::{patch, post},
};

const ADMINS: RoleGate = RoleGate::new(&[Role::Admin]);

/// Admin Router Module
///
/// Account administration. Mounted inside the authenticated group, so the session
/// middleware runs first and the role gate then admits only ADMIN identities.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // POST /api/auth/adduser
        // Provisions an account with a generated registration number and password.
        .route("/auth/adduser", post(handlers::add_user))
        // PATCH /api/admin/users/{id}/status
        // Suspends or reactivates an account.
        .route("/admin/users/{id}/status", patch(handlers::set_user_status))
        .route_layer(middleware::from_fn_with_state(ADMINS, role_gate))
}
