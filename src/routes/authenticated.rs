use crate::{
    AppState,
    auth::{RoleGate, role_gate},
    handlers,
    models::Role,
};
use axum::{
    Router, middleware,
    routing::{get, post, put},
};

const TEACHERS: RoleGate = RoleGate::new(&[Role::Teacher]);
const STAFF: RoleGate = RoleGate::new(&[Role::Teacher, Role::Admin]);

/// Authenticated Router Module
///
/// Routes for any active account. The session middleware is layered on top of this
/// router by `create_router`, so every handler here receives a resolved `AuthUser`.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /api/users/me
        .route("/users/me", get(handlers::get_current_user))
        // PUT /api/users/profile
        .route("/users/profile", put(handlers::update_profile))
        // GET /api/users/dashboard/stats
        // Role-shaped counters (classes/subjects for teachers, grades/attendance for students).
        .route("/users/dashboard/stats", get(handlers::get_dashboard_stats))
        // GET /api/users/announcements
        .route("/users/announcements", get(handlers::get_announcements))
        .merge(teacher_routes())
        .merge(staff_routes())
}

/// Routes limited to teachers.
fn teacher_routes() -> Router<AppState> {
    Router::new()
        // GET /api/users/teacher
        .route("/users/teacher", get(handlers::get_teacher_dashboard))
        // POST /api/result-upload/single/{studentId}/{subjectId}
        .route(
            "/result-upload/single/{student_id}/{subject_id}",
            post(handlers::upload_single_result),
        )
        .route_layer(middleware::from_fn_with_state(TEACHERS, role_gate))
}

/// Routes for teachers and administrators.
fn staff_routes() -> Router<AppState> {
    Router::new()
        // POST /api/users/post/announcement
        .route("/users/post/announcement", post(handlers::post_announcement))
        .route_layer(middleware::from_fn_with_state(STAFF, role_gate))
}
