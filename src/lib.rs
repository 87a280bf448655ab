use axum::{
    Router,
    extract::FromRef,
    http::{HeaderName, HeaderValue, Method, header},
    middleware,
    routing::get,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod auth;
pub mod client;
pub mod config;
pub mod cookies;
pub mod error;
pub mod handlers;
pub mod models;
pub mod notify;
pub mod password;
pub mod repository;
pub mod retry;
pub mod tokens;

// Routers grouped by required access (public, authenticated, admin).
pub mod routes;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use auth::{AuthUser, TokenState};
pub use config::AppConfig;
pub use error::{ApiError, DbError};
pub use notify::NotifierState;
pub use repository::{MemoryRepository, PostgresRepository, RepositoryState};
pub use tokens::TokenIssuer;

/// ApiDoc
///
/// OpenAPI document for every route and wire model, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health, handlers::login, handlers::refresh, handlers::logout,
        handlers::add_user, handlers::set_user_status, handlers::get_current_user,
        handlers::update_profile, handlers::get_dashboard_stats,
        handlers::get_teacher_dashboard, handlers::get_announcements,
        handlers::post_announcement, handlers::upload_single_result
    ),
    components(
        schemas(
            models::Role, models::Gender, models::TestKind, models::IdentitySummary,
            models::UserProfile, models::LoginRequest, models::LoginResponse,
            models::RefreshResponse, models::MessageResponse, models::CreateUserRequest,
            models::CreatedUser, models::UpdateProfileRequest, models::UpdateUserStatusRequest,
            models::DashboardStats, models::TeacherDashboard, models::TeacherOverview,
            models::ClassOverview, models::StudentSummary, models::SubjectSummary,
            models::GradeEntry, models::TestScoreEntry, models::Announcement,
            models::CreateAnnouncementRequest, models::ScoreUploadRequest, models::TestScore,
            error::ErrorBody,
        )
    ),
    tags(
        (name = "school-portal", description = "School Portal API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single, immutable container of shared services. Cloning is cheap: every
/// service sits behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Credential store and school records.
    pub repo: RepositoryState,
    /// Signs and verifies access and refresh tokens.
    pub tokens: TokenState,
    /// Best-effort operator notifications.
    pub notifier: NotifierState,
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for TokenState {
    fn from_ref(app_state: &AppState) -> TokenState {
        app_state.tokens.clone()
    }
}

impl FromRef<AppState> for NotifierState {
    fn from_ref(app_state: &AppState) -> NotifierState {
        app_state.notifier.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// Credentialed CORS for the dashboard frontend. Cookies only flow to an exact origin.
fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origin = match config.frontend_url.parse::<HeaderValue>() {
        Ok(origin) => AllowOrigin::exact(origin),
        Err(e) => {
            tracing::warn!(frontend_url = %config.frontend_url, error = %e, "invalid FRONTEND_URL, cross-origin requests disabled");
            AllowOrigin::list(Vec::<HeaderValue>::new())
        }
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// create_router
///
/// Assembles the routing tree, the session and role layers, and the observability
/// stack around it.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    // Header name constant for Request Correlation.
    let x_request_id = HeaderName::from_static("x-request-id");

    // Session middleware wraps every protected route; role gates inside the groups run
    // after it.
    let protected = authenticated::authenticated_routes()
        .merge(admin::admin_routes())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    let api = public::public_routes().merge(protected);

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(handlers::health))
        .nest("/api", api)
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Builds the per-request span so every log line of a request carries its
/// `x-request-id`.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
