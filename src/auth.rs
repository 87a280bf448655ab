use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    cookies,
    error::ApiError,
    models::{Role, User, UserProfile},
    repository::RepositoryState,
    tokens::TokenIssuer,
};

/// TokenState
///
/// The shared token issuer stored in `AppState`.
pub type TokenState = Arc<TokenIssuer>;

/// AuthUser Extractor Result
///
/// The identity resolved for an authenticated request. Role and activation status are
/// read from the credential store on every request, never from the token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub reg_no: String,
    pub role: Role,
    pub profile: UserProfile,
}

impl From<&User> for AuthUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            reg_no: user.reg_no.clone(),
            role: user.role,
            profile: UserProfile::from(user),
        }
    }
}

/// The access token from the `accessToken` cookie, else from `Authorization: Bearer`.
pub fn access_token_from_headers(headers: &HeaderMap) -> Option<String> {
    let jar = CookieJar::from_headers(headers);
    cookies::access_token(&jar).or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
    })
}

/// AuthUser Extractor Implementation
///
/// Runs the session check: find the token, verify it against the access secret, load
/// the identity and refuse suspended accounts. Database failures are reported with
/// their classified code and are never retried here.
///
/// When `auth_middleware` already attached an identity to the request, that identity is
/// reused and no second lookup happens.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    TokenState: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        let token = access_token_from_headers(&parts.headers).ok_or(ApiError::NoToken)?;

        let tokens = TokenState::from_ref(state);
        let user_id = tokens.verify_access(&token).inspect_err(|e| {
            tracing::debug!(error = %e, "access token rejected");
        })?;

        let repo = RepositoryState::from_ref(state);
        let user = repo
            .find_user_by_id(user_id)
            .await?
            .ok_or(ApiError::UserNotFound)?;

        if !user.is_active {
            tracing::warn!(user_id = %user.id, "suspended account attempted access");
            return Err(ApiError::AccountSuspended);
        }

        Ok(AuthUser::from(&user))
    }
}

/// auth_middleware
///
/// Guards every non-public route. A rejected session short-circuits with the extractor's
/// error; an accepted one is attached to the request extensions for handlers and the
/// role gate.
pub async fn auth_middleware(auth_user: AuthUser, mut request: Request, next: Next) -> Response {
    request.extensions_mut().insert(auth_user);
    next.run(request).await
}

/// RoleGate
///
/// A fixed set of roles allowed through a group of routes.
#[derive(Debug, Clone, Copy)]
pub struct RoleGate {
    allowed: &'static [Role],
}

impl RoleGate {
    pub const fn new(allowed: &'static [Role]) -> Self {
        Self { allowed }
    }

    /// check
    ///
    /// `None` means no identity was attached, i.e. the session middleware did not run
    /// for this request.
    pub fn check(&self, user: Option<&AuthUser>) -> Result<(), ApiError> {
        let user = user.ok_or(ApiError::NotAuthenticated)?;
        if self.allowed.contains(&user.role) {
            Ok(())
        } else {
            Err(ApiError::InsufficientPermissions {
                required: self.required(),
            })
        }
    }

    /// Allowed roles as shown to the caller, e.g. `TEACHER or ADMIN`.
    pub fn required(&self) -> String {
        self.allowed
            .iter()
            .map(Role::as_str)
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

pub async fn role_gate(
    State(gate): State<RoleGate>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = request.extensions().get::<AuthUser>();
    if let Err(e) = gate.check(user) {
        tracing::info!(
            user_id = ?user.map(|u| u.id),
            required = %gate.required(),
            "role gate rejected request"
        );
        return Err(e);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn user_with(role: Role) -> AuthUser {
        AuthUser::from(&User::new("REG001", "Ada", "Obi", role, "hash"))
    }

    #[test]
    fn gate_passes_listed_roles_only() {
        let staff = RoleGate::new(&[Role::Teacher, Role::Admin]);

        assert!(staff.check(Some(&user_with(Role::Teacher))).is_ok());
        assert!(staff.check(Some(&user_with(Role::Admin))).is_ok());

        let err = staff.check(Some(&user_with(Role::Student))).unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_PERMISSIONS");
        assert_eq!(err.body().message, "Access denied. Required role: TEACHER or ADMIN.");
    }

    #[test]
    fn gate_without_identity_is_not_authenticated() {
        let gate = RoleGate::new(&[Role::Student]);
        assert_eq!(gate.check(None), Err(ApiError::NotAuthenticated));
    }

    #[test]
    fn cookie_token_wins_over_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(access_token_from_headers(&headers).as_deref(), Some("from-header"));

        headers.insert(header::COOKIE, HeaderValue::from_static("accessToken=from-cookie"));
        assert_eq!(access_token_from_headers(&headers).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn malformed_authorization_header_yields_no_token() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(access_token_from_headers(&headers).is_none());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert!(access_token_from_headers(&headers).is_none());
    }
}
