//! Local accounts and browser sessions.
//!
//! Provides the session extractor used by session-authenticated endpoints and
//! the error type of the account API.

use axum::{
    Json,
    extract::{FromRef, FromRequestParts},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::AppResources;
use crate::error::OAuthError;
use crate::store::StoreError;

pub mod identity;
pub mod login;
pub mod password;
pub mod session;

pub use session::AuthenticatedSession;

/// OpenAPI tag for account endpoints
pub const AUTH_TAG: &str = "Authentication";

/// Login page URL carrying the request to resume afterwards.
pub fn login_redirect(login_path: &str, return_to: &str) -> String {
    format!("{login_path}?return_to={}", urlencoding::encode(return_to))
}

/// Accept only same-origin absolute paths as post-login targets.
pub fn safe_return_path(candidate: Option<&str>) -> &str {
    match candidate {
        Some(path) if path.starts_with('/') && !path.starts_with("//") && !path.contains('\\') => {
            path
        }
        _ => "/",
    }
}

/// Error type for account and session failures
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthError {
    /// Error code (e.g., "unauthorized", "conflict")
    pub error: String,
    /// Human-readable error description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl AuthError {
    fn new(error: &str, description: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            error_description: Some(description.into()),
        }
    }

    pub fn unauthorized(description: impl Into<String>) -> Self {
        Self::new("unauthorized", description)
    }

    pub fn not_found(description: impl Into<String>) -> Self {
        Self::new("not_found", description)
    }

    pub fn bad_request(description: impl Into<String>) -> Self {
        Self::new("bad_request", description)
    }

    pub fn conflict(description: impl Into<String>) -> Self {
        Self::new("conflict", description)
    }

    pub fn bad_gateway(description: impl Into<String>) -> Self {
        Self::new("upstream_error", description)
    }

    /// The cause is logged, never returned.
    pub fn server_error(cause: impl std::fmt::Display) -> Self {
        tracing::error!(error = %cause, "internal error while handling request");
        Self {
            error: "server_error".to_string(),
            error_description: None,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self.error.as_str() {
            "unauthorized" | "invalid_client" | "invalid_token" => StatusCode::UNAUTHORIZED,
            "domain_rejected" => StatusCode::FORBIDDEN,
            "not_found" => StatusCode::NOT_FOUND,
            "bad_request" | "invalid_request" | "invalid_grant" | "invalid_scope" => {
                StatusCode::BAD_REQUEST
            }
            "conflict" => StatusCode::CONFLICT,
            "upstream_error" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(what) => AuthError::conflict(what),
            StoreError::Db(e) => AuthError::server_error(e),
        }
    }
}

impl From<OAuthError> for AuthError {
    fn from(err: OAuthError) -> Self {
        match err {
            OAuthError::Internal(cause) => AuthError::server_error(cause),
            other => AuthError {
                error: other.code().to_string(),
                error_description: other.description(),
            },
        }
    }
}

/// Axum extractor for endpoints that require a signed-in browser.
///
/// Reads the session cookie and accepts it only if the session is live.
///
/// ```ignore
/// async fn handler(SessionAuth(session): SessionAuth) -> impl IntoResponse {
///     format!("Hello, {}", session.email)
/// }
/// ```
pub struct SessionAuth(pub AuthenticatedSession);

impl<S> FromRequestParts<S> for SessionAuth
where
    AppResources: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let resources = AppResources::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);
        resources
            .sessions
            .from_cookies(&jar)
            .await?
            .map(SessionAuth)
            .ok_or_else(|| AuthError::unauthorized("Not authenticated"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_return_path() {
        assert_eq!(safe_return_path(Some("/dashboard")), "/dashboard");
        assert_eq!(
            safe_return_path(Some("/api/oauth/authorize?client_id=x")),
            "/api/oauth/authorize?client_id=x"
        );
        assert_eq!(safe_return_path(Some("//evil.example.com")), "/");
        assert_eq!(safe_return_path(Some("https://evil.example.com")), "/");
        assert_eq!(safe_return_path(Some("/\\evil.example.com")), "/");
        assert_eq!(safe_return_path(None), "/");
    }

    #[test]
    fn test_login_redirect_encodes_return_to() {
        assert_eq!(
            login_redirect("/login", "/api/oauth/authorize?client_id=a&state=b"),
            "/login?return_to=%2Fapi%2Foauth%2Fauthorize%3Fclient_id%3Da%26state%3Db"
        );
    }

    #[test]
    fn test_store_conflict_maps_to_409() {
        let response = AuthError::from(StoreError::Conflict("user already exists".into()))
            .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_identity_failures_keep_protocol_status() {
        let rejected = AuthError::from(OAuthError::DomainRejected("gmail.com".into()));
        assert_eq!(rejected.error, "domain_rejected");
        assert_eq!(rejected.into_response().status(), StatusCode::FORBIDDEN);

        let upstream = AuthError::from(OAuthError::Upstream("timeout".into()));
        assert_eq!(upstream.into_response().status(), StatusCode::BAD_GATEWAY);

        let grant = AuthError::from(OAuthError::InvalidGrant("expired".into()));
        assert_eq!(grant.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
