//! Protocol error taxonomy for the authorization server and the identity provider
//! callback. The CTF platform endpoints answer in their own shape (`sso::SsoError`).

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::auth::identity::IdentityError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("invalid_request: {0}")]
    InvalidRequest(String),
    #[error("invalid_client: {0}")]
    InvalidClient(String),
    #[error("invalid_grant: {0}")]
    InvalidGrant(String),
    #[error("invalid_scope: {0}")]
    InvalidScope(String),
    #[error("unsupported_grant_type: {0}")]
    UnsupportedGrantType(String),
    #[error("invalid_token: {0}")]
    InvalidToken(String),
    #[error("domain_rejected: {0}")]
    DomainRejected(String),
    #[error("upstream_error: {0}")]
    Upstream(String),
    /// Never shown to the caller; the message is only logged.
    #[error("internal error: {0}")]
    Internal(String),
}

/// OAuth2 error body (RFC 6749 section 5.2)
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl OAuthError {
    /// Wire error code
    pub fn code(&self) -> &'static str {
        match self {
            OAuthError::InvalidRequest(_) => "invalid_request",
            OAuthError::InvalidClient(_) => "invalid_client",
            OAuthError::InvalidGrant(_) => "invalid_grant",
            OAuthError::InvalidScope(_) => "invalid_scope",
            OAuthError::UnsupportedGrantType(_) => "unsupported_grant_type",
            OAuthError::InvalidToken(_) => "invalid_token",
            OAuthError::DomainRejected(_) => "domain_rejected",
            OAuthError::Upstream(_) => "upstream_error",
            OAuthError::Internal(_) => "server_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            OAuthError::InvalidRequest(_)
            | OAuthError::InvalidGrant(_)
            | OAuthError::InvalidScope(_)
            | OAuthError::UnsupportedGrantType(_) => StatusCode::BAD_REQUEST,
            OAuthError::InvalidClient(_) | OAuthError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            OAuthError::DomainRejected(_) => StatusCode::FORBIDDEN,
            OAuthError::Upstream(_) => StatusCode::BAD_GATEWAY,
            OAuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn description(&self) -> Option<String> {
        match self {
            OAuthError::InvalidRequest(d)
            | OAuthError::InvalidClient(d)
            | OAuthError::InvalidGrant(d)
            | OAuthError::InvalidScope(d)
            | OAuthError::UnsupportedGrantType(d)
            | OAuthError::InvalidToken(d)
            | OAuthError::DomainRejected(d)
            | OAuthError::Upstream(d) => Some(d.clone()),
            OAuthError::Internal(_) => None,
        }
    }

    pub fn body(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.code().to_string(),
            error_description: self.description(),
        }
    }

    /// Render with an explicit status, for endpoints whose contract differs from
    /// the token endpoint (e.g. unknown clients at `authorize` are a plain 400).
    pub fn into_response_with_status(self, status: StatusCode) -> Response {
        if let OAuthError::Internal(cause) = &self {
            tracing::error!(error = %cause, "internal error while handling request");
        }
        (status, Json(self.body())).into_response()
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let challenge = matches!(self, OAuthError::InvalidToken(_));
        let mut response = self.into_response_with_status(status);
        if challenge {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer error=\"invalid_token\""),
            );
        }
        response
    }
}

impl From<IdentityError> for OAuthError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::DomainRejected => {
                OAuthError::DomainRejected("Sign-in is limited to institutional accounts".into())
            }
            IdentityError::Upstream(cause) => {
                tracing::warn!(error = %cause, "Identity provider exchange failed");
                OAuthError::Upstream("Identity provider is unavailable".into())
            }
        }
    }
}

impl From<StoreError> for OAuthError {
    fn from(err: StoreError) -> Self {
        OAuthError::Internal(err.to_string())
    }
}
