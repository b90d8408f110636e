//! Session handoff to the CTF platform.
//!
//! A signed-in user is sent to the platform with a one-time token; the platform
//! redeems it server-to-server (authenticated by a pre-shared API key) to learn
//! who the user is. The platform may also check a username and password directly.

use axum::{
    Json,
    extract::{OriginalUri, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use url::Url;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::AppResources;
use crate::auth::login_redirect;
use crate::auth::password::verify_password;
use crate::entity::{sso_handoff_token, user};
use crate::oauth2::codec::{HANDOFF_TOKEN_BYTES, mint_opaque_token};
use crate::store::StoreError;

/// OpenAPI tag for the CTF platform handoff
pub const SSO_TAG: &str = "CTF Platform SSO";

pub const API_KEY_HEADER: &str = "X-CTFd-API-Key";

/// Create the handoff router, to be nested under `/api/ctfd/auth`.
pub fn router(resources: AppResources) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(initiate))
        .routes(routes!(redeem))
        .routes(routes!(verify))
        .with_state(resources)
}

#[derive(Debug, Error)]
pub enum SsoError {
    #[error("Invalid API key")]
    InvalidApiKey,
    #[error("Token is required")]
    MissingToken,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Missing username or password")]
    MissingCredentials,
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Internal server error")]
    Internal(#[from] StoreError),
}

/// Failure body returned to the platform
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SsoFailure {
    pub success: bool,
    pub error: String,
}

impl IntoResponse for SsoError {
    fn into_response(self) -> Response {
        let status = match &self {
            SsoError::InvalidApiKey | SsoError::InvalidToken | SsoError::InvalidCredentials => {
                StatusCode::UNAUTHORIZED
            }
            SsoError::MissingToken | SsoError::MissingCredentials => StatusCode::BAD_REQUEST,
            SsoError::Internal(cause) => {
                tracing::error!(error = %cause, "CTF platform request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = SsoFailure {
            success: false,
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RedeemRequest {
    pub token: Option<String>,
}

/// User as the CTF platform expects it
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PlatformUser {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub verified: bool,
}

impl From<&user::Model> for PlatformUser {
    fn from(account: &user::Model) -> Self {
        Self {
            id: account.id.clone(),
            email: account.email.clone(),
            name: account.name.clone(),
            kind: "user".to_string(),
            verified: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PlatformUserResponse {
    pub success: bool,
    pub user: PlatformUser,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyRequest {
    /// Username, email address, or the local part of an institutional address
    pub username: Option<String>,
    pub password: Option<String>,
}

fn api_key_matches(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|presented| bool::from(presented.as_bytes().ct_eq(expected.as_bytes())))
}

fn callback_url(base: &str, token: &str) -> Result<Url, url::ParseError> {
    let mut target = Url::parse(&format!("{}/sso/callback", base.trim_end_matches('/')))?;
    target.query_pairs_mut().append_pair("token", token);
    Ok(target)
}

#[tracing::instrument(skip(resources, jar, uri))]
#[utoipa::path(
    get,
    path = "/sso",
    tag = SSO_TAG,
    operation_id = "SSO Initiate",
    summary = "Hand the signed-in user over to the CTF platform",
    description = "Mints a one-time handoff token, replacing any earlier one for the same user, \
                   and redirects to the platform's `/sso/callback`. Without a session the browser \
                   is sent to the login page first. A `return_url` parameter is ignored.",
    responses(
        (status = 303, description = "Redirect to the CTF platform or to the login page"),
    ),
    security(("session_cookie" = []))
)]
pub async fn initiate(
    State(resources): State<AppResources>,
    OriginalUri(uri): OriginalUri,
    jar: CookieJar,
) -> Response {
    let session = match resources.sessions.from_cookies(&jar).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            let return_to = uri.path();
            return Redirect::to(&login_redirect(
                &resources.config.oauth2.login_path,
                return_to,
            ))
            .into_response();
        }
        Err(e) => return SsoError::from(e).into_response(),
    };

    let sso = &resources.config.sso;
    let now = OffsetDateTime::now_utc();
    let token = mint_opaque_token(HANDOFF_TOKEN_BYTES);
    let record = sso_handoff_token::Model {
        user_id: session.user_id.clone(),
        token: token.clone(),
        email: session.email,
        name: session.name,
        expires_at: now + Duration::seconds(sso.token_lifetime),
        created_at: now,
    };
    if let Err(e) = resources.store.put_handoff_token(record).await {
        return SsoError::from(e).into_response();
    }

    match callback_url(&sso.callback_base_url, &token) {
        Ok(target) => {
            tracing::info!(user_id = %session.user_id, "Issued CTF handoff token");
            Redirect::to(target.as_str()).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Invalid CTF callback base URL");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[tracing::instrument(skip(resources, headers, body))]
#[utoipa::path(
    post,
    path = "/sso/validate",
    tag = SSO_TAG,
    operation_id = "SSO Validate",
    summary = "Redeem a handoff token",
    description = "Called by the CTF platform with its API key in `X-CTFd-API-Key`. \
                   Each token can be redeemed once.",
    request_body = RedeemRequest,
    responses(
        (status = 200, description = "Token redeemed", body = PlatformUserResponse),
        (status = 400, description = "Token missing", body = SsoFailure),
        (status = 401, description = "Bad API key, or token invalid, used or expired", body = SsoFailure),
    ),
    security(("ctfd_api_key" = []))
)]
pub async fn redeem(
    State(resources): State<AppResources>,
    headers: HeaderMap,
    body: Result<Json<RedeemRequest>, JsonRejection>,
) -> Result<Json<PlatformUserResponse>, SsoError> {
    if !api_key_matches(&headers, &resources.config.sso.api_key) {
        tracing::warn!("Rejected handoff redemption with a bad API key");
        return Err(SsoError::InvalidApiKey);
    }

    let token = body
        .ok()
        .and_then(|Json(request)| request.token)
        .filter(|t| !t.is_empty())
        .ok_or(SsoError::MissingToken)?;

    let record = resources
        .store
        .consume_handoff_token(&token)
        .await?
        .filter(|record| !record.is_expired())
        .ok_or(SsoError::InvalidToken)?;

    tracing::info!(user_id = %record.user_id, "Redeemed CTF handoff token");
    Ok(Json(PlatformUserResponse {
        success: true,
        user: PlatformUser {
            id: record.user_id,
            email: record.email,
            name: record.name,
            kind: "user".to_string(),
            verified: true,
        },
    }))
}

/// Username first, then email; a bare name is taken as an institutional address.
async fn find_platform_account(
    resources: &AppResources,
    username: &str,
) -> Result<Option<user::Model>, StoreError> {
    if let Some(account) = resources.store.find_user_by_username(username).await? {
        return Ok(Some(account));
    }
    let email = institutional_email(username, &resources.config.identity_provider.allowed_domain);
    resources.store.find_user_by_email(&email).await
}

fn institutional_email(username: &str, domain: &str) -> String {
    let email = username.to_lowercase();
    if email.contains('@') {
        email
    } else {
        format!("{email}@{domain}")
    }
}

#[tracing::instrument(skip(resources, headers, body))]
#[utoipa::path(
    post,
    path = "/verify",
    tag = SSO_TAG,
    operation_id = "SSO Verify Credentials",
    summary = "Check a username and password for the CTF platform",
    description = "Called by the CTF platform with its API key in `X-CTFd-API-Key`. \
                   `username` may be a username, an email address, or the local part of an \
                   institutional address. Unknown users and wrong passwords get the same answer.",
    request_body = VerifyRequest,
    responses(
        (status = 200, description = "Credentials accepted", body = PlatformUserResponse),
        (status = 400, description = "Username or password missing", body = SsoFailure),
        (status = 401, description = "Bad API key or bad credentials", body = SsoFailure),
    ),
    security(("ctfd_api_key" = []))
)]
pub async fn verify(
    State(resources): State<AppResources>,
    headers: HeaderMap,
    body: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<PlatformUserResponse>, SsoError> {
    if !api_key_matches(&headers, &resources.config.sso.api_key) {
        tracing::warn!("Rejected credential check with a bad API key");
        return Err(SsoError::InvalidApiKey);
    }

    let Ok(Json(VerifyRequest {
        username: Some(username),
        password: Some(password),
    })) = body
    else {
        return Err(SsoError::MissingCredentials);
    };
    let username = username.trim();
    if username.is_empty() || password.is_empty() {
        return Err(SsoError::MissingCredentials);
    }

    let account = find_platform_account(&resources, username)
        .await?
        .ok_or(SsoError::InvalidCredentials)?;
    if !verify_password(&password, &account.password_hash) {
        tracing::info!(user_id = %account.id, "Rejected CTF credential check with wrong password");
        return Err(SsoError::InvalidCredentials);
    }

    tracing::info!(user_id = %account.id, "CTF credential check succeeded");
    Ok(Json(PlatformUserResponse {
        success: true,
        user: PlatformUser::from(&account),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_comparison() {
        let mut headers = HeaderMap::new();
        assert!(!api_key_matches(&headers, "k3y"));
        headers.insert(API_KEY_HEADER, "k3y".parse().unwrap());
        assert!(api_key_matches(&headers, "k3y"));
        headers.insert(API_KEY_HEADER, "k3".parse().unwrap());
        assert!(!api_key_matches(&headers, "k3y"));
    }

    #[test]
    fn test_institutional_email() {
        assert_eq!(
            institutional_email("Thandi", "students.wits.ac.za"),
            "thandi@students.wits.ac.za"
        );
        assert_eq!(
            institutional_email("staff@wits.ac.za", "students.wits.ac.za"),
            "staff@wits.ac.za"
        );
    }

    #[test]
    fn test_callback_url() {
        let url = callback_url("https://ctf.example.com/", "a-b_c").unwrap();
        assert_eq!(url.as_str(), "https://ctf.example.com/sso/callback?token=a-b_c");
    }
}
