//! OAuth2 HTTP endpoints.
//!
//! Thin adapters from HTTP onto the state machines in [`super::authorize`],
//! [`super::token`], [`super::revoke`] and [`super::userinfo`].

use axum::{
    Form, Json,
    extract::{FromRequest, OriginalUri, Query, Request, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use base64::Engine;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::auth::login_redirect;
use crate::error::{ErrorResponse, OAuthError};
use crate::oauth2::authorize::{self as authorize_flow, AuthorizeOutcome, AuthorizeRequest};
use crate::oauth2::revoke::{self as revoke_flow, RevokeRequest};
use crate::oauth2::token::{self as token_flow, TokenRequest, TokenResponse};
use crate::oauth2::userinfo::{self as userinfo_flow, UserInfoResponse};
use crate::oauth2::{OAUTH2_TAG, state::OAuth2State};

/// Create the OAuth2 router, to be nested under `/api/oauth`.
pub fn router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(authorize))
        .routes(routes!(token))
        .routes(routes!(revoke))
        .routes(routes!(userinfo))
        .routes(routes!(openid_configuration))
        .routes(routes!(jwks))
        .with_state(state)
}

/// OpenID Connect Discovery document
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OpenIdConfiguration {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub revocation_endpoint: String,
    pub jwks_uri: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
    pub claims_supported: Vec<String>,
}

/// JSON Web Key Set
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JwksDocument {
    #[schema(value_type = Vec<Object>)]
    pub keys: Vec<serde_json::Value>,
}

/// Request body accepted as either `application/x-www-form-urlencoded` or
/// `application/json`, rejected with `invalid_request` when malformed.
pub struct OAuthBody<T>(pub T);

impl<S, T> FromRequest<S> for OAuthBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = OAuthError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));
        let value = if is_json {
            Json::<T>::from_request(req, state)
                .await
                .map(|Json(v)| v)
                .map_err(|e| OAuthError::InvalidRequest(e.body_text()))?
        } else {
            Form::<T>::from_request(req, state)
                .await
                .map(|Form(v)| v)
                .map_err(|e| OAuthError::InvalidRequest(e.body_text()))?
        };
        Ok(Self(value))
    }
}

/// Reverse the `application/x-www-form-urlencoded` step clients apply to each
/// half of the Basic credentials (RFC 6749 section 2.3.1).
fn form_decode(value: &str) -> Option<String> {
    urlencoding::decode(&value.replace('+', " "))
        .ok()
        .map(|decoded| decoded.into_owned())
}

/// Client credentials from an `Authorization: Basic` header, if present.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let encoded = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let pair = String::from_utf8(decoded).ok()?;
    let (id, secret) = pair.split_once(':')?;
    Some((form_decode(id)?, form_decode(secret)?))
}

fn no_store<T: IntoResponse>(body: T) -> Response {
    (
        [
            (header::CACHE_CONTROL, "no-store"),
            (header::PRAGMA, "no-cache"),
        ],
        body,
    )
        .into_response()
}

/// OAuth2 authorization endpoint.
#[tracing::instrument(skip(state, params, uri, jar))]
#[utoipa::path(
    get,
    path = "/authorize",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Authorize",
    summary = "Start the authorization code flow",
    description = "Validates the client and redirect URI, then either sends the browser to the login page \
                   (no session) or back to the client's redirect_uri with a single-use `code`.\n\n\
                   Errors detected before the redirect URI is validated are returned as JSON; later errors \
                   (`invalid_scope`, unsupported PKCE method) are delivered to the redirect URI.\n\n\
                   **PKCE:** `code_challenge_method` may be `S256` (recommended) or `plain` (default).",
    params(AuthorizeRequest),
    responses(
        (status = 303, description = "Redirect to the login page or to the client's redirect_uri"),
        (status = 400, description = "Malformed request, unknown client or unregistered redirect_uri", body = ErrorResponse),
    )
)]
pub async fn authorize(
    State(state): State<OAuth2State>,
    Query(params): Query<AuthorizeRequest>,
    OriginalUri(uri): OriginalUri,
    jar: CookieJar,
) -> Response {
    let session = match state.sessions.from_cookies(&jar).await {
        Ok(session) => session,
        Err(e) => return OAuthError::from(e).into_response(),
    };

    match authorize_flow::authorize(&state, &params, session.as_ref()).await {
        Ok(AuthorizeOutcome::Redirect(target)) => Redirect::to(target.as_str()).into_response(),
        Ok(AuthorizeOutcome::LoginRequired) => {
            let return_to = uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            Redirect::to(&login_redirect(&state.login_path, return_to)).into_response()
        }
        Err(err @ OAuthError::InvalidClient(_)) => {
            err.into_response_with_status(StatusCode::BAD_REQUEST)
        }
        Err(err) => err.into_response(),
    }
}

/// OAuth2 token endpoint.
#[tracing::instrument(skip(state, headers, body))]
#[utoipa::path(
    post,
    path = "/token",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Token",
    summary = "Exchange an authorization code or refresh token for tokens",
    description = "**Supported grant types:**\n\
                   - `authorization_code`: redeem a code (once) for an access and refresh token\n\
                   - `refresh_token`: rotate a refresh token; the old one stops working\n\n\
                   **Client authentication:** HTTP Basic or `client_id`/`client_secret` in the body. \
                   A code issued with a PKCE challenge may be redeemed with `code_verifier` instead of a secret.\n\n\
                   The body may be form-encoded or JSON.",
    request_body(
        content = TokenRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token request parameters"
    ),
    responses(
        (status = 200, description = "Tokens issued", body = TokenResponse),
        (status = 400, description = "Invalid request, grant or grant type", body = ErrorResponse),
        (status = 401, description = "Invalid client credentials or unknown client", body = ErrorResponse),
    )
)]
pub async fn token(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    body: OAuthBody<TokenRequest>,
) -> Response {
    let OAuthBody(mut request) = body;
    if let Some((client_id, client_secret)) = basic_credentials(&headers) {
        request.client_id = Some(client_id);
        request.client_secret = Some(client_secret);
    }

    match token_flow::exchange(&state, request).await {
        Ok(response) => no_store(Json(response)),
        Err(err) => err.into_response(),
    }
}

/// Token revocation (RFC 7009).
#[tracing::instrument(skip(state, headers, body))]
#[utoipa::path(
    post,
    path = "/revoke",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Revoke Token",
    summary = "Revoke an access or refresh token",
    description = "Revokes a token issued to the authenticated client. Revoking an access token also \
                   revokes the refresh tokens paired with it.\n\n\
                   Returns 200 even if the token was unknown or already revoked (per RFC 7009).",
    request_body(
        content = RevokeRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token revocation request"
    ),
    responses(
        (status = 200, description = "Token revoked (or was already invalid)"),
        (status = 400, description = "Missing token parameter", body = ErrorResponse),
        (status = 401, description = "Invalid client credentials", body = ErrorResponse),
    )
)]
pub async fn revoke(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    body: OAuthBody<RevokeRequest>,
) -> Response {
    let OAuthBody(mut request) = body;
    if let Some((client_id, client_secret)) = basic_credentials(&headers) {
        request.client_id = Some(client_id);
        request.client_secret = Some(client_secret);
    }

    match revoke_flow::revoke(&state, request).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => err.into_response(),
    }
}

/// OpenID Connect UserInfo endpoint.
#[tracing::instrument(skip(state, headers))]
#[utoipa::path(
    method(get, post),
    path = "/userinfo",
    tag = OAUTH2_TAG,
    operation_id = "OpenID Connect UserInfo",
    summary = "Claims about the token's user",
    description = "Always returns `sub`, `email`, `email_verified` and `name`. \
                   `given_name`, `family_name`, `picture` and `preferred_username` are added only when \
                   the token was granted the `profile` scope.",
    security(
        ("Authorization" = [])
    ),
    responses(
        (status = 200, description = "User claims", body = UserInfoResponse),
        (status = 401, description = "Missing, invalid or expired access token", body = ErrorResponse),
    )
)]
pub async fn userinfo(State(state): State<OAuth2State>, headers: HeaderMap) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    match userinfo_flow::user_info(&state, authorization).await {
        Ok(claims) => Json(claims).into_response(),
        Err(err) => err.into_response(),
    }
}

/// OpenID Connect Discovery document.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/.well-known/openid-configuration",
    tag = OAUTH2_TAG,
    operation_id = "OpenID Connect Discovery",
    summary = "OpenID Connect Discovery document",
    description = "Endpoint URLs and supported capabilities of this provider. \
                   Also served at the root `/.well-known/openid-configuration`.",
    responses(
        (status = 200, description = "OpenID Connect configuration document", body = OpenIdConfiguration),
    )
)]
pub async fn openid_configuration(State(state): State<OAuth2State>) -> Json<OpenIdConfiguration> {
    let base = format!("{}/api/oauth", state.issuer_url);
    let strings = |values: &[&str]| values.iter().map(|v| v.to_string()).collect::<Vec<_>>();
    Json(OpenIdConfiguration {
        issuer: state.issuer_url.clone(),
        authorization_endpoint: format!("{base}/authorize"),
        token_endpoint: format!("{base}/token"),
        userinfo_endpoint: format!("{base}/userinfo"),
        revocation_endpoint: format!("{base}/revoke"),
        jwks_uri: format!("{base}/.well-known/jwks.json"),
        response_types_supported: strings(&["code"]),
        grant_types_supported: strings(&["authorization_code", "refresh_token"]),
        subject_types_supported: strings(&["public"]),
        scopes_supported: strings(&["openid", "profile", "email"]),
        token_endpoint_auth_methods_supported: strings(&[
            "client_secret_post",
            "client_secret_basic",
            "none",
        ]),
        code_challenge_methods_supported: strings(&["plain", "S256"]),
        claims_supported: strings(&[
            "sub",
            "email",
            "email_verified",
            "name",
            "given_name",
            "family_name",
            "picture",
            "preferred_username",
        ]),
    })
}

/// JSON Web Key Set. No asymmetric keys are in use, so the set is empty.
#[tracing::instrument]
#[utoipa::path(
    get,
    path = "/.well-known/jwks.json",
    tag = OAUTH2_TAG,
    operation_id = "JSON Web Key Set",
    responses(
        (status = 200, description = "Key set", body = JwksDocument),
    )
)]
pub async fn jwks() -> Json<JwksDocument> {
    Json(JwksDocument { keys: Vec::new() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_basic_credentials() {
        let mut headers = HeaderMap::new();
        let encoded = base64::engine::general_purpose::STANDARD.encode("ctfd_client:s3cr3t");
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
        );
        assert_eq!(
            basic_credentials(&headers),
            Some(("ctfd_client".to_string(), "s3cr3t".to_string()))
        );
    }

    #[test]
    fn test_basic_credentials_are_form_decoded() {
        let mut headers = HeaderMap::new();
        let encoded =
            base64::engine::general_purpose::STANDARD.encode("ctfd_client:p%40ss%3Aw%2Bord+x");
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
        );
        assert_eq!(
            basic_credentials(&headers),
            Some(("ctfd_client".to_string(), "p@ss:w+ord x".to_string()))
        );
    }

    #[test]
    fn test_basic_credentials_rejects_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic !!!"));
        assert_eq!(basic_credentials(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(basic_credentials(&headers), None);
        assert_eq!(basic_credentials(&HeaderMap::new()), None);
    }
}
