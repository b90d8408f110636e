//! Token endpoint state machine: authorization-code and refresh-token grants.
//!
//! Single-use credentials are redeemed as find, validate, then compare-and-delete
//! in the store. Only the caller whose delete removed the row is issued tokens.

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use time::{Duration, OffsetDateTime};
use utoipa::ToSchema;

use crate::entity::{oauth2_access_token, oauth2_client, oauth2_refresh_token};
use crate::error::OAuthError;
use crate::oauth2::codec::{BEARER_TOKEN_BYTES, mint_opaque_token};
use crate::oauth2::pkce;
use crate::oauth2::state::OAuth2State;
use crate::store::SharedStore;

/// Token request, normalized from form or JSON bodies.
#[derive(Debug, Default, Clone, Deserialize, ToSchema)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub code_verifier: Option<String>,
}

/// Token response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

const INVALID_CODE: &str = "Invalid or expired authorization code";
const INVALID_REFRESH_TOKEN: &str = "Invalid or expired refresh token";

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

pub(crate) fn secrets_match(presented: &str, stored: &str) -> bool {
    presented.as_bytes().ct_eq(stored.as_bytes()).into()
}

/// Resolve a client and check its secret. Unknown clients and bad secrets are
/// indistinguishable to the caller.
pub(crate) async fn authenticate_client(
    store: &SharedStore,
    client_id: Option<&str>,
    client_secret: Option<&str>,
) -> Result<oauth2_client::Model, OAuthError> {
    let Some(client_id) = client_id else {
        return Err(OAuthError::InvalidClient("Client authentication required".into()));
    };
    let client = store
        .find_client(client_id)
        .await?
        .ok_or_else(|| OAuthError::InvalidClient("Invalid client credentials".into()))?;
    match client_secret {
        Some(secret) if secrets_match(secret, &client.secret) => Ok(client),
        _ => Err(OAuthError::InvalidClient(
            "Invalid client credentials".into(),
        )),
    }
}

#[tracing::instrument(skip(state, request), fields(grant_type = ?request.grant_type, client_id = ?request.client_id))]
pub async fn exchange(
    state: &OAuth2State,
    request: TokenRequest,
) -> Result<TokenResponse, OAuthError> {
    match request.grant_type.as_deref() {
        Some("authorization_code") => authorization_code_grant(state, &request).await,
        Some("refresh_token") => refresh_token_grant(state, &request).await,
        Some(other) => Err(OAuthError::UnsupportedGrantType(format!(
            "Grant type '{other}' is not supported"
        ))),
        None => Err(OAuthError::InvalidRequest("Missing grant_type".into())),
    }
}

async fn authorization_code_grant(
    state: &OAuth2State,
    request: &TokenRequest,
) -> Result<TokenResponse, OAuthError> {
    let (Some(code), Some(client_id), Some(redirect_uri)) = (
        non_empty(&request.code),
        non_empty(&request.client_id),
        non_empty(&request.redirect_uri),
    ) else {
        return Err(OAuthError::InvalidRequest(
            "Missing required parameters: code, client_id, or redirect_uri".into(),
        ));
    };

    let client = state
        .store
        .find_client(client_id)
        .await?
        .ok_or_else(|| OAuthError::InvalidClient("Unknown client".into()))?;

    let verifier = non_empty(&request.code_verifier);
    let secret_checked = match verifier {
        Some(_) => false,
        None => {
            require_secret(&client, request)?;
            true
        }
    };

    let authorization = state
        .store
        .find_authorization_code(code)
        .await?
        .filter(|a| !a.is_expired())
        .ok_or_else(|| OAuthError::InvalidGrant(INVALID_CODE.into()))?;

    if authorization.client_id != client.id {
        tracing::warn!("Authorization code presented by a different client");
        return Err(OAuthError::InvalidGrant(INVALID_CODE.into()));
    }
    if authorization.redirect_uri != redirect_uri {
        return Err(OAuthError::InvalidGrant("Redirect URI mismatch".into()));
    }

    match &authorization.code_challenge {
        Some(challenge) => {
            let Some(verifier) = verifier else {
                return Err(OAuthError::InvalidGrant("Code verifier required".into()));
            };
            let method = authorization
                .code_challenge_method
                .as_deref()
                .unwrap_or(pkce::METHOD_PLAIN);
            if !pkce::verify(verifier, challenge, method) {
                return Err(OAuthError::InvalidGrant("Invalid code verifier".into()));
            }
        }
        None => {
            // Issued without a challenge: the client must prove itself with its secret.
            if !secret_checked {
                require_secret(&client, request)?;
            }
        }
    }

    if !state.store.consume_authorization_code(code).await? {
        tracing::warn!(client_id = %client.id, "Authorization code already redeemed");
        return Err(OAuthError::InvalidGrant(INVALID_CODE.into()));
    }

    let response = issue_tokens(
        state,
        &client.id,
        &authorization.user_id,
        &authorization.scope,
    )
    .await?;
    tracing::info!(client_id = %client.id, user_id = %authorization.user_id, "Tokens issued for authorization code");
    Ok(response)
}

fn require_secret(
    client: &oauth2_client::Model,
    request: &TokenRequest,
) -> Result<(), OAuthError> {
    match non_empty(&request.client_secret) {
        Some(secret) if secrets_match(secret, &client.secret) => Ok(()),
        _ => Err(OAuthError::InvalidClient(
            "Invalid client credentials".into(),
        )),
    }
}

async fn refresh_token_grant(
    state: &OAuth2State,
    request: &TokenRequest,
) -> Result<TokenResponse, OAuthError> {
    let (Some(refresh_token), Some(client_id)) = (
        non_empty(&request.refresh_token),
        non_empty(&request.client_id),
    ) else {
        return Err(OAuthError::InvalidRequest(
            "Missing required parameters: refresh_token or client_id".into(),
        ));
    };

    let client = authenticate_client(
        &state.store,
        Some(client_id),
        non_empty(&request.client_secret),
    )
    .await?;

    let record = state
        .store
        .find_refresh_token(refresh_token)
        .await?
        .filter(|r| !r.is_expired())
        .ok_or_else(|| OAuthError::InvalidGrant(INVALID_REFRESH_TOKEN.into()))?;

    // Rotation: the presented token is dead from here on, whatever happens next.
    if !state.store.consume_refresh_token(refresh_token).await? {
        tracing::warn!(client_id = %client.id, "Refresh token already redeemed");
        return Err(OAuthError::InvalidGrant(INVALID_REFRESH_TOKEN.into()));
    }

    // Identity lives on the access token the refresh token points at.
    let grant = state
        .store
        .find_access_token_by_id(&record.access_token_id)
        .await?
        .ok_or_else(|| OAuthError::InvalidGrant(INVALID_REFRESH_TOKEN.into()))?;
    if grant.client_id != client.id {
        tracing::warn!(client_id = %client.id, "Refresh token presented by a different client");
        return Err(OAuthError::InvalidGrant(INVALID_REFRESH_TOKEN.into()));
    }

    let response = issue_tokens(state, &client.id, &grant.user_id, &grant.scope).await?;
    tracing::info!(client_id = %client.id, user_id = %grant.user_id, "Refresh token rotated");
    Ok(response)
}

async fn issue_tokens(
    state: &OAuth2State,
    client_id: &str,
    user_id: &str,
    scope: &str,
) -> Result<TokenResponse, OAuthError> {
    let now = OffsetDateTime::now_utc();
    let access = oauth2_access_token::Model {
        id: uuid::Uuid::new_v4().to_string(),
        token: mint_opaque_token(BEARER_TOKEN_BYTES),
        client_id: client_id.to_string(),
        user_id: user_id.to_string(),
        scope: scope.to_string(),
        expires_at: now + Duration::seconds(state.access_token_lifetime),
        created_at: now,
    };
    let refresh = oauth2_refresh_token::Model {
        token: mint_opaque_token(BEARER_TOKEN_BYTES),
        access_token_id: access.id.clone(),
        expires_at: now + Duration::seconds(state.refresh_token_lifetime),
        created_at: now,
    };

    state.store.insert_access_token(access.clone()).await?;
    state.store.insert_refresh_token(refresh.clone()).await?;

    Ok(TokenResponse {
        access_token: access.token,
        token_type: "Bearer".to_string(),
        expires_in: state.access_token_lifetime,
        refresh_token: refresh.token,
        scope: (!scope.is_empty()).then(|| scope.to_string()),
    })
}
