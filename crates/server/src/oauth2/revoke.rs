//! Token revocation (RFC 7009).

use serde::Deserialize;
use utoipa::ToSchema;

use crate::error::OAuthError;
use crate::oauth2::state::OAuth2State;
use crate::oauth2::token::authenticate_client;

/// Token revocation request
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RevokeRequest {
    pub token: Option<String>,
    /// "access_token" or "refresh_token"
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Revoke an access or refresh token owned by the authenticated client.
/// Unknown tokens, and tokens of other clients, are ignored.
#[tracing::instrument(skip(state, request), fields(client_id = ?request.client_id))]
pub async fn revoke(state: &OAuth2State, request: RevokeRequest) -> Result<(), OAuthError> {
    let client = authenticate_client(
        &state.store,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )
    .await?;
    let Some(token) = request.token.as_deref().filter(|t| !t.is_empty()) else {
        return Err(OAuthError::InvalidRequest("Missing token".into()));
    };

    let refresh_first = request.token_type_hint.as_deref() == Some("refresh_token");
    if refresh_first {
        if revoke_refresh_token(state, &client.id, token).await? {
            return Ok(());
        }
        revoke_access_token(state, &client.id, token).await?;
    } else {
        if revoke_access_token(state, &client.id, token).await? {
            return Ok(());
        }
        revoke_refresh_token(state, &client.id, token).await?;
    }
    Ok(())
}

async fn revoke_access_token(
    state: &OAuth2State,
    client_id: &str,
    token: &str,
) -> Result<bool, OAuthError> {
    let Some(access) = state.store.find_access_token(token).await? else {
        return Ok(false);
    };
    if access.client_id != client_id {
        return Ok(false);
    }
    state
        .store
        .delete_refresh_tokens_for_access_token(&access.id)
        .await?;
    state.store.delete_access_token(&access.id).await?;
    tracing::info!(user_id = %access.user_id, "Access token revoked");
    Ok(true)
}

async fn revoke_refresh_token(
    state: &OAuth2State,
    client_id: &str,
    token: &str,
) -> Result<bool, OAuthError> {
    let Some(record) = state.store.find_refresh_token(token).await? else {
        return Ok(false);
    };
    let owner = state
        .store
        .find_access_token_by_id(&record.access_token_id)
        .await?;
    if owner.is_some_and(|access| access.client_id != client_id) {
        return Ok(false);
    }
    let removed = state.store.consume_refresh_token(token).await?;
    if removed {
        tracing::info!("Refresh token revoked");
    }
    Ok(removed)
}
