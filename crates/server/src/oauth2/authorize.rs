//! Authorization endpoint state machine.
//!
//! `Unauthenticated -> CodeIssued`, with consent implied by policy. Errors found
//! before the redirect URI is validated are returned to the caller directly;
//! once the URI is known to belong to the client, errors travel back to it.

use serde::Deserialize;
use time::{Duration, OffsetDateTime};
use url::Url;
use utoipa::IntoParams;

use crate::auth::session::AuthenticatedSession;
use crate::entity::oauth2_authorization;
use crate::error::OAuthError;
use crate::oauth2::codec::{AUTHORIZATION_CODE_BYTES, mint_opaque_token};
use crate::oauth2::pkce;
use crate::oauth2::state::OAuth2State;

/// Authorization request parameters
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct AuthorizeRequest {
    /// Must be "code"
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    /// Space-separated scopes
    pub scope: Option<String>,
    /// Opaque value echoed back to the client
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    /// "S256" or "plain" (default)
    pub code_challenge_method: Option<String>,
}

#[derive(Debug)]
pub enum AuthorizeOutcome {
    /// No usable session; the browser must sign in and replay the request.
    LoginRequired,
    /// Send the browser to the client, carrying either a code or an error.
    Redirect(Url),
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Build an error redirect back to a validated client URI.
pub fn error_redirect(mut target: Url, error: &OAuthError, state: Option<&str>) -> Url {
    {
        let mut pairs = target.query_pairs_mut();
        pairs.append_pair("error", error.code());
        if let Some(description) = error.description() {
            pairs.append_pair("error_description", &description);
        }
        if let Some(state) = state {
            pairs.append_pair("state", state);
        }
    }
    target
}

#[tracing::instrument(skip(state, params, session), fields(client_id = ?params.client_id))]
pub async fn authorize(
    state: &OAuth2State,
    params: &AuthorizeRequest,
    session: Option<&AuthenticatedSession>,
) -> Result<AuthorizeOutcome, OAuthError> {
    let (Some(client_id), Some(redirect_uri), Some(response_type)) = (
        non_empty(&params.client_id),
        non_empty(&params.redirect_uri),
        non_empty(&params.response_type),
    ) else {
        return Err(OAuthError::InvalidRequest(
            "Missing required parameters: client_id, redirect_uri, or response_type".into(),
        ));
    };
    if response_type != "code" {
        return Err(OAuthError::InvalidRequest(format!(
            "Unsupported response_type '{response_type}'"
        )));
    }

    let client = state
        .store
        .find_client(client_id)
        .await?
        .ok_or_else(|| OAuthError::InvalidClient("Unknown client".into()))?;

    if !client.is_redirect_uri_allowed(redirect_uri) {
        return Err(OAuthError::InvalidRequest("Invalid redirect_uri".into()));
    }
    let mut target = Url::parse(redirect_uri)
        .map_err(|_| OAuthError::InvalidRequest("Invalid redirect_uri".into()))?;
    let client_state = params.state.as_deref();

    // From here on the URI is trusted, so errors are delivered to it.
    let requested: Vec<&str> = params
        .scope
        .as_deref()
        .unwrap_or_default()
        .split_whitespace()
        .collect();
    let unknown = client.unknown_scopes(&requested);
    if !unknown.is_empty() {
        return Ok(AuthorizeOutcome::Redirect(error_redirect(
            target,
            &OAuthError::InvalidScope(format!("Invalid scopes: {}", unknown.join(", "))),
            client_state,
        )));
    }

    let (code_challenge, code_challenge_method) = match non_empty(&params.code_challenge) {
        Some(challenge) => {
            let method = non_empty(&params.code_challenge_method).unwrap_or(pkce::METHOD_PLAIN);
            if !pkce::is_supported_method(method) {
                return Ok(AuthorizeOutcome::Redirect(error_redirect(
                    target,
                    &OAuthError::InvalidRequest("Unsupported code_challenge_method".into()),
                    client_state,
                )));
            }
            (Some(challenge.to_string()), Some(method.to_string()))
        }
        None => (None, None),
    };

    let Some(session) = session else {
        return Ok(AuthorizeOutcome::LoginRequired);
    };

    let code = mint_opaque_token(AUTHORIZATION_CODE_BYTES);
    let now = OffsetDateTime::now_utc();
    state
        .store
        .insert_authorization_code(oauth2_authorization::Model {
            code: code.clone(),
            client_id: client.id.clone(),
            user_id: session.user_id.clone(),
            redirect_uri: redirect_uri.to_string(),
            scope: requested.join(" "),
            code_challenge,
            code_challenge_method,
            expires_at: now + Duration::seconds(state.authorization_code_lifetime),
            created_at: now,
        })
        .await?;
    tracing::info!(user_id = %session.user_id, "Authorization code issued");

    {
        let mut pairs = target.query_pairs_mut();
        pairs.append_pair("code", &code);
        if let Some(client_state) = client_state {
            pairs.append_pair("state", client_state);
        }
    }
    Ok(AuthorizeOutcome::Redirect(target))
}
