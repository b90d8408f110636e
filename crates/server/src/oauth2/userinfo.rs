//! OpenID Connect UserInfo.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::OAuthError;
use crate::oauth2::state::OAuth2State;

/// UserInfo response. Profile claims are present only when `profile` was granted.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserInfoResponse {
    pub sub: String,
    pub email: String,
    pub email_verified: bool,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(authorization: Option<&str>) -> Option<&str> {
    authorization?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[tracing::instrument(skip_all)]
pub async fn user_info(
    state: &OAuth2State,
    authorization: Option<&str>,
) -> Result<UserInfoResponse, OAuthError> {
    let token = bearer_token(authorization)
        .ok_or_else(|| OAuthError::InvalidToken("Missing or invalid authorization header".into()))?;

    let access = state
        .store
        .find_access_token(token)
        .await?
        .filter(|t| !t.is_expired())
        .ok_or_else(|| OAuthError::InvalidToken("Invalid or expired access token".into()))?;

    let account = state
        .store
        .find_user(&access.user_id)
        .await?
        .ok_or_else(|| OAuthError::InvalidToken("Invalid or expired access token".into()))?;

    let mut claims = UserInfoResponse {
        sub: account.id.clone(),
        email: account.email.clone(),
        email_verified: true,
        name: account.name.clone(),
        given_name: None,
        family_name: None,
        picture: None,
        preferred_username: None,
    };
    if access.has_scope("profile") {
        claims.given_name = account.given_name();
        claims.family_name = account.family_name();
        claims.picture = account.picture.clone();
        claims.preferred_username = Some(account.preferred_username());
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(Some("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(Some("Bearer ")), None);
        assert_eq!(bearer_token(Some("Basic abc")), None);
        assert_eq!(bearer_token(Some("bearerabc")), None);
        assert_eq!(bearer_token(None), None);
    }
}
