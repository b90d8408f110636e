//! Identity provider bridge.
//!
//! Exchanges an upstream authorization code for a verified identity and applies
//! the institutional domain policy. The policy check is the only gate deciding
//! who may hold an account, and it runs before any user or session is written.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::config::IdentityProviderConfig;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity provider request failed: {0}")]
    Upstream(String),
    #[error("account domain is not permitted")]
    DomainRejected,
}

/// Identity as asserted by the upstream provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityAssertion {
    pub subject: String,
    pub email: String,
    pub email_verified: bool,
    pub name: String,
    pub picture: Option<String>,
    /// Verified hosted domain (`hd`) of the account
    pub hosted_domain: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// URL to send the browser to; `state` comes back unchanged on the callback.
    fn authorization_url(&self, state: &str) -> Result<Url, IdentityError>;

    /// Redeem the provider's authorization code. Not retried on failure.
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<IdentityAssertion, IdentityError>;
}

/// Accept the assertion only if the provider verified it for `allowed_domain`.
pub fn enforce_domain_policy(
    assertion: IdentityAssertion,
    allowed_domain: &str,
) -> Result<IdentityAssertion, IdentityError> {
    let domain_matches = assertion.hosted_domain.as_deref() == Some(allowed_domain);
    let email_matches = assertion
        .email
        .rsplit_once('@')
        .is_some_and(|(_, domain)| domain.eq_ignore_ascii_case(allowed_domain));
    if domain_matches && email_matches && assertion.email_verified {
        Ok(assertion)
    } else {
        tracing::warn!(
            hosted_domain = ?assertion.hosted_domain,
            allowed_domain,
            "Rejected sign-in outside the institutional domain"
        );
        Err(IdentityError::DomainRejected)
    }
}

/// Google OAuth 2.0 / OpenID Connect provider.
pub struct GoogleProvider {
    http: reqwest::Client,
    config: IdentityProviderConfig,
}

#[derive(Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct GoogleUserInfo {
    sub: String,
    email: String,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
    #[serde(default)]
    hd: Option<String>,
}

impl GoogleProvider {
    pub fn new(config: IdentityProviderConfig) -> Result<Self, IdentityError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| IdentityError::Upstream(e.to_string()))?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn authorization_url(&self, state: &str) -> Result<Url, IdentityError> {
        let mut url = Url::parse(&self.config.authorization_url)
            .map_err(|e| IdentityError::Upstream(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", "openid email profile")
            .append_pair("hd", &self.config.allowed_domain)
            .append_pair("prompt", "select_account")
            .append_pair("state", state);
        Ok(url)
    }

    #[tracing::instrument(skip(self, code))]
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<IdentityAssertion, IdentityError> {
        let params = [
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ];

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| IdentityError::Upstream(e.to_string()))?;
        if !response.status().is_success() {
            return Err(IdentityError::Upstream(format!(
                "token exchange returned {}",
                response.status()
            )));
        }
        let tokens: GoogleTokenResponse = response
            .json()
            .await
            .map_err(|e| IdentityError::Upstream(format!("Parse error: {e}")))?;

        let response = self
            .http
            .get(&self.config.userinfo_url)
            .bearer_auth(&tokens.access_token)
            .send()
            .await
            .map_err(|e| IdentityError::Upstream(e.to_string()))?;
        if !response.status().is_success() {
            return Err(IdentityError::Upstream(format!(
                "userinfo returned {}",
                response.status()
            )));
        }
        let profile: GoogleUserInfo = response
            .json()
            .await
            .map_err(|e| IdentityError::Upstream(format!("Parse error: {e}")))?;

        Ok(IdentityAssertion {
            name: profile.name.unwrap_or_else(|| profile.email.clone()),
            subject: profile.sub,
            email: profile.email,
            email_verified: profile.email_verified,
            picture: profile.picture,
            hosted_domain: profile.hd,
        })
    }
}
