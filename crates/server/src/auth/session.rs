//! Browser sessions.
//!
//! A session token is a signed assertion (see [`crate::oauth2::codec`]) that is
//! also persisted in the store. It is accepted only when the signature verifies,
//! the row exists and the row is unexpired, so deleting the row (logout) kills a
//! token whose signature is still good.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::{Duration, OffsetDateTime};

use crate::config::SessionConfig;
use crate::entity::{session, user};
use crate::error::OAuthError;
use crate::oauth2::codec::TokenCodec;
use crate::store::{SharedStore, StoreError};

/// A session that passed every check.
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub token: String,
    pub user_id: String,
    pub email: String,
    pub name: String,
}

#[derive(Clone)]
pub struct SessionService {
    store: SharedStore,
    codec: TokenCodec,
    ttl: Duration,
    cookie_name: String,
    secure_cookies: bool,
}

impl SessionService {
    pub fn new(store: SharedStore, codec: TokenCodec, config: &SessionConfig) -> Self {
        Self {
            store,
            codec,
            ttl: Duration::seconds(config.ttl_seconds),
            cookie_name: config.cookie_name.clone(),
            secure_cookies: config.secure_cookies,
        }
    }

    /// Sign and persist a new session for `account`, returning the token.
    #[tracing::instrument(skip(self, account), fields(user_id = %account.id))]
    pub async fn issue(&self, account: &user::Model) -> Result<String, OAuthError> {
        let token = self
            .codec
            .sign_session_assertion(&account.id, &account.email, &account.name, self.ttl)
            .map_err(|e| OAuthError::Internal(e.to_string()))?;
        let now = OffsetDateTime::now_utc();
        self.store
            .insert_session(session::Model {
                token: token.clone(),
                user_id: account.id.clone(),
                expires_at: now + self.ttl,
                created_at: now,
            })
            .await?;
        tracing::info!("Session issued");
        Ok(token)
    }

    pub async fn resolve(&self, token: &str) -> Result<Option<AuthenticatedSession>, StoreError> {
        let Ok(claims) = self.codec.verify_session_assertion(token) else {
            return Ok(None);
        };
        let Some(row) = self.store.find_session(token).await? else {
            return Ok(None);
        };
        if row.is_expired() || row.user_id != claims.subject {
            return Ok(None);
        }
        Ok(Some(AuthenticatedSession {
            token: token.to_string(),
            user_id: claims.subject,
            email: claims.email,
            name: claims.name,
        }))
    }

    /// Resolve the session named by the request's session cookie, if any.
    pub async fn from_cookies(
        &self,
        jar: &CookieJar,
    ) -> Result<Option<AuthenticatedSession>, StoreError> {
        match jar.get(&self.cookie_name) {
            Some(cookie) => self.resolve(cookie.value()).await,
            None => Ok(None),
        }
    }

    pub async fn revoke(&self, token: &str) -> Result<(), StoreError> {
        self.store.delete_session(token).await
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn session_cookie(&self, token: String) -> Cookie<'static> {
        Cookie::build((self.cookie_name.clone(), token))
            .http_only(true)
            .secure(self.secure_cookies)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(self.ttl)
            .build()
    }

    pub fn clear_session_cookie(&self) -> Cookie<'static> {
        Cookie::build((self.cookie_name.clone(), ""))
            .path("/")
            .max_age(Duration::ZERO)
            .build()
    }
}
