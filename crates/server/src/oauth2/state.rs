//! OAuth2 state management.
//!
//! Provides the state shared by the OAuth2 authorization server endpoints.

use time::OffsetDateTime;

use crate::AppResources;
use crate::auth::session::SessionService;
use crate::config::ClientConfig;
use crate::entity::oauth2_client;
use crate::store::{SharedStore, StoreError};

/// OAuth2 state containing all components needed for the authorization server.
#[derive(Clone)]
pub struct OAuth2State {
    pub store: SharedStore,
    pub sessions: SessionService,
    /// Base URL for the OAuth2 server (used as issuer)
    pub issuer_url: String,
    /// Where unauthenticated browsers are sent before a code can be issued
    pub login_path: String,
    /// Authorization code lifetime in seconds
    pub authorization_code_lifetime: i64,
    /// Access token lifetime in seconds
    pub access_token_lifetime: i64,
    /// Refresh token lifetime in seconds
    pub refresh_token_lifetime: i64,
}

impl OAuth2State {
    pub fn from_resources(resources: &AppResources) -> Self {
        let oauth2 = &resources.config.oauth2;
        Self {
            store: resources.store.clone(),
            sessions: resources.sessions.clone(),
            issuer_url: resources.config.public_url.clone(),
            login_path: oauth2.login_path.clone(),
            authorization_code_lifetime: oauth2.authorization_code_lifetime,
            access_token_lifetime: oauth2.access_token_lifetime,
            refresh_token_lifetime: oauth2.refresh_token_lifetime,
        }
    }

    /// Upsert every configured client into the store.
    #[tracing::instrument(skip_all, fields(count = clients.len()))]
    pub async fn provision_clients(&self, clients: &[ClientConfig]) -> Result<(), StoreError> {
        let now = OffsetDateTime::now_utc();
        for client in clients {
            let redirect_uris =
                serde_json::to_string(&client.redirect_uris).unwrap_or_else(|_| "[]".into());
            self.store
                .upsert_client(oauth2_client::Model {
                    id: client.id.clone(),
                    secret: client.secret.clone(),
                    name: client.name.clone(),
                    redirect_uris,
                    scopes: client.scopes.join(" "),
                    created_at: now,
                    updated_at: now,
                })
                .await?;
            tracing::info!(client_id = %client.id, "Provisioned OAuth2 client");
        }
        Ok(())
    }
}
