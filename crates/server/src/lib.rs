//! Campus identity broker.
//!
//! Signs students in through the institutional identity provider, keeps their
//! browser sessions, acts as an OAuth2 authorization server for campus
//! applications and hands sessions over to the CTF platform.

use std::sync::Arc;

use crate::auth::identity::IdentityProvider;
use crate::auth::session::SessionService;
use crate::config::AppConfig;
use crate::oauth2::codec::TokenCodec;
use crate::store::SharedStore;
use crate::vpn::VpnProvisioner;

pub mod api;
pub mod auth;
pub mod config;
pub mod entity;
pub mod error;
pub mod oauth2;
pub mod sso;
pub mod store;
pub mod vpn;

#[derive(Clone)]
pub struct AppResources {
    pub config: Arc<AppConfig>,
    pub store: SharedStore,
    pub codec: TokenCodec,
    pub sessions: SessionService,
    pub identity: Arc<dyn IdentityProvider>,
    pub vpn: Arc<dyn VpnProvisioner>,
}

impl AppResources {
    pub fn new(
        config: AppConfig,
        store: SharedStore,
        identity: Arc<dyn IdentityProvider>,
        vpn: Arc<dyn VpnProvisioner>,
    ) -> Self {
        let codec = TokenCodec::new(config.session.secret.as_bytes());
        let sessions = SessionService::new(store.clone(), codec.clone(), &config.session);
        Self {
            config: Arc::new(config),
            store,
            codec,
            sessions,
            identity,
            vpn,
        }
    }
}
