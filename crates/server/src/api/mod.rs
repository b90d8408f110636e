//! HTTP surface of the broker.
//!
//! - `/api/oauth/*` - OAuth2 authorization server
//! - `/api/auth/*` - Accounts and sessions
//! - `/api/ctfd/auth/*` - CTF platform handoff
//! - `/api/vpn/*` - VPN profiles
//! - `/healthz` - Health check
//! - `/api-docs` - ReDoc

pub mod health;
pub mod openapi;

use axum::{Router, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_axum::{router::OpenApiRouter, routes};
use utoipa_redoc::{Redoc, Servable};

use crate::oauth2::{self, OAuth2State};
use crate::{AppResources, auth, sso, vpn};

/// Assemble every route, the API docs and the middleware layers.
pub fn build_router(resources: AppResources) -> Router {
    let oauth_state = OAuth2State::from_resources(&resources);

    let (router, api) = OpenApiRouter::with_openapi(openapi::ApiDoc::openapi())
        .nest("/api/oauth", oauth2::router(oauth_state.clone()))
        .nest("/api/auth", auth::login::router(resources.clone()))
        .nest("/api/ctfd/auth", sso::router(resources.clone()))
        .nest("/api/vpn", vpn::router(resources))
        .routes(routes!(health::health))
        .split_for_parts();

    router
        .route(
            "/.well-known/openid-configuration",
            get(oauth2::endpoints::openid_configuration).with_state(oauth_state),
        )
        .merge(Redoc::with_url("/api-docs", api))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Starts the web server with all configured routes.
#[tracing::instrument(skip(resources))]
pub async fn start_webserver(resources: AppResources) -> color_eyre::Result<()> {
    let addr = resources.config.listen_addr.clone();
    let router = build_router(resources);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Server running");
    axum::serve(listener, router)
        .await
        .map_err(|e| color_eyre::Report::msg(format!("Failed to start server: {e}")))?;

    Ok(())
}
