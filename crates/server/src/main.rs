use std::sync::Arc;

use campus_identity_broker::AppResources;
use campus_identity_broker::api::start_webserver;
use campus_identity_broker::auth::identity::GoogleProvider;
use campus_identity_broker::config::load_config_or_panic;
use campus_identity_broker::oauth2::OAuth2State;
use campus_identity_broker::store::{SharedStore, db::DbStore};
use campus_identity_broker::vpn::HttpVpnProvisioner;
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;
use time::OffsetDateTime;
use tokio::time::{Duration, interval};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const PURGE_INTERVAL: Duration = Duration::from_secs(300);

fn initialize_tracing() {
    let default_directives = "campus_identity_broker=info,tower_http=info,sea_orm=warn";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_level(true))
        .init();
}

fn spawn_purge_task(store: SharedStore) {
    tokio::spawn(async move {
        let mut interval = interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            match store.purge_expired(OffsetDateTime::now_utc()).await {
                Ok(report) if report.total() > 0 => {
                    tracing::info!(
                        sessions = report.sessions,
                        authorization_codes = report.authorization_codes,
                        access_tokens = report.access_tokens,
                        refresh_tokens = report.refresh_tokens,
                        handoff_tokens = report.handoff_tokens,
                        "Purged expired credentials"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Failed to purge expired credentials"),
            }
        }
    });
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();
    initialize_tracing();

    let config = load_config_or_panic();

    let db = Arc::new(Database::connect(&config.database_url).await?);
    Migrator::up(db.as_ref(), None).await?;
    let store: SharedStore = Arc::new(DbStore::new(db));

    let identity = Arc::new(GoogleProvider::new(config.identity_provider.clone())?);
    let vpn = Arc::new(HttpVpnProvisioner::new(&config.vpn)?);

    let resources = AppResources::new(config, store.clone(), identity, vpn);
    OAuth2State::from_resources(&resources)
        .provision_clients(&resources.config.oauth2.clients)
        .await?;

    spawn_purge_task(store);

    start_webserver(resources).await
}
