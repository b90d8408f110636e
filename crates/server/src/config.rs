use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Issuer URL, without a trailing slash
    pub public_url: String,
    pub session: SessionConfig,
    #[serde(default)]
    pub oauth2: OAuth2Config,
    pub identity_provider: IdentityProviderConfig,
    pub sso: SsoConfig,
    pub vpn: VpnConfig,
}

#[derive(Clone, Deserialize)]
pub struct SessionConfig {
    /// HMAC key for session assertions and registration tickets
    pub secret: String,
    #[serde(default = "default_session_ttl")]
    pub ttl_seconds: i64,
    #[serde(default = "default_registration_ticket_ttl")]
    pub registration_ticket_ttl_seconds: i64,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_true")]
    pub secure_cookies: bool,
}

#[derive(Clone, Deserialize)]
pub struct OAuth2Config {
    #[serde(default = "default_authorization_code_lifetime")]
    pub authorization_code_lifetime: i64,
    #[serde(default = "default_access_token_lifetime")]
    pub access_token_lifetime: i64,
    #[serde(default = "default_refresh_token_lifetime")]
    pub refresh_token_lifetime: i64,
    /// Local page that signs the user in and then returns to `return_to`
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
}

impl Default for OAuth2Config {
    fn default() -> Self {
        Self {
            authorization_code_lifetime: default_authorization_code_lifetime(),
            access_token_lifetime: default_access_token_lifetime(),
            refresh_token_lifetime: default_refresh_token_lifetime(),
            login_path: default_login_path(),
            clients: Vec::new(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct ClientConfig {
    pub id: String,
    pub secret: String,
    pub name: String,
    pub redirect_uris: Vec<String>,
    #[serde(default = "default_client_scopes")]
    pub scopes: Vec<String>,
}

#[derive(Clone, Deserialize)]
pub struct IdentityProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Callback registered with the provider, i.e. `{public_url}/api/auth/google/callback`
    pub redirect_uri: String,
    /// Institutional domain every signed-in account must belong to
    pub allowed_domain: String,
    #[serde(default = "default_google_authorization_url")]
    pub authorization_url: String,
    #[serde(default = "default_google_token_url")]
    pub token_url: String,
    #[serde(default = "default_google_userinfo_url")]
    pub userinfo_url: String,
    #[serde(default = "default_idp_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Clone, Deserialize)]
pub struct SsoConfig {
    /// Pre-shared key the CTF platform sends in `X-CTFd-API-Key`
    pub api_key: String,
    /// Base URL of the CTF platform; handoff tokens go to `{callback_base_url}/sso/callback`
    pub callback_base_url: String,
    #[serde(default = "default_sso_token_lifetime")]
    pub token_lifetime: i64,
}

#[derive(Clone, Deserialize)]
pub struct VpnConfig {
    pub backend_url: String,
    #[serde(default = "default_vpn_timeout")]
    pub timeout_seconds: u64,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_session_ttl() -> i64 {
    7 * 24 * 3600
}

fn default_registration_ticket_ttl() -> i64 {
    15 * 60
}

fn default_cookie_name() -> String {
    "session".to_string()
}

fn default_true() -> bool {
    true
}

fn default_authorization_code_lifetime() -> i64 {
    600
}

fn default_access_token_lifetime() -> i64 {
    3600
}

fn default_refresh_token_lifetime() -> i64 {
    30 * 24 * 3600
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_client_scopes() -> Vec<String> {
    ["openid", "profile", "email"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_google_authorization_url() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".to_string()
}

fn default_google_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_google_userinfo_url() -> String {
    "https://www.googleapis.com/oauth2/v3/userinfo".to_string()
}

fn default_idp_timeout() -> u64 {
    10
}

fn default_sso_token_lifetime() -> i64 {
    300
}

fn default_vpn_timeout() -> u64 {
    30
}

impl AppConfig {
    /// Reject configurations the server cannot run safely with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.secret.len() < 32 {
            return Err(ConfigError::Validation(
                "session.secret must be at least 32 characters".into(),
            ));
        }
        if self.public_url.is_empty() || self.public_url.ends_with('/') {
            return Err(ConfigError::Validation(
                "public_url must be set and must not end with '/'".into(),
            ));
        }
        if self.identity_provider.allowed_domain.trim().is_empty() {
            return Err(ConfigError::Validation(
                "identity_provider.allowed_domain must be set".into(),
            ));
        }
        if self.sso.api_key.is_empty() {
            return Err(ConfigError::Validation("sso.api_key must be set".into()));
        }
        if self.oauth2.authorization_code_lifetime <= 0
            || self.oauth2.access_token_lifetime <= 0
            || self.oauth2.refresh_token_lifetime <= 0
        {
            return Err(ConfigError::Validation(
                "oauth2 lifetimes must be positive".into(),
            ));
        }
        for client in &self.oauth2.clients {
            if client.redirect_uris.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "oauth2 client '{}' has no redirect_uris",
                    client.id
                )));
            }
        }
        Ok(())
    }
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// Any environment variable matching a key path with segments separated by double
/// underscores (e.g. `SESSION__SECRET`) overrides the file value.
///
/// Returns a `ConfigError` instead of panicking so the caller can decide how to fail.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    let cfg = Config::builder()
        .add_source(File::with_name("config.yaml").required(false))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}

/// Convenience helper for binaries wanting panic-on-error behaviour.
pub fn load_config_or_panic() -> AppConfig {
    match load_config() {
        Ok(c) => c,
        Err(e) => panic!("Failed to load configuration: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
database_url: "sqlite::memory:"
public_url: "https://auth.example.com"
session:
  secret: "0123456789abcdef0123456789abcdef"
identity_provider:
  client_id: "google-client"
  client_secret: "google-secret"
  redirect_uri: "https://auth.example.com/api/auth/google/callback"
  allowed_domain: "students.wits.ac.za"
sso:
  api_key: "ctfd-key"
  callback_base_url: "https://ctfd.example.com"
vpn:
  backend_url: "http://vpn.internal:8000"
oauth2:
  clients:
    - id: "ctfd_client"
      secret: "s3cr3t"
      name: "CTFd"
      redirect_uris: ["https://ctfd.example.com/callback"]
"#;

    fn parse(yaml: &str) -> AppConfig {
        config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn defaults_are_applied() {
        let cfg = parse(MINIMAL);
        assert_eq!(cfg.listen_addr, "0.0.0.0:8080");
        assert_eq!(cfg.session.cookie_name, "session");
        assert!(cfg.session.secure_cookies);
        assert_eq!(cfg.oauth2.authorization_code_lifetime, 600);
        assert_eq!(cfg.oauth2.access_token_lifetime, 3600);
        assert_eq!(cfg.oauth2.refresh_token_lifetime, 2_592_000);
        assert_eq!(cfg.sso.token_lifetime, 300);
        assert_eq!(cfg.oauth2.clients[0].scopes, vec!["openid", "profile", "email"]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn short_secret_is_rejected() {
        let mut cfg = parse(MINIMAL);
        cfg.session.secret = "too-short".to_string();
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn trailing_slash_issuer_is_rejected() {
        let mut cfg = parse(MINIMAL);
        cfg.public_url = "https://auth.example.com/".to_string();
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn client_without_redirect_uris_is_rejected() {
        let mut cfg = parse(MINIMAL);
        cfg.oauth2.clients[0].redirect_uris.clear();
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let mut cfg = parse(MINIMAL);
        cfg.sso.api_key.clear();
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }
}
