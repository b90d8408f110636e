//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue, header};
use axum_test::{TestResponse, TestServer};
use campus_identity_broker::{
    AppResources,
    api::build_router,
    auth::identity::{IdentityAssertion, IdentityError, IdentityProvider},
    auth::password::hash_password,
    config::{
        AppConfig, ClientConfig, IdentityProviderConfig, OAuth2Config, SessionConfig, SsoConfig,
        VpnConfig,
    },
    entity::{oauth2_access_token, oauth2_refresh_token, user},
    oauth2::{OAuth2State, pkce},
    store::{SharedStore, memory::MemoryStore},
    vpn::{VpnError, VpnProfile, VpnProvisioner},
};
use futures::future::join_all;
use time::{Duration, OffsetDateTime};
use url::Url;

pub const DOMAIN: &str = "students.wits.ac.za";
pub const CLIENT_ID: &str = "ctfd_client";
pub const CLIENT_SECRET: &str = "s3cr3t";
pub const REDIRECT_URI: &str = "https://ctfd.example.com/callback";
pub const OTHER_REDIRECT_URI: &str = "https://ctfd.example.com/other-callback";
pub const LMS_CLIENT_ID: &str = "lms_client";
pub const LMS_CLIENT_SECRET: &str = "lms-secret";
pub const LMS_REDIRECT_URI: &str = "https://lms.example.com/auth/callback";
pub const API_KEY: &str = "ctfd-api-key";
pub const PASSWORD: &str = "correct-horse-9";

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".into(),
        listen_addr: "127.0.0.1:0".into(),
        public_url: "https://auth.example.com".into(),
        session: SessionConfig {
            secret: "0123456789abcdef0123456789abcdef".into(),
            ttl_seconds: 3600,
            registration_ticket_ttl_seconds: 900,
            cookie_name: "session".into(),
            secure_cookies: false,
        },
        oauth2: OAuth2Config {
            clients: vec![
                ClientConfig {
                    id: CLIENT_ID.into(),
                    secret: CLIENT_SECRET.into(),
                    name: "CTFd".into(),
                    redirect_uris: vec![REDIRECT_URI.into(), OTHER_REDIRECT_URI.into()],
                    scopes: vec!["openid".into(), "profile".into(), "email".into()],
                },
                ClientConfig {
                    id: LMS_CLIENT_ID.into(),
                    secret: LMS_CLIENT_SECRET.into(),
                    name: "Moodle".into(),
                    redirect_uris: vec![LMS_REDIRECT_URI.into()],
                    scopes: vec!["openid".into(), "profile".into(), "email".into()],
                },
            ],
            ..OAuth2Config::default()
        },
        identity_provider: IdentityProviderConfig {
            client_id: "google-client".into(),
            client_secret: "google-secret".into(),
            redirect_uri: "https://auth.example.com/api/auth/google/callback".into(),
            allowed_domain: DOMAIN.into(),
            authorization_url: "https://accounts.google.com/o/oauth2/v2/auth".into(),
            token_url: "https://oauth2.googleapis.com/token".into(),
            userinfo_url: "https://openidconnect.googleapis.com/v1/userinfo".into(),
            timeout_seconds: 5,
        },
        sso: SsoConfig {
            api_key: API_KEY.into(),
            callback_base_url: "https://ctfd.example.com".into(),
            token_lifetime: 300,
        },
        vpn: VpnConfig {
            backend_url: "http://vpn.invalid".into(),
            timeout_seconds: 5,
        },
    }
}

/// Identity provider that asserts a fixed identity for any code.
pub struct FakeIdentityProvider {
    pub assertion: IdentityAssertion,
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    fn authorization_url(&self, state: &str) -> Result<Url, IdentityError> {
        let mut url = Url::parse("https://idp.example.com/authorize")
            .map_err(|e| IdentityError::Upstream(e.to_string()))?;
        url.query_pairs_mut().append_pair("state", state);
        Ok(url)
    }

    async fn exchange_code(
        &self,
        code: &str,
        _redirect_uri: &str,
    ) -> Result<IdentityAssertion, IdentityError> {
        if code == "upstream-failure" {
            return Err(IdentityError::Upstream("connection reset".into()));
        }
        Ok(self.assertion.clone())
    }
}

pub fn institutional_assertion(email: &str) -> IdentityAssertion {
    IdentityAssertion {
        subject: "google-1089".into(),
        email: email.into(),
        email_verified: true,
        name: "Thandi Mokoena".into(),
        picture: Some("https://lh3.example.com/photo.jpg".into()),
        hosted_domain: Some(DOMAIN.into()),
    }
}

/// VPN backend stand-in; `None` simulates a backend outage.
pub struct FakeVpn {
    pub profile: Option<VpnProfile>,
}

#[async_trait]
impl VpnProvisioner for FakeVpn {
    async fn provision(&self, email: &str) -> Result<VpnProfile, VpnError> {
        self.profile
            .clone()
            .ok_or_else(|| VpnError::Backend(format!("backend unavailable for {email}")))
    }
}

pub fn sample_vpn_profile() -> VpnProfile {
    VpnProfile {
        file_content: "client\ndev tun\nifconfig 10.8.0.14 255.255.255.0\n".into(),
        file_name: "thandi.ovpn".into(),
        assigned_ip: Some("10.8.0.14".into()),
    }
}

pub struct TestApp {
    pub server: TestServer,
    pub resources: AppResources,
}

impl TestApp {
    pub fn store(&self) -> &SharedStore {
        &self.resources.store
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_from_config(test_config()).await
}

/// In-memory app with the default fakes and a custom configuration.
pub async fn spawn_app_from_config(config: AppConfig) -> TestApp {
    spawn_app_with_config(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(FakeIdentityProvider {
            assertion: institutional_assertion("thandi@students.wits.ac.za"),
        }),
        Arc::new(FakeVpn {
            profile: Some(sample_vpn_profile()),
        }),
    )
    .await
}

pub async fn spawn_app_with(
    store: SharedStore,
    identity: Arc<dyn IdentityProvider>,
    vpn: Arc<dyn VpnProvisioner>,
) -> TestApp {
    spawn_app_with_config(test_config(), store, identity, vpn).await
}

pub async fn spawn_app_with_config(
    config: AppConfig,
    store: SharedStore,
    identity: Arc<dyn IdentityProvider>,
    vpn: Arc<dyn VpnProvisioner>,
) -> TestApp {
    let resources = AppResources::new(config, store, identity, vpn);
    OAuth2State::from_resources(&resources)
        .provision_clients(&resources.config.oauth2.clients)
        .await
        .expect("provision clients");
    let server = TestServer::new(build_router(resources.clone())).expect("create test server");
    TestApp { server, resources }
}

pub async fn seed_user(app: &TestApp, email: &str, username: Option<&str>) -> user::Model {
    let now = OffsetDateTime::now_utc();
    let account = user::Model {
        id: uuid::Uuid::new_v4().to_string(),
        email: email.into(),
        google_id: None,
        name: "Thandi Mokoena".into(),
        picture: None,
        password_hash: hash_password(PASSWORD).expect("hash"),
        username: username.map(String::from),
        student_number: Some("2301234".into()),
        faculty: Some("Engineering".into()),
        year_of_study: Some(3),
        vpn_assigned_ip: None,
        created_at: now,
        updated_at: now,
    };
    app.store()
        .insert_user(account.clone())
        .await
        .expect("insert user");
    account
}

/// `Cookie` header value carrying a fresh session for `account`.
pub async fn session_cookie(app: &TestApp, account: &user::Model) -> HeaderValue {
    let token = app
        .resources
        .sessions
        .issue(account)
        .await
        .expect("issue session");
    HeaderValue::from_str(&format!("session={token}")).expect("cookie header")
}

pub fn cookie_header() -> HeaderName {
    header::COOKIE
}

pub fn location(response: &TestResponse) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .expect("location header")
        .to_string()
}

pub fn query_param(url: &str, name: &str) -> Option<String> {
    Url::parse(url)
        .expect("absolute url")
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// Value of the session cookie set by a response, if any.
pub fn set_session_cookie(response: &TestResponse) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|v| v.strip_prefix("session="))
        .map(|rest| rest.split(';').next().unwrap_or_default().to_string())
}

/// Run the authorize step as `account` with an S256 challenge of `verifier`
/// and return the issued code.
pub async fn authorize_code(
    app: &TestApp,
    cookie: &HeaderValue,
    scope: &str,
    verifier: &str,
) -> String {
    let response = app
        .server
        .get("/api/oauth/authorize")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", CLIENT_ID)
        .add_query_param("redirect_uri", REDIRECT_URI)
        .add_query_param("scope", scope)
        .add_query_param("state", "xyz")
        .add_query_param("code_challenge", pkce::s256_challenge(verifier))
        .add_query_param("code_challenge_method", "S256")
        .add_header(cookie_header(), cookie.clone())
        .await;
    response.assert_status_see_other();
    let target = location(&response);
    assert!(target.starts_with(REDIRECT_URI), "unexpected redirect {target}");
    assert_eq!(query_param(&target, "state").as_deref(), Some("xyz"));
    query_param(&target, "code").expect("code in redirect")
}

/// Tokens of a grant written straight to the store.
pub struct SeededGrant {
    pub access_token: String,
    pub refresh_token: String,
}

/// Store an access token for `account` with a refresh token pointing at it.
/// Negative lifetimes produce already-expired credentials.
pub async fn seed_grant(
    app: &TestApp,
    account: &user::Model,
    access_lifetime: Duration,
    refresh_lifetime: Duration,
) -> SeededGrant {
    let now = OffsetDateTime::now_utc();
    let access = oauth2_access_token::Model {
        id: uuid::Uuid::new_v4().to_string(),
        token: format!("access-{}", uuid::Uuid::new_v4()),
        client_id: CLIENT_ID.into(),
        user_id: account.id.clone(),
        scope: "openid profile email".into(),
        expires_at: now + access_lifetime,
        created_at: now,
    };
    let refresh = oauth2_refresh_token::Model {
        token: format!("refresh-{}", uuid::Uuid::new_v4()),
        access_token_id: access.id.clone(),
        expires_at: now + refresh_lifetime,
        created_at: now,
    };
    app.store()
        .insert_access_token(access.clone())
        .await
        .expect("insert access token");
    app.store()
        .insert_refresh_token(refresh.clone())
        .await
        .expect("insert refresh token");
    SeededGrant {
        access_token: access.token,
        refresh_token: refresh.token,
    }
}

/// Present one refresh token `attempts` times concurrently.
pub async fn race_refresh(app: &TestApp, refresh_token: &str, attempts: usize) -> Vec<TestResponse> {
    let requests = (0..attempts).map(|_| {
        app.server
            .post("/api/oauth/token")
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", CLIENT_ID),
                ("client_secret", CLIENT_SECRET),
            ])
            .into_future()
    });
    join_all(requests).await
}
