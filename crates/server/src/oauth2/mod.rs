//! OAuth 2.0 / OpenID Connect authorization server.
//!
//! ## Supported Flows
//!
//! - Authorization Code, with optional PKCE (`S256` or `plain`)
//! - Refresh Token, with rotation
//!
//! ## Endpoints (nested under `/api/oauth`)
//!
//! - `GET /authorize` - Authorization endpoint
//! - `POST /token` - Token endpoint (form or JSON body)
//! - `POST /revoke` - Token revocation
//! - `GET|POST /userinfo` - OpenID Connect UserInfo
//! - `GET /.well-known/openid-configuration` - OpenID Connect Discovery
//! - `GET /.well-known/jwks.json` - Key set

pub mod authorize;
pub mod codec;
pub mod endpoints;
pub mod pkce;
pub mod revoke;
mod state;
pub mod token;
pub mod userinfo;

pub use endpoints::router;
pub use state::OAuth2State;

/// OpenAPI tag for OAuth2 endpoints
pub const OAUTH2_TAG: &str = "OAuth2";
