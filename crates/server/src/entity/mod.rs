//! SeaORM entities backing the database credential store.

pub mod oauth2_access_token;
pub mod oauth2_authorization;
pub mod oauth2_client;
pub mod oauth2_refresh_token;
pub mod session;
pub mod sso_handoff_token;
pub mod user;
