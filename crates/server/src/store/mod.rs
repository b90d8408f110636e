//! Credential store.
//!
//! Persistence for users, sessions, clients, authorization codes, access and
//! refresh tokens, and SSO handoff tokens. The store knows nothing about the
//! protocol; it only guarantees the atomicity the protocol relies on:
//!
//! - `consume_authorization_code`, `consume_refresh_token` and
//!   `consume_handoff_token` are compare-and-delete operations. When several
//!   callers race on the same credential exactly one observes success.
//! - `put_handoff_token` replaces any outstanding token for the same user.
//!
//! Two backends are provided: [`db::DbStore`] on SeaORM (Postgres or SQLite)
//! and [`memory::MemoryStore`] on `DashMap` for tests and single-node demos.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::entity::{
    oauth2_access_token, oauth2_authorization, oauth2_client, oauth2_refresh_token, session,
    sso_handoff_token, user,
};

pub mod db;
pub mod memory;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Rows removed by one sweep, per credential kind.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PurgeReport {
    pub sessions: u64,
    pub authorization_codes: u64,
    pub access_tokens: u64,
    pub refresh_tokens: u64,
    pub handoff_tokens: u64,
}

impl PurgeReport {
    pub fn total(&self) -> u64 {
        self.sessions
            + self.authorization_codes
            + self.access_tokens
            + self.refresh_tokens
            + self.handoff_tokens
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fails with [`StoreError::Conflict`] if the email or username is taken.
    async fn insert_user(&self, user: user::Model) -> Result<(), StoreError>;
    async fn find_user(&self, id: &str) -> Result<Option<user::Model>, StoreError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<user::Model>, StoreError>;
    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<user::Model>, StoreError>;
    async fn update_user_vpn(&self, user_id: &str, assigned_ip: &str) -> Result<(), StoreError>;

    async fn insert_session(&self, session: session::Model) -> Result<(), StoreError>;
    async fn find_session(&self, token: &str) -> Result<Option<session::Model>, StoreError>;
    async fn delete_session(&self, token: &str) -> Result<(), StoreError>;

    /// Insert or replace a client by id.
    async fn upsert_client(&self, client: oauth2_client::Model) -> Result<(), StoreError>;
    async fn find_client(&self, id: &str) -> Result<Option<oauth2_client::Model>, StoreError>;

    async fn insert_authorization_code(
        &self,
        code: oauth2_authorization::Model,
    ) -> Result<(), StoreError>;
    async fn find_authorization_code(
        &self,
        code: &str,
    ) -> Result<Option<oauth2_authorization::Model>, StoreError>;
    /// Delete the code. Returns `true` only for the caller that removed it.
    async fn consume_authorization_code(&self, code: &str) -> Result<bool, StoreError>;

    async fn insert_access_token(
        &self,
        token: oauth2_access_token::Model,
    ) -> Result<(), StoreError>;
    async fn find_access_token(
        &self,
        token: &str,
    ) -> Result<Option<oauth2_access_token::Model>, StoreError>;
    async fn find_access_token_by_id(
        &self,
        id: &str,
    ) -> Result<Option<oauth2_access_token::Model>, StoreError>;
    async fn delete_access_token(&self, id: &str) -> Result<(), StoreError>;

    async fn insert_refresh_token(
        &self,
        token: oauth2_refresh_token::Model,
    ) -> Result<(), StoreError>;
    async fn find_refresh_token(
        &self,
        token: &str,
    ) -> Result<Option<oauth2_refresh_token::Model>, StoreError>;
    /// Delete the refresh token. Returns `true` only for the caller that removed it.
    async fn consume_refresh_token(&self, token: &str) -> Result<bool, StoreError>;
    async fn delete_refresh_tokens_for_access_token(
        &self,
        access_token_id: &str,
    ) -> Result<u64, StoreError>;

    /// Store the token, replacing any outstanding token for the same user.
    async fn put_handoff_token(&self, token: sso_handoff_token::Model) -> Result<(), StoreError>;
    /// Atomically take the token. At most one caller receives the record.
    async fn consume_handoff_token(
        &self,
        token: &str,
    ) -> Result<Option<sso_handoff_token::Model>, StoreError>;

    /// Remove everything that expired before `now`. Access tokens still
    /// referenced by a live refresh token are kept so the chain can be followed.
    async fn purge_expired(&self, now: OffsetDateTime) -> Result<PurgeReport, StoreError>;
}

pub type SharedStore = Arc<dyn CredentialStore>;
