//! Local user account, created once an institutional sign-in has been completed.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    #[sea_orm(unique)]
    pub email: String,
    /// Subject identifier issued by the upstream identity provider
    #[sea_orm(unique)]
    pub google_id: Option<String>,
    pub name: String,
    pub picture: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[sea_orm(unique)]
    pub username: Option<String>,
    pub student_number: Option<String>,
    pub faculty: Option<String>,
    pub year_of_study: Option<i32>,
    /// Tunnel address handed out by the VPN backend, once provisioned
    pub vpn_assigned_ip: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// First word of the display name.
    pub fn given_name(&self) -> Option<String> {
        self.name.split_whitespace().next().map(String::from)
    }

    /// Everything after the first word of the display name.
    pub fn family_name(&self) -> Option<String> {
        let rest = self
            .name
            .split_whitespace()
            .skip(1)
            .collect::<Vec<_>>()
            .join(" ");
        (!rest.is_empty()).then_some(rest)
    }

    /// Chosen username, falling back to the local part of the email.
    pub fn preferred_username(&self) -> String {
        match &self.username {
            Some(username) => username.clone(),
            None => self
                .email
                .split('@')
                .next()
                .unwrap_or(&self.email)
                .to_string(),
        }
    }
}
