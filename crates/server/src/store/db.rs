//! SeaORM-backed credential store.

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::sea_query::{Expr, OnConflict, Query};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, SqlErr,
};
use time::OffsetDateTime;

use super::{CredentialStore, PurgeReport, StoreError};
use crate::entity::{
    oauth2_access_token, oauth2_authorization, oauth2_client, oauth2_refresh_token, session,
    sso_handoff_token, user,
};

#[derive(Clone, Debug)]
pub struct DbStore {
    db: Arc<DatabaseConnection>,
}

impl DbStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }
}

fn map_unique_violation(err: DbErr, what: &str) -> StoreError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            StoreError::Conflict(format!("{what} already exists"))
        }
        _ => StoreError::Db(err),
    }
}

#[async_trait]
impl CredentialStore for DbStore {
    #[tracing::instrument(skip(self, account), fields(user_id = %account.id))]
    async fn insert_user(&self, account: user::Model) -> Result<(), StoreError> {
        if self.find_user_by_email(&account.email).await?.is_some() {
            return Err(StoreError::Conflict("user already exists".into()));
        }
        if let Some(username) = &account.username {
            if self.find_user_by_username(username).await?.is_some() {
                return Err(StoreError::Conflict("username already taken".into()));
            }
        }
        account
            .into_active_model()
            .reset_all()
            .insert(self.connection())
            .await
            .map_err(|e| map_unique_violation(e, "user"))?;
        Ok(())
    }

    async fn find_user(&self, id: &str) -> Result<Option<user::Model>, StoreError> {
        Ok(user::Entity::find_by_id(id).one(self.connection()).await?)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<user::Model>, StoreError> {
        Ok(user::Entity::find()
            .filter(user::Column::Email.eq(email))
            .one(self.connection())
            .await?)
    }

    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<user::Model>, StoreError> {
        Ok(user::Entity::find()
            .filter(user::Column::Username.eq(username))
            .one(self.connection())
            .await?)
    }

    async fn update_user_vpn(&self, user_id: &str, assigned_ip: &str) -> Result<(), StoreError> {
        user::Entity::update_many()
            .col_expr(user::Column::VpnAssignedIp, Expr::value(assigned_ip))
            .col_expr(
                user::Column::UpdatedAt,
                Expr::value(OffsetDateTime::now_utc()),
            )
            .filter(user::Column::Id.eq(user_id))
            .exec(self.connection())
            .await?;
        Ok(())
    }

    async fn insert_session(&self, session: session::Model) -> Result<(), StoreError> {
        session
            .into_active_model()
            .reset_all()
            .insert(self.connection())
            .await?;
        Ok(())
    }

    async fn find_session(&self, token: &str) -> Result<Option<session::Model>, StoreError> {
        Ok(session::Entity::find_by_id(token)
            .one(self.connection())
            .await?)
    }

    async fn delete_session(&self, token: &str) -> Result<(), StoreError> {
        session::Entity::delete_by_id(token)
            .exec(self.connection())
            .await?;
        Ok(())
    }

    async fn upsert_client(&self, client: oauth2_client::Model) -> Result<(), StoreError> {
        oauth2_client::Entity::insert(client.into_active_model().reset_all())
            .on_conflict(
                OnConflict::column(oauth2_client::Column::Id)
                    .update_columns([
                        oauth2_client::Column::Secret,
                        oauth2_client::Column::Name,
                        oauth2_client::Column::RedirectUris,
                        oauth2_client::Column::Scopes,
                        oauth2_client::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.connection())
            .await?;
        Ok(())
    }

    async fn find_client(&self, id: &str) -> Result<Option<oauth2_client::Model>, StoreError> {
        Ok(oauth2_client::Entity::find_by_id(id)
            .one(self.connection())
            .await?)
    }

    async fn insert_authorization_code(
        &self,
        code: oauth2_authorization::Model,
    ) -> Result<(), StoreError> {
        code.into_active_model()
            .reset_all()
            .insert(self.connection())
            .await?;
        Ok(())
    }

    async fn find_authorization_code(
        &self,
        code: &str,
    ) -> Result<Option<oauth2_authorization::Model>, StoreError> {
        Ok(oauth2_authorization::Entity::find_by_id(code)
            .one(self.connection())
            .await?)
    }

    async fn consume_authorization_code(&self, code: &str) -> Result<bool, StoreError> {
        let result = oauth2_authorization::Entity::delete_many()
            .filter(oauth2_authorization::Column::Code.eq(code))
            .exec(self.connection())
            .await?;
        Ok(result.rows_affected == 1)
    }

    async fn insert_access_token(
        &self,
        token: oauth2_access_token::Model,
    ) -> Result<(), StoreError> {
        token
            .into_active_model()
            .reset_all()
            .insert(self.connection())
            .await?;
        Ok(())
    }

    async fn find_access_token(
        &self,
        token: &str,
    ) -> Result<Option<oauth2_access_token::Model>, StoreError> {
        Ok(oauth2_access_token::Entity::find()
            .filter(oauth2_access_token::Column::Token.eq(token))
            .one(self.connection())
            .await?)
    }

    async fn find_access_token_by_id(
        &self,
        id: &str,
    ) -> Result<Option<oauth2_access_token::Model>, StoreError> {
        Ok(oauth2_access_token::Entity::find_by_id(id)
            .one(self.connection())
            .await?)
    }

    async fn delete_access_token(&self, id: &str) -> Result<(), StoreError> {
        oauth2_access_token::Entity::delete_by_id(id)
            .exec(self.connection())
            .await?;
        Ok(())
    }

    async fn insert_refresh_token(
        &self,
        token: oauth2_refresh_token::Model,
    ) -> Result<(), StoreError> {
        token
            .into_active_model()
            .reset_all()
            .insert(self.connection())
            .await?;
        Ok(())
    }

    async fn find_refresh_token(
        &self,
        token: &str,
    ) -> Result<Option<oauth2_refresh_token::Model>, StoreError> {
        Ok(oauth2_refresh_token::Entity::find_by_id(token)
            .one(self.connection())
            .await?)
    }

    async fn consume_refresh_token(&self, token: &str) -> Result<bool, StoreError> {
        let result = oauth2_refresh_token::Entity::delete_many()
            .filter(oauth2_refresh_token::Column::Token.eq(token))
            .exec(self.connection())
            .await?;
        Ok(result.rows_affected == 1)
    }

    async fn delete_refresh_tokens_for_access_token(
        &self,
        access_token_id: &str,
    ) -> Result<u64, StoreError> {
        let result = oauth2_refresh_token::Entity::delete_many()
            .filter(oauth2_refresh_token::Column::AccessTokenId.eq(access_token_id))
            .exec(self.connection())
            .await?;
        Ok(result.rows_affected)
    }

    async fn put_handoff_token(&self, token: sso_handoff_token::Model) -> Result<(), StoreError> {
        sso_handoff_token::Entity::insert(token.into_active_model().reset_all())
            .on_conflict(
                OnConflict::column(sso_handoff_token::Column::UserId)
                    .update_columns([
                        sso_handoff_token::Column::Token,
                        sso_handoff_token::Column::Email,
                        sso_handoff_token::Column::Name,
                        sso_handoff_token::Column::ExpiresAt,
                        sso_handoff_token::Column::CreatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.connection())
            .await?;
        Ok(())
    }

    async fn consume_handoff_token(
        &self,
        token: &str,
    ) -> Result<Option<sso_handoff_token::Model>, StoreError> {
        let db = self.connection();
        let Some(record) = sso_handoff_token::Entity::find()
            .filter(sso_handoff_token::Column::Token.eq(token))
            .one(db)
            .await?
        else {
            return Ok(None);
        };

        // Matching on both columns loses to a concurrent overwrite as well as a concurrent redeem.
        let result = sso_handoff_token::Entity::delete_many()
            .filter(sso_handoff_token::Column::UserId.eq(record.user_id.as_str()))
            .filter(sso_handoff_token::Column::Token.eq(token))
            .exec(db)
            .await?;
        Ok((result.rows_affected == 1).then_some(record))
    }

    #[tracing::instrument(skip(self))]
    async fn purge_expired(&self, now: OffsetDateTime) -> Result<PurgeReport, StoreError> {
        let db = self.connection();

        let sessions = session::Entity::delete_many()
            .filter(session::Column::ExpiresAt.lt(now))
            .exec(db)
            .await?
            .rows_affected;

        let authorization_codes = oauth2_authorization::Entity::delete_many()
            .filter(oauth2_authorization::Column::ExpiresAt.lt(now))
            .exec(db)
            .await?
            .rows_affected;

        let refresh_tokens = oauth2_refresh_token::Entity::delete_many()
            .filter(oauth2_refresh_token::Column::ExpiresAt.lt(now))
            .exec(db)
            .await?
            .rows_affected;

        let referenced = Query::select()
            .column(oauth2_refresh_token::Column::AccessTokenId)
            .from(oauth2_refresh_token::Entity)
            .to_owned();
        let access_tokens = oauth2_access_token::Entity::delete_many()
            .filter(oauth2_access_token::Column::ExpiresAt.lt(now))
            .filter(oauth2_access_token::Column::Id.not_in_subquery(referenced))
            .exec(db)
            .await?
            .rows_affected;

        let handoff_tokens = sso_handoff_token::Entity::delete_many()
            .filter(sso_handoff_token::Column::ExpiresAt.lt(now))
            .exec(db)
            .await?
            .rows_affected;

        Ok(PurgeReport {
            sessions,
            authorization_codes,
            access_tokens,
            refresh_tokens,
            handoff_tokens,
        })
    }
}
