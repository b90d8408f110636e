//! In-process credential store on `DashMap`.
//!
//! Single-use operations go through `DashMap::remove`/`remove_if`, which hold the
//! shard lock for the whole check-and-delete, so racing consumers see exactly one
//! success.

use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use time::OffsetDateTime;

use super::{CredentialStore, PurgeReport, StoreError};
use crate::entity::{
    oauth2_access_token, oauth2_authorization, oauth2_client, oauth2_refresh_token, session,
    sso_handoff_token, user,
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    users: DashMap<String, user::Model>,
    user_emails: DashMap<String, String>,
    usernames: DashMap<String, String>,
    sessions: DashMap<String, session::Model>,
    clients: DashMap<String, oauth2_client::Model>,
    codes: DashMap<String, oauth2_authorization::Model>,
    access_tokens: DashMap<String, oauth2_access_token::Model>,
    refresh_tokens: DashMap<String, oauth2_refresh_token::Model>,
    /// Keyed by user id
    handoff_tokens: DashMap<String, sso_handoff_token::Model>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn insert_user(&self, account: user::Model) -> Result<(), StoreError> {
        match self.user_emails.entry(account.email.clone()) {
            Entry::Occupied(_) => return Err(StoreError::Conflict("user already exists".into())),
            Entry::Vacant(slot) => {
                slot.insert(account.id.clone());
            }
        }
        if let Some(username) = &account.username {
            match self.usernames.entry(username.clone()) {
                Entry::Occupied(_) => {
                    self.user_emails.remove(&account.email);
                    return Err(StoreError::Conflict("username already taken".into()));
                }
                Entry::Vacant(slot) => {
                    slot.insert(account.id.clone());
                }
            }
        }
        self.users.insert(account.id.clone(), account);
        Ok(())
    }

    async fn find_user(&self, id: &str) -> Result<Option<user::Model>, StoreError> {
        Ok(self.users.get(id).map(|u| u.clone()))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<user::Model>, StoreError> {
        let Some(id) = self.user_emails.get(email).map(|id| id.clone()) else {
            return Ok(None);
        };
        self.find_user(&id).await
    }

    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<user::Model>, StoreError> {
        let Some(id) = self.usernames.get(username).map(|id| id.clone()) else {
            return Ok(None);
        };
        self.find_user(&id).await
    }

    async fn update_user_vpn(&self, user_id: &str, assigned_ip: &str) -> Result<(), StoreError> {
        if let Some(mut account) = self.users.get_mut(user_id) {
            account.vpn_assigned_ip = Some(assigned_ip.to_string());
            account.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn insert_session(&self, session: session::Model) -> Result<(), StoreError> {
        self.sessions.insert(session.token.clone(), session);
        Ok(())
    }

    async fn find_session(&self, token: &str) -> Result<Option<session::Model>, StoreError> {
        Ok(self.sessions.get(token).map(|s| s.clone()))
    }

    async fn delete_session(&self, token: &str) -> Result<(), StoreError> {
        self.sessions.remove(token);
        Ok(())
    }

    async fn upsert_client(&self, client: oauth2_client::Model) -> Result<(), StoreError> {
        self.clients.insert(client.id.clone(), client);
        Ok(())
    }

    async fn find_client(&self, id: &str) -> Result<Option<oauth2_client::Model>, StoreError> {
        Ok(self.clients.get(id).map(|c| c.clone()))
    }

    async fn insert_authorization_code(
        &self,
        code: oauth2_authorization::Model,
    ) -> Result<(), StoreError> {
        self.codes.insert(code.code.clone(), code);
        Ok(())
    }

    async fn find_authorization_code(
        &self,
        code: &str,
    ) -> Result<Option<oauth2_authorization::Model>, StoreError> {
        Ok(self.codes.get(code).map(|c| c.clone()))
    }

    async fn consume_authorization_code(&self, code: &str) -> Result<bool, StoreError> {
        Ok(self.codes.remove(code).is_some())
    }

    async fn insert_access_token(
        &self,
        token: oauth2_access_token::Model,
    ) -> Result<(), StoreError> {
        self.access_tokens.insert(token.token.clone(), token);
        Ok(())
    }

    async fn find_access_token(
        &self,
        token: &str,
    ) -> Result<Option<oauth2_access_token::Model>, StoreError> {
        Ok(self.access_tokens.get(token).map(|t| t.clone()))
    }

    async fn find_access_token_by_id(
        &self,
        id: &str,
    ) -> Result<Option<oauth2_access_token::Model>, StoreError> {
        Ok(self
            .access_tokens
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.value().clone()))
    }

    async fn delete_access_token(&self, id: &str) -> Result<(), StoreError> {
        self.access_tokens.retain(|_, token| token.id != id);
        Ok(())
    }

    async fn insert_refresh_token(
        &self,
        token: oauth2_refresh_token::Model,
    ) -> Result<(), StoreError> {
        self.refresh_tokens.insert(token.token.clone(), token);
        Ok(())
    }

    async fn find_refresh_token(
        &self,
        token: &str,
    ) -> Result<Option<oauth2_refresh_token::Model>, StoreError> {
        Ok(self.refresh_tokens.get(token).map(|t| t.clone()))
    }

    async fn consume_refresh_token(&self, token: &str) -> Result<bool, StoreError> {
        Ok(self.refresh_tokens.remove(token).is_some())
    }

    async fn delete_refresh_tokens_for_access_token(
        &self,
        access_token_id: &str,
    ) -> Result<u64, StoreError> {
        let before = self.refresh_tokens.len();
        self.refresh_tokens
            .retain(|_, token| token.access_token_id != access_token_id);
        Ok(before.saturating_sub(self.refresh_tokens.len()) as u64)
    }

    async fn put_handoff_token(&self, token: sso_handoff_token::Model) -> Result<(), StoreError> {
        self.handoff_tokens.insert(token.user_id.clone(), token);
        Ok(())
    }

    async fn consume_handoff_token(
        &self,
        token: &str,
    ) -> Result<Option<sso_handoff_token::Model>, StoreError> {
        // The iterator guard must be dropped before remove_if takes the shard lock.
        let owner = self
            .handoff_tokens
            .iter()
            .find(|entry| entry.token == token)
            .map(|entry| entry.key().clone());
        let Some(owner) = owner else {
            return Ok(None);
        };
        Ok(self
            .handoff_tokens
            .remove_if(&owner, |_, record| record.token == token)
            .map(|(_, record)| record))
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> Result<PurgeReport, StoreError> {
        fn sweep<V>(map: &DashMap<String, V>, keep: impl Fn(&V) -> bool) -> u64 {
            let before = map.len();
            map.retain(|_, value| keep(value));
            before.saturating_sub(map.len()) as u64
        }

        let sessions = sweep(&self.sessions, |s| s.expires_at >= now);
        let authorization_codes = sweep(&self.codes, |c| c.expires_at >= now);
        let refresh_tokens = sweep(&self.refresh_tokens, |t| t.expires_at >= now);

        let referenced: HashSet<String> = self
            .refresh_tokens
            .iter()
            .map(|entry| entry.access_token_id.clone())
            .collect();
        let access_tokens = sweep(&self.access_tokens, |t| {
            t.expires_at >= now || referenced.contains(&t.id)
        });
        let handoff_tokens = sweep(&self.handoff_tokens, |t| t.expires_at >= now);

        Ok(PurgeReport {
            sessions,
            authorization_codes,
            access_tokens,
            refresh_tokens,
            handoff_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use time::Duration;

    fn code(value: &str, expires_in: Duration) -> oauth2_authorization::Model {
        let now = OffsetDateTime::now_utc();
        oauth2_authorization::Model {
            code: value.to_string(),
            client_id: "ctfd_client".to_string(),
            user_id: "u1".to_string(),
            redirect_uri: "https://ctf.example.com/callback".to_string(),
            scope: "openid".to_string(),
            code_challenge: None,
            code_challenge_method: None,
            expires_at: now + expires_in,
            created_at: now,
        }
    }

    fn handoff(user_id: &str, token: &str) -> sso_handoff_token::Model {
        let now = OffsetDateTime::now_utc();
        sso_handoff_token::Model {
            user_id: user_id.to_string(),
            token: token.to_string(),
            email: "a@students.wits.ac.za".to_string(),
            name: "A".to_string(),
            expires_at: now + Duration::minutes(5),
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_code_consumed_exactly_once_under_contention() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_authorization_code(code("c1", Duration::minutes(10)))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.consume_authorization_code("c1").await.unwrap()
            }));
        }
        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert!(store.find_authorization_code("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_handoff_overwrite_invalidates_previous() {
        let store = MemoryStore::new();
        store.put_handoff_token(handoff("u1", "first")).await.unwrap();
        store.put_handoff_token(handoff("u1", "second")).await.unwrap();

        assert!(store.consume_handoff_token("first").await.unwrap().is_none());
        let record = store.consume_handoff_token("second").await.unwrap();
        assert_eq!(record.map(|r| r.user_id).as_deref(), Some("u1"));
        assert!(store.consume_handoff_token("second").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let store = MemoryStore::new();
        let now = OffsetDateTime::now_utc();
        let account = user::Model {
            id: "u1".to_string(),
            email: "a@students.wits.ac.za".to_string(),
            google_id: None,
            name: "A".to_string(),
            picture: None,
            password_hash: String::new(),
            username: Some("alpha".to_string()),
            student_number: None,
            faculty: None,
            year_of_study: None,
            vpn_assigned_ip: None,
            created_at: now,
            updated_at: now,
        };
        store.insert_user(account.clone()).await.unwrap();

        let same_email = user::Model {
            id: "u2".to_string(),
            username: Some("beta".to_string()),
            ..account.clone()
        };
        assert!(matches!(
            store.insert_user(same_email).await,
            Err(StoreError::Conflict(_))
        ));

        let same_username = user::Model {
            id: "u3".to_string(),
            email: "b@students.wits.ac.za".to_string(),
            ..account
        };
        assert!(matches!(
            store.insert_user(same_username).await,
            Err(StoreError::Conflict(_))
        ));
        // the failed attempt must not have reserved the email
        assert!(
            store
                .find_user_by_email("b@students.wits.ac.za")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_purge_removes_only_expired() {
        let store = MemoryStore::new();
        store
            .insert_authorization_code(code("old", Duration::minutes(-1)))
            .await
            .unwrap();
        store
            .insert_authorization_code(code("fresh", Duration::minutes(10)))
            .await
            .unwrap();

        let report = store.purge_expired(OffsetDateTime::now_utc()).await.unwrap();
        assert_eq!(report.authorization_codes, 1);
        assert!(store.find_authorization_code("old").await.unwrap().is_none());
        assert!(store.find_authorization_code("fresh").await.unwrap().is_some());
    }
}
