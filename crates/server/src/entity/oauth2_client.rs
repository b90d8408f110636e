//! Registered relying party.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth2_client")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    #[serde(skip_serializing)]
    pub secret: String,
    /// Human-readable client name
    pub name: String,
    /// JSON array of allowed redirect URIs. Entries may be `*.domain` wildcards.
    #[sea_orm(column_type = "Text")]
    pub redirect_uris: String,
    /// Space-separated list of allowed scopes
    #[sea_orm(column_type = "Text")]
    pub scopes: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parse redirect URIs from JSON string
    pub fn redirect_uris_list(&self) -> Vec<String> {
        serde_json::from_str(&self.redirect_uris).unwrap_or_default()
    }

    /// Parse scopes from space-separated string
    pub fn scopes_list(&self) -> Vec<String> {
        self.scopes.split_whitespace().map(String::from).collect()
    }

    /// Check if a redirect URI is allowed for this client
    pub fn is_redirect_uri_allowed(&self, uri: &str) -> bool {
        self.redirect_uris_list()
            .iter()
            .any(|allowed| redirect_uri_matches(allowed, uri))
    }

    /// Requested scopes this client is not registered for.
    pub fn unknown_scopes<'a>(&self, requested: &[&'a str]) -> Vec<&'a str> {
        let allowed = self.scopes_list();
        requested
            .iter()
            .filter(|scope| !allowed.iter().any(|a| a.as_str() == **scope))
            .copied()
            .collect()
    }
}

/// Exact match, or a `*.domain` pattern matching any https host under `domain`.
pub fn redirect_uri_matches(pattern: &str, candidate: &str) -> bool {
    if pattern == candidate {
        return true;
    }
    let Some(domain) = pattern.strip_prefix("*.") else {
        return false;
    };
    let Ok(url) = Url::parse(candidate) else {
        return false;
    };
    if url.scheme() != "https" {
        return false;
    }
    url.host_str()
        .is_some_and(|host| host.ends_with(&format!(".{domain}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(uris: &[&str]) -> Model {
        let now = OffsetDateTime::now_utc();
        Model {
            id: "ctfd_client".to_string(),
            secret: "s3cret".to_string(),
            name: "CTFd".to_string(),
            redirect_uris: serde_json::to_string(uris).unwrap(),
            scopes: "openid profile email".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_exact_redirect_uri() {
        let c = client(&["https://ctf.example.com/callback"]);
        assert!(c.is_redirect_uri_allowed("https://ctf.example.com/callback"));
        assert!(!c.is_redirect_uri_allowed("https://ctf.example.com/callback/"));
        assert!(!c.is_redirect_uri_allowed("https://ctf.example.com/callback?x=1"));
        assert!(!c.is_redirect_uri_allowed("http://ctf.example.com/callback"));
    }

    #[test]
    fn test_wildcard_redirect_uri() {
        let c = client(&["*.example.com"]);
        assert!(c.is_redirect_uri_allowed("https://ctf.example.com/callback"));
        assert!(c.is_redirect_uri_allowed("https://a.b.example.com/"));
        assert!(!c.is_redirect_uri_allowed("https://evilexample.com/callback"));
        assert!(!c.is_redirect_uri_allowed("https://example.com.evil.net/"));
        assert!(!c.is_redirect_uri_allowed("http://ctf.example.com/callback"));
        assert!(!c.is_redirect_uri_allowed("not a url"));
    }

    #[test]
    fn test_unknown_scopes() {
        let c = client(&[]);
        assert!(c.unknown_scopes(&["openid", "email"]).is_empty());
        assert!(c.unknown_scopes(&[]).is_empty());
        assert_eq!(c.unknown_scopes(&["openid", "admin", "vpn"]), vec!["admin", "vpn"]);
    }

    #[test]
    fn test_malformed_redirect_uri_column() {
        let mut c = client(&[]);
        c.redirect_uris = "not json".to_string();
        assert!(c.redirect_uris_list().is_empty());
        assert!(!c.is_redirect_uri_allowed("https://ctf.example.com/callback"));
    }
}
