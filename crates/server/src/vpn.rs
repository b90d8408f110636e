//! VPN profile provisioning.
//!
//! Profiles are produced by a separate VPN backend; this module asks it for one,
//! remembers the tunnel address it assigned and hands the file to the user.

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::AppResources;
use crate::auth::{AuthError, SessionAuth};
use crate::config::VpnConfig;

/// OpenAPI tag for VPN endpoints
pub const VPN_TAG: &str = "VPN";

pub const PROFILE_CONTENT_TYPE: &str = "application/x-openvpn-profile";
const ASSIGNED_IP_HEADER: &str = "x-vpn-ip";

/// Create the VPN router, to be nested under `/api/vpn`.
pub fn router(resources: AppResources) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(profile))
        .with_state(resources)
}

#[derive(Debug, Error)]
pub enum VpnError {
    #[error("VPN backend request failed: {0}")]
    Backend(String),
}

/// An OpenVPN client profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpnProfile {
    pub file_content: String,
    pub file_name: String,
    pub assigned_ip: Option<String>,
}

#[async_trait]
pub trait VpnProvisioner: Send + Sync {
    /// Produce (or reissue) the profile for `email`.
    async fn provision(&self, email: &str) -> Result<VpnProfile, VpnError>;
}

#[derive(Serialize)]
struct ProfileRequest<'a> {
    email: &'a str,
}

/// Provisioner backed by the VPN backend's HTTP API.
pub struct HttpVpnProvisioner {
    http: reqwest::Client,
    backend_url: String,
}

impl HttpVpnProvisioner {
    pub fn new(config: &VpnConfig) -> Result<Self, VpnError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| VpnError::Backend(e.to_string()))?;
        Ok(Self {
            http,
            backend_url: config.backend_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl VpnProvisioner for HttpVpnProvisioner {
    #[tracing::instrument(skip(self))]
    async fn provision(&self, email: &str) -> Result<VpnProfile, VpnError> {
        let response = self
            .http
            .post(format!("{}/api/profile", self.backend_url))
            .json(&ProfileRequest { email })
            .send()
            .await
            .map_err(|e| VpnError::Backend(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VpnError::Backend(format!("backend returned {status}: {body}")));
        }

        let headers = response.headers().clone();
        let file_content = response
            .text()
            .await
            .map_err(|e| VpnError::Backend(e.to_string()))?;

        let file_name = headers
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(attachment_file_name)
            .unwrap_or_else(|| default_file_name(email));
        let assigned_ip = headers
            .get(ASSIGNED_IP_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty())
            .or_else(|| ifconfig_address(&file_content));

        tracing::info!(file_name, assigned_ip = ?assigned_ip, "Received VPN profile");
        Ok(VpnProfile {
            file_content,
            file_name,
            assigned_ip,
        })
    }
}

/// `filename` parameter of a Content-Disposition value.
fn attachment_file_name(disposition: &str) -> Option<String> {
    disposition
        .split(';')
        .filter_map(|part| part.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("filename"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|name| !name.is_empty())
}

fn default_file_name(email: &str) -> String {
    let local = email.split('@').next().unwrap_or(email);
    format!("{local}.ovpn")
}

/// Tunnel address from the first `ifconfig <ip> ...` directive.
fn ifconfig_address(profile: &str) -> Option<String> {
    profile.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        let directive = words.next()?;
        if !directive.eq_ignore_ascii_case("ifconfig") {
            return None;
        }
        words
            .next()?
            .parse::<Ipv4Addr>()
            .ok()
            .map(|ip| ip.to_string())
    })
}

/// Keep the name usable inside a quoted header parameter.
fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' | '\\' | '/' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

#[tracing::instrument(skip(resources, session))]
#[utoipa::path(
    get,
    path = "/profile",
    tag = VPN_TAG,
    operation_id = "Download VPN Profile",
    summary = "Download the signed-in user's OpenVPN profile",
    description = "Requests a profile from the VPN backend, records the assigned tunnel address \
                   on the account and returns the profile as an attachment.",
    responses(
        (status = 200, description = "OpenVPN profile", content_type = "application/x-openvpn-profile", body = String),
        (status = 401, description = "No valid session", body = AuthError),
        (status = 502, description = "VPN backend failure", body = AuthError),
    ),
    security(("session_cookie" = []))
)]
pub async fn profile(
    State(resources): State<AppResources>,
    SessionAuth(session): SessionAuth,
) -> Result<Response, AuthError> {
    let profile = resources
        .vpn
        .provision(&session.email)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, user_id = %session.user_id, "VPN provisioning failed");
            AuthError::bad_gateway("Failed to generate VPN profile")
        })?;

    if let Some(ip) = &profile.assigned_ip {
        resources.store.update_user_vpn(&session.user_id, ip).await?;
    }

    let disposition = format!(
        "attachment; filename=\"{}\"",
        sanitize_file_name(&profile.file_name)
    );
    Ok((
        [
            (header::CONTENT_TYPE, PROFILE_CONTENT_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        profile.file_content,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_file_name() {
        assert_eq!(
            attachment_file_name("attachment; filename=\"thandi.ovpn\"").as_deref(),
            Some("thandi.ovpn")
        );
        assert_eq!(
            attachment_file_name("attachment; filename=plain.ovpn").as_deref(),
            Some("plain.ovpn")
        );
        assert_eq!(attachment_file_name("attachment"), None);
    }

    #[test]
    fn test_ifconfig_address() {
        let profile = "client\ndev tun\nifconfig 10.8.0.14 255.255.255.0\nremote vpn.example.com";
        assert_eq!(ifconfig_address(profile).as_deref(), Some("10.8.0.14"));
        assert_eq!(ifconfig_address("client\nifconfig-push x"), None);
        assert_eq!(ifconfig_address("IFCONFIG 10.0.0.2 10.0.0.1").as_deref(), Some("10.0.0.2"));
    }

    #[test]
    fn test_default_file_name_and_sanitizing() {
        assert_eq!(default_file_name("thandi@students.wits.ac.za"), "thandi.ovpn");
        assert_eq!(sanitize_file_name("a\"b/c.ovpn"), "a_b_c.ovpn");
    }
}
