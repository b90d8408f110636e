//! OpenAPI/Utoipa configuration.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{
        ApiKey, ApiKeyValue, AuthorizationCode, Flow, HttpAuthScheme, HttpBuilder, OAuth2, Scopes,
        SecurityScheme,
    },
};

use crate::api::health::MISC_TAG;
use crate::auth::AUTH_TAG;
use crate::oauth2::OAUTH2_TAG;
use crate::sso::{API_KEY_HEADER, SSO_TAG};
use crate::vpn::VPN_TAG;

/// Security addon for OpenAPI documentation.
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        {
            components.add_security_scheme(
                "session_cookie",
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::with_description(
                    "session",
                    "Session cookie set by `/api/auth/login` or the sign-in callback.",
                ))),
            );

            components.add_security_scheme(
                "ctfd_api_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(API_KEY_HEADER))),
            );

            let bearer = HttpBuilder::new()
                .scheme(HttpAuthScheme::Bearer)
                .description(Some("Access token issued by `/api/oauth/token`."))
                .build();
            components.add_security_scheme("Authorization", SecurityScheme::Http(bearer));

            let oauth2 = OAuth2::new([Flow::AuthorizationCode(AuthorizationCode::new(
                "/api/oauth/authorize",
                "/api/oauth/token",
                Scopes::from_iter([
                    ("openid", "OpenID Connect scope"),
                    ("email", "Access to user email"),
                    ("profile", "Access to user profile"),
                ]),
            ))]);
            components.add_security_scheme("OAuth2", SecurityScheme::OAuth2(oauth2));
        }
    }
}

/// OpenAPI documentation configuration.
#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "Campus Identity Broker API",
        version = "1.0.0",
        description = "Institutional sign-in, OAuth2 authorization server and service handoff for campus applications."
    ),
    tags(
        (name = MISC_TAG, description = "Miscellaneous endpoints"),
        (name = AUTH_TAG, description = "Accounts and browser sessions"),
        (name = OAUTH2_TAG, description = "OAuth2 / OpenID Connect authorization server"),
        (name = SSO_TAG, description = "Session handoff to the CTF platform"),
        (name = VPN_TAG, description = "VPN profile provisioning")
    )
)]
pub struct ApiDoc;
