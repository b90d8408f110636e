//! Account endpoints: password login, logout, the current user, the
//! institutional sign-in callback and registration.

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};
use uuid::Uuid;

use crate::AppResources;
use crate::auth::identity::{IdentityError, enforce_domain_policy};
use crate::auth::password::{hash_password, validate_password_strength, verify_password};
use crate::auth::{AUTH_TAG, AuthError, SessionAuth, safe_return_path};
use crate::entity::user;
use crate::error::OAuthError;
use crate::oauth2::codec::RegistrationClaims;

const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// Create the account router, to be nested under `/api/auth`.
pub fn router(resources: AppResources) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(login))
        .routes(routes!(logout))
        .routes(routes!(me))
        .routes(routes!(google_start))
        .routes(routes!(google_callback))
        .routes(routes!(register))
        .with_state(resources)
}

impl From<IdentityError> for AuthError {
    fn from(err: IdentityError) -> Self {
        AuthError::from(OAuthError::from(err))
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Public view of a user account
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub name: String,
    pub picture: Option<String>,
    pub username: Option<String>,
    pub student_number: Option<String>,
    pub faculty: Option<String>,
    pub year_of_study: Option<i32>,
    /// Whether a VPN profile has been provisioned for this account
    pub has_vpn_config: bool,
}

impl From<&user::Model> for UserProfile {
    fn from(account: &user::Model) -> Self {
        Self {
            id: account.id.clone(),
            email: account.email.clone(),
            name: account.name.clone(),
            picture: account.picture.clone(),
            username: account.username.clone(),
            student_number: account.student_number.clone(),
            faculty: account.faculty.clone(),
            year_of_study: account.year_of_study,
            has_vpn_config: account.vpn_assigned_ip.is_some(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    pub success: bool,
    pub user: UserProfile,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct GoogleStartQuery {
    /// Local path to return to after sign-in
    pub return_to: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct GoogleCallbackQuery {
    pub code: Option<String>,
    /// Return-to path round-tripped through the provider
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Identity a registration ticket vouches for
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VerifiedIdentity {
    pub email: String,
    pub name: String,
    pub picture: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PendingRegistration {
    pub registered: bool,
    pub registration_ticket: String,
    pub identity: VerifiedIdentity,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    /// Ticket returned by the sign-in callback
    pub registration_ticket: String,
    pub password: String,
    pub username: Option<String>,
    pub student_number: Option<String>,
    pub faculty: Option<String>,
    pub year_of_study: Option<i32>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn start_session(
    resources: &AppResources,
    jar: CookieJar,
    account: &user::Model,
) -> Result<CookieJar, AuthError> {
    let token = resources.sessions.issue(account).await?;
    Ok(jar.add(resources.sessions.session_cookie(token)))
}

#[tracing::instrument(skip(resources, jar, request))]
#[utoipa::path(
    post,
    path = "/login",
    tag = AUTH_TAG,
    operation_id = "Login",
    summary = "Sign in with email and password",
    description = "Verifies the password and sets the session cookie.",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = SessionResponse),
        (status = 401, description = "Invalid email or password", body = AuthError),
    )
)]
pub async fn login(
    State(resources): State<AppResources>,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let email = request.email.trim().to_lowercase();
    let Some(account) = resources.store.find_user_by_email(&email).await? else {
        return Err(AuthError::unauthorized(INVALID_CREDENTIALS));
    };
    if !verify_password(&request.password, &account.password_hash) {
        tracing::info!(user_id = %account.id, "Rejected login with wrong password");
        return Err(AuthError::unauthorized(INVALID_CREDENTIALS));
    }

    let jar = start_session(&resources, jar, &account).await?;
    Ok((
        jar,
        Json(SessionResponse {
            success: true,
            user: UserProfile::from(&account),
        }),
    ))
}

#[tracing::instrument(skip(resources, jar))]
#[utoipa::path(
    post,
    path = "/logout",
    tag = AUTH_TAG,
    operation_id = "Logout",
    summary = "End the current session",
    responses(
        (status = 204, description = "Session ended (also when there was none)"),
    )
)]
pub async fn logout(
    State(resources): State<AppResources>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AuthError> {
    if let Some(cookie) = jar.get(resources.sessions.cookie_name()) {
        resources.sessions.revoke(cookie.value()).await?;
    }
    Ok((
        StatusCode::NO_CONTENT,
        jar.add(resources.sessions.clear_session_cookie()),
    ))
}

#[tracing::instrument(skip(resources, session))]
#[utoipa::path(
    get,
    path = "/me",
    tag = AUTH_TAG,
    operation_id = "Current User",
    summary = "Profile of the signed-in user",
    responses(
        (status = 200, description = "Current user", body = UserProfile),
        (status = 401, description = "No valid session", body = AuthError),
        (status = 404, description = "Session user no longer exists", body = AuthError),
    ),
    security(("session_cookie" = []))
)]
pub async fn me(
    State(resources): State<AppResources>,
    SessionAuth(session): SessionAuth,
) -> Result<Json<UserProfile>, AuthError> {
    let account = resources
        .store
        .find_user(&session.user_id)
        .await?
        .ok_or_else(|| AuthError::not_found("User not found"))?;
    Ok(Json(UserProfile::from(&account)))
}

#[tracing::instrument(skip(resources))]
#[utoipa::path(
    get,
    path = "/google",
    tag = AUTH_TAG,
    operation_id = "Institutional Sign-In",
    summary = "Redirect to the identity provider",
    params(GoogleStartQuery),
    responses(
        (status = 303, description = "Redirect to the identity provider"),
    )
)]
pub async fn google_start(
    State(resources): State<AppResources>,
    Query(query): Query<GoogleStartQuery>,
) -> Result<Redirect, AuthError> {
    let return_to = safe_return_path(query.return_to.as_deref());
    let target = resources.identity.authorization_url(return_to)?;
    Ok(Redirect::to(target.as_str()))
}

#[tracing::instrument(skip(resources, jar, query))]
#[utoipa::path(
    get,
    path = "/google/callback",
    tag = AUTH_TAG,
    operation_id = "Institutional Sign-In Callback",
    summary = "Complete sign-in with the identity provider",
    description = "Exchanges the provider's code and enforces the institutional domain. \
                   Known accounts get a session and are redirected to the return-to path. \
                   Unknown accounts receive a short-lived registration ticket instead.",
    params(GoogleCallbackQuery),
    responses(
        (status = 200, description = "Account not registered yet", body = PendingRegistration),
        (status = 303, description = "Signed in, redirect to the return-to path"),
        (status = 400, description = "Missing authorization code", body = AuthError),
        (status = 403, description = "Account outside the institutional domain", body = AuthError),
        (status = 502, description = "Identity provider failure", body = AuthError),
    )
)]
pub async fn google_callback(
    State(resources): State<AppResources>,
    jar: CookieJar,
    Query(query): Query<GoogleCallbackQuery>,
) -> Result<Response, AuthError> {
    if let Some(error) = query.error {
        return Err(AuthError::unauthorized(format!(
            "Sign-in was not completed: {error}"
        )));
    }
    let code = query
        .code
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AuthError::bad_request("Missing authorization code"))?;

    let provider = &resources.config.identity_provider;
    let assertion = resources
        .identity
        .exchange_code(code, &provider.redirect_uri)
        .await?;
    let assertion = enforce_domain_policy(assertion, &provider.allowed_domain)?;
    let email = assertion.email.to_lowercase();

    if let Some(account) = resources.store.find_user_by_email(&email).await? {
        let jar = start_session(&resources, jar, &account).await?;
        let target = safe_return_path(query.state.as_deref());
        return Ok((jar, Redirect::to(target)).into_response());
    }

    let identity = RegistrationClaims {
        subject: assertion.subject,
        email,
        name: assertion.name,
        picture: assertion.picture,
    };
    let ttl = Duration::seconds(resources.config.session.registration_ticket_ttl_seconds);
    let ticket = resources
        .codec
        .sign_registration_ticket(&identity, ttl)
        .map_err(AuthError::server_error)?;

    Ok(Json(PendingRegistration {
        registered: false,
        registration_ticket: ticket,
        identity: VerifiedIdentity {
            email: identity.email,
            name: identity.name,
            picture: identity.picture,
        },
    })
    .into_response())
}

#[tracing::instrument(skip(resources, jar, request))]
#[utoipa::path(
    post,
    path = "/register",
    tag = AUTH_TAG,
    operation_id = "Register",
    summary = "Create an account from a registration ticket",
    description = "Email, name and picture are taken from the ticket, never from the request body.",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created and signed in", body = SessionResponse),
        (status = 400, description = "Weak password", body = AuthError),
        (status = 401, description = "Invalid or expired registration ticket", body = AuthError),
        (status = 409, description = "Email or username already registered", body = AuthError),
    )
)]
pub async fn register(
    State(resources): State<AppResources>,
    jar: CookieJar,
    Json(request): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let identity = resources
        .codec
        .verify_registration_ticket(&request.registration_ticket)
        .map_err(|_| AuthError::unauthorized("Invalid or expired registration ticket"))?;

    validate_password_strength(&request.password)
        .map_err(|problems| AuthError::bad_request(problems.join("; ")))?;
    let password_hash = hash_password(&request.password).map_err(AuthError::server_error)?;

    let now = OffsetDateTime::now_utc();
    let account = user::Model {
        id: Uuid::new_v4().to_string(),
        email: identity.email.to_lowercase(),
        google_id: Some(identity.subject),
        name: identity.name,
        picture: identity.picture,
        password_hash,
        username: non_empty(request.username),
        student_number: non_empty(request.student_number),
        faculty: non_empty(request.faculty),
        year_of_study: request.year_of_study,
        vpn_assigned_ip: None,
        created_at: now,
        updated_at: now,
    };
    resources.store.insert_user(account.clone()).await?;
    tracing::info!(user_id = %account.id, "Registered new account");

    let jar = start_session(&resources, jar, &account).await?;
    Ok((
        StatusCode::CREATED,
        jar,
        Json(SessionResponse {
            success: true,
            user: UserProfile::from(&account),
        }),
    ))
}
