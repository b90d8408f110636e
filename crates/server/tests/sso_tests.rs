//! CTF platform handoff tests.

mod common;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use campus_identity_broker::entity::sso_handoff_token;
use common::*;
use futures::future::join_all;
use serde_json::{Value, json};
use time::{Duration, OffsetDateTime};

fn api_key_header() -> HeaderName {
    HeaderName::from_static("x-ctfd-api-key")
}

async fn initiate(app: &TestApp, cookie: &HeaderValue) -> String {
    let response = app
        .server
        .get("/api/ctfd/auth/sso")
        .add_query_param("return_url", "https://evil.example.com")
        .add_header(cookie_header(), cookie.clone())
        .await;
    response.assert_status_see_other();
    let target = location(&response);
    assert!(target.starts_with("https://ctfd.example.com/sso/callback?token="));
    query_param(&target, "token").expect("token")
}

async fn verify(app: &TestApp, body: Value) -> axum_test::TestResponse {
    app.server
        .post("/api/ctfd/auth/verify")
        .add_header(api_key_header(), HeaderValue::from_static(API_KEY))
        .json(&body)
        .await
}

async fn redeem(app: &TestApp, token: &str) -> axum_test::TestResponse {
    app.server
        .post("/api/ctfd/auth/sso/validate")
        .add_header(api_key_header(), HeaderValue::from_static(API_KEY))
        .json(&json!({ "token": token }))
        .await
}

#[tokio::test]
async fn test_handoff_round_trip_is_single_use() {
    let app = spawn_app().await;
    let account = seed_user(&app, "thandi@students.wits.ac.za", None).await;
    let cookie = session_cookie(&app, &account).await;
    let token = initiate(&app, &cookie).await;

    let response = redeem(&app, &token).await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(
        body,
        json!({
            "success": true,
            "user": {
                "id": account.id,
                "email": "thandi@students.wits.ac.za",
                "name": "Thandi Mokoena",
                "type": "user",
                "verified": true
            }
        })
    );

    let replay = redeem(&app, &token).await;
    replay.assert_status_unauthorized();
    let body: Value = replay.json();
    assert_eq!(body, json!({ "success": false, "error": "Invalid or expired token" }));
}

#[tokio::test]
async fn test_new_handoff_replaces_outstanding_one() {
    let app = spawn_app().await;
    let account = seed_user(&app, "thandi@students.wits.ac.za", None).await;
    let cookie = session_cookie(&app, &account).await;

    let first = initiate(&app, &cookie).await;
    let second = initiate(&app, &cookie).await;
    assert_ne!(first, second);

    redeem(&app, &first).await.assert_status_unauthorized();
    redeem(&app, &second).await.assert_status_ok();
}

#[tokio::test]
async fn test_initiate_without_session_goes_to_login() {
    let app = spawn_app().await;

    let response = app.server.get("/api/ctfd/auth/sso").await;

    response.assert_status_see_other();
    assert_eq!(
        location(&response),
        "/login?return_to=%2Fapi%2Fctfd%2Fauth%2Fsso"
    );
}

#[tokio::test]
async fn test_redeem_checks_api_key_before_body() {
    let app = spawn_app().await;

    let response = app
        .server
        .post("/api/ctfd/auth/sso/validate")
        .add_header(api_key_header(), HeaderValue::from_static("wrong-key"))
        .text("not json at all")
        .await;
    response.assert_status_unauthorized();
    let body: Value = response.json();
    assert_eq!(body, json!({ "success": false, "error": "Invalid API key" }));

    app.server
        .post("/api/ctfd/auth/sso/validate")
        .json(&json!({ "token": "anything" }))
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn test_redeem_requires_token() {
    let app = spawn_app().await;

    let response = app
        .server
        .post("/api/ctfd/auth/sso/validate")
        .add_header(api_key_header(), HeaderValue::from_static(API_KEY))
        .json(&json!({}))
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Token is required");
}

#[tokio::test]
async fn test_concurrent_redemption_succeeds_once() {
    let app = spawn_app().await;
    let account = seed_user(&app, "thandi@students.wits.ac.za", None).await;
    let cookie = session_cookie(&app, &account).await;
    let token = initiate(&app, &cookie).await;

    let responses = join_all((0..8).map(|_| redeem(&app, &token))).await;

    let succeeded = responses
        .iter()
        .filter(|r| r.status_code() == StatusCode::OK)
        .count();
    assert_eq!(succeeded, 1);
}

#[tokio::test]
async fn test_expired_handoff_token_is_rejected() {
    let app = spawn_app().await;
    let account = seed_user(&app, "thandi@students.wits.ac.za", None).await;
    let now = OffsetDateTime::now_utc();
    app.store()
        .put_handoff_token(sso_handoff_token::Model {
            user_id: account.id.clone(),
            token: "stale-handoff".into(),
            email: account.email.clone(),
            name: account.name.clone(),
            expires_at: now - Duration::seconds(1),
            created_at: now - Duration::minutes(6),
        })
        .await
        .unwrap();

    let response = redeem(&app, "stale-handoff").await;
    response.assert_status_unauthorized();
    let body: Value = response.json();
    assert_eq!(body, json!({ "success": false, "error": "Invalid or expired token" }));
}

// =============================================================================
// Credential Check Tests
// =============================================================================

#[tokio::test]
async fn test_verify_accepts_username_email_and_local_part() {
    let app = spawn_app().await;
    let account = seed_user(&app, "thandi@students.wits.ac.za", Some("thandi_m")).await;

    for username in ["thandi_m", "thandi@students.wits.ac.za", "thandi"] {
        let response = verify(&app, json!({ "username": username, "password": PASSWORD })).await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(
            body,
            json!({
                "success": true,
                "user": {
                    "id": account.id,
                    "email": "thandi@students.wits.ac.za",
                    "name": "Thandi Mokoena",
                    "type": "user",
                    "verified": true
                }
            })
        );
    }
}

#[tokio::test]
async fn test_verify_failures_are_indistinguishable() {
    let app = spawn_app().await;
    seed_user(&app, "thandi@students.wits.ac.za", Some("thandi_m")).await;

    let wrong_password = verify(&app, json!({ "username": "thandi_m", "password": "nope-1234" })).await;
    wrong_password.assert_status_unauthorized();
    let unknown_user = verify(&app, json!({ "username": "sipho", "password": PASSWORD })).await;
    unknown_user.assert_status_unauthorized();

    assert_eq!(wrong_password.json::<Value>(), unknown_user.json::<Value>());
    assert_eq!(
        unknown_user.json::<Value>(),
        json!({ "success": false, "error": "Invalid username or password" })
    );
}

#[tokio::test]
async fn test_verify_checks_api_key_then_fields() {
    let app = spawn_app().await;
    seed_user(&app, "thandi@students.wits.ac.za", Some("thandi_m")).await;

    let response = app
        .server
        .post("/api/ctfd/auth/verify")
        .add_header(api_key_header(), HeaderValue::from_static("wrong-key"))
        .json(&json!({ "username": "thandi_m", "password": PASSWORD }))
        .await;
    response.assert_status_unauthorized();
    assert_eq!(response.json::<Value>()["error"], "Invalid API key");

    for body in [
        json!({ "username": "thandi_m" }),
        json!({ "password": PASSWORD }),
        json!({ "username": "  ", "password": PASSWORD }),
    ] {
        let response = verify(&app, body).await;
        response.assert_status_bad_request();
        assert_eq!(
            response.json::<Value>(),
            json!({ "success": false, "error": "Missing username or password" })
        );
    }
}
