//! Opaque token minting and signed session assertions.
//!
//! Opaque tokens (codes, access/refresh tokens, handoff tokens) are random bytes
//! in URL-safe base64 without padding. Session assertions and registration
//! tickets are HS256 JWTs; every verification failure collapses into
//! [`CodecError::InvalidSession`] so callers cannot tell expiry from forgery.

use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Duration, OffsetDateTime};

pub const AUTHORIZATION_CODE_BYTES: usize = 32;
pub const BEARER_TOKEN_BYTES: usize = 48;
pub const HANDOFF_TOKEN_BYTES: usize = 32;
const ASSERTION_NONCE_BYTES: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid session")]
    InvalidSession,
    #[error("failed to sign assertion: {0}")]
    Signing(String),
}

/// Generate `byte_length` cryptographically secure random bytes, URL-safe encoded.
pub fn mint_opaque_token(byte_length: usize) -> String {
    let mut bytes = vec![0u8; byte_length];
    getrandom::fill(&mut bytes).expect("Failed to generate random bytes");
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum AssertionKind {
    Session,
    Registration,
}

#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    sub: String,
    email: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    picture: Option<String>,
    kind: AssertionKind,
    /// Random nonce so two assertions minted in the same second never collide
    jti: String,
    iat: i64,
    exp: i64,
}

/// Identity carried by a verified session assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionClaims {
    pub subject: String,
    pub email: String,
    pub name: String,
}

/// Identity carried by a verified registration ticket. `subject` is the
/// upstream provider's subject, not a local user id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationClaims {
    pub subject: String,
    pub email: String,
    pub name: String,
    pub picture: Option<String>,
}

#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenCodec {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    pub fn sign_session_assertion(
        &self,
        subject: &str,
        email: &str,
        name: &str,
        ttl: Duration,
    ) -> Result<String, CodecError> {
        self.sign(AssertionClaims {
            sub: subject.to_string(),
            email: email.to_string(),
            name: name.to_string(),
            picture: None,
            kind: AssertionKind::Session,
            jti: mint_opaque_token(ASSERTION_NONCE_BYTES),
            iat: OffsetDateTime::now_utc().unix_timestamp(),
            exp: (OffsetDateTime::now_utc() + ttl).unix_timestamp(),
        })
    }

    pub fn verify_session_assertion(&self, token: &str) -> Result<SessionClaims, CodecError> {
        let claims = self.verify(token, AssertionKind::Session)?;
        Ok(SessionClaims {
            subject: claims.sub,
            email: claims.email,
            name: claims.name,
        })
    }

    pub fn sign_registration_ticket(
        &self,
        identity: &RegistrationClaims,
        ttl: Duration,
    ) -> Result<String, CodecError> {
        self.sign(AssertionClaims {
            sub: identity.subject.clone(),
            email: identity.email.clone(),
            name: identity.name.clone(),
            picture: identity.picture.clone(),
            kind: AssertionKind::Registration,
            jti: mint_opaque_token(ASSERTION_NONCE_BYTES),
            iat: OffsetDateTime::now_utc().unix_timestamp(),
            exp: (OffsetDateTime::now_utc() + ttl).unix_timestamp(),
        })
    }

    pub fn verify_registration_ticket(
        &self,
        token: &str,
    ) -> Result<RegistrationClaims, CodecError> {
        let claims = self.verify(token, AssertionKind::Registration)?;
        Ok(RegistrationClaims {
            subject: claims.sub,
            email: claims.email,
            name: claims.name,
            picture: claims.picture,
        })
    }

    fn sign(&self, claims: AssertionClaims) -> Result<String, CodecError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| CodecError::Signing(e.to_string()))
    }

    fn verify(&self, token: &str, kind: AssertionKind) -> Result<AssertionClaims, CodecError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        let data = jsonwebtoken::decode::<AssertionClaims>(token, &self.decoding, &validation)
            .map_err(|_| CodecError::InvalidSession)?;
        // A registration ticket must never be usable as a session and vice versa.
        if data.claims.kind != kind {
            return Err(CodecError::InvalidSession);
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn test_opaque_token_shape() {
        let a = mint_opaque_token(BEARER_TOKEN_BYTES);
        let b = mint_opaque_token(BEARER_TOKEN_BYTES);
        assert_ne!(a, b);
        // 48 bytes -> 64 base64 characters, no padding
        assert_eq!(a.len(), 64);
        assert!(!a.contains('+') && !a.contains('/') && !a.contains('='));
        assert_eq!(mint_opaque_token(AUTHORIZATION_CODE_BYTES).len(), 43);
    }

    #[test]
    fn test_session_assertion_round_trip() {
        let codec = TokenCodec::new(SECRET);
        let token = codec
            .sign_session_assertion("u1", "a@students.wits.ac.za", "A", Duration::hours(1))
            .unwrap();
        let claims = codec.verify_session_assertion(&token).unwrap();
        assert_eq!(claims.subject, "u1");
        assert_eq!(claims.email, "a@students.wits.ac.za");

        let again = codec
            .sign_session_assertion("u1", "a@students.wits.ac.za", "A", Duration::hours(1))
            .unwrap();
        assert_ne!(token, again);
    }

    #[test]
    fn test_expired_assertion_is_invalid() {
        let codec = TokenCodec::new(SECRET);
        let token = codec
            .sign_session_assertion("u1", "a@x", "A", Duration::seconds(-30))
            .unwrap();
        assert_eq!(
            codec.verify_session_assertion(&token),
            Err(CodecError::InvalidSession)
        );
    }

    #[test]
    fn test_foreign_key_and_garbage_are_invalid() {
        let codec = TokenCodec::new(SECRET);
        let other = TokenCodec::new(b"another-secret-another-secret-xx");
        let token = other
            .sign_session_assertion("u1", "a@x", "A", Duration::hours(1))
            .unwrap();
        assert_eq!(
            codec.verify_session_assertion(&token),
            Err(CodecError::InvalidSession)
        );
        assert_eq!(
            codec.verify_session_assertion("not.a.jwt"),
            Err(CodecError::InvalidSession)
        );
        assert_eq!(
            codec.verify_session_assertion(""),
            Err(CodecError::InvalidSession)
        );
    }

    #[test]
    fn test_tampered_assertion_is_invalid() {
        let codec = TokenCodec::new(SECRET);
        let token = codec
            .sign_session_assertion("u1", "a@x", "A", Duration::hours(1))
            .unwrap();
        let mut parts: Vec<String> = token.split('.').map(String::from).collect();
        let forged = serde_json::json!({
            "sub": "admin", "email": "a@x", "name": "A", "kind": "session",
            "jti": "x", "iat": 0, "exp": 4_102_444_800i64
        });
        parts[1] = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(&forged).unwrap());
        assert_eq!(
            codec.verify_session_assertion(&parts.join(".")),
            Err(CodecError::InvalidSession)
        );
    }

    #[test]
    fn test_ticket_and_session_are_not_interchangeable() {
        let codec = TokenCodec::new(SECRET);
        let identity = RegistrationClaims {
            subject: "google-sub".into(),
            email: "a@students.wits.ac.za".into(),
            name: "A".into(),
            picture: None,
        };
        let ticket = codec
            .sign_registration_ticket(&identity, Duration::minutes(15))
            .unwrap();
        assert_eq!(
            codec.verify_session_assertion(&ticket),
            Err(CodecError::InvalidSession)
        );
        assert_eq!(codec.verify_registration_ticket(&ticket).unwrap(), identity);

        let session = codec
            .sign_session_assertion("u1", "a@x", "A", Duration::hours(1))
            .unwrap();
        assert!(codec.verify_registration_ticket(&session).is_err());
    }
}
