use crate::errors::AuthError;
use crate::settings::Jwt;
use base64ct::{Base64, Encoding};
use josekit::jws::{JwsHeader, HS256};
use josekit::jwt::{self, JwtPayload, JwtPayloadValidator};
use rand::RngCore;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// HS256 needs at least a 256-bit key.
pub const MIN_KEY_BYTES: usize = 32;

const TYPE_CLAIM: &str = "typ";
const SESSION_CLAIM: &str = "sid";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
    Challenge,
}

impl TokenKind {
    fn as_str(self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
            TokenKind::Challenge => "challenge",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessClaims {
    pub user_id: String,
    pub session_id: String,
}

/// Signs and validates every token the service hands out.
#[derive(Clone)]
pub struct TokenKeys {
    key: Arc<Vec<u8>>,
    access_ttl: Duration,
    refresh_ttl: Duration,
    challenge_ttl: Duration,
}

impl TokenKeys {
    pub fn new(
        key: Vec<u8>,
        access_ttl_secs: i64,
        refresh_ttl_secs: i64,
        challenge_ttl_secs: i64,
    ) -> Result<Self, AuthError> {
        if key.len() < MIN_KEY_BYTES {
            return Err(AuthError::Other(format!(
                "JWT secret must be at least {} bytes, got {}",
                MIN_KEY_BYTES,
                key.len()
            )));
        }
        Ok(Self {
            key: Arc::new(key),
            access_ttl: ttl(access_ttl_secs),
            refresh_ttl: ttl(refresh_ttl_secs),
            challenge_ttl: ttl(challenge_ttl_secs),
        })
    }

    pub fn from_settings(cfg: &Jwt) -> Result<Self, AuthError> {
        let key = match cfg.secret.as_deref() {
            Some(secret) => decode_secret(secret),
            None => {
                tracing::warn!(
                    "jwt.secret is not configured; using a random key, sessions will not survive a restart"
                );
                let mut bytes = vec![0u8; MIN_KEY_BYTES];
                rand::rngs::OsRng.fill_bytes(&mut bytes);
                bytes
            }
        };
        Self::new(
            key,
            cfg.access_ttl_seconds,
            cfg.refresh_ttl_seconds,
            cfg.challenge_ttl_seconds,
        )
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn issue_access(&self, user_id: &str, session_id: &str) -> Result<String, AuthError> {
        let mut payload = self.payload(user_id, TokenKind::Access, self.access_ttl)?;
        payload.set_claim(SESSION_CLAIM, Some(Value::String(session_id.to_string())))?;
        self.sign(&payload)
    }

    pub fn issue_refresh(&self, session_id: &str) -> Result<String, AuthError> {
        let payload = self.payload(session_id, TokenKind::Refresh, self.refresh_ttl)?;
        self.sign(&payload)
    }

    pub fn issue_challenge(&self, user_id: &str) -> Result<String, AuthError> {
        let payload = self.payload(user_id, TokenKind::Challenge, self.challenge_ttl)?;
        self.sign(&payload)
    }

    pub fn validate_access(&self, token: &str) -> Option<AccessClaims> {
        let payload = self.verify(token, TokenKind::Access)?;
        let user_id = payload.subject()?.to_string();
        let session_id = payload.claim(SESSION_CLAIM)?.as_str()?.to_string();
        Some(AccessClaims {
            user_id,
            session_id,
        })
    }

    /// Returns the session id the refresh token was issued for.
    pub fn validate_refresh(&self, token: &str) -> Option<String> {
        self.verify(token, TokenKind::Refresh)?
            .subject()
            .map(str::to_string)
    }

    /// Returns the user id whose password step the challenge vouches for.
    pub fn validate_challenge(&self, token: &str) -> Option<String> {
        self.verify(token, TokenKind::Challenge)?
            .subject()
            .map(str::to_string)
    }

    fn payload(
        &self,
        subject: &str,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<JwtPayload, AuthError> {
        let now = SystemTime::now();
        let mut payload = JwtPayload::new();
        payload.set_subject(subject);
        payload.set_jwt_id(uuid::Uuid::new_v4().to_string());
        payload.set_issued_at(&now);
        payload.set_expires_at(&(now + ttl));
        payload.set_claim(TYPE_CLAIM, Some(Value::String(kind.as_str().to_string())))?;
        Ok(payload)
    }

    fn sign(&self, payload: &JwtPayload) -> Result<String, AuthError> {
        let signer = HS256.signer_from_bytes(self.key.as_slice())?;
        let mut header = JwsHeader::new();
        header.set_token_type("JWT");
        let token = jwt::encode_with_signer(payload, &header, &signer)?;
        Ok(token)
    }

    fn verify(&self, token: &str, expected: TokenKind) -> Option<JwtPayload> {
        let verifier = HS256.verifier_from_bytes(self.key.as_slice()).ok()?;
        let (payload, _header) = jwt::decode_with_verifier(token, &verifier).ok()?;

        let mut validator = JwtPayloadValidator::new();
        validator.set_base_time(SystemTime::now());
        validator.validate(&payload).ok()?;
        // a token without an expiry never passes
        payload.expires_at()?;

        match payload.claim(TYPE_CLAIM)?.as_str() {
            Some(kind) if kind == expected.as_str() => Some(payload),
            _ => None,
        }
    }
}

/// Use the base64 decoding when the secret parses as base64, its raw bytes otherwise.
fn decode_secret(secret: &str) -> Vec<u8> {
    Base64::decode_vec(secret).unwrap_or_else(|_| secret.as_bytes().to_vec())
}

fn ttl(secs: i64) -> Duration {
    Duration::from_secs(secs.max(0) as u64)
}
