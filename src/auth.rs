use crate::accounts;
use crate::errors::AuthError;
use crate::settings::Totp as TotpCfg;
use crate::storage;
use crate::tokens::{AccessClaims, TokenKeys};
use base64ct::{Base64UrlUnpadded, Encoding};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Tokens for a freshly created session.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub user_id: String,
    pub session_id: String,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Session(TokenPair),
    /// Password accepted, TOTP still pending.
    TwoFactorRequired {
        user_id: String,
        challenge_token: String,
    },
}

/// Digest stored in place of the refresh token itself.
pub fn refresh_token_digest(token: &str) -> String {
    Base64UrlUnpadded::encode_string(&Sha256::digest(token.as_bytes()))
}

pub async fn create_session(
    db: &DatabaseConnection,
    keys: &TokenKeys,
    user_id: &str,
) -> Result<TokenPair, AuthError> {
    let session_id = storage::new_id();
    let access_token = keys.issue_access(user_id, &session_id)?;
    let refresh_token = keys.issue_refresh(&session_id)?;

    storage::create_session(
        db,
        &session_id,
        user_id,
        &refresh_token_digest(&refresh_token),
        keys.refresh_ttl().as_secs() as i64,
    )
    .await?;
    tracing::info!(%user_id, %session_id, "session created");

    Ok(TokenPair {
        user_id: user_id.to_string(),
        session_id,
        access_token,
        refresh_token,
    })
}

/// Exchange a refresh token for a new session. The old session is gone
/// afterwards, so each refresh token works once.
pub async fn refresh_session(
    db: &DatabaseConnection,
    keys: &TokenKeys,
    refresh_token: &str,
) -> Result<TokenPair, AuthError> {
    let session_id = keys.validate_refresh(refresh_token).ok_or_else(unauthorized)?;
    let session = storage::get_session(db, &session_id)
        .await?
        .ok_or_else(unauthorized)?;

    let presented = refresh_token_digest(refresh_token);
    if !bool::from(
        presented
            .as_bytes()
            .ct_eq(session.refresh_token_hash.as_bytes()),
    ) {
        tracing::warn!(%session_id, "refresh token digest mismatch");
        return Err(unauthorized());
    }

    // a concurrent refresh already rotated this session
    if !storage::delete_session(db, &session_id).await? {
        return Err(unauthorized());
    }
    create_session(db, keys, &session.user_id).await
}

/// Revoke every session of the user. Returns how many were removed.
pub async fn end_all_sessions(db: &DatabaseConnection, user_id: &str) -> Result<u64, AuthError> {
    let removed = storage::delete_sessions_for_user(db, user_id).await?;
    tracing::info!(%user_id, removed, "sessions revoked");
    Ok(removed)
}

pub async fn end_session(db: &DatabaseConnection, session_id: &str) -> Result<bool, AuthError> {
    let removed = storage::delete_session(db, session_id).await?;
    if removed {
        tracing::info!(%session_id, "session ended");
    }
    Ok(removed)
}

pub async fn login(
    db: &DatabaseConnection,
    keys: &TokenKeys,
    username: &str,
    password: &str,
) -> Result<LoginOutcome, AuthError> {
    let authenticated = accounts::authenticate(db, username, password).await?;

    if authenticated.two_fa_enabled {
        let challenge_token = keys.issue_challenge(&authenticated.user_id)?;
        return Ok(LoginOutcome::TwoFactorRequired {
            user_id: authenticated.user_id,
            challenge_token,
        });
    }

    let pair = create_session(db, keys, &authenticated.user_id).await?;
    Ok(LoginOutcome::Session(pair))
}

pub async fn complete_two_factor(
    db: &DatabaseConnection,
    keys: &TokenKeys,
    cfg: &TotpCfg,
    challenge_token: &str,
    code: &str,
) -> Result<TokenPair, AuthError> {
    let user_id = keys
        .validate_challenge(challenge_token)
        .ok_or_else(unauthorized)?;

    match accounts::verify_totp(db, cfg, &user_id, code).await {
        Ok(true) => create_session(db, keys, &user_id).await,
        Ok(false) => {
            tracing::debug!(%user_id, "rejected TOTP code");
            Err(invalid_code())
        }
        // the account changed between the two steps
        Err(AuthError::BadRequest(_)) | Err(AuthError::NotFound(_)) => Err(unauthorized()),
        Err(err) => Err(err),
    }
}

/// Accept an access token only while its session still exists.
pub async fn authenticate_access(
    db: &DatabaseConnection,
    keys: &TokenKeys,
    token: &str,
) -> Result<AccessClaims, AuthError> {
    let claims = keys.validate_access(token).ok_or_else(invalid_access_token)?;
    match storage::get_session(db, &claims.session_id).await? {
        Some(session) if session.user_id == claims.user_id => Ok(claims),
        _ => Err(invalid_access_token()),
    }
}

pub fn unauthorized() -> AuthError {
    AuthError::Unauthorized("Unauthorized".to_string())
}

pub fn invalid_code() -> AuthError {
    AuthError::Forbidden("Invalid code".to_string())
}

pub fn invalid_access_token() -> AuthError {
    AuthError::Forbidden("Invalid access token".to_string())
}
