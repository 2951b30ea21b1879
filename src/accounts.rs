//! User accounts: registration, password checks and the second factor.
//!
//! Every function returns the domain error the HTTP layer renders, so the
//! messages here are what clients see.

use crate::errors::AuthError;
use crate::settings::Totp as TotpCfg;
use crate::storage::{self, Credentials, User};
use crate::totp::{self, TotpParams};
use sea_orm::{DatabaseConnection, SqlErr};
use serde::Serialize;

pub const MIN_PASSWORD_LEN: usize = 8;

/// Result of a successful password check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    pub user_id: String,
    pub two_fa_enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserSettings {
    pub username: String,
    pub is_2fa_enabled: bool,
}

pub async fn register(
    db: &DatabaseConnection,
    username: &str,
    password: &str,
) -> Result<User, AuthError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(AuthError::BadRequest(
            "Username must not be empty".to_string(),
        ));
    }
    if storage::get_user_by_username(db, username).await?.is_some() {
        return Err(username_taken());
    }
    check_password_length(password)?;

    match storage::create_user(db, username, password, None).await {
        Ok(user) => {
            tracing::info!(user_id = %user.id, "registered user");
            Ok(user)
        }
        // lost a race against a concurrent registration
        Err(AuthError::Db(err))
            if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) =>
        {
            Err(username_taken())
        }
        Err(err) => Err(err),
    }
}

pub async fn authenticate(
    db: &DatabaseConnection,
    username: &str,
    password: &str,
) -> Result<Authenticated, AuthError> {
    let user = storage::get_user_by_username(db, username.trim())
        .await?
        .ok_or_else(user_not_found)?;
    let creds = credentials(db, &user.id).await?;

    if !storage::verify_password(password, &creds.password_hash) {
        tracing::debug!(user_id = %user.id, "password mismatch");
        return Err(AuthError::Forbidden("Wrong credentials".to_string()));
    }

    Ok(Authenticated {
        user_id: user.id,
        two_fa_enabled: creds.two_fa_enabled,
    })
}

pub async fn get_user(db: &DatabaseConnection, user_id: &str) -> Result<User, AuthError> {
    storage::get_user_by_id(db, user_id)
        .await?
        .ok_or_else(user_not_found)
}

pub async fn settings(db: &DatabaseConnection, user_id: &str) -> Result<UserSettings, AuthError> {
    let user = get_user(db, user_id).await?;
    let creds = credentials(db, user_id).await?;
    Ok(UserSettings {
        username: user.username,
        is_2fa_enabled: creds.two_fa_enabled,
    })
}

/// Store a fresh secret and turn the second factor on. Returns the secret.
pub async fn enable_two_factor(
    db: &DatabaseConnection,
    cfg: &TotpCfg,
    user_id: &str,
) -> Result<String, AuthError> {
    get_user(db, user_id).await?;
    let secret = totp::generate_secret(cfg.secret_bytes)?;
    storage::set_two_factor(db, user_id, true, Some(secret.clone())).await?;
    tracing::info!(%user_id, "two-factor enabled");
    Ok(secret)
}

pub async fn disable_two_factor(db: &DatabaseConnection, user_id: &str) -> Result<(), AuthError> {
    get_user(db, user_id).await?;
    storage::set_two_factor(db, user_id, false, None).await?;
    tracing::info!(%user_id, "two-factor disabled");
    Ok(())
}

pub async fn change_password(
    db: &DatabaseConnection,
    user_id: &str,
    old_password: &str,
    new_password: &str,
) -> Result<(), AuthError> {
    let creds = credentials(db, user_id).await?;

    if !storage::verify_password(old_password, &creds.password_hash) {
        return Err(AuthError::BadRequest("Wrong password".to_string()));
    }
    check_password_length(new_password)?;
    if old_password == new_password {
        return Err(AuthError::BadRequest(
            "New password must be different from old one".to_string(),
        ));
    }

    let hash = storage::hash_password(new_password)?;
    storage::update_password_hash(db, user_id, hash).await?;
    tracing::info!(%user_id, "password changed");
    Ok(())
}

/// `None` while the second factor is off.
pub async fn two_factor_secret(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<Option<String>, AuthError> {
    let creds = credentials(db, user_id).await?;
    if !creds.two_fa_enabled {
        return Ok(None);
    }
    match creds.totp_secret {
        Some(secret) if !secret.is_empty() => Ok(Some(secret)),
        _ => Err(AuthError::Other(format!(
            "user {} has two-factor enabled without a secret",
            user_id
        ))),
    }
}

pub async fn verify_totp(
    db: &DatabaseConnection,
    cfg: &TotpCfg,
    user_id: &str,
    code: &str,
) -> Result<bool, AuthError> {
    let secret = two_factor_secret(db, user_id)
        .await?
        .ok_or_else(two_factor_not_enabled)?;
    Ok(totp::verify_code(&secret, code, cfg.window))
}

/// Key URI for the authenticator app, labelled with the issuer and username.
pub async fn totp_uri(
    db: &DatabaseConnection,
    cfg: &TotpCfg,
    user_id: &str,
) -> Result<String, AuthError> {
    let user = get_user(db, user_id).await?;
    let secret = two_factor_secret(db, user_id)
        .await?
        .ok_or_else(two_factor_not_enabled)?;
    Ok(totp::otpauth_uri(
        &cfg.issuer,
        &user.username,
        &secret,
        &TotpParams::default(),
    ))
}

async fn credentials(db: &DatabaseConnection, user_id: &str) -> Result<Credentials, AuthError> {
    storage::get_credentials(db, user_id)
        .await?
        .ok_or_else(user_not_found)
}

fn check_password_length(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::BadRequest(format!(
            "Password must be at least {} characters long",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

fn user_not_found() -> AuthError {
    AuthError::NotFound("User not found".to_string())
}

fn username_taken() -> AuthError {
    AuthError::Conflict("Username already taken".to_string())
}

fn two_factor_not_enabled() -> AuthError {
    AuthError::BadRequest("2FA is not enabled".to_string())
}
