use crate::entities;
use crate::errors::AuthError;
use crate::settings::Database as DbCfg;
use chrono::Utc;
use migration::MigratorTrait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub created_at: i64,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub user_id: String,
    pub password_hash: String,
    pub two_fa_enabled: bool,
    pub totp_secret: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("two_fa_enabled", &self.two_fa_enabled)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub refresh_token_hash: String,
    pub created_at: i64,
    pub expires_at: i64,
}

impl From<entities::user::Model> for User {
    fn from(model: entities::user::Model) -> Self {
        Self {
            id: model.id,
            username: model.username,
            email: model.email,
            created_at: model.created_at,
        }
    }
}

impl From<entities::user_credentials::Model> for Credentials {
    fn from(model: entities::user_credentials::Model) -> Self {
        Self {
            user_id: model.user_id,
            password_hash: model.password_hash,
            two_fa_enabled: model.two_fa_enabled != 0,
            totp_secret: model.totp_secret,
        }
    }
}

impl From<entities::session::Model> for Session {
    fn from(model: entities::session::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            refresh_token_hash: model.refresh_token_hash,
            created_at: model.created_at,
            expires_at: model.expires_at,
        }
    }
}

/// Connect and bring the schema up to date.
pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, AuthError> {
    let db = Database::connect(&cfg.url).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// Password hashing

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    use argon2::password_hash::{rand_core::OsRng, SaltString};
    use argon2::{Argon2, PasswordHasher};

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AuthError::Other(format!("Password hashing failed: {}", e)))
}

/// A stored hash that does not parse never verifies.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    use argon2::{Argon2, PasswordHash, PasswordVerifier};

    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

// User management functions

/// Insert the user and its credentials row together.
pub async fn create_user(
    db: &DatabaseConnection,
    username: &str,
    password: &str,
    email: Option<String>,
) -> Result<User, AuthError> {
    let id = new_id();
    let created_at = Utc::now().timestamp();
    let password_hash = hash_password(password)?;

    let txn = db.begin().await?;

    entities::user::ActiveModel {
        id: Set(id.clone()),
        username: Set(username.to_string()),
        email: Set(email.clone()),
        created_at: Set(created_at),
    }
    .insert(&txn)
    .await?;

    entities::user_credentials::ActiveModel {
        user_id: Set(id.clone()),
        password_hash: Set(password_hash),
        two_fa_enabled: Set(0),
        totp_secret: Set(None),
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;

    Ok(User {
        id,
        username: username.to_string(),
        email,
        created_at,
    })
}

pub async fn get_user_by_username(
    db: &DatabaseConnection,
    username: &str,
) -> Result<Option<User>, AuthError> {
    use entities::user::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::Username.eq(username))
        .one(db)
        .await?
        .map(User::from))
}

pub async fn get_user_by_id(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<Option<User>, AuthError> {
    use entities::user::Entity;

    Ok(Entity::find_by_id(user_id.to_string())
        .one(db)
        .await?
        .map(User::from))
}

pub async fn get_credentials(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<Option<Credentials>, AuthError> {
    use entities::user_credentials::Entity;

    Ok(Entity::find_by_id(user_id.to_string())
        .one(db)
        .await?
        .map(Credentials::from))
}

async fn find_credentials_model(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<entities::user_credentials::Model, AuthError> {
    entities::user_credentials::Entity::find_by_id(user_id.to_string())
        .one(db)
        .await?
        .ok_or_else(|| AuthError::NotFound("User not found".to_string()))
}

pub async fn update_password_hash(
    db: &DatabaseConnection,
    user_id: &str,
    password_hash: String,
) -> Result<(), AuthError> {
    let model = find_credentials_model(db, user_id).await?;
    let mut active: entities::user_credentials::ActiveModel = model.into();
    active.password_hash = Set(password_hash);
    active.update(db).await?;
    Ok(())
}

/// Turn two-factor on with `secret`, or off (pass `false, None`).
pub async fn set_two_factor(
    db: &DatabaseConnection,
    user_id: &str,
    enabled: bool,
    secret: Option<String>,
) -> Result<(), AuthError> {
    let model = find_credentials_model(db, user_id).await?;
    let mut active: entities::user_credentials::ActiveModel = model.into();
    active.two_fa_enabled = Set(if enabled { 1 } else { 0 });
    active.totp_secret = Set(secret);
    active.update(db).await?;
    Ok(())
}

// Session management functions

pub async fn create_session(
    db: &DatabaseConnection,
    session_id: &str,
    user_id: &str,
    refresh_token_hash: &str,
    ttl_secs: i64,
) -> Result<Session, AuthError> {
    let now = Utc::now().timestamp();
    let expires_at = now + ttl_secs;

    entities::session::ActiveModel {
        id: Set(session_id.to_string()),
        user_id: Set(user_id.to_string()),
        refresh_token_hash: Set(refresh_token_hash.to_string()),
        created_at: Set(now),
        expires_at: Set(expires_at),
    }
    .insert(db)
    .await?;

    Ok(Session {
        id: session_id.to_string(),
        user_id: user_id.to_string(),
        refresh_token_hash: refresh_token_hash.to_string(),
        created_at: now,
        expires_at,
    })
}

/// Expired sessions read as absent.
pub async fn get_session(
    db: &DatabaseConnection,
    session_id: &str,
) -> Result<Option<Session>, AuthError> {
    use entities::session::Entity;

    match Entity::find_by_id(session_id.to_string()).one(db).await? {
        Some(model) if Utc::now().timestamp() <= model.expires_at => Ok(Some(model.into())),
        _ => Ok(None),
    }
}

/// Returns whether a row was removed.
pub async fn delete_session(db: &DatabaseConnection, session_id: &str) -> Result<bool, AuthError> {
    use entities::session::{Column, Entity};

    let result = Entity::delete_many()
        .filter(Column::Id.eq(session_id))
        .exec(db)
        .await?;

    Ok(result.rows_affected > 0)
}

pub async fn delete_sessions_for_user(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<u64, AuthError> {
    use entities::session::{Column, Entity};

    let result = Entity::delete_many()
        .filter(Column::UserId.eq(user_id))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}

pub async fn cleanup_expired_sessions(db: &DatabaseConnection) -> Result<u64, AuthError> {
    use entities::session::{Column, Entity};

    let now = Utc::now().timestamp();
    let result = Entity::delete_many()
        .filter(Column::ExpiresAt.lt(now))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}
