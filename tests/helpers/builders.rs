use authenticator::accounts;
use authenticator::auth::{self, TokenPair};
use authenticator::settings::Totp;
use authenticator::storage::{self, User};
use authenticator::tokens::TokenKeys;
use sea_orm::DatabaseConnection;

/// A created user together with what the test needs to log in as it.
pub struct TestUser {
    pub user: User,
    pub password: String,
    pub totp_secret: Option<String>,
}

/// Builder for creating test users
pub struct UserBuilder {
    username: String,
    password: String,
    email: Option<String>,
    two_factor: bool,
}

impl UserBuilder {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            password: "password123".to_string(),
            email: None,
            two_factor: false,
        }
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn with_two_factor(mut self) -> Self {
        self.two_factor = true;
        self
    }

    pub async fn create(self, db: &DatabaseConnection) -> TestUser {
        let user = storage::create_user(db, &self.username, &self.password, self.email)
            .await
            .expect("Failed to create test user");

        let totp_secret = if self.two_factor {
            Some(
                accounts::enable_two_factor(db, &Totp::default(), &user.id)
                    .await
                    .expect("Failed to enable two-factor"),
            )
        } else {
            None
        };

        TestUser {
            user,
            password: self.password,
            totp_secret,
        }
    }
}

/// Builder for sessions with hand-picked lifetimes
pub struct SessionBuilder {
    user_id: String,
    ttl: i64,
}

impl SessionBuilder {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ttl: 3600, // 1 hour
        }
    }

    pub fn with_ttl(mut self, ttl: i64) -> Self {
        self.ttl = ttl;
        self
    }

    /// Issue tokens for the session and store it with the builder's TTL.
    pub async fn create(self, db: &DatabaseConnection, keys: &TokenKeys) -> TokenPair {
        let session_id = storage::new_id();
        let access_token = keys
            .issue_access(&self.user_id, &session_id)
            .expect("Failed to issue access token");
        let refresh_token = keys
            .issue_refresh(&session_id)
            .expect("Failed to issue refresh token");

        storage::create_session(
            db,
            &session_id,
            &self.user_id,
            &auth::refresh_token_digest(&refresh_token),
            self.ttl,
        )
        .await
        .expect("Failed to create test session");

        TokenPair {
            user_id: self.user_id,
            session_id,
            access_token,
            refresh_token,
        }
    }
}
