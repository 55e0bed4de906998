//! Identity provider: email/password accounts and the session-changed stream.
//!
//! Failures carry a fixed provider error code (`auth/...`). The user-facing
//! text for a code comes from `message_for_code`; codes without an entry fall
//! back to a generic message for the flow the user was in.

use crate::models::principal::Principal;
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use async_trait::async_trait;
use chrono::Utc;
use rand_core::OsRng;
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

/// Minimum password length accepted at sign-up.
pub const MIN_PASSWORD_LENGTH: usize = 6;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("required fields are missing")]
    MissingFields,
    #[error("email address is malformed")]
    InvalidEmail,
    #[error("password must be at least 6 characters")]
    WeakPassword,
    #[error("no account for this email")]
    UserNotFound,
    #[error("password does not match")]
    WrongPassword,
    #[error("an account already exists for this email")]
    EmailAlreadyInUse,
    #[error("sign-in provider `{0}` is not enabled")]
    ProviderNotEnabled(String),
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl AuthError {
    /// Provider error code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingFields => "auth/missing-fields",
            AuthError::InvalidEmail => "auth/invalid-email",
            AuthError::WeakPassword => "auth/weak-password",
            AuthError::UserNotFound => "auth/user-not-found",
            AuthError::WrongPassword => "auth/wrong-password",
            AuthError::EmailAlreadyInUse => "auth/email-already-in-use",
            AuthError::ProviderNotEnabled(_) => "auth/operation-not-allowed",
            AuthError::Hash(_) | AuthError::Sqlx(_) => "auth/internal-error",
        }
    }

    pub fn user_message(&self, flow: AuthFlow) -> &'static str {
        message_for_code(self.code(), flow)
    }
}

/// Which form the user was submitting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthFlow {
    SignIn,
    SignUp,
    Provider,
}

impl AuthFlow {
    fn generic_message(self) -> &'static str {
        match self {
            AuthFlow::SignIn => "Login failed!",
            AuthFlow::SignUp => "Registration failed!",
            AuthFlow::Provider => "Sign-in with provider failed!",
        }
    }
}

/// Map a provider error code to the text shown to the user.
pub fn message_for_code(code: &str, flow: AuthFlow) -> &'static str {
    if flow == AuthFlow::Provider {
        return flow.generic_message();
    }
    match (code, flow) {
        ("auth/missing-fields", AuthFlow::SignIn) => "Email and password are required!",
        ("auth/missing-fields", _) => "All fields are required!",
        ("auth/user-not-found", _) => "Email is not registered!",
        ("auth/wrong-password", _) => "Wrong password!",
        ("auth/invalid-email", _) => "Invalid email format!",
        ("auth/email-already-in-use", _) => "Email is already registered!",
        ("auth/weak-password", _) => "Password must be at least 6 characters!",
        _ => flow.generic_message(),
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> AuthResult<Principal>;

    /// Create an account and sign it in.
    async fn sign_up(&self, email: &str, password: &str, display_name: &str) -> AuthResult<Principal>;

    async fn sign_in_with_provider(&self, provider: &str) -> AuthResult<Principal>;

    async fn sign_out(&self) -> AuthResult<()>;

    fn current(&self) -> Option<Principal>;

    /// Session-changed stream: the signed-in principal, or `None`.
    fn subscribe(&self) -> watch::Receiver<Option<Principal>>;
}

#[derive(FromRow)]
struct UserRow {
    id: String,
    email: String,
    password_hash: String,
    display_name: Option<String>,
    avatar_url: Option<String>,
}

impl From<UserRow> for Principal {
    fn from(row: UserRow) -> Self {
        Principal {
            id: row.id,
            email: row.email,
            display_name: row.display_name,
            avatar_url: row.avatar_url,
        }
    }
}

/// Accounts kept in the `users` table, passwords hashed with Argon2id.
///
/// No federated providers are wired up in this deployment.
#[derive(Clone)]
pub struct SqliteIdentityProvider {
    db: Arc<SqlitePool>,
    current: Arc<watch::Sender<Option<Principal>>>,
}

impl SqliteIdentityProvider {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            db,
            current: Arc::new(tx),
        }
    }

    fn announce(&self, principal: Option<Principal>) {
        self.current.send_replace(principal);
    }
}

#[async_trait]
impl IdentityProvider for SqliteIdentityProvider {
    async fn sign_in(&self, email: &str, password: &str) -> AuthResult<Principal> {
        let email = normalize_email(email);
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::MissingFields);
        }
        ensure_email_valid(&email)?;

        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, password_hash, display_name, avatar_url
             FROM users WHERE email = ?",
        )
        .bind(&email)
        .fetch_optional(&*self.db)
        .await?
        .ok_or(AuthError::UserNotFound)?;

        verify_password(password, &row.password_hash)?;

        let principal = Principal::from(row);
        info!(user = %principal.id, "signed in");
        self.announce(Some(principal.clone()));
        Ok(principal)
    }

    async fn sign_up(&self, email: &str, password: &str, display_name: &str) -> AuthResult<Principal> {
        let email = normalize_email(email);
        let display_name = display_name.trim();
        if email.is_empty() || password.is_empty() || display_name.is_empty() {
            return Err(AuthError::MissingFields);
        }
        ensure_email_valid(&email)?;
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AuthError::WeakPassword);
        }

        let password_hash = hash_password(password)?;
        let principal = Principal {
            id: Uuid::new_v4().to_string(),
            email,
            display_name: Some(display_name.to_string()),
            avatar_url: None,
        };

        match sqlx::query(
            "INSERT INTO users (id, email, password_hash, display_name, avatar_url, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&principal.id)
        .bind(&principal.email)
        .bind(&password_hash)
        .bind(&principal.display_name)
        .bind(&principal.avatar_url)
        .bind(Utc::now())
        .execute(&*self.db)
        .await
        {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => return Err(AuthError::EmailAlreadyInUse),
            Err(err) => return Err(AuthError::Sqlx(err)),
        }

        info!(user = %principal.id, "account created");
        self.announce(Some(principal.clone()));
        Ok(principal)
    }

    async fn sign_in_with_provider(&self, provider: &str) -> AuthResult<Principal> {
        warn!(provider, "federated sign-in requested but not enabled");
        Err(AuthError::ProviderNotEnabled(provider.to_string()))
    }

    async fn sign_out(&self) -> AuthResult<()> {
        if let Some(principal) = self.current() {
            info!(user = %principal.id, "signed out");
        }
        self.announce(None);
        Ok(())
    }

    fn current(&self) -> Option<Principal> {
        self.current.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<Principal>> {
        self.current.subscribe()
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// Loose shape check: `local@domain.tld`, no whitespace.
fn ensure_email_valid(email: &str) -> AuthResult<()> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain
                    .split_once('.')
                    .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(AuthError::InvalidEmail)
    }
}

fn hash_password(password: &str) -> AuthResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hash(e.to_string()))
}

fn verify_password(password: &str, hash: &str) -> AuthResult<()> {
    let parsed = PasswordHash::new(hash).map_err(|e| AuthError::Hash(e.to_string()))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| AuthError::WrongPassword)
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
