use std::sync::{Arc, LazyLock};

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use rand_core::OsRng;
use tracing::{debug, error, info};
use uuid::Uuid;

use nightlife_db::Database;
use nightlife_db::models::{InsertOutcome, UserRow};
use nightlife_types::models::{Identity, UserSummary};

use crate::error::{ApiError, ApiResult};
use crate::session::SessionStore;
use crate::storage;

pub const MAX_USERNAME_LEN: usize = 32;
pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_PASSWORD_LEN: usize = 128;

const BAD_CREDENTIALS: &str = "Incorrect username or password.";
const USERNAME_TAKEN: &str = "Username already exists.";

/// Verified against when the username is unknown, so both failures cost one
/// Argon2 verification.
static DUMMY_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| hash_password("nightlife-unknown-user").ok());

/// Verifies credentials and owns the mapping from session token to caller.
#[derive(Clone)]
pub struct Authenticator {
    db: Arc<Database>,
    sessions: SessionStore,
}

impl Authenticator {
    pub fn new(db: Arc<Database>, sessions: SessionStore) -> Self {
        Self { db, sessions }
    }

    /// Create an account. Only the Argon2id hash of `password` is stored.
    ///
    /// The lookup before the insert only exists to fail early; two racing
    /// registrations are settled by the UNIQUE constraint on `username`.
    pub async fn register(&self, username: &str, password: &str) -> ApiResult<UserSummary> {
        let username = validate_username(username)?;
        validate_password(password)?;

        let name = username.clone();
        let existing = storage::run(&self.db, "register.lookup", move |db| {
            db.get_user_by_username(&name)
        })
        .await?;
        if existing.is_some() {
            return Err(ApiError::Conflict(USERNAME_TAKEN.into()));
        }

        let plaintext = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&plaintext))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error in register.hash: {}", e);
                ApiError::Internal("Error registering user.".into())
            })??;

        let user_id = Uuid::new_v4();
        let id = user_id.to_string();
        let name = username.clone();
        let outcome = storage::run(&self.db, "register.insert", move |db| {
            db.create_user(&id, &name, &password_hash)
        })
        .await?;

        match outcome {
            InsertOutcome::Inserted => {
                info!("Registered user {} ({})", username, user_id);
                Ok(UserSummary { id: user_id, username })
            }
            InsertOutcome::Duplicate => {
                debug!("Registration for {} lost the uniqueness race", username);
                Err(ApiError::Conflict(USERNAME_TAKEN.into()))
            }
        }
    }

    /// Check credentials and open a session. Returns the session token.
    ///
    /// Unknown usernames and wrong passwords fail identically.
    pub async fn login(&self, username: &str, password: &str) -> ApiResult<(String, UserSummary)> {
        let username = username.trim().to_string();
        if username.is_empty() || password.is_empty() {
            return Err(ApiError::invalid_input("Username and password are required."));
        }

        let name = username.clone();
        let user = storage::run(&self.db, "login.lookup", move |db| db.get_user_by_username(&name)).await?;

        let plaintext = password.to_string();
        let stored_hash = user.as_ref().map(|u| u.password.clone());
        let matches = tokio::task::spawn_blocking(move || check_credentials(&plaintext, stored_hash.as_deref()))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error in login.verify: {}", e);
                ApiError::Internal("Internal server error.".into())
            })??;

        let user = match user {
            Some(user) if matches => user,
            Some(user) => {
                debug!("Login rejected: wrong password for {}", user.username);
                return Err(ApiError::unauthorized(BAD_CREDENTIALS));
            }
            None => {
                debug!("Login rejected: no user {}", username);
                return Err(ApiError::unauthorized(BAD_CREDENTIALS));
            }
        };

        let summary = summarize(&user)?;
        let token = self.sessions.create(summary.clone()).await;
        info!("User {} logged in", summary.username);
        Ok((token, summary))
    }

    /// Invalidate a session. Missing or already-dead tokens are not an error.
    /// Returns true if a live session was closed.
    pub async fn logout(&self, token: Option<&str>) -> bool {
        match token {
            Some(token) => self.sessions.invalidate(token).await,
            None => false,
        }
    }

    /// Never fails: anything other than a live session is `Anonymous`.
    pub async fn resolve_caller(&self, token: Option<&str>) -> Identity {
        let Some(token) = token else {
            return Identity::Anonymous;
        };

        match self.sessions.lookup(token).await {
            Some(user) => Identity::Authenticated(user),
            None => Identity::Anonymous,
        }
    }

    pub fn require_authenticated(identity: &Identity) -> ApiResult<UserSummary> {
        identity.user().cloned().ok_or_else(ApiError::login_required)
    }

    pub async fn last_search_location(&self, user: &UserSummary) -> ApiResult<String> {
        let id = user.id.to_string();
        let location = storage::run(&self.db, "last_location.get", move |db| {
            db.get_last_search_location(&id)
        })
        .await?;

        // Users are never deleted, but a stale id still answers 401, not 503.
        location.ok_or_else(ApiError::login_required)
    }
}

fn validate_username(raw: &str) -> ApiResult<String> {
    let username = raw.trim();
    if username.is_empty() {
        return Err(ApiError::invalid_input("Username and password are required."));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(ApiError::invalid_input(format!(
            "Username must be at most {} characters.",
            MAX_USERNAME_LEN
        )));
    }
    Ok(username.to_string())
}

fn validate_password(password: &str) -> ApiResult<()> {
    if password.is_empty() {
        return Err(ApiError::invalid_input("Username and password are required."));
    }
    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN {
        return Err(ApiError::invalid_input(format!(
            "Password must be at least {} characters.",
            MIN_PASSWORD_LEN
        )));
    }
    if len > MAX_PASSWORD_LEN {
        return Err(ApiError::invalid_input(format!(
            "Password must be at most {} characters.",
            MAX_PASSWORD_LEN
        )));
    }
    Ok(())
}

fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("Password hashing failed: {}", e);
            ApiError::Internal("Error registering user.".into())
        })
}

/// Without a stored hash the password is still verified, against
/// `DUMMY_HASH`, and the answer is always false.
fn check_credentials(password: &str, stored_hash: Option<&str>) -> ApiResult<bool> {
    match stored_hash {
        Some(hash) => verify_password(password, hash),
        None => {
            if let Some(dummy) = DUMMY_HASH.as_deref() {
                verify_password(password, dummy)?;
            }
            Ok(false)
        }
    }
}

fn verify_password(password: &str, stored_hash: &str) -> ApiResult<bool> {
    let parsed = PasswordHash::new(stored_hash).map_err(|e| {
        error!("Stored password hash is unreadable: {}", e);
        ApiError::Internal("Internal server error.".into())
    })?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn summarize(row: &UserRow) -> ApiResult<UserSummary> {
    let id: Uuid = row.id.parse().map_err(|e| {
        error!("Corrupt user id '{}': {}", row.id, e);
        ApiError::Internal("Internal server error.".into())
    })?;

    Ok(UserSummary {
        id,
        username: row.username.clone(),
    })
}
