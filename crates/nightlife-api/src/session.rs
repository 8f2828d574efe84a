use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use chrono::{DateTime, Utc};
use rand::RngCore;
use tokio::sync::RwLock;
use tracing::{debug, info};

use nightlife_types::models::UserSummary;

const TOKEN_BYTES: usize = 32;

struct SessionEntry {
    user: UserSummary,
    expires_at: DateTime<Utc>,
}

/// Process-wide session table: opaque token -> user.
///
/// Created once at server start and shared by handle. Several sessions per
/// user may coexist; they are not coordinated.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<SessionStoreInner>,
}

struct SessionStoreInner {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    ttl: chrono::Duration,
}

impl SessionStore {
    pub fn new(ttl: chrono::Duration) -> Self {
        Self {
            inner: Arc::new(SessionStoreInner {
                sessions: RwLock::new(HashMap::new()),
                ttl,
            }),
        }
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.inner.ttl
    }

    /// Open a new session for `user` and return its token.
    pub async fn create(&self, user: UserSummary) -> String {
        let token = generate_token();
        let expires_at = Utc::now() + self.inner.ttl;
        debug!("Session opened for user {}", user.id);
        self.inner
            .sessions
            .write()
            .await
            .insert(token.clone(), SessionEntry { user, expires_at });
        token
    }

    /// The user behind `token`, if the session exists and has not expired.
    /// Expired entries are dropped on the way out.
    pub async fn lookup(&self, token: &str) -> Option<UserSummary> {
        let now = Utc::now();
        {
            let sessions = self.inner.sessions.read().await;
            match sessions.get(token) {
                Some(entry) if entry.expires_at > now => return Some(entry.user.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut sessions = self.inner.sessions.write().await;
        if sessions.get(token).is_some_and(|entry| entry.expires_at <= now) {
            sessions.remove(token);
        }
        None
    }

    /// Returns true if a live session was removed. Unknown tokens are fine.
    pub async fn invalidate(&self, token: &str) -> bool {
        self.inner.sessions.write().await.remove(token).is_some()
    }

    /// Drop every expired session. Returns how many went.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.inner.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| entry.expires_at > now);
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Background task that prunes expired sessions on an interval.
pub async fn run_expiry_loop(store: SessionStore, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        interval.tick().await;

        let count = store.purge_expired().await;
        if count > 0 {
            info!("Session sweep: pruned {} expired sessions", count);
        }
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    B64.encode(bytes)
}
