use crate::core::AccountId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Opaque bearer token handed to a client after register / sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionToken {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Token to account binding. A token may outlive its account; it still
/// resolves, and the store lookup then finds no record.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionToken, AccountId>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(&self, account_id: AccountId) -> SessionToken {
        let token = SessionToken::generate();
        self.sessions.write().await.insert(token.clone(), account_id);
        token
    }

    pub async fn resolve(&self, token: &SessionToken) -> Option<AccountId> {
        self.sessions.read().await.get(token).copied()
    }

    /// Drop one session; true if it existed
    pub async fn close(&self, token: &SessionToken) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }

    /// Drop every session of an account, returning how many there were
    pub async fn close_all(&self, account_id: &AccountId) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, owner| owner != account_id);
        before - sessions.len()
    }

    /// Drop every session belonging to any of `account_ids`
    pub async fn close_accounts(&self, account_ids: &[AccountId]) -> usize {
        if account_ids.is_empty() {
            return 0;
        }
        let gone: HashSet<&AccountId> = account_ids.iter().collect();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, owner| !gone.contains(owner));
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
