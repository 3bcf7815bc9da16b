use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Number of activation attempts a fresh account starts with.
pub const ACTIVATION_ATTEMPTS: u8 = 5;

/// Opaque account identifier, assigned at creation and never changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(Uuid);

impl AccountId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccountId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Client device details reported at registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub fingerprint: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub os_version: Option<String>,
    pub ip_address: Option<String>,
}

/// Activation block of an account record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationState {
    pub activated: bool,
    pub activation_code: String,
    pub attempts_left: u8,
    pub blocked: bool,
}

impl ActivationState {
    /// State of a freshly registered account.
    pub fn issued(activation_code: impl Into<String>, activated: bool) -> Self {
        Self {
            activated,
            activation_code: activation_code.into(),
            attempts_left: ACTIVATION_ATTEMPTS,
            blocked: false,
        }
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        !self.activated && !self.blocked
    }
}

/// Registered user account as held by the store.
///
/// `created_at`, `updated_at` and `version` belong to the store: whatever a
/// caller puts there is overwritten on insert and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub device_info: Option<DeviceInfo>,
    pub activation: ActivationState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Account {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password_hash: impl Into<String>,
        activation: ActivationState,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: AccountId::new(),
            username: username.into(),
            email: email.into(),
            password_hash: password_hash.into(),
            device_info: None,
            activation,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn with_device_info(mut self, device_info: DeviceInfo) -> Self {
        self.device_info = Some(device_info);
        self
    }

    pub fn view(&self) -> AccountView {
        AccountView::from(self)
    }
}

/// Public projection of an account: no password hash, no activation code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: AccountId,
    pub username: String,
    pub email: String,
    pub activated: bool,
    pub blocked: bool,
    pub attempts_left: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            username: account.username.clone(),
            email: account.email.clone(),
            activated: account.activation.activated,
            blocked: account.activation.blocked,
            attempts_left: account.activation.attempts_left,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issued_state() {
        let state = ActivationState::issued("123456", false);
        assert_eq!(state.attempts_left, 5);
        assert!(state.is_pending());
        assert!(!state.blocked);
    }

    #[test]
    fn test_account_id_round_trips_through_display() {
        let id = AccountId::new();
        let parsed: AccountId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<AccountId>().is_err());
    }

    #[test]
    fn test_view_hides_secrets() {
        let account = Account::new("alice", "alice@example.com", "hash", ActivationState::issued("654321", false));
        let view = account.view();
        assert_eq!(view.username, "alice");
        assert_eq!(view.attempts_left, 5);
        // AccountView has no field that could carry the hash or the code
        let debug = format!("{view:?}");
        assert!(!debug.contains("654321"));
        assert!(!debug.contains("hash"));
    }
}
