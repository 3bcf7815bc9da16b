//! Registration, sign-in and session handling
//!
//! The activation guard never talks to this module; it only receives the
//! account id a session resolves to.

pub mod mailer;
pub mod session;
pub mod validation;

pub use mailer::{ActivationMailer, LogMailer, RecordingMailer, SentCode};
pub use session::{SessionRegistry, SessionToken};

use crate::activation::generate_activation_code;
use crate::config::RetryPolicy;
use crate::core::{Account, AccountId, AccountView, ActivationState, DeviceInfo, PeekoError, Result};
use crate::storage::AccountStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Developer shortcut carried on a registration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevActivation {
    pub password: String,
    /// Activate immediately; otherwise the code is mailed and also returned
    #[serde(default)]
    pub auto_activate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub device_info: Option<DeviceInfo>,
    #[serde(default)]
    pub dev_activation: Option<DevActivation>,
}

impl RegisterRequest {
    pub fn new(username: impl Into<String>, email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            device_info: None,
            dev_activation: None,
        }
    }

    pub fn device_info(mut self, device_info: DeviceInfo) -> Self {
        self.device_info = Some(device_info);
        self
    }

    pub fn dev_activation(mut self, password: impl Into<String>, auto_activate: bool) -> Self {
        self.dev_activation = Some(DevActivation {
            password: password.into(),
            auto_activate,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub account: AccountView,
    pub token: SessionToken,
    /// Only set for developer registrations that asked for the code back
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedIn {
    pub account: AccountView,
    pub token: SessionToken,
}

/// Account lifecycle around the activation guard
pub struct AuthManager {
    store: Arc<dyn AccountStore>,
    sessions: Arc<SessionRegistry>,
    mailer: Arc<dyn ActivationMailer>,
    bcrypt_cost: u32,
    dev_code: Option<String>,
    retry: RetryPolicy,
}

impl AuthManager {
    pub fn new(
        store: Arc<dyn AccountStore>,
        mailer: Arc<dyn ActivationMailer>,
        bcrypt_cost: u32,
        dev_code: Option<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            sessions: Arc::new(SessionRegistry::new()),
            mailer,
            bcrypt_cost,
            dev_code,
            retry,
        }
    }

    /// Shared with the expiry sweep, which closes sessions of reclaimed accounts
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Hashes a password with bcrypt off the async executor
    async fn hash_password(&self, password: &str) -> Result<String> {
        let password = password.to_string();
        let cost = self.bcrypt_cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|err| PeekoError::Hashing(err.to_string()))?
            .map_err(PeekoError::from)
    }

    /// Verifies a password against a bcrypt hash; malformed hashes never match
    async fn verify_password(password: &str, hash: &str) -> bool {
        let password = password.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash).unwrap_or(false))
            .await
            .unwrap_or(false)
    }

    fn is_dev_request(&self, dev_activation: Option<&DevActivation>) -> bool {
        match (&self.dev_code, dev_activation) {
            (Some(expected), Some(given)) => given.password == *expected,
            _ => false,
        }
    }

    /// Create an unactivated account, deliver its code and open a session.
    pub async fn register(&self, request: RegisterRequest) -> Result<Registration> {
        validation::validate_registration(&request.username, &request.email, &request.password)?;

        let dev_request = self.is_dev_request(request.dev_activation.as_ref());
        let auto_activate = dev_request
            && request
                .dev_activation
                .as_ref()
                .is_some_and(|dev| dev.auto_activate);

        let code = generate_activation_code();
        let password_hash = self.hash_password(&request.password).await?;

        let mut account = Account::new(
            request.username,
            request.email,
            password_hash,
            ActivationState::issued(code.clone(), auto_activate),
        );
        if let Some(device_info) = request.device_info {
            account = account.with_device_info(device_info);
        }

        let account = self.store.insert(account).await?;

        if !auto_activate {
            if let Err(err) = self
                .mailer
                .send_activation_code(&account.email, &account.username, &code)
                .await
            {
                warn!(account_id = %account.id, error = %err, "activation mail failed, rolling back registration");
                self.store.delete(&account.id).await?;
                return Err(err);
            }
        }

        let token = self.sessions.open(account.id).await;
        info!(account_id = %account.id, username = %account.username, dev = dev_request, "account registered");

        Ok(Registration {
            account: account.view(),
            token,
            activation_code: (dev_request && !auto_activate).then_some(code),
        })
    }

    /// Sign in by username or email
    pub async fn sign_in(&self, credential: &str, password: &str) -> Result<SignedIn> {
        let account = self
            .store
            .find_by_credential(credential)
            .await?
            .ok_or_else(|| PeekoError::InvalidCredentials("Username or email is incorrect".into()))?;

        if !Self::verify_password(password, &account.password_hash).await {
            return Err(PeekoError::InvalidCredentials("Password is incorrect".into()));
        }

        let token = self.sessions.open(account.id).await;
        info!(account_id = %account.id, "signed in");

        Ok(SignedIn {
            account: account.view(),
            token,
        })
    }

    /// Account id bound to a token, if the token is known
    pub async fn resolve(&self, token: &SessionToken) -> Option<AccountId> {
        self.sessions.resolve(token).await
    }

    /// Full record behind a token, if both still exist
    pub async fn current_account(&self, token: &SessionToken) -> Result<Option<Account>> {
        match self.sessions.resolve(token).await {
            Some(id) => self.store.get(&id).await,
            None => Ok(None),
        }
    }

    pub async fn sign_out(&self, token: &SessionToken) -> bool {
        self.sessions.close(token).await
    }

    /// Delete the caller's account and every session pointing at it
    pub async fn delete_account(&self, token: &SessionToken) -> Result<AccountView> {
        let id = self
            .sessions
            .resolve(token)
            .await
            .ok_or_else(|| PeekoError::Unauthorized("Unauthorized Action".into()))?;

        let deleted = self.store.delete(&id).await?;
        self.sessions.close_all(&id).await;

        let deleted = deleted.ok_or_else(|| PeekoError::Unauthorized("User not found".into()))?;
        info!(account_id = %id, "account deleted");
        Ok(deleted.view())
    }

    /// Record the caller's latest IP address
    pub async fn update_ip_address(&self, token: &SessionToken, ip_address: &str) -> Result<DeviceInfo> {
        let id = self
            .sessions
            .resolve(token)
            .await
            .ok_or_else(|| PeekoError::Unauthorized("Unauthorized Action".into()))?;

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            let mut account = self
                .store
                .get(&id)
                .await?
                .ok_or_else(|| PeekoError::Unauthorized("User not found".into()))?;

            let expected_version = account.version;
            account
                .device_info
                .get_or_insert_with(DeviceInfo::default)
                .ip_address = Some(ip_address.to_string());

            match self.store.update_if_version(account, expected_version).await {
                Ok(stored) => return Ok(stored.device_info.unwrap_or_default()),
                Err(PeekoError::VersionConflict { .. }) if attempt < max_attempts => {
                    tokio::time::sleep(Duration::from_millis(self.retry.backoff_ms(attempt))).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;
    use crate::storage::InMemoryAccountStore;

    // bcrypt's lowest cost, keeps the tests fast
    const TEST_COST: u32 = 4;

    struct FailingMailer;

    #[async_trait::async_trait]
    impl ActivationMailer for FailingMailer {
        async fn send_activation_code(&self, _: &str, _: &str, _: &str) -> Result<()> {
            Err(PeekoError::IoError("smtp down".into()))
        }
    }

    fn manager(dev_code: Option<&str>) -> (Arc<InMemoryAccountStore>, Arc<RecordingMailer>, AuthManager) {
        let store = Arc::new(InMemoryAccountStore::new(Arc::new(ManualClock::starting_now())));
        let mailer = Arc::new(RecordingMailer::new());
        let auth = AuthManager::new(
            store.clone(),
            mailer.clone(),
            TEST_COST,
            dev_code.map(str::to_string),
            RetryPolicy::default(),
        );
        (store, mailer, auth)
    }

    #[tokio::test]
    async fn test_register_mails_code_and_opens_session() {
        let (store, mailer, auth) = manager(None);

        let registration = auth
            .register(RegisterRequest::new("alice", "alice@example.com", "password123"))
            .await
            .unwrap();

        assert!(!registration.account.activated);
        assert_eq!(registration.account.attempts_left, 5);
        assert!(registration.activation_code.is_none());

        let code = mailer.last_code_for("alice@example.com").await.unwrap();
        let stored = store.get(&registration.account.id).await.unwrap().unwrap();
        assert_eq!(stored.activation.activation_code, code);
        assert_ne!(stored.password_hash, "password123");

        assert_eq!(auth.resolve(&registration.token).await, Some(stored.id));
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_input() {
        let (store, _, auth) = manager(None);
        let err = auth
            .register(RegisterRequest::new("bad-name", "x@example.com", "password123"))
            .await
            .unwrap_err();
        assert!(matches!(err, PeekoError::Validation(_)));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dev_activation() {
        let (_, mailer, auth) = manager(Some("devpass"));

        let auto = auth
            .register(RegisterRequest::new("auto", "auto@example.com", "password123").dev_activation("devpass", true))
            .await
            .unwrap();
        assert!(auto.account.activated);
        assert!(auto.activation_code.is_none());
        assert!(mailer.last_code_for("auto@example.com").await.is_none());

        let manual = auth
            .register(RegisterRequest::new("manual", "manual@example.com", "password123").dev_activation("devpass", false))
            .await
            .unwrap();
        assert!(!manual.account.activated);
        // code comes back in the response and is mailed as usual
        assert_eq!(manual.activation_code, mailer.last_code_for("manual@example.com").await);
        assert_eq!(manual.activation_code.as_deref().map(str::len), Some(6));

        let wrong = auth
            .register(RegisterRequest::new("wrong", "wrong@example.com", "password123").dev_activation("guess", true))
            .await
            .unwrap();
        assert!(!wrong.account.activated);
        assert!(wrong.activation_code.is_none());
        assert!(mailer.last_code_for("wrong@example.com").await.is_some());
    }

    #[tokio::test]
    async fn test_dev_activation_ignored_without_configured_code() {
        let (_, _, auth) = manager(None);
        let registration = auth
            .register(RegisterRequest::new("eve", "eve@example.com", "password123").dev_activation("", true))
            .await
            .unwrap();
        assert!(!registration.account.activated);
    }

    #[tokio::test]
    async fn test_failed_mail_rolls_back() {
        let store = Arc::new(InMemoryAccountStore::new(Arc::new(ManualClock::starting_now())));
        let auth = AuthManager::new(store.clone(), Arc::new(FailingMailer), TEST_COST, None, RetryPolicy::default());

        let err = auth
            .register(RegisterRequest::new("bob", "bob@example.com", "password123"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("smtp down"));
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(auth.sessions().is_empty().await);
    }

    #[tokio::test]
    async fn test_sign_in() {
        let (_, _, auth) = manager(None);
        auth.register(RegisterRequest::new("carol", "carol@example.com", "password123"))
            .await
            .unwrap();

        assert!(auth.sign_in("carol", "password123").await.is_ok());
        assert!(auth.sign_in("carol@example.com", "password123").await.is_ok());

        let err = auth.sign_in("nobody", "password123").await.unwrap_err();
        assert_eq!(err.to_string(), "Username or email is incorrect");
        let err = auth.sign_in("carol", "wrongpass").await.unwrap_err();
        assert_eq!(err.to_string(), "Password is incorrect");
    }

    #[tokio::test]
    async fn test_delete_account_closes_sessions() {
        let (store, _, auth) = manager(None);
        let registration = auth
            .register(RegisterRequest::new("dave", "dave@example.com", "password123"))
            .await
            .unwrap();
        let second = auth.sign_in("dave", "password123").await.unwrap();

        let deleted = auth.delete_account(&registration.token).await.unwrap();
        assert_eq!(deleted.username, "dave");
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(auth.resolve(&second.token).await.is_none());

        let err = auth.delete_account(&registration.token).await.unwrap_err();
        assert!(matches!(err, PeekoError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_update_ip_address() {
        let (store, _, auth) = manager(None);
        let registration = auth
            .register(
                RegisterRequest::new("fred", "fred@example.com", "password123").device_info(DeviceInfo {
                    brand: Some("Pixel".into()),
                    ..DeviceInfo::default()
                }),
            )
            .await
            .unwrap();

        let info = auth.update_ip_address(&registration.token, "10.0.0.7").await.unwrap();
        assert_eq!(info.ip_address.as_deref(), Some("10.0.0.7"));
        assert_eq!(info.brand.as_deref(), Some("Pixel"));

        let stored = store.get(&registration.account.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
    }
}
