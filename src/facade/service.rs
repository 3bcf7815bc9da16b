use crate::activation::{Activated, ActivationError, ActivationGuard, ActivationReport};
use crate::auth::{
    ActivationMailer, AuthManager, LogMailer, RegisterRequest, Registration, SessionToken, SignedIn,
};
use crate::config::GuardConfig;
use crate::core::{AccountView, Clock, DeviceInfo, Result, SystemClock};
use crate::storage::{AccountStore, InMemoryAccountStore};
use crate::sweep::{ExpirySweep, SweepPolicy, SweepReport};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Build the store the configuration asks for: snapshot-backed when a data
/// directory is set, purely in memory otherwise.
pub fn open_store(config: &GuardConfig, clock: Arc<dyn Clock>) -> Result<Arc<InMemoryAccountStore>> {
    let store = match &config.data_dir {
        Some(dir) => {
            InMemoryAccountStore::open_with(dir, config.durability, config.snapshot_every_ops, clock)?
        }
        None => InMemoryAccountStore::new(clock),
    };
    Ok(Arc::new(store))
}

/// Running sweep task plus the switch that stops it
pub struct SweepHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Signal the sweep and wait for the loop to exit
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            error!(error = %err, "expiry sweep task ended abnormally");
        }
    }
}

/// One handle on the whole account lifecycle: registration, activation,
/// sessions and the expiry sweep, all sharing one store and one clock.
pub struct AccountService {
    config: GuardConfig,
    store: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
    auth: AuthManager,
    guard: ActivationGuard,
}

impl AccountService {
    /// Service on the system clock with a logging mailer
    pub fn from_config(config: GuardConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = open_store(&config, clock.clone())?;
        Ok(Self::with_parts(config, store, clock, Arc::new(LogMailer)))
    }

    pub fn with_parts(
        config: GuardConfig,
        store: Arc<dyn AccountStore>,
        clock: Arc<dyn Clock>,
        mailer: Arc<dyn ActivationMailer>,
    ) -> Self {
        let auth = AuthManager::new(
            store.clone(),
            mailer,
            config.bcrypt_cost,
            config.dev_code.clone(),
            config.retry,
        );
        let guard = ActivationGuard::new(store.clone(), config.block_retention, config.retry)
            .abandoned_after(config.abandoned_after);

        Self {
            config,
            store,
            clock,
            auth,
            guard,
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    pub fn auth(&self) -> &AuthManager {
        &self.auth
    }

    pub fn guard(&self) -> &ActivationGuard {
        &self.guard
    }

    pub async fn register(&self, request: RegisterRequest) -> Result<Registration> {
        self.auth.register(request).await
    }

    pub async fn sign_in(&self, credential: &str, password: &str) -> Result<SignedIn> {
        self.auth.sign_in(credential, password).await
    }

    pub async fn sign_out(&self, token: &SessionToken) -> bool {
        self.auth.sign_out(token).await
    }

    /// Submit an activation code on behalf of whoever holds `token`.
    pub async fn activate(
        &self,
        token: Option<&SessionToken>,
        code: &str,
    ) -> std::result::Result<Activated, ActivationError> {
        let session = match token {
            Some(token) => self.auth.resolve(token).await,
            None => None,
        };
        self.guard.attempt(session, code).await
    }

    /// Same as [`activate`](Self::activate), folded into the client response shape
    pub async fn activate_report(&self, token: Option<&SessionToken>, code: &str) -> ActivationReport {
        ActivationReport::from_result(&self.activate(token, code).await)
    }

    pub async fn delete_account(&self, token: &SessionToken) -> Result<AccountView> {
        self.auth.delete_account(token).await
    }

    pub async fn update_ip_address(&self, token: &SessionToken, ip_address: &str) -> Result<DeviceInfo> {
        self.auth.update_ip_address(token, ip_address).await
    }

    fn sweep(&self) -> ExpirySweep {
        ExpirySweep::new(
            self.store.clone(),
            self.clock.clone(),
            SweepPolicy {
                interval: self.config.sweep_interval,
                abandoned_after: self.config.abandoned_after,
                block_retention: self.config.block_retention,
            },
        )
        .with_sessions(self.auth.sessions().clone())
    }

    pub async fn sweep_once(&self) -> Result<SweepReport> {
        self.sweep().run_once().await
    }

    pub fn start_sweep(&self) -> SweepHandle {
        let (shutdown, rx) = watch::channel(false);
        let task = self.sweep().spawn(rx);
        SweepHandle { shutdown, task }
    }

    /// Flush pending state to durable storage
    pub async fn shutdown(&self) -> Result<()> {
        self.store.checkpoint().await?;
        info!("account service stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::RecordingMailer;
    use crate::core::ManualClock;
    use chrono::Duration as TimeDelta;

    fn service() -> (Arc<ManualClock>, Arc<RecordingMailer>, AccountService) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(InMemoryAccountStore::new(clock.clone()));
        let mailer = Arc::new(RecordingMailer::new());
        let config = GuardConfig::new().bcrypt_cost(4);
        let service = AccountService::with_parts(config, store, clock.clone(), mailer.clone());
        (clock, mailer, service)
    }

    #[tokio::test]
    async fn test_register_then_activate() {
        let (_, mailer, service) = service();
        let registration = service
            .register(RegisterRequest::new("gina", "gina@example.com", "password123"))
            .await
            .unwrap();
        let code = mailer.last_code_for("gina@example.com").await.unwrap();

        let activated = service.activate(Some(&registration.token), &code).await.unwrap();
        assert!(activated.account.activated);
    }

    #[tokio::test]
    async fn test_activate_without_session() {
        let (_, _, service) = service();
        let report = service.activate_report(None, "123456").await;
        assert!(!report.success);
        assert_eq!(report.error.as_deref(), Some("User not found"));

        let stale = SessionToken::from("stale");
        let err = service.activate(Some(&stale), "123456").await.unwrap_err();
        assert!(matches!(err, ActivationError::Unauthenticated));
    }

    #[tokio::test]
    async fn test_sweep_once_reclaims_abandoned() {
        let (clock, _, service) = service();
        service
            .register(RegisterRequest::new("hank", "hank@example.com", "password123"))
            .await
            .unwrap();

        clock.advance(TimeDelta::minutes(11));
        let report = service.sweep_once().await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.sessions_closed, 1);
        assert!(service.auth().sessions().is_empty().await);

        service
            .register(RegisterRequest::new("hank", "hank@example.com", "password123"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_open_store_with_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = GuardConfig::new().data_dir(dir.path());
        let store = open_store(&config, Arc::new(SystemClock)).unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_start_and_stop_sweep() {
        let (_, _, service) = service();
        let handle = service.start_sweep();
        handle.stop().await;
        service.shutdown().await.unwrap();
    }
}
