//! Account activation guard
//!
//! Decides activation attempts and enforces the lockout policy: every attempt
//! costs one of five tries, the last failed try blocks the account, and a
//! blocked account stays blocked until the expiry sweep reclaims it.
//!
//! Each attempt is one compare-and-swap write keyed on the record version.
//! A concurrent writer forces a re-read and a fresh evaluation, so two
//! attempts on the same account never both spend the same try.

pub mod code;
pub mod transition;

pub use code::generate_activation_code;
pub use transition::{Transition, evaluate};

use crate::config::RetryPolicy;
use crate::core::{AccountId, AccountView, PeekoError};
use crate::storage::AccountStore;
use chrono::{DateTime, Duration as TimeDelta, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Render an unblock instant the way clients display it, e.g. `10/19/2026, 3:04 PM` (UTC).
pub fn format_unblock_time(at: &DateTime<Utc>) -> String {
    at.format("%m/%d/%Y, %-I:%M %p").to_string()
}

fn incorrect_code_message(blocked: &bool) -> &'static str {
    if *blocked {
        "You used all your activation attempts, email and username will be blocked from registration for 24 hours"
    } else {
        "Incorrect activation code"
    }
}

#[derive(Error, Debug)]
pub enum ActivationError {
    /// No account is bound to the caller's session.
    #[error("User not found")]
    Unauthenticated,

    #[error("Email and username blocked from registration until {}", format_unblock_time(.unblock_at))]
    Blocked { unblock_at: DateTime<Utc> },

    #[error("Invalid request. Account already activated")]
    AlreadyActivated,

    /// `blocked` is set when this very attempt used up the last try.
    #[error("{}", incorrect_code_message(.blocked))]
    IncorrectCode { attempts_left: u8, blocked: bool },

    #[error(transparent)]
    Internal(#[from] PeekoError),
}

impl ActivationError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Internal(_) => 500,
            _ => 400,
        }
    }

    /// Remaining tries worth showing to the user, if any
    pub fn attempts_left(&self) -> Option<u8> {
        match self {
            Self::Blocked { .. } => Some(0),
            Self::IncorrectCode { attempts_left, .. } => Some(*attempts_left),
            _ => None,
        }
    }

    pub fn unblock_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Blocked { unblock_at } => Some(*unblock_at),
            _ => None,
        }
    }
}

/// Successful activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activated {
    pub account: AccountView,
}

/// Response body for an activation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts_left: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unblock_time: Option<String>,
}

impl ActivationReport {
    pub fn from_result(result: &Result<Activated, ActivationError>) -> Self {
        match result {
            Ok(_) => Self {
                success: true,
                error: None,
                attempts_left: None,
                unblock_time: None,
            },
            Err(ActivationError::Internal(_)) => Self {
                success: false,
                error: Some("Internal server error".to_string()),
                attempts_left: None,
                unblock_time: None,
            },
            Err(err) => Self {
                success: false,
                error: Some(err.to_string()),
                attempts_left: err.attempts_left(),
                unblock_time: err.unblock_at().as_ref().map(format_unblock_time),
            },
        }
    }
}

/// `at + window`, saturating at the latest representable instant.
fn release_time(at: DateTime<Utc>, window: TimeDelta) -> DateTime<Utc> {
    at.checked_add_signed(window).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub struct ActivationGuard {
    store: Arc<dyn AccountStore>,
    block_retention: TimeDelta,
    abandoned_after: TimeDelta,
    retry: RetryPolicy,
}

impl ActivationGuard {
    pub fn new(store: Arc<dyn AccountStore>, block_retention: TimeDelta, retry: RetryPolicy) -> Self {
        Self {
            store,
            block_retention,
            abandoned_after: TimeDelta::minutes(10),
            retry,
        }
    }

    /// Abandonment window used to date the release of exhausted records
    pub fn abandoned_after(mut self, window: TimeDelta) -> Self {
        self.abandoned_after = window;
        self
    }

    /// Submit `given_code` for the account bound to the caller's session.
    pub async fn attempt(
        &self,
        session: Option<AccountId>,
        given_code: &str,
    ) -> Result<Activated, ActivationError> {
        let Some(account_id) = session else {
            return Err(ActivationError::Unauthenticated);
        };

        let max_attempts = self.retry.max_attempts.max(1);
        let mut write_attempt = 1u32;

        loop {
            let account = self
                .store
                .get(&account_id)
                .await?
                .ok_or(ActivationError::Unauthenticated)?;

            let (next, success) = match evaluate(&account.activation, given_code) {
                Transition::RejectBlocked => {
                    return Err(ActivationError::Blocked {
                        unblock_at: release_time(account.updated_at, self.block_retention),
                    });
                }
                // never flagged, so the abandonment rule is what frees it
                Transition::RejectExhausted => {
                    return Err(ActivationError::Blocked {
                        unblock_at: release_time(account.created_at, self.abandoned_after),
                    });
                }
                Transition::RejectAlreadyActivated => return Err(ActivationError::AlreadyActivated),
                Transition::Apply { next, success } => (next, success),
            };

            let expected_version = account.version;
            let mut candidate = account;
            candidate.activation = next;

            match self.store.update_if_version(candidate, expected_version).await {
                Ok(stored) => {
                    let state = &stored.activation;
                    if success {
                        info!(account_id = %account_id, "account activated");
                        return Ok(Activated { account: stored.view() });
                    }
                    if state.blocked {
                        warn!(account_id = %account_id, "activation attempts exhausted, account blocked");
                    } else {
                        debug!(
                            account_id = %account_id,
                            attempts_left = state.attempts_left,
                            "incorrect activation code"
                        );
                    }
                    return Err(ActivationError::IncorrectCode {
                        attempts_left: state.attempts_left,
                        blocked: state.blocked,
                    });
                }
                Err(err @ PeekoError::VersionConflict { .. }) if write_attempt < max_attempts => {
                    let backoff_ms = self.retry.backoff_ms(write_attempt);
                    warn!(
                        account_id = %account_id,
                        attempt = write_attempt,
                        max_attempts,
                        backoff_ms,
                        error = %err,
                        "activation write lost a race, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    write_attempt += 1;
                }
                Err(err) => return Err(ActivationError::Internal(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Account, ActivationState, Clock, ManualClock};
    use crate::storage::InMemoryAccountStore;
    use chrono::TimeZone;

    async fn setup(code: &str) -> (Arc<ManualClock>, Arc<InMemoryAccountStore>, ActivationGuard, AccountId) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(InMemoryAccountStore::new(clock.clone()));
        let account = store
            .insert(Account::new("zoe", "zoe@example.com", "hash", ActivationState::issued(code, false)))
            .await
            .unwrap();
        let guard = ActivationGuard::new(store.clone(), TimeDelta::hours(24), RetryPolicy::default());
        (clock, store, guard, account.id)
    }

    #[tokio::test]
    async fn test_missing_session_is_unauthenticated() {
        let (_, _, guard, _) = setup("123456").await;
        let err = guard.attempt(None, "123456").await.unwrap_err();
        assert!(matches!(err, ActivationError::Unauthenticated));

        let err = guard.attempt(Some(AccountId::new()), "123456").await.unwrap_err();
        assert!(matches!(err, ActivationError::Unauthenticated));
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_success() {
        let (_, store, guard, id) = setup("123456").await;
        let activated = guard.attempt(Some(id), "123456").await.unwrap();
        assert!(activated.account.activated);

        let stored = store.get(&id).await.unwrap().unwrap();
        assert!(stored.activation.activated);
        assert_eq!(stored.activation.attempts_left, 4);
    }

    #[tokio::test]
    async fn test_block_reports_unblock_time() {
        let (clock, store, guard, id) = setup("123456").await;
        for _ in 0..4 {
            guard.attempt(Some(id), "000000").await.unwrap_err();
        }
        clock.advance(TimeDelta::minutes(3));
        let err = guard.attempt(Some(id), "000000").await.unwrap_err();
        assert!(matches!(err, ActivationError::IncorrectCode { attempts_left: 0, blocked: true }));
        assert!(err.to_string().contains("used all your activation attempts"));

        let blocked_at = store.get(&id).await.unwrap().unwrap().updated_at;
        assert_eq!(blocked_at, clock.now());

        clock.advance(TimeDelta::hours(1));
        let err = guard.attempt(Some(id), "123456").await.unwrap_err();
        assert_eq!(err.unblock_at(), Some(blocked_at + TimeDelta::hours(24)));
        assert_eq!(err.attempts_left(), Some(0));
    }

    #[tokio::test]
    async fn test_huge_retention_saturates_unblock_time() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(InMemoryAccountStore::new(clock.clone()));
        let mut state = ActivationState::issued("123456", false);
        state.attempts_left = 0;
        state.blocked = true;
        let account = store
            .insert(Account::new("max", "max@example.com", "hash", state))
            .await
            .unwrap();

        let guard = ActivationGuard::new(store, TimeDelta::seconds(9_000_000_000_000), RetryPolicy::default());
        let err = guard.attempt(Some(account.id), "123456").await.unwrap_err();
        assert_eq!(err.unblock_at(), Some(DateTime::<Utc>::MAX_UTC));
    }

    #[test]
    fn test_format_unblock_time() {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 15, 4, 0).unwrap();
        assert_eq!(format_unblock_time(&at), "10/19/2026, 3:04 PM");
        let morning = Utc.with_ymd_and_hms(2026, 1, 2, 0, 30, 0).unwrap();
        assert_eq!(format_unblock_time(&morning), "01/02/2026, 12:30 AM");
    }

    #[test]
    fn test_report_shapes() {
        let already: Result<Activated, ActivationError> = Err(ActivationError::AlreadyActivated);
        let report = ActivationReport::from_result(&already);
        assert!(!report.success);
        assert_eq!(report.error.as_deref(), Some("Invalid request. Account already activated"));
        assert!(report.attempts_left.is_none());

        let wrong = Err(ActivationError::IncorrectCode { attempts_left: 2, blocked: false });
        let report = ActivationReport::from_result(&wrong);
        assert_eq!(report.error.as_deref(), Some("Incorrect activation code"));
        assert_eq!(report.attempts_left, Some(2));

        let internal = Err(ActivationError::Internal(PeekoError::AccountNotFound("x".into())));
        let report = ActivationReport::from_result(&internal);
        assert_eq!(report.error.as_deref(), Some("Internal server error"));
    }
}
