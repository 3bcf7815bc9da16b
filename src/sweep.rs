//! Expiry sweep
//!
//! Reclaims accounts that never finished activation within the abandonment
//! window, and blocked accounts whose retention window has passed, so their
//! username and email become available again.

use crate::auth::SessionRegistry;
use crate::core::{AccountId, Clock, Result};
use crate::storage::{AccountFilter, AccountStore};
use chrono::{DateTime, Duration as TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepPolicy {
    pub interval: Duration,
    pub abandoned_after: TimeDelta,
    pub block_retention: TimeDelta,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            abandoned_after: TimeDelta::minutes(10),
            block_retention: TimeDelta::hours(24),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: usize,
    /// Ids of the reclaimed accounts
    pub reclaimed: Vec<AccountId>,
    /// Sessions dropped along with them
    pub sessions_closed: usize,
    pub ran_at: DateTime<Utc>,
}

/// `now - window`; negative windows count as zero and a window reaching
/// past the representable range matches nothing.
fn cutoff(now: DateTime<Utc>, window: TimeDelta) -> DateTime<Utc> {
    now.checked_sub_signed(window.max(TimeDelta::zero()))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub struct ExpirySweep {
    store: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
    policy: SweepPolicy,
    sessions: Option<Arc<SessionRegistry>>,
}

impl ExpirySweep {
    pub fn new(store: Arc<dyn AccountStore>, clock: Arc<dyn Clock>, policy: SweepPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
            sessions: None,
        }
    }

    /// Also close the sessions of every account the sweep reclaims
    pub fn with_sessions(mut self, sessions: Arc<SessionRegistry>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn policy(&self) -> &SweepPolicy {
        &self.policy
    }

    /// The delete predicate as of `now`
    pub fn filter_at(&self, now: DateTime<Utc>) -> AccountFilter {
        AccountFilter::AnyOf(vec![
            AccountFilter::Abandoned {
                created_at_or_before: cutoff(now, self.policy.abandoned_after),
            },
            AccountFilter::ExpiredBlock {
                updated_at_or_before: cutoff(now, self.policy.block_retention),
            },
        ])
    }

    /// One pass: delete everything the predicate matches right now.
    pub async fn run_once(&self) -> Result<SweepReport> {
        let ran_at = self.clock.now();
        let reclaimed = self.store.delete_where(&self.filter_at(ran_at)).await?;
        if reclaimed.is_empty() {
            debug!("expiry sweep found nothing to reclaim");
            return Ok(SweepReport {
                deleted: 0,
                reclaimed,
                sessions_closed: 0,
                ran_at,
            });
        }

        let sessions_closed = match &self.sessions {
            Some(sessions) => sessions.close_accounts(&reclaimed).await,
            None => 0,
        };
        info!(deleted = reclaimed.len(), sessions_closed, "expiry sweep reclaimed accounts");

        Ok(SweepReport {
            deleted: reclaimed.len(),
            reclaimed,
            sessions_closed,
            ran_at,
        })
    }

    /// Run on the policy interval until `shutdown` flips to true or its sender drops.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.policy.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = self.policy.interval.as_millis() as u64, "expiry sweep started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once().await {
                        warn!(error = %err, "expiry sweep failed, retrying next tick");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("expiry sweep stopped");
    }
}
