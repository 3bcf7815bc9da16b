use crate::storage::DurabilityMode;
use anyhow::{Context, Result};
use chrono::Duration as TimeDelta;
use std::path::PathBuf;
use std::time::Duration;

/// Longest abandonment or block-retention window accepted (one year).
pub const MAX_WINDOW_SECS: i64 = 365 * 24 * 60 * 60;

/// Pull a sweep window into `1s..=MAX_WINDOW_SECS`.
fn clamp_window(window: TimeDelta) -> TimeDelta {
    window.clamp(TimeDelta::seconds(1), TimeDelta::seconds(MAX_WINDOW_SECS))
}

fn parse_window<F>(lookup: &F, key: &str) -> Result<Option<TimeDelta>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let secs = raw
        .parse::<i64>()
        .with_context(|| format!("{key} must be a whole number of seconds"))?;
    if !(1..=MAX_WINDOW_SECS).contains(&secs) {
        anyhow::bail!("{key} must be between 1 and {MAX_WINDOW_SECS} seconds (got {secs})");
    }
    Ok(Some(TimeDelta::seconds(secs)))
}

/// Bounded retry for optimistic-lock conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 5,
            max_backoff_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff before retry number `attempt` (1-based), capped.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms)
    }
}

/// Runtime configuration of the guard, the sweep and the store
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// How often the expiry sweep runs
    pub sweep_interval: Duration,

    /// Time an unactivated account gets before it is reclaimed
    pub abandoned_after: TimeDelta,

    /// How long a blocked account is kept after its last change
    pub block_retention: TimeDelta,

    /// bcrypt cost factor for password hashes
    pub bcrypt_cost: u32,

    /// Shared secret enabling developer activation shortcuts
    pub dev_code: Option<String>,

    /// Snapshot directory; `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,

    pub durability: DurabilityMode,

    /// Mutations between snapshots in async durability mode
    pub snapshot_every_ops: usize,

    pub retry: RetryPolicy,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            abandoned_after: TimeDelta::minutes(10),
            block_retention: TimeDelta::hours(24),
            bcrypt_cost: bcrypt::DEFAULT_COST,
            dev_code: None,
            data_dir: None,
            durability: DurabilityMode::Sync,
            snapshot_every_ops: 50,
            retry: RetryPolicy::default(),
        }
    }
}

impl GuardConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sweep cadence
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Abandonment window, clamped to `1s..=MAX_WINDOW_SECS`
    pub fn abandoned_after(mut self, window: TimeDelta) -> Self {
        self.abandoned_after = clamp_window(window);
        self
    }

    /// Block retention, clamped to `1s..=MAX_WINDOW_SECS`
    pub fn block_retention(mut self, window: TimeDelta) -> Self {
        self.block_retention = clamp_window(window);
        self
    }

    pub fn bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    pub fn dev_code(mut self, code: impl Into<String>) -> Self {
        self.dev_code = Some(code.into());
        self
    }

    /// Persist accounts as snapshots under `dir`
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn durability(mut self, mode: DurabilityMode) -> Self {
        self.durability = mode;
        self
    }

    pub fn snapshot_every_ops(mut self, ops: usize) -> Self {
        self.snapshot_every_ops = ops;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Load from `PEEKO_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (the environment in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("PEEKO_SWEEP_INTERVAL_SECS") {
            let secs = raw
                .parse::<u64>()
                .context("PEEKO_SWEEP_INTERVAL_SECS must be a whole number of seconds")?;
            if secs == 0 {
                anyhow::bail!("PEEKO_SWEEP_INTERVAL_SECS must be greater than zero");
            }
            config.sweep_interval = Duration::from_secs(secs);
        }

        if let Some(window) = parse_window(&lookup, "PEEKO_ABANDONED_AFTER_SECS")? {
            config.abandoned_after = window;
        }
        if let Some(window) = parse_window(&lookup, "PEEKO_BLOCK_RETENTION_SECS")? {
            config.block_retention = window;
        }

        if let Some(raw) = lookup("PEEKO_BCRYPT_COST") {
            config.bcrypt_cost = raw
                .parse::<u32>()
                .context("PEEKO_BCRYPT_COST must be a valid u32")?;
        }

        config.dev_code = lookup("PEEKO_DEV_CODE").filter(|code| !code.is_empty());
        config.data_dir = lookup("PEEKO_DATA_DIR")
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        if let Some(raw) = lookup("PEEKO_DURABILITY") {
            config.durability = raw.parse::<DurabilityMode>().map_err(anyhow::Error::msg)?;
        }

        if let Some(raw) = lookup("PEEKO_SNAPSHOT_EVERY_OPS") {
            config.snapshot_every_ops = raw
                .parse::<usize>()
                .context("PEEKO_SNAPSHOT_EVERY_OPS must be a valid usize")?;
        }

        if let Some(raw) = lookup("PEEKO_CONFLICT_RETRIES") {
            config.retry.max_attempts = raw
                .parse::<u32>()
                .context("PEEKO_CONFLICT_RETRIES must be a valid u32")?;
        }

        Ok(config)
    }
}
