// ============================================================================
// Peeko account guard
// ============================================================================

pub mod activation;
pub mod auth;
pub mod config;
pub mod core;
pub mod facade;
pub mod storage;
pub mod sweep;

// Re-export main types for convenience
pub use activation::{Activated, ActivationError, ActivationGuard, ActivationReport};
pub use auth::{AuthManager, RegisterRequest, Registration, SessionToken, SignedIn};
pub use config::{GuardConfig, RetryPolicy};
pub use core::{Account, AccountId, AccountView, Clock, ManualClock, PeekoError, Result, SystemClock};
pub use facade::{AccountService, SweepHandle};
pub use storage::{AccountStore, DurabilityMode, InMemoryAccountStore};
pub use sweep::{ExpirySweep, SweepPolicy, SweepReport};
