use super::AccountFilter;
use crate::core::{Account, AccountId, Result};
use async_trait::async_trait;

/// Account persistence contract - allows pluggable storage backends.
///
/// Every individual call is atomic with respect to the record(s) it touches.
/// No call spans more than one write.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a new account. Username and email must be unused.
    ///
    /// The store stamps `created_at`/`updated_at` and sets `version` to 1.
    async fn insert(&self, account: Account) -> Result<Account>;

    /// Fetch an account by id
    async fn get(&self, id: &AccountId) -> Result<Option<Account>>;

    /// Fetch an account whose username or email equals `credential`
    async fn find_by_credential(&self, credential: &str) -> Result<Option<Account>>;

    /// Replace a record if its stored version still equals `expected_version`.
    ///
    /// On success `updated_at` is stamped and `version` bumped. Fails with
    /// `AccountNotFound` when the record is gone and `VersionConflict` when
    /// someone else wrote it first.
    async fn update_if_version(&self, account: Account, expected_version: u64) -> Result<Account>;

    /// Delete one account, returning it if it existed
    async fn delete(&self, id: &AccountId) -> Result<Option<Account>>;

    /// Delete every account matching `filter`, returning the ids that went
    async fn delete_where(&self, filter: &AccountFilter) -> Result<Vec<AccountId>>;

    /// Number of stored accounts
    async fn count(&self) -> Result<usize>;

    /// Flush to durable storage, if the backend has any
    async fn checkpoint(&self) -> Result<()> {
        Ok(())
    }
}
