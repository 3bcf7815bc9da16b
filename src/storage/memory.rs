use super::persistence::{DurabilityMode, SnapshotFile};
use super::{AccountFilter, AccountStore};
use crate::core::{Account, AccountId, Clock, PeekoError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

const DEFAULT_SNAPSHOT_EVERY_OPS: usize = 50;

/// Records plus the unique username/email indexes, guarded together.
#[derive(Default)]
struct Collection {
    accounts: HashMap<AccountId, Account>,
    usernames: HashMap<String, AccountId>,
    emails: HashMap<String, AccountId>,
    ops_since_checkpoint: usize,
}

impl Collection {
    fn index(&mut self, account: &Account) {
        self.usernames.insert(account.username.clone(), account.id);
        self.emails.insert(account.email.clone(), account.id);
    }

    fn unindex(&mut self, account: &Account) {
        self.usernames.remove(&account.username);
        self.emails.remove(&account.email);
    }

    fn remove(&mut self, id: &AccountId) -> Option<Account> {
        let account = self.accounts.remove(id)?;
        self.unindex(&account);
        Some(account)
    }

    /// Records in creation order, as written to a snapshot
    fn ordered(&self) -> Vec<&Account> {
        let mut accounts: Vec<&Account> = self.accounts.values().collect();
        accounts.sort_by_key(|account| account.created_at);
        accounts
    }

    fn revert(&mut self, undo: Undo) {
        match undo {
            Undo::Inserted(id) => {
                self.remove(&id);
            }
            Undo::Replaced(previous) => {
                self.accounts.insert(previous.id, previous);
            }
            Undo::Removed(accounts) => {
                for account in accounts {
                    self.index(&account);
                    self.accounts.insert(account.id, account);
                }
            }
        }
    }
}

/// How to take back a mutation whose snapshot could not be written
enum Undo {
    Inserted(AccountId),
    Replaced(Account),
    Removed(Vec<Account>),
}

struct StorePersistence {
    snapshots: SnapshotFile,
    mode: DurabilityMode,
    snapshot_every_ops: usize,
}

/// Account store held in memory, optionally mirrored to a snapshot file.
pub struct InMemoryAccountStore {
    collection: RwLock<Collection>,
    clock: Arc<dyn Clock>,
    persistence: Option<StorePersistence>,
}

impl InMemoryAccountStore {
    /// Purely in-memory store
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            collection: RwLock::new(Collection::default()),
            clock,
            persistence: None,
        }
    }

    /// Store backed by a snapshot in `data_dir`, recovering whatever is there.
    pub fn open<P: AsRef<Path>>(
        data_dir: P,
        mode: DurabilityMode,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Self::open_with(data_dir, mode, DEFAULT_SNAPSHOT_EVERY_OPS, clock)
    }

    pub fn open_with<P: AsRef<Path>>(
        data_dir: P,
        mode: DurabilityMode,
        snapshot_every_ops: usize,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let snapshots = SnapshotFile::in_dir(data_dir);
        let mut collection = Collection::default();

        if let Some(snapshot) = snapshots.read()? {
            for account in snapshot.accounts {
                collection.index(&account);
                collection.accounts.insert(account.id, account);
            }
            info!(
                path = %snapshots.path().display(),
                accounts = collection.accounts.len(),
                "recovered account snapshot"
            );
        }

        Ok(Self {
            collection: RwLock::new(collection),
            clock,
            persistence: Some(StorePersistence {
                snapshots,
                mode,
                snapshot_every_ops: snapshot_every_ops.max(1),
            }),
        })
    }

    /// Count an applied mutation and snapshot when the durability mode says
    /// so. If that snapshot fails the mutation is reverted, so the caller's
    /// error and the in-memory state agree.
    fn commit(&self, collection: &mut Collection, mutations: usize, undo: Undo) -> Result<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        if mutations == 0 {
            return Ok(());
        }

        let pending = collection.ops_since_checkpoint + mutations;
        let due = match persistence.mode {
            DurabilityMode::Sync => true,
            DurabilityMode::Async => pending >= persistence.snapshot_every_ops,
            DurabilityMode::None => false,
        };
        if !due {
            collection.ops_since_checkpoint = pending;
            return Ok(());
        }

        if let Err(err) = self.write_snapshot(persistence, collection) {
            warn!(error = %err, "reverting account change that could not be snapshotted");
            collection.revert(undo);
            return Err(err);
        }
        Ok(())
    }

    fn write_snapshot(&self, persistence: &StorePersistence, collection: &mut Collection) -> Result<()> {
        if let Err(err) = persistence.snapshots.write(&collection.ordered()) {
            error!(error = %err, "account snapshot failed");
            return Err(err);
        }
        debug!(accounts = collection.accounts.len(), "account snapshot written");
        collection.ops_since_checkpoint = 0;
        Ok(())
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn insert(&self, mut account: Account) -> Result<Account> {
        let mut collection = self.collection.write().await;

        if collection.usernames.contains_key(&account.username) {
            return Err(PeekoError::Duplicate(format!(
                "Username {} is already used. Try another username",
                account.username
            )));
        }
        if collection.emails.contains_key(&account.email) {
            return Err(PeekoError::Duplicate(format!(
                "An account with the email {} already exists",
                account.email
            )));
        }
        if collection.accounts.contains_key(&account.id) {
            return Err(PeekoError::Duplicate(format!("Account '{}' already exists", account.id)));
        }

        let now = self.clock.now();
        account.created_at = now;
        account.updated_at = now;
        account.version = 1;

        collection.index(&account);
        collection.accounts.insert(account.id, account.clone());
        self.commit(&mut collection, 1, Undo::Inserted(account.id))?;

        Ok(account)
    }

    async fn get(&self, id: &AccountId) -> Result<Option<Account>> {
        let collection = self.collection.read().await;
        Ok(collection.accounts.get(id).cloned())
    }

    async fn find_by_credential(&self, credential: &str) -> Result<Option<Account>> {
        let collection = self.collection.read().await;
        let id = collection
            .usernames
            .get(credential)
            .or_else(|| collection.emails.get(credential));
        Ok(id.and_then(|id| collection.accounts.get(id)).cloned())
    }

    async fn update_if_version(&self, mut account: Account, expected_version: u64) -> Result<Account> {
        let mut collection = self.collection.write().await;

        let current = collection
            .accounts
            .get(&account.id)
            .ok_or_else(|| PeekoError::AccountNotFound(account.id.to_string()))?;

        if current.version != expected_version {
            return Err(PeekoError::VersionConflict {
                id: account.id.to_string(),
                expected: expected_version,
                actual: current.version,
            });
        }
        if current.username != account.username || current.email != account.email {
            return Err(PeekoError::Validation(
                "Username and email cannot be changed".to_string(),
            ));
        }

        account.created_at = current.created_at;
        account.updated_at = self.clock.now();
        account.version = expected_version + 1;

        if let Some(previous) = collection.accounts.insert(account.id, account.clone()) {
            self.commit(&mut collection, 1, Undo::Replaced(previous))?;
        }

        Ok(account)
    }

    async fn delete(&self, id: &AccountId) -> Result<Option<Account>> {
        let mut collection = self.collection.write().await;
        let Some(removed) = collection.remove(id) else {
            return Ok(None);
        };
        self.commit(&mut collection, 1, Undo::Removed(vec![removed.clone()]))?;
        Ok(Some(removed))
    }

    async fn delete_where(&self, filter: &AccountFilter) -> Result<Vec<AccountId>> {
        let mut collection = self.collection.write().await;

        let doomed: Vec<AccountId> = collection
            .accounts
            .values()
            .filter(|account| filter.matches(account))
            .map(|account| account.id)
            .collect();

        let removed: Vec<Account> = doomed.iter().filter_map(|id| collection.remove(id)).collect();
        self.commit(&mut collection, removed.len(), Undo::Removed(removed))?;

        Ok(doomed)
    }

    async fn count(&self) -> Result<usize> {
        let collection = self.collection.read().await;
        Ok(collection.accounts.len())
    }

    async fn checkpoint(&self) -> Result<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        if persistence.mode == DurabilityMode::None {
            return Ok(());
        }
        let mut collection = self.collection.write().await;
        self.write_snapshot(persistence, &mut collection)
    }
}
