//! Snapshot persistence for the account store
//!
//! The whole account set is written as one MessagePack document. A write
//! goes to `accounts.tmp` first and is renamed into place only after it has
//! been synced, so a crash leaves either the old or the new snapshot.

use crate::core::{Account, PeekoError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const SNAPSHOT_FILE_NAME: &str = "accounts.snapshot";
const SNAPSHOT_FORMAT_VERSION: u32 = 1;

fn failed<E: Display>(what: &'static str) -> impl FnOnce(E) -> PeekoError {
    move |err| PeekoError::Snapshot(format!("{what}: {err}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: DateTime<Utc>,
    pub account_count: usize,
}

/// Snapshot as read back from disk
#[derive(Debug, Deserialize)]
pub struct AccountSnapshot {
    pub version: u32,
    pub accounts: Vec<Account>,
    pub metadata: SnapshotMetadata,
}

/// Same layout as [`AccountSnapshot`], borrowing the live records
#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    accounts: &'a [&'a Account],
    metadata: SnapshotMetadata,
}

// ============================================================================
// Durability Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// Snapshot after every mutation
    #[default]
    Sync,
    /// Snapshot every N mutations and on explicit checkpoint
    Async,
    /// Never touch disk
    None,
}

impl FromStr for DurabilityMode {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "sync" => Ok(Self::Sync),
            "async" => Ok(Self::Async),
            "none" | "off" => Ok(Self::None),
            other => Err(format!("durability must be one of: sync, async, none (got '{other}')")),
        }
    }
}

// ============================================================================
// Snapshot File
// ============================================================================

pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    /// The standard snapshot file inside `data_dir`
    pub fn in_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            path: data_dir.as_ref().join(SNAPSHOT_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("tmp")
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Replace the snapshot with `accounts`.
    pub fn write(&self, accounts: &[&Account]) -> Result<SnapshotMetadata> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(failed("create snapshot directory"))?;
        }

        let metadata = SnapshotMetadata {
            created_at: Utc::now(),
            account_count: accounts.len(),
        };
        let document = SnapshotRef {
            version: SNAPSHOT_FORMAT_VERSION,
            accounts,
            metadata,
        };

        let temp_path = self.temp_path();
        let written = File::create(&temp_path)
            .map_err(failed("create temp snapshot"))
            .and_then(|file| {
                let mut writer = BufWriter::new(file);
                rmp_serde::encode::write_named(&mut writer, &document).map_err(failed("encode snapshot"))?;
                let file = writer.into_inner().map_err(failed("flush snapshot"))?;
                file.sync_all().map_err(failed("sync snapshot"))
            })
            .and_then(|()| fs::rename(&temp_path, &self.path).map_err(failed("install snapshot")));

        if written.is_err() && temp_path.is_file() {
            let _ = fs::remove_file(&temp_path);
        }
        written.map(|()| metadata)
    }

    /// Read the snapshot back; `None` when none was ever written.
    pub fn read(&self) -> Result<Option<AccountSnapshot>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(failed("open snapshot")(err)),
        };

        let snapshot: AccountSnapshot =
            rmp_serde::from_read(BufReader::new(file)).map_err(failed("decode snapshot"))?;
        if snapshot.version != SNAPSHOT_FORMAT_VERSION {
            return Err(PeekoError::Snapshot(format!(
                "unsupported snapshot format {} (expected {SNAPSHOT_FORMAT_VERSION})",
                snapshot.version
            )));
        }
        Ok(Some(snapshot))
    }
}
