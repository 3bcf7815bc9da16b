pub mod engine;
pub mod filter;
pub mod memory;
pub mod persistence;

pub use engine::AccountStore;
pub use filter::AccountFilter;
pub use memory::InMemoryAccountStore;
pub use persistence::{AccountSnapshot, DurabilityMode, SnapshotFile, SnapshotMetadata};
