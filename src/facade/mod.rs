pub mod service;

pub use service::{AccountService, SweepHandle, open_store};
