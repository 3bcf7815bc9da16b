pub mod clock;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{PeekoError, Result};
pub use types::{ACTIVATION_ATTEMPTS, Account, AccountId, AccountView, ActivationState, DeviceInfo};
