use thiserror::Error;

#[derive(Error, Debug)]
pub enum PeekoError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Duplicate(String),

    #[error("{0}")]
    InvalidCredentials(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Account '{0}' not found")]
    AccountNotFound(String),

    #[error("Optimistic lock conflict for account '{id}': expected version {expected}, actual {actual}")]
    VersionConflict {
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

impl PeekoError {
    /// True for errors the caller caused and can correct (400-class).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::Duplicate(_)
                | Self::InvalidCredentials(_)
                | Self::Unauthorized(_)
        )
    }

    pub fn status_code(&self) -> u16 {
        if self.is_client_error() { 400 } else { 500 }
    }
}

pub type Result<T> = std::result::Result<T, PeekoError>;

impl From<std::io::Error> for PeekoError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<bcrypt::BcryptError> for PeekoError {
    fn from(err: bcrypt::BcryptError) -> Self {
        Self::Hashing(err.to_string())
    }
}
