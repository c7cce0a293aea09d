use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletError {
    // Credential errors
    /// Wrong PIN or a corrupted envelope. The two are deliberately not told apart.
    AuthenticationFailed,
    Locked { remaining_seconds: u64 },

    // Cryptographic errors
    CryptoError(String),

    // Storage errors
    StorageUnavailable(String),
    NotFound(String),

    // Session errors
    SessionInvalid,

    // Validation errors
    ValidationError(String),

    // Generic errors
    Unknown(String),
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WalletError::AuthenticationFailed => write!(f, "Authentication failed"),
            WalletError::Locked { remaining_seconds } => write!(
                f,
                "PIN entry locked. Retry in {} seconds",
                remaining_seconds
            ),

            WalletError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),

            WalletError::StorageUnavailable(msg) => write!(f, "Storage unavailable: {}", msg),
            WalletError::NotFound(msg) => write!(f, "Not found: {}", msg),

            WalletError::SessionInvalid => write!(f, "Session invalid, re-authentication required"),

            WalletError::ValidationError(msg) => write!(f, "Validation error: {}", msg),

            WalletError::Unknown(msg) => write!(f, "Unknown error: {}", msg),
        }
    }
}

impl std::error::Error for WalletError {}

pub type WalletResult<T> = Result<T, WalletError>;

// Conversion helpers
impl From<std::io::Error> for WalletError {
    fn from(error: std::io::Error) -> Self {
        WalletError::StorageUnavailable(error.to_string())
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(error: serde_json::Error) -> Self {
        WalletError::StorageUnavailable(format!("Malformed record: {}", error))
    }
}

impl From<tokio::task::JoinError> for WalletError {
    fn from(error: tokio::task::JoinError) -> Self {
        WalletError::Unknown(format!("Background worker failed: {}", error))
    }
}
