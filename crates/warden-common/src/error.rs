use serde::{Deserialize, Serialize};

/// Machine-readable error codes shown to operators.
/// Shared by the library crates and the CLI.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidPayload,
    InvalidName,
    NotFound,
    Conflict,
    IoError,
    Internal,
    CacheUnavailable,
    // Certificate lifecycle
    CaNotInitialized,
    InvalidOperation,
    EngineFailed,
    // Second factor
    InvalidTotp,
}

impl ErrorCode {
    /// Process exit status the CLI reports for this error.
    /// Follows the BSD `sysexits.h` families.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidPayload | Self::InvalidName => 65,
            Self::NotFound | Self::CaNotInitialized => 66,
            Self::InvalidTotp => 77,
            Self::EngineFailed => 69,
            Self::Internal | Self::InvalidOperation => 70,
            Self::IoError => 74,
            Self::CacheUnavailable | Self::Conflict => 75,
        }
    }
}
