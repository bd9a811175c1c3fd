//! SDHCI error kinds
//!
//! Every fallible operation in the crate reports one of these. Errors raised
//! while a transaction is in flight are not returned to the submitter; they
//! reach the caller through the request's completion callback instead.

use core::fmt;

/// SDHCI error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdhciError {
    /// Malformed request or unknown enum code (missing buffer, bad width...)
    InvalidArgument,
    /// Another request is already in flight; the caller should retry later
    Busy,
    /// Capability absent, or the transfer exceeds the DMA chunking limits
    NotSupported,
    /// A bounded hardware wait expired
    Timeout,
    /// Hardware state did not reflect a configuration change
    Internal,
    /// Error interrupt during a transaction, or tuning did not converge
    Io,
}

impl fmt::Display for SdhciError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            SdhciError::InvalidArgument => "invalid argument",
            SdhciError::Busy => "controller busy",
            SdhciError::NotSupported => "not supported",
            SdhciError::Timeout => "timed out",
            SdhciError::Internal => "internal error",
            SdhciError::Io => "I/O error",
        };
        f.write_str(msg)
    }
}

/// Result type for SDHCI operations
pub type Result<T> = core::result::Result<T, SdhciError>;
