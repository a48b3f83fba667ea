//! Error types for loader and HAL operations

use qat_firmware::FirmwareError;
use thiserror::Error;

/// Result type alias for HAL operations
pub type Result<T> = std::result::Result<T, QatError>;

/// Errors that can occur while bringing up AEs or loading firmware
#[derive(Debug, Error)]
pub enum QatError {
    /// Container rejected by the parser or the compatibility check
    #[error(transparent)]
    Firmware(#[from] FirmwareError),

    /// A polled status never reached its expected value
    #[error("{operation} timed out after {retries} polls (last status {last_status:#010x})")]
    HardwareTimeout {
        /// Operation that was polling
        operation: String,
        /// Last value read from the polled register
        last_status: u32,
        /// Polls performed
        retries: u32,
    },

    /// Hardware reported an explicit failure status
    #[error("{operation} failed: status {status:#010x}")]
    HardwareFault {
        /// Operation that failed
        operation: String,
        /// Status value reported
        status: u32,
    },

    /// A pool or region has no room for the request
    #[error("Resource exhausted: {reason}")]
    ResourceExhausted {
        /// Reason for failure
        reason: String,
    },

    /// The device or AE is not in a state that allows the operation
    #[error("Precondition failed: {reason}")]
    Precondition {
        /// Reason for failure
        reason: String,
    },

    /// Caller-supplied value is out of range or unknown
    #[error("Invalid input: {reason}")]
    InvalidInput {
        /// Reason for failure
        reason: String,
    },

    /// I/O error while mapping a register window
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl QatError {
    /// Create a hardware-timeout error
    pub fn timeout(operation: impl Into<String>, last_status: u32, retries: u32) -> Self {
        Self::HardwareTimeout {
            operation: operation.into(),
            last_status,
            retries,
        }
    }

    /// Create a hardware-fault error
    pub fn fault(operation: impl Into<String>, status: u32) -> Self {
        Self::HardwareFault {
            operation: operation.into(),
            status,
        }
    }

    /// Create a resource-exhausted error
    pub fn exhausted(reason: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            reason: reason.into(),
        }
    }

    /// Create a precondition error
    pub fn precondition(reason: impl Into<String>) -> Self {
        Self::Precondition {
            reason: reason.into(),
        }
    }

    /// Create an invalid-input error
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Whether the error is a malformed container
    #[must_use]
    pub fn is_format(&self) -> bool {
        matches!(self, Self::Firmware(e) if e.is_format())
    }

    /// Whether the error is an incompatible or unsupported image
    #[must_use]
    pub fn is_compatibility(&self) -> bool {
        matches!(self, Self::Firmware(e) if e.is_compatibility())
    }

    /// Whether the error is a hardware timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::HardwareTimeout { .. })
    }
}
