//! Error types for firmware container parsing

use thiserror::Error;

/// Result type alias for firmware container operations
pub type Result<T> = std::result::Result<T, FirmwareError>;

/// Errors raised while parsing or checking a firmware container
#[derive(Debug, Error)]
pub enum FirmwareError {
    /// Bad magic, version, checksum, chunk size or out-of-bounds offset
    #[error("Malformed firmware container: {reason}")]
    Format {
        /// Reason for rejection
        reason: String,
    },

    /// Image targets another device or uses an unsupported feature
    #[error("Incompatible firmware image: {reason}")]
    Compatibility {
        /// Reason for rejection
        reason: String,
    },

    /// Caller-supplied value is out of range or unknown
    #[error("Invalid input: {reason}")]
    InvalidInput {
        /// Reason for rejection
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl FirmwareError {
    /// Create a format error
    pub fn format(reason: impl Into<String>) -> Self {
        Self::Format {
            reason: reason.into(),
        }
    }

    /// Create a compatibility error
    pub fn compatibility(reason: impl Into<String>) -> Self {
        Self::Compatibility {
            reason: reason.into(),
        }
    }

    /// Create an invalid-input error
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Whether the container itself is malformed
    #[must_use]
    pub fn is_format(&self) -> bool {
        matches!(self, Self::Format { .. })
    }

    /// Whether the container is well formed but not loadable on this device
    #[must_use]
    pub fn is_compatibility(&self) -> bool {
        matches!(self, Self::Compatibility { .. })
    }
}
