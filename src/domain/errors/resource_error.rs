//! Resource loading error types.

use thiserror::Error;

/// Result alias for resource operations.
pub type ResourceResult<T> = std::result::Result<T, ResourceError>;

/// Errors surfaced to request completions and storage operations.
///
/// `Clone` so a single terminal outcome can fan out to every coalesced
/// callback of a download task.
#[derive(Debug, Clone, Error)]
pub enum ResourceError {
    /// The request was rejected before any I/O.
    #[error("invalid url: {url}")]
    InvalidUrl {
        /// The offending input.
        url: String,
    },

    /// Transport error, non-2xx status, timeout or an empty body.
    #[error("network error: {message}")]
    Network {
        /// Transport-level description.
        message: String,
    },

    /// Bytes were received but could not be decoded into an image.
    #[error("decode error: {message}")]
    Decode {
        /// Decoder description.
        message: String,
    },

    /// Disk read/write/delete failure.
    #[error("storage error: {message}")]
    Storage {
        /// I/O description.
        message: String,
    },

    /// The request was cancelled before completion.
    #[error("request cancelled")]
    Cancelled,
}

impl ResourceError {
    /// Creates an invalid-url error.
    #[must_use]
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates a storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// True for cancellation outcomes.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// True when a retry of the same request could plausibly succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Storage { .. } | Self::Cancelled)
    }
}

impl From<std::io::Error> for ResourceError {
    fn from(err: std::io::Error) -> Self {
        Self::storage(err.to_string())
    }
}
