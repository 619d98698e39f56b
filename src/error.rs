//! Error types for the resilience core.

/// Top-level error type for the core components.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    /// Network or server unreachable, or a non-success status with no
    /// actionable rejection detail.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server understood the request and rejected it (e.g. a malformed
    /// step in a guide write).
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Cooldown window has not elapsed. A policy rejection, not a failure:
    /// no state was mutated and nothing was sent.
    #[error("throttled; retry after {retry_after_secs}s")]
    Throttled {
        /// Seconds until the next trigger will be accepted.
        retry_after_secs: u64,
    },

    /// Operation attempted with no device/subject key bound.
    #[error("no device bound")]
    Unbound,

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl CoreError {
    /// `true` for the rejection variants that never mutate state and are
    /// not logged as errors.
    #[must_use]
    pub fn is_policy_rejection(&self) -> bool {
        matches!(self, Self::Throttled { .. } | Self::Unbound)
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, CoreError>;
