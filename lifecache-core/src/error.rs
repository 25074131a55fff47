//! Error types for cache containers and the sweep supervisor.

use thiserror::Error;

/// Errors that can occur when using a cache or its supervisor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The key, set member or index is not present in the cache
    #[error("Missing entry")]
    MissingEntry,

    /// The operation is intentionally not provided by this cache variant
    #[error("Unsupported operation: {operation}")]
    Unsupported {
        /// Name of the rejected operation
        operation: &'static str,
    },

    /// A constructor or operation received a nonsensical argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The cache is not in the supervisor's registry
    #[error("Cache is not registered with this supervisor")]
    NotRegistered,

    /// The supervisor's sweep loop is already running
    #[error("Supervisor already started")]
    AlreadyStarted,

    /// The supervisor has been closed and cannot be restarted
    #[error("Supervisor is closed")]
    Closed,

    /// The supervisor's sweep thread or its runtime could not be created
    #[error("Failed to spawn supervisor thread: {0}")]
    Spawn(String),
}

impl Error {
    /// Returns `true` if this error reports an absent key, member or index.
    pub fn is_missing_entry(&self) -> bool {
        matches!(self, Error::MissingEntry)
    }

    pub(crate) fn unsupported(operation: &'static str) -> Self {
        Error::Unsupported { operation }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_entry_predicate() {
        assert!(Error::MissingEntry.is_missing_entry());
        assert!(!Error::NotRegistered.is_missing_entry());
    }

    #[test]
    fn test_unsupported_message_names_operation() {
        let err = Error::unsupported("update");
        assert_eq!(err.to_string(), "Unsupported operation: update");
    }
}
