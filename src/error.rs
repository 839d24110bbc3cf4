//! The error type shared by every fallible entry point of this crate.
//!
//! Contention is never an error: a failed compare-and-swap simply loops.
//! Errors are only raised when a lock or construction is built with invalid
//! sizing parameters, or when the dynamic interface of [`factory`] is asked
//! for an entry point that a lock family does not provide.
//!
//! [`factory`]: crate::factory

use crate::factory::LockKind;

/// A specialized [`Result`](core::result::Result) type for this crate.
pub type Result<T> = core::result::Result<T, Error>;

/// The error type of this crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A sizing or tuning parameter was rejected at construction time.
    #[error("invalid argument `{what}`: {reason}")]
    InvalidArgument {
        /// The rejected parameter.
        what: &'static str,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The lock family does not provide the requested entry point.
    #[error("{lock} does not support `{operation}`")]
    Unsupported {
        /// The lock that was asked.
        lock: LockKind,
        /// The requested operation.
        operation: &'static str,
    },

    /// A queue node built for another lock kind was handed to a lock.
    #[error("queue node does not belong to a {lock}")]
    NodeMismatch {
        /// The lock that received the node.
        lock: LockKind,
    },

    /// A lock name could not be parsed into a [`LockKind`].
    #[error("unknown lock `{0}`")]
    UnknownLock(String),
}

impl Error {
    pub(crate) const fn invalid(what: &'static str, reason: &'static str) -> Self {
        Self::InvalidArgument { what, reason }
    }

    pub(crate) const fn unsupported(lock: LockKind, operation: &'static str) -> Self {
        Self::Unsupported { lock, operation }
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use super::Error;
    use crate::factory::LockKind;

    #[test]
    fn display_names_the_lock_and_operation() {
        let err = Error::unsupported(LockKind::Timeout, "lock");
        assert_eq!(err.to_string(), "TOLock does not support `lock`");

        let err = Error::invalid("max_delay", "must not be smaller than min_delay");
        assert_eq!(
            err.to_string(),
            "invalid argument `max_delay`: must not be smaller than min_delay"
        );
    }
}
