//! Error taxonomy for the engine.
//!
//! Every public operation that can fail returns [`Result`]. The variants map
//! onto four failure tiers:
//!
//! - **Programmer errors** (bad handles, wrong types) - the operation is a no-op
//! - **Resource exhaustion** (out of memory, component table full) - caller may retry
//! - **Transient races** (stale entity, vanished subscriber) - these are *not*
//!   errors; the affected operation silently succeeds as a no-op and no variant
//!   here represents them
//! - **Fatal inconsistencies** - panics, never an `Error`
//!
//! Each variant carries a stable numeric code (see [`Error::code`]) so host
//! applications and script bindings can switch on failures without matching
//! on the Rust enum.

use thiserror::Error;

/// Result alias used across the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// A failure from a public engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// Catch-all for operations with no more specific failure (e.g. popping
    /// the last scene off the stack).
    #[error("unknown failure")]
    Unknown,

    /// An access landed outside an allocation or buffer.
    #[error("memory access out of bounds")]
    MemoryOutOfBounds,

    /// An allocator could not satisfy a request.
    #[error("out of memory")]
    OutOfMemory,

    /// A required argument was absent.
    #[error("required argument was nil")]
    NullArgument,

    /// A value's tag did not match what the operation required.
    #[error("incompatible data types")]
    IncompatibleDataTypes,

    /// The engine could not be brought up with the given configuration.
    #[error("failed initialization")]
    FailedInitialization,

    /// The operation is not legal in the engine's current run state.
    #[error("bad run state")]
    BadRunState,

    /// A handle referred to something that no longer exists.
    #[error("does not exist")]
    DoesNotExist,

    /// A named resource was registered twice.
    #[error("already exists")]
    AlreadyExists,

    /// A lookup by name or key found nothing.
    #[error("not found")]
    NotFound,

    /// The configured component limit was hit.
    #[error("max component count reached")]
    MaxComponentCountReached,

    /// A semaphore was signaled with a value lower than its current count.
    #[error("semaphore signaled non-monotonically")]
    SemaphoreNonmonotonicSignal,
}

impl Error {
    /// The stable integer code for this failure. Codes never change between
    /// releases; new variants take new codes.
    pub const fn code(&self) -> i32 {
        match self {
            Error::Unknown => 1,
            Error::MemoryOutOfBounds => -2,
            Error::OutOfMemory => -3,
            Error::NullArgument => -4,
            Error::IncompatibleDataTypes => -6,
            Error::FailedInitialization => -7,
            Error::BadRunState => -8,
            Error::DoesNotExist => -9,
            Error::AlreadyExists => -10,
            Error::NotFound => -12,
            Error::MaxComponentCountReached => -14,
            Error::SemaphoreNonmonotonicSignal => -15,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::Unknown.code(), 1);
        assert_eq!(Error::OutOfMemory.code(), -3);
        assert_eq!(Error::NotFound.code(), -12);
        assert_eq!(Error::MaxComponentCountReached.code(), -14);
        assert_eq!(Error::SemaphoreNonmonotonicSignal.code(), -15);
    }

    #[test]
    fn codes_are_distinct() {
        let all = [
            Error::Unknown,
            Error::MemoryOutOfBounds,
            Error::OutOfMemory,
            Error::NullArgument,
            Error::IncompatibleDataTypes,
            Error::FailedInitialization,
            Error::BadRunState,
            Error::DoesNotExist,
            Error::AlreadyExists,
            Error::NotFound,
            Error::MaxComponentCountReached,
            Error::SemaphoreNonmonotonicSignal,
        ];
        let mut codes: Vec<i32> = all.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }

    #[test]
    fn display_is_human_readable() {
        assert_eq!(
            Error::MaxComponentCountReached.to_string(),
            "max component count reached"
        );
    }
}
