use thiserror::Error;

use crate::config::ConfigError;
use crate::core::{ApplyError, OpDecodeError};
use crate::journal::JournalError;

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/outage).
    Retryable,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// Crate-level convenience error.
///
/// Not a "god error": it is a thin wrapper over capability errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Codec(#[from] OpDecodeError),

    #[error(transparent)]
    Journal(#[from] JournalError),

    /// A replayed record violated a directory invariant. Fatal at startup.
    #[error("journal replay produced inconsistent state: {0}")]
    Replay(#[from] ApplyError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            Error::Codec(_) => Transience::Permanent,
            Error::Journal(e) => match e {
                JournalError::Io { .. } => Transience::Retryable,
                JournalError::Full { .. }
                | JournalError::RecordTooLarge { .. }
                | JournalError::HeaderInvalid { .. }
                | JournalError::CapacityTooSmall { .. } => Transience::Permanent,
            },
            Error::Replay(_) => Transience::Permanent,
            Error::Config(_) => Transience::Permanent,
        }
    }
}
