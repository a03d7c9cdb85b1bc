#![forbid(unsafe_code)]

pub mod config;
pub mod core;
pub mod error;
pub mod journal;
pub mod switch;

pub use error::{Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export core types at crate root for convenience
pub use crate::config::{Config, ConfigError, JournalConfig};
pub use crate::core::{
    Applied, ApplyError, Clock, Directory, Entry, Message, MessageId, MessageKind, NameError, Op,
    OpDecodeError, Origin, Queue, QueueName, QueueSnapshot, apply_op, check_invariants,
};
pub use crate::journal::{Journal, JournalError, JournalStats};
pub use crate::switch::Switch;
