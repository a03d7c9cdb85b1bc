//! Core domain: names, messages, queues, the directory, and the op reducer.

pub mod apply;
pub mod clock;
pub mod directory;
pub mod message;
pub mod op;
pub mod queue;

pub use apply::{Applied, ApplyError, apply_op, check_invariants};
pub use clock::Clock;
pub use directory::Directory;
pub use message::{Entry, Message, MessageId, MessageKind, NameError, Origin, QueueName};
pub use op::{Op, OpDecodeError};
pub use queue::{Queue, QueueSnapshot};
