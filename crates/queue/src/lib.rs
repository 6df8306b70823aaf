//! Durable command queue.
//!
//! All server interaction of an authority is funnelled through its namespace
//! of the [`CommandQueue`]: commands are persisted in SQLite, executed one at
//! a time per namespace in priority/FIFO order, and may yield follow-on
//! commands which are queued atomically with the completion of the command
//! that produced them.

mod command;
pub mod error;
mod queue;

pub use crate::command::{Command, QueuedCommand};
pub use crate::queue::{CommandHandler, CommandQueue, DEFAULT_MAX_ATTEMPTS};
