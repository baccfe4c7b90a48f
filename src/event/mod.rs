//! Received events and the queue that records them
//!
//! - Event envelope and bookkeeping types
//! - Event queue abstraction
//! - File-based queue implementation

pub mod file_queue;
pub mod queue;

#[allow(clippy::module_inception)]
mod event_types;

pub use event_types::{Event, ReceiveTask, TaskStatus};
pub use file_queue::FileEventQueue;
pub use queue::{Enqueued, EventQueue, QueueConfig, QueueResult};
