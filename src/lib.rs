//! taskq - cancelable priority task engine
//!
//! A small executor framework: tasks with Future-style blocking result
//! retrieval and cooperative cancellation, scheduled by a fixed pool of
//! workers in strict `(priority desc, submission order asc)` dispatch
//! order.
//!
//! # Quick Start
//!
//! ```no_run
//! use taskq::{PriorityTask, PriorityTaskQueue, PRIORITY_FOREGROUND};
//!
//! let mut queue = PriorityTaskQueue::new(2).unwrap();
//!
//! let task = PriorityTask::with_priority(
//!     |ctx| {
//!         ctx.check_canceled()?;
//!         Ok(21 * 2)
//!     },
//!     PRIORITY_FOREGROUND,
//! );
//!
//! queue.add(&task).unwrap();
//! assert_eq!(task.get().unwrap(), 42);
//!
//! queue.shutdown();
//! ```
//!
//! # Features
//!
//! - **Priority dispatch**: higher priority runs first; ties go to the
//!   earlier submission. Pending tasks can be re-prioritized or removed.
//! - **Cooperative cancellation**: `request_cancel` wakes a blocked
//!   execution step immediately and propagates into nested sub-tasks;
//!   `cancel` additionally waits for acknowledgment.
//! - **Exactly-once outcomes**: every task ends in exactly one of
//!   `Completed`, `Canceled`, or `Failed`, observable any number of times
//!   through `get`/`get_timeout` or a registered callback.
//! - **Two shutdown modes**: graceful backlog drain, or immediate
//!   cancel-everything.

#![warn(missing_docs, missing_debug_implementations)]

pub mod config;
pub mod error;
pub mod queue;
pub mod task;

pub use config::{QueueConfig, QueueConfigBuilder};
pub use error::{Error, Result};
pub use queue::PriorityTaskQueue;
pub use task::{
    CancelableTask, PriorityTask, TaskCallback, TaskContext, TaskId, TaskState,
    PRIORITY_BACKGROUND, PRIORITY_DEFAULT, PRIORITY_FOREGROUND,
};
