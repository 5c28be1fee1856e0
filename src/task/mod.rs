//! Task primitives.
//!
//! [`CancelableTask`] is the leaf unit of asynchronous work: it runs its
//! execution step exactly once, exposes blocking result retrieval, and
//! supports cooperative cancellation that propagates into nested sub-tasks.
//! [`PriorityTask`] layers scheduling metadata (priority, submission order)
//! and terminal-state callbacks on top, for use with
//! [`PriorityTaskQueue`](crate::PriorityTaskQueue).

mod cancel;
mod cancelable;
mod priority;

pub use cancelable::{CancelableTask, TaskContext, TaskId, TaskState};
pub use priority::{
    PriorityTask, TaskCallback, PRIORITY_BACKGROUND, PRIORITY_DEFAULT, PRIORITY_FOREGROUND,
};
