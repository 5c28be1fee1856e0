//! Priority layer: scheduling metadata and terminal-state callbacks on top
//! of [`CancelableTask`].

use super::cancelable::{CancelableTask, TaskContext, TaskId, TaskState};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default priority for tasks that do not care.
pub const PRIORITY_DEFAULT: i32 = 0;
/// Work the user is actively waiting on; dispatched before default work.
pub const PRIORITY_FOREGROUND: i32 = 10;
/// Opportunistic background work; dispatched after everything else.
pub const PRIORITY_BACKGROUND: i32 = -10;

/// Observer notified exactly once when a task reaches its terminal state.
///
/// Exactly one of the three methods fires, after the state transition is
/// committed, on whichever thread caused it (a queue worker, or the caller
/// for pre-dispatch cancellation). `get()` called from inside a callback
/// returns immediately with the same outcome. A panic inside a callback is
/// contained and logged, never propagated.
pub trait TaskCallback<T>: Send {
    /// The task completed with `result`.
    fn on_result_available(&self, task: &PriorityTask<T>, result: &T);
    /// The task was canceled before producing a result.
    fn on_canceled(&self, task: &PriorityTask<T>);
    /// The task failed; `error` wraps the original cause.
    fn on_fail(&self, task: &PriorityTask<T>, error: &Error);
}

// Queue-membership states, tracked separately from the task lifecycle so a
// removed task is re-addable while still `Initial`.
const SCHED_DETACHED: u8 = 0;
const SCHED_PENDING: u8 = 1;
const SCHED_DISPATCHED: u8 = 2;

struct PriorityExt<T> {
    priority: AtomicI32,
    sched: AtomicU8,
    callbacks: Mutex<Vec<Box<dyn TaskCallback<T>>>>,
}

/// A [`CancelableTask`] with an integer priority, a monotonic submission
/// id used as the scheduling tie-break, and completion callbacks. Built to
/// be submitted to a [`PriorityTaskQueue`](crate::PriorityTaskQueue);
/// higher priority dispatches first, ties go to the earlier-constructed
/// task.
///
/// Like its base type, the handle is cheap to clone and all clones observe
/// the same task.
pub struct PriorityTask<T> {
    task: CancelableTask<T>,
    ext: Arc<PriorityExt<T>>,
}

impl<T> Clone for PriorityTask<T> {
    fn clone(&self) -> Self {
        Self {
            task: self.task.clone(),
            ext: Arc::clone(&self.ext),
        }
    }
}

impl<T: Clone + Send + 'static> PriorityTask<T> {
    /// Creates a task with [`PRIORITY_DEFAULT`].
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce(&TaskContext<'_>) -> Result<T> + Send + 'static,
    {
        Self::with_priority(work, PRIORITY_DEFAULT)
    }

    /// Creates a task with a specific priority.
    pub fn with_priority<F>(work: F, priority: i32) -> Self
    where
        F: FnOnce(&TaskContext<'_>) -> Result<T> + Send + 'static,
    {
        Self {
            task: CancelableTask::new(work),
            ext: Arc::new(PriorityExt {
                priority: AtomicI32::new(priority),
                sched: AtomicU8::new(SCHED_DETACHED),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Identity and submission-order tie-break, assigned at construction.
    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    /// Current lifecycle state. A terminal state never changes again.
    pub fn state(&self) -> TaskState {
        self.task.state()
    }

    /// Current priority; higher dispatches first.
    pub fn priority(&self) -> i32 {
        self.ext.priority.load(Ordering::SeqCst)
    }

    /// Updates the stored priority. Legal at any time; it affects
    /// scheduling order only while the task is still pending (not yet
    /// dispatched to a worker).
    pub fn set_priority(&self, priority: i32) {
        self.ext.priority.store(priority, Ordering::SeqCst);
    }

    /// Registers a callback. Only legal while the task is `Initial`;
    /// afterwards the terminal transition may already be in flight and the
    /// exactly-once guarantee could not be kept.
    pub fn add_callback<C>(&self, callback: C) -> Result<()>
    where
        C: TaskCallback<T> + 'static,
    {
        self.task.with_state_locked(|state| {
            if state != TaskState::Initial {
                return Err(Error::illegal_state(
                    "callbacks must be registered before the task starts",
                ));
            }
            self.ext.callbacks.lock().push(Box::new(callback));
            Ok(())
        })
    }

    /// Whether cancellation has been requested. Monotonic.
    pub fn cancel_requested(&self) -> bool {
        self.task.cancel_requested()
    }

    /// Requests cancellation without waiting for acknowledgment; see
    /// [`CancelableTask::request_cancel`]. If the task had not been
    /// dispatched yet it becomes `Canceled` here and `on_canceled` fires on
    /// the calling thread.
    pub fn request_cancel(&self) -> bool {
        let requested = self.task.request_cancel();
        self.fire_callbacks();
        requested
    }

    /// Blocking cancel: requests cancellation, then waits until the task
    /// reaches a terminal state.
    pub fn cancel(&self) -> bool {
        let requested = self.request_cancel();
        self.task.wait();
        requested
    }

    /// Blocks until the task reaches a terminal state.
    pub fn wait(&self) {
        self.task.wait();
    }

    /// Blocks up to `timeout`; true if the task is terminal on return.
    /// Never cancels the task or consumes its outcome.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        self.task.wait_for(timeout)
    }

    /// Blocks until terminal, then returns the result, `Err(Canceled)`, or
    /// the wrapped failure. Idempotent.
    pub fn get(&self) -> Result<T> {
        self.task.get()
    }

    /// Like [`get`](PriorityTask::get) but gives up with `Err(WaitTimeout)`
    /// after `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T> {
        self.task.get_timeout(timeout)
    }

    /// Runs the execution step inline, then delivers callbacks for the
    /// terminal state this run committed.
    pub(crate) fn run(&self) {
        self.task.run();
        self.fire_callbacks();
    }

    /// Claims queue membership. Fails if the task is already terminal or
    /// already submitted somewhere.
    pub(crate) fn mark_pending(&self) -> Result<()> {
        if self.state().is_terminal() {
            return Err(Error::illegal_state("task already reached a terminal state"));
        }
        self.ext
            .sched
            .compare_exchange(
                SCHED_DETACHED,
                SCHED_PENDING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map(|_| ())
            .map_err(|_| Error::illegal_state("task already submitted to a queue"))
    }

    /// Releases queue membership after a successful `remove`, so the task
    /// can be resubmitted as if fresh.
    pub(crate) fn mark_detached(&self) {
        self.ext.sched.store(SCHED_DETACHED, Ordering::SeqCst);
    }

    /// Claims the task for execution. False if it is already terminal
    /// (canceled while pending), in which case the worker must discard it.
    pub(crate) fn mark_dispatched(&self) -> bool {
        let _ = self.ext.sched.compare_exchange(
            SCHED_PENDING,
            SCHED_DISPATCHED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        !self.state().is_terminal()
    }

    /// Delivers callbacks if the task is terminal. The registration list is
    /// drained atomically, so across all racing callers every callback runs
    /// exactly once.
    fn fire_callbacks(&self) {
        let Some(outcome) = self.task.terminal_outcome() else {
            return;
        };
        let callbacks = std::mem::take(&mut *self.ext.callbacks.lock());
        for callback in &callbacks {
            let delivery = catch_unwind(AssertUnwindSafe(|| match &outcome {
                Ok(value) => callback.on_result_available(self, value),
                Err(Error::Canceled) => callback.on_canceled(self),
                Err(error) => callback.on_fail(self, error),
            }));
            if delivery.is_err() {
                tracing::error!(task = self.id().as_u64(), "ignoring panic in task callback");
            }
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for PriorityTask<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityTask")
            .field("id", &self.task.id())
            .field("priority", &self.ext.priority.load(Ordering::SeqCst))
            .field("state", &self.task.state())
            .finish()
    }
}
