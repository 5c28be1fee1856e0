//! The leaf task primitive: run-once work with Future-style retrieval and
//! cooperative cancellation.

use super::cancel::CancelToken;
use crate::error::{Error, Result, TaskPanic};
use crossbeam_channel::Receiver;
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Global task id counter.
static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique, strictly increasing identifier assigned at construction.
///
/// Identity never repeats across submissions; the ordering doubles as the
/// submission-order tie-break when priorities are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        TaskId(TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw counter value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Lifecycle states of a task.
///
/// Legal transitions: `Initial -> Running -> {Completed, Canceled, Failed}`,
/// plus `Initial -> Canceled` when cancellation is requested before dispatch
/// (the execution step never runs in that case). Terminal states are
/// assigned exactly once and never change afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Constructed but not yet dispatched.
    Initial,
    /// The execution step is on a thread right now.
    Running,
    /// The execution step returned a value.
    Completed,
    /// Cancellation was requested and the task acknowledged it, or it was
    /// canceled before ever being dispatched.
    Canceled,
    /// The execution step returned an error or panicked.
    Failed,
}

impl TaskState {
    /// True for `Completed`, `Canceled`, and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Canceled | TaskState::Failed
        )
    }
}

/// State plus outcome, committed together under the task lock.
enum Status<T> {
    Initial,
    Running,
    Completed(T),
    Canceled,
    Failed(Error),
}

impl<T> Status<T> {
    fn state(&self) -> TaskState {
        match self {
            Status::Initial => TaskState::Initial,
            Status::Running => TaskState::Running,
            Status::Completed(_) => TaskState::Completed,
            Status::Canceled => TaskState::Canceled,
            Status::Failed(_) => TaskState::Failed,
        }
    }
}

/// Boxed execution step.
type Work<T> = Box<dyn FnOnce(&TaskContext<'_>) -> Result<T> + Send + 'static>;

/// Type-erased cancel handle; lets a parent propagate cancellation into
/// active sub-tasks of arbitrary result types.
pub(crate) trait Cancelable: Send + Sync {
    fn id(&self) -> TaskId;
    fn request_cancel(&self) -> bool;
}

/// The scope a running execution step lives in; implemented by the task
/// core so `TaskContext` stays non-generic.
trait CancelScope: Sync {
    fn token(&self) -> &CancelToken;
    fn add_child(&self, child: Arc<dyn Cancelable>);
    fn remove_child(&self, id: TaskId);
}

struct Shared<T> {
    status: Status<T>,
    /// Sub-tasks currently executing inline within this task's step.
    children: Vec<Arc<dyn Cancelable>>,
}

pub(crate) struct TaskCore<T> {
    id: TaskId,
    shared: Mutex<Shared<T>>,
    /// Signaled on every terminal transition; `get`/`wait` park here.
    done: Condvar,
    token: CancelToken,
    work: Mutex<Option<Work<T>>>,
}

impl<T: Send + 'static> TaskCore<T> {
    /// Non-blocking cancellation request. True only on the first request
    /// against a non-terminal task.
    fn request_cancel(&self) -> bool {
        let (transitioned, children) = {
            let mut shared = self.shared.lock();
            if shared.status.state().is_terminal() {
                return false;
            }
            let transitioned = self.token.fire();
            if matches!(shared.status, Status::Initial) {
                // Never dispatched; the execution step will not run.
                shared.status = Status::Canceled;
                self.done.notify_all();
            }
            (transitioned, shared.children.clone())
        };
        for child in &children {
            child.request_cancel();
        }
        transitioned
    }

    /// Runs the execution step inline, committing exactly one terminal
    /// state. Safe against pre-dispatch cancellation and double dispatch.
    fn run(&self) {
        {
            let mut shared = self.shared.lock();
            match shared.status {
                Status::Initial => shared.status = Status::Running,
                Status::Canceled => return,
                _ => {
                    tracing::warn!(task = self.id.as_u64(), "task executed twice; ignoring");
                    return;
                }
            }
        }

        let work = self.work.lock().take();
        let Some(work) = work else { return };

        let context = TaskContext { scope: self };
        let outcome = catch_unwind(AssertUnwindSafe(|| work(&context)));

        let mut shared = self.shared.lock();
        shared.status = match outcome {
            Ok(Ok(value)) => {
                if self.token.is_canceled() {
                    // Cancellation won the race; the result is discarded and
                    // the task must not report completion.
                    Status::Canceled
                } else {
                    Status::Completed(value)
                }
            }
            Ok(Err(Error::Canceled)) => Status::Canceled,
            Ok(Err(error)) => {
                let error = match error {
                    wrapped @ Error::Execution(_) => wrapped,
                    other => Error::execution(other),
                };
                Status::Failed(error)
            }
            Err(payload) => {
                tracing::error!(task = self.id.as_u64(), "execution step panicked");
                Status::Failed(Error::Execution(Arc::new(TaskPanic::from_payload(payload))))
            }
        };
        shared.children.clear();
        self.done.notify_all();
    }
}

impl<T: Send + 'static> Cancelable for TaskCore<T> {
    fn id(&self) -> TaskId {
        self.id
    }

    fn request_cancel(&self) -> bool {
        TaskCore::request_cancel(self)
    }
}

impl<T: Send + 'static> CancelScope for TaskCore<T> {
    fn token(&self) -> &CancelToken {
        &self.token
    }

    fn add_child(&self, child: Arc<dyn Cancelable>) {
        self.shared.lock().children.push(child);
    }

    fn remove_child(&self, id: TaskId) {
        self.shared.lock().children.retain(|child| child.id() != id);
    }
}

/// A single unit of asynchronous work.
///
/// The execution step supplied at construction runs exactly once, either on
/// a queue worker or inline via [`run`](CancelableTask::run). The handle is
/// cheap to clone; all clones observe the same task.
///
/// Cancellation is cooperative: the step observes it through the
/// [`TaskContext`] passed to it, either by polling
/// [`check_canceled`](TaskContext::check_canceled) at safe points or by
/// blocking on the [`canceled`](TaskContext::canceled) channel.
pub struct CancelableTask<T> {
    core: Arc<TaskCore<T>>,
}

impl<T> Clone for CancelableTask<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Send + 'static> CancelableTask<T> {
    /// Creates a task from its execution step.
    ///
    /// The step returns the result value, `Err(Error::Canceled)` to signal
    /// that it observed cancellation, or any other error to fail the task.
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce(&TaskContext<'_>) -> Result<T> + Send + 'static,
    {
        Self {
            core: Arc::new(TaskCore {
                id: TaskId::next(),
                shared: Mutex::new(Shared {
                    status: Status::Initial,
                    children: Vec::new(),
                }),
                done: Condvar::new(),
                token: CancelToken::new(),
                work: Mutex::new(Some(Box::new(work))),
            }),
        }
    }

    /// Unique identity, assigned at construction.
    pub fn id(&self) -> TaskId {
        self.core.id
    }

    /// Current lifecycle state. A terminal state never changes again.
    pub fn state(&self) -> TaskState {
        self.core.shared.lock().status.state()
    }

    /// Whether cancellation has been requested. Monotonic.
    pub fn cancel_requested(&self) -> bool {
        self.core.token.is_canceled()
    }

    /// Executes the task inline on the calling thread. A task canceled
    /// before dispatch is left `Canceled` and its step never runs.
    pub fn run(&self) {
        self.core.run();
    }

    /// Requests cancellation without waiting for acknowledgment.
    ///
    /// Returns true only the first time cancellation is requested against a
    /// non-terminal task. Wakes any thread blocked inside the execution
    /// step and propagates the request into active sub-tasks.
    pub fn request_cancel(&self) -> bool {
        self.core.request_cancel()
    }

    /// Blocking cancel: requests cancellation, then waits until the task
    /// acknowledges by reaching a terminal state.
    pub fn cancel(&self) -> bool {
        let requested = self.request_cancel();
        self.wait();
        requested
    }

    /// Blocks until the task reaches a terminal state.
    pub fn wait(&self) {
        let mut shared = self.core.shared.lock();
        while !shared.status.state().is_terminal() {
            self.core.done.wait(&mut shared);
        }
    }

    /// Blocks up to `timeout`; true if the task is terminal on return.
    /// Never cancels the task.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut shared = self.core.shared.lock();
        while !shared.status.state().is_terminal() {
            if self.core.done.wait_until(&mut shared, deadline).timed_out() {
                return shared.status.state().is_terminal();
            }
        }
        true
    }

    /// Blocks until terminal, then returns the result, `Err(Canceled)`, or
    /// the wrapped failure. Idempotent and safe to call from any number of
    /// threads before, during, or after execution.
    pub fn get(&self) -> Result<T>
    where
        T: Clone,
    {
        let mut shared = self.core.shared.lock();
        loop {
            if let Some(outcome) = Self::outcome_of(&shared.status) {
                return outcome;
            }
            self.core.done.wait(&mut shared);
        }
    }

    /// Like [`get`](CancelableTask::get) but gives up with
    /// `Err(WaitTimeout)` if the task is not terminal within `timeout`.
    /// The result is not consumed and the task is not canceled.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T>
    where
        T: Clone,
    {
        let deadline = Instant::now() + timeout;
        let mut shared = self.core.shared.lock();
        loop {
            if let Some(outcome) = Self::outcome_of(&shared.status) {
                return outcome;
            }
            if self.core.done.wait_until(&mut shared, deadline).timed_out() {
                return Self::outcome_of(&shared.status).unwrap_or(Err(Error::WaitTimeout));
            }
        }
    }

    /// Terminal outcome, if the task has one yet.
    pub(crate) fn terminal_outcome(&self) -> Option<Result<T>>
    where
        T: Clone,
    {
        Self::outcome_of(&self.core.shared.lock().status)
    }

    /// Runs `f` with the current state while holding the task lock, so the
    /// observed state cannot change under the caller.
    pub(crate) fn with_state_locked<R>(&self, f: impl FnOnce(TaskState) -> R) -> R {
        let shared = self.core.shared.lock();
        f(shared.status.state())
    }

    pub(crate) fn cancel_handle(&self) -> Arc<dyn Cancelable> {
        self.core.clone()
    }

    fn outcome_of(status: &Status<T>) -> Option<Result<T>>
    where
        T: Clone,
    {
        match status {
            Status::Completed(value) => Some(Ok(value.clone())),
            Status::Canceled => Some(Err(Error::Canceled)),
            Status::Failed(error) => Some(Err(error.clone())),
            Status::Initial | Status::Running => None,
        }
    }
}

impl<T> std::fmt::Debug for CancelableTask<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelableTask")
            .field("id", &self.core.id)
            .field("state", &self.core.shared.lock().status.state())
            .finish()
    }
}

/// Handle passed to an execution step while it runs.
///
/// Exposes the cooperative cancellation checkpoints and inline sub-task
/// execution. It only exists for the duration of the step, so its
/// operations cannot be misused from outside a running task.
pub struct TaskContext<'a> {
    scope: &'a dyn CancelScope,
}

impl TaskContext<'_> {
    /// Whether cancellation of this task has been requested.
    pub fn is_canceled(&self) -> bool {
        self.scope.token().is_canceled()
    }

    /// Fail-fast checkpoint: `Err(Canceled)` once cancellation is
    /// requested, to be bubbled out of the step with `?`.
    pub fn check_canceled(&self) -> Result<()> {
        if self.is_canceled() {
            Err(Error::Canceled)
        } else {
            Ok(())
        }
    }

    /// Channel that disconnects when cancellation is requested; usable in
    /// `crossbeam_channel::select!` so a blocked step wakes promptly.
    pub fn canceled(&self) -> &Receiver<()> {
        self.scope.token().receiver()
    }

    /// Blocks up to `timeout` for cancellation; true if it was requested.
    pub fn wait_canceled(&self, timeout: Duration) -> bool {
        self.scope.token().wait_timeout(timeout)
    }

    /// Executes `child` synchronously on the calling worker, sharing this
    /// task's cancellation signal: a cancellation request against the
    /// parent reaches the child before the parent observes its result.
    ///
    /// The child's failure or cancellation is returned as a value; the
    /// parent's step may catch it (for example to count failures across a
    /// batch) or propagate it with `?`, which fails or cancels the parent
    /// with the original cause intact.
    pub fn run_sub_task<R>(&self, child: &CancelableTask<R>) -> Result<R>
    where
        R: Clone + Send + 'static,
    {
        if self.is_canceled() {
            child.request_cancel();
            return Err(Error::Canceled);
        }
        self.scope.add_child(child.cancel_handle());
        // A cancel that slipped in before the child registered would miss
        // it; re-check now that the parent can see it.
        if self.is_canceled() {
            child.request_cancel();
        }
        child.run();
        self.scope.remove_child(child.id());
        child.get()
    }
}

impl std::fmt::Debug for TaskContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}
