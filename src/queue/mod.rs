//! Bounded-concurrency priority scheduler for [`PriorityTask`]s.

mod pending;
mod worker;

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::task::{PriorityTask, TaskId, TaskState};
use parking_lot::{Condvar, Mutex};
use pending::PendingSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use worker::Worker;

/// Type-erased view of a [`PriorityTask`], letting one queue schedule
/// tasks of mixed result types.
pub(crate) trait ScheduledTask: Send + Sync {
    fn id(&self) -> TaskId;
    fn priority(&self) -> i32;
    fn state(&self) -> TaskState;
    fn run(&self);
    fn request_cancel(&self) -> bool;
    fn mark_detached(&self);
    fn mark_dispatched(&self) -> bool;
}

impl<T: Clone + Send + 'static> ScheduledTask for PriorityTask<T> {
    fn id(&self) -> TaskId {
        PriorityTask::id(self)
    }

    fn priority(&self) -> i32 {
        PriorityTask::priority(self)
    }

    fn state(&self) -> TaskState {
        PriorityTask::state(self)
    }

    fn run(&self) {
        PriorityTask::run(self);
    }

    fn request_cancel(&self) -> bool {
        PriorityTask::request_cancel(self)
    }

    fn mark_detached(&self) {
        PriorityTask::mark_detached(self);
    }

    fn mark_dispatched(&self) -> bool {
        PriorityTask::mark_dispatched(self)
    }
}

pub(crate) struct QueueState {
    pub pending: PendingSet,
    /// Tasks currently executing on a worker, so `shutdown_now` can reach
    /// them with a cancellation request.
    pub running: HashMap<TaskId, Arc<dyn ScheduledTask>>,
    pub closed: bool,
}

pub(crate) struct QueueCore {
    pub state: Mutex<QueueState>,
    pub available: Condvar,
}

/// A fixed pool of workers executing [`PriorityTask`]s in
/// `(priority desc, submission order asc)` dispatch order.
///
/// Pending tasks can be re-prioritized or removed until a worker dequeues
/// them. [`shutdown`](PriorityTaskQueue::shutdown) drains the backlog
/// gracefully; [`shutdown_now`](PriorityTaskQueue::shutdown_now) cancels
/// everything pending and in flight, then waits for the workers to go
/// idle. A queue dropped without either performs a graceful shutdown.
pub struct PriorityTaskQueue {
    core: Arc<QueueCore>,
    workers: Vec<JoinHandle<()>>,
    num_workers: usize,
}

impl PriorityTaskQueue {
    /// Creates a queue with `workers` worker threads, started immediately.
    pub fn new(workers: usize) -> Result<Self> {
        Self::with_config(QueueConfig {
            workers: Some(workers),
            ..QueueConfig::default()
        })
    }

    /// Creates a queue from a full [`QueueConfig`].
    pub fn with_config(config: QueueConfig) -> Result<Self> {
        config.validate()?;
        let num_workers = config.worker_threads();

        let core = Arc::new(QueueCore {
            state: Mutex::new(QueueState {
                pending: PendingSet::new(),
                running: HashMap::new(),
                closed: false,
            }),
            available: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(num_workers);
        for id in 0..num_workers {
            let worker = Worker::new(id);
            let core = Arc::clone(&core);
            let name = format!("{}-{}", config.thread_name_prefix, id);

            let mut builder = thread::Builder::new().name(name);
            if let Some(stack_size) = config.stack_size {
                builder = builder.stack_size(stack_size);
            }

            let handle = builder
                .spawn(move || worker.run(&core))
                .map_err(|e| Error::queue(format!("spawn failed: {e}")))?;
            workers.push(handle);
        }

        Ok(Self {
            core,
            workers,
            num_workers,
        })
    }

    /// Submits a task. Its execution step will run on a worker once it is
    /// the highest-ranked pending task.
    ///
    /// Fails with `IllegalState` if the queue has been shut down (either
    /// mode), if the task is already submitted somewhere, or if it is
    /// already terminal (e.g. canceled before submission).
    pub fn add<T: Clone + Send + 'static>(&self, task: &PriorityTask<T>) -> Result<()> {
        let mut state = self.core.state.lock();
        if state.closed {
            return Err(Error::illegal_state("queue is shut down"));
        }
        task.mark_pending()?;
        state.pending.push(Arc::new(task.clone()));
        self.core.available.notify_one();
        Ok(())
    }

    /// Withdraws a still-pending task. Returns true only if the task had
    /// not been dequeued by a worker; the task itself is untouched (still
    /// `Initial`) and may be resubmitted here or elsewhere as if fresh.
    ///
    /// Returns false for running, terminal, or unknown tasks; a running
    /// task can only be abandoned via
    /// [`request_cancel`](PriorityTask::request_cancel).
    pub fn remove<T: Clone + Send + 'static>(&self, task: &PriorityTask<T>) -> bool {
        let mut state = self.core.state.lock();
        match state.pending.remove(task.id()) {
            Some(entry) => {
                if entry.state().is_terminal() {
                    // canceled while pending; it was never going to run
                    return false;
                }
                entry.mark_detached();
                true
            }
            None => false,
        }
    }

    /// Number of submitted tasks not yet dispatched to a worker.
    pub fn pending_tasks(&self) -> usize {
        self.core.state.lock().pending.len()
    }

    /// Size of the worker pool.
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Graceful shutdown: stops accepting tasks, lets everything already
    /// pending or running finish, and joins the workers.
    pub fn shutdown(&mut self) {
        self.core.state.lock().closed = true;
        self.core.available.notify_all();
        self.join_workers();
    }

    /// Immediate shutdown: stops accepting tasks, discards the pending set,
    /// requests cancellation of every pending and running task, and blocks
    /// until all workers have exited.
    ///
    /// Pending tasks resolve to `Canceled` here; running tasks resolve once
    /// their execution step observes the request.
    pub fn shutdown_now(&mut self) {
        let (pending, running) = {
            let mut state = self.core.state.lock();
            state.closed = true;
            let pending = state.pending.drain();
            let running: Vec<_> = state.running.values().cloned().collect();
            (pending, running)
        };
        self.core.available.notify_all();

        // outside the queue lock: cancellation fires task callbacks
        for task in pending.iter().chain(running.iter()) {
            task.request_cancel();
        }

        self.join_workers();
    }

    fn join_workers(&mut self) {
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("queue worker panicked");
            }
        }
    }
}

impl Drop for PriorityTaskQueue {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.shutdown();
        }
    }
}

impl std::fmt::Debug for PriorityTaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityTaskQueue")
            .field("num_workers", &self.num_workers)
            .field("pending", &self.pending_tasks())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::task::{TaskCallback, TaskContext, PRIORITY_DEFAULT};
    use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    enum Finish {
        Value(i32),
        Error,
    }

    /// A task that blocks on its worker until told how to finish, modeled
    /// after the harness the original queue tests used: it reports when it
    /// starts running and resolves to a value, an error, or cancellation.
    struct TestTask {
        task: PriorityTask<i32>,
        started: Receiver<()>,
        finish: Sender<Finish>,
    }

    impl TestTask {
        fn new(priority: i32) -> Self {
            let (started_tx, started) = bounded(1);
            let (finish, finish_rx) = unbounded::<Finish>();
            let task = PriorityTask::with_priority(
                move |ctx: &TaskContext| {
                    let _ = started_tx.send(());
                    select! {
                        recv(finish_rx) -> msg => match msg {
                            Ok(Finish::Value(v)) => Ok(v),
                            Ok(Finish::Error) => {
                                Err(Error::execution(std::io::Error::other("task harness failure")))
                            }
                            Err(_) => Err(Error::Canceled),
                        },
                        recv(ctx.canceled()) -> _ => Err(Error::Canceled),
                    }
                },
                priority,
            );
            Self {
                task,
                started,
                finish,
            }
        }

        fn wait_until_running(&self) {
            self.started
                .recv_timeout(WAIT)
                .expect("task never started running");
        }

        fn complete(&self, value: i32) {
            let _ = self.finish.send(Finish::Value(value));
        }

        fn fail(&self) {
            let _ = self.finish.send(Finish::Error);
        }
    }

    /// Records terminal-callback order, like the original TaskCollector.
    struct Collector {
        tx: Sender<TaskId>,
    }

    impl TaskCallback<i32> for Collector {
        fn on_result_available(&self, task: &PriorityTask<i32>, _result: &i32) {
            let _ = self.tx.send(task.id());
        }

        fn on_canceled(&self, _task: &PriorityTask<i32>) {}

        fn on_fail(&self, _task: &PriorityTask<i32>, _error: &Error) {}
    }

    fn completion_order(tasks: &[&TestTask]) -> Receiver<TaskId> {
        let (tx, rx) = unbounded();
        for test in tasks {
            test.task.add_callback(Collector { tx: tx.clone() }).unwrap();
        }
        rx
    }

    #[test]
    fn test_one_task() {
        let mut queue = PriorityTaskQueue::new(1).unwrap();
        let test = TestTask::new(PRIORITY_DEFAULT);
        queue.add(&test.task).unwrap();
        test.complete(0);
        assert_eq!(test.task.get().unwrap(), 0);
        queue.shutdown();
    }

    #[test]
    fn test_shutdown_now_cancels_running_and_pending() {
        let mut queue = PriorityTaskQueue::new(1).unwrap();
        let running = TestTask::new(0);
        let pending = TestTask::new(0);
        queue.add(&running.task).unwrap();
        queue.add(&pending.task).unwrap();
        running.wait_until_running();

        queue.shutdown_now();

        assert!(matches!(running.task.get(), Err(Error::Canceled)));
        assert!(matches!(pending.task.get(), Err(Error::Canceled)));
    }

    #[test]
    fn test_cancel_running_task() {
        let mut queue = PriorityTaskQueue::new(3).unwrap();
        let test = TestTask::new(0);
        queue.add(&test.task).unwrap();
        test.wait_until_running();

        assert!(test.task.request_cancel());
        assert!(matches!(test.task.get(), Err(Error::Canceled)));
        queue.shutdown_now();
    }

    #[test]
    fn test_cancel_queued_task() {
        let mut queue = PriorityTaskQueue::new(1).unwrap();
        let running = TestTask::new(0);
        let victim = TestTask::new(0);
        queue.add(&running.task).unwrap();
        running.wait_until_running();
        queue.add(&victim.task).unwrap();

        assert!(victim.task.request_cancel());
        assert!(matches!(victim.task.get(), Err(Error::Canceled)));

        queue.shutdown_now();
        assert!(matches!(running.task.get(), Err(Error::Canceled)));
    }

    #[test]
    fn test_task_failure_reaches_get() {
        let mut queue = PriorityTaskQueue::new(1).unwrap();
        let test = TestTask::new(0);
        queue.add(&test.task).unwrap();
        test.fail();

        let err = test.task.get().unwrap_err();
        assert!(err.cause().unwrap().to_string().contains("harness failure"));
        queue.shutdown_now();
    }

    #[test]
    fn test_priority_order() {
        let mut queue = PriorityTaskQueue::new(1).unwrap();
        let blocker = TestTask::new(0);
        queue.add(&blocker.task).unwrap();
        blocker.wait_until_running();

        let t0 = TestTask::new(0);
        let t1 = TestTask::new(1);
        let t2 = TestTask::new(2);
        let order = completion_order(&[&t0, &t1, &t2]);

        queue.add(&t0.task).unwrap();
        queue.add(&t1.task).unwrap();
        queue.add(&t2.task).unwrap();

        for test in [&t0, &t1, &t2] {
            test.complete(0);
        }
        blocker.complete(0);

        assert_eq!(order.recv_timeout(WAIT).unwrap(), t2.task.id());
        assert_eq!(order.recv_timeout(WAIT).unwrap(), t1.task.id());
        assert_eq!(order.recv_timeout(WAIT).unwrap(), t0.task.id());
        queue.shutdown();
    }

    #[test]
    fn test_equal_priority_dispatches_in_submission_order() {
        let mut queue = PriorityTaskQueue::new(1).unwrap();
        let blocker = TestTask::new(0);
        queue.add(&blocker.task).unwrap();
        blocker.wait_until_running();

        let a = TestTask::new(0);
        let b = TestTask::new(0);
        let c = TestTask::new(0);
        let order = completion_order(&[&a, &b, &c]);

        queue.add(&a.task).unwrap();
        queue.add(&b.task).unwrap();
        queue.add(&c.task).unwrap();

        for test in [&a, &b, &c] {
            test.complete(0);
        }
        blocker.complete(0);

        assert_eq!(order.recv_timeout(WAIT).unwrap(), a.task.id());
        assert_eq!(order.recv_timeout(WAIT).unwrap(), b.task.id());
        assert_eq!(order.recv_timeout(WAIT).unwrap(), c.task.id());
        queue.shutdown();
    }

    #[test]
    fn test_reprioritize_pending_tasks() {
        let mut queue = PriorityTaskQueue::new(1).unwrap();
        let blocker = TestTask::new(0);
        queue.add(&blocker.task).unwrap();
        blocker.wait_until_running();

        let t0 = TestTask::new(0);
        let t1 = TestTask::new(1);
        let t2 = TestTask::new(2);
        let order = completion_order(&[&t0, &t1, &t2]);

        queue.add(&t0.task).unwrap();
        queue.add(&t1.task).unwrap();
        queue.add(&t2.task).unwrap();

        // swap the leaders while everything still sits in the pending set
        t1.task.set_priority(2);
        t2.task.set_priority(1);

        for test in [&t0, &t1, &t2] {
            test.complete(0);
        }
        blocker.complete(0);

        assert_eq!(order.recv_timeout(WAIT).unwrap(), t1.task.id());
        assert_eq!(order.recv_timeout(WAIT).unwrap(), t2.task.id());
        assert_eq!(order.recv_timeout(WAIT).unwrap(), t0.task.id());
        queue.shutdown();
    }

    #[test]
    fn test_remove_pending_task_then_resubmit() {
        let mut queue = PriorityTaskQueue::new(1).unwrap();
        let running = TestTask::new(0);
        queue.add(&running.task).unwrap();
        running.wait_until_running();

        let test = TestTask::new(0);
        queue.add(&test.task).unwrap();
        assert!(queue.remove(&test.task));
        assert_eq!(test.task.state(), TaskState::Initial);
        assert!(!queue.remove(&test.task), "already removed");
        running.complete(0);

        // a removed task resubmits as if fresh
        queue.add(&test.task).unwrap();
        test.complete(0);
        assert_eq!(test.task.get().unwrap(), 0);
        queue.shutdown();
    }

    #[test]
    fn test_remove_running_task_is_refused() {
        let mut queue = PriorityTaskQueue::new(1).unwrap();
        let test = TestTask::new(0);
        queue.add(&test.task).unwrap();
        test.wait_until_running();

        assert!(!queue.remove(&test.task));
        test.complete(0);
        assert_eq!(test.task.get().unwrap(), 0);
        queue.shutdown();
    }

    #[test]
    fn test_add_after_shutdown_is_illegal() {
        let mut queue = PriorityTaskQueue::new(1).unwrap();
        queue.shutdown();
        let test = TestTask::new(0);
        assert!(matches!(
            queue.add(&test.task),
            Err(Error::IllegalState(_))
        ));
    }

    #[test]
    fn test_add_after_shutdown_now_is_illegal() {
        let mut queue = PriorityTaskQueue::new(1).unwrap();
        queue.shutdown_now();
        let test = TestTask::new(0);
        assert!(matches!(
            queue.add(&test.task),
            Err(Error::IllegalState(_))
        ));
    }

    #[test]
    fn test_double_add_is_illegal() {
        let mut queue = PriorityTaskQueue::new(1).unwrap();
        let blocker = TestTask::new(0);
        queue.add(&blocker.task).unwrap();
        blocker.wait_until_running();

        let test = TestTask::new(0);
        queue.add(&test.task).unwrap();
        assert!(matches!(
            queue.add(&test.task),
            Err(Error::IllegalState(_))
        ));

        blocker.complete(0);
        test.complete(0);
        queue.shutdown();
    }

    #[test]
    fn test_add_canceled_task_is_illegal() {
        let mut queue = PriorityTaskQueue::new(1).unwrap();
        let test = TestTask::new(0);
        test.task.request_cancel();
        assert!(matches!(
            queue.add(&test.task),
            Err(Error::IllegalState(_))
        ));
        queue.shutdown();
    }

    #[test]
    fn test_graceful_shutdown_drains_backlog() {
        let mut queue = PriorityTaskQueue::new(1).unwrap();
        let tasks: Vec<PriorityTask<i32>> = (0..4)
            .map(|i| PriorityTask::new(move |_ctx| Ok(i)))
            .collect();
        for task in &tasks {
            queue.add(task).unwrap();
        }
        queue.shutdown();
        for (i, task) in tasks.iter().enumerate() {
            assert_eq!(task.get().unwrap(), i as i32);
        }
    }

    #[test]
    fn test_pending_count() {
        let mut queue = PriorityTaskQueue::new(1).unwrap();
        let blocker = TestTask::new(0);
        queue.add(&blocker.task).unwrap();
        blocker.wait_until_running();
        assert_eq!(queue.pending_tasks(), 0);

        let test = TestTask::new(0);
        queue.add(&test.task).unwrap();
        assert_eq!(queue.pending_tasks(), 1);

        blocker.complete(0);
        test.complete(0);
        queue.shutdown();
        assert_eq!(queue.pending_tasks(), 0);
    }
}
