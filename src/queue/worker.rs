//! Worker loop: pull the highest-ranked pending task, run it, repeat.

use super::{QueueCore, ScheduledTask};
use std::sync::Arc;

pub(crate) type WorkerId = usize;

pub(crate) struct Worker {
    pub id: WorkerId,
}

impl Worker {
    pub fn new(id: WorkerId) -> Self {
        Self { id }
    }

    /// Main loop. Exits once the queue is closed and nothing is pending;
    /// on graceful shutdown that means draining the backlog first.
    pub fn run(&self, core: &QueueCore) {
        while let Some(task) = self.next_task(core) {
            tracing::trace!(
                worker = self.id,
                task = task.id().as_u64(),
                priority = task.priority(),
                "dispatching task"
            );
            // The task contains panics itself and records them as failures,
            // so the worker survives anything the execution step does.
            task.run();
            core.state.lock().running.remove(&task.id());
        }
    }

    fn next_task(&self, core: &QueueCore) -> Option<Arc<dyn ScheduledTask>> {
        let mut state = core.state.lock();
        loop {
            while let Some(task) = state.pending.take_best() {
                if !task.mark_dispatched() {
                    // canceled while pending; never ran, nothing to do
                    continue;
                }
                state.running.insert(task.id(), task.clone());
                return Some(task);
            }
            if state.closed {
                return None;
            }
            core.available.wait(&mut state);
        }
    }
}
