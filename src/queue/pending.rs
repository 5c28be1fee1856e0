//! The ordered multiset of tasks submitted but not yet dispatched.

use super::ScheduledTask;
use crate::task::TaskId;
use std::cmp::Reverse;
use std::sync::Arc;

/// Pending tasks, dequeued by `(priority desc, submission id asc)`.
///
/// The rank is computed at dequeue time from the task's *current* priority,
/// so re-prioritizing a still-pending task changes its effective rank for
/// the next dequeue decision. A scanned vec instead of a heap keeps that
/// correct under mutable priorities and supports removal by identity; the
/// pending set is small and sits behind the queue lock anyway.
pub(crate) struct PendingSet {
    tasks: Vec<Arc<dyn ScheduledTask>>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn push(&mut self, task: Arc<dyn ScheduledTask>) {
        self.tasks.push(task);
    }

    /// Removes and returns the highest-ranked task.
    pub fn take_best(&mut self) -> Option<Arc<dyn ScheduledTask>> {
        let best = self
            .tasks
            .iter()
            .enumerate()
            .max_by_key(|(_, task)| (task.priority(), Reverse(task.id())))?
            .0;
        Some(self.tasks.swap_remove(best))
    }

    /// Removes the task with the given id, if still pending.
    pub fn remove(&mut self, id: TaskId) -> Option<Arc<dyn ScheduledTask>> {
        let index = self.tasks.iter().position(|task| task.id() == id)?;
        Some(self.tasks.swap_remove(index))
    }

    /// Empties the set, returning everything that was pending.
    pub fn drain(&mut self) -> Vec<Arc<dyn ScheduledTask>> {
        std::mem::take(&mut self.tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::PriorityTask;

    fn pending_task(priority: i32) -> (PriorityTask<i32>, Arc<dyn ScheduledTask>) {
        let task = PriorityTask::with_priority(|_ctx| Ok(0), priority);
        task.mark_pending().unwrap();
        let erased: Arc<dyn ScheduledTask> = Arc::new(task.clone());
        (task, erased)
    }

    #[test]
    fn test_descending_priority_order() {
        let mut set = PendingSet::new();
        let (t0, e0) = pending_task(0);
        let (t1, e1) = pending_task(1);
        let (t2, e2) = pending_task(2);
        set.push(e0);
        set.push(e1);
        set.push(e2);

        assert_eq!(set.take_best().unwrap().id(), t2.id());
        assert_eq!(set.take_best().unwrap().id(), t1.id());
        assert_eq!(set.take_best().unwrap().id(), t0.id());
        assert!(set.is_empty());
    }

    #[test]
    fn test_equal_priority_ties_break_by_submission_order() {
        let mut set = PendingSet::new();
        let (a, ea) = pending_task(0);
        let (b, eb) = pending_task(0);
        let (c, ec) = pending_task(0);
        // push out of order; submission ids still decide
        set.push(ec);
        set.push(ea);
        set.push(eb);

        assert_eq!(set.take_best().unwrap().id(), a.id());
        assert_eq!(set.take_best().unwrap().id(), b.id());
        assert_eq!(set.take_best().unwrap().id(), c.id());
    }

    #[test]
    fn test_reprioritize_pending_changes_next_dequeue() {
        let mut set = PendingSet::new();
        let (t0, e0) = pending_task(0);
        let (t1, e1) = pending_task(1);
        let (t2, e2) = pending_task(2);
        set.push(e0);
        set.push(e1);
        set.push(e2);

        t1.set_priority(2);
        t2.set_priority(1);

        assert_eq!(set.take_best().unwrap().id(), t1.id());
        assert_eq!(set.take_best().unwrap().id(), t2.id());
        assert_eq!(set.take_best().unwrap().id(), t0.id());
    }

    #[test]
    fn test_remove_by_id() {
        let mut set = PendingSet::new();
        let (t0, e0) = pending_task(0);
        let (t1, e1) = pending_task(0);
        set.push(e0);
        set.push(e1);

        assert!(set.remove(t1.id()).is_some());
        assert!(set.remove(t1.id()).is_none());
        assert_eq!(set.len(), 1);
        assert_eq!(set.take_best().unwrap().id(), t0.id());
    }
}
