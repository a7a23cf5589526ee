//! Deferred execution of tasks: everything submitted runs after the turn
//! that submitted it, in submission order.
use std::{cell::RefCell, collections::VecDeque, fmt};

pub type Task = Box<dyn FnOnce()>;

/// Where a deferred's initializer gets submitted.
///
/// Swap in another implementation through
/// [`Runtime::with_scheduler`](crate::Runtime::with_scheduler), e.g. one that
/// records or reorders tasks for a test.
pub trait Schedule {
    fn submit(&self, task: Task);

    /// Runs the oldest queued task. Returns `false` if nothing was queued.
    fn run_next(&self) -> bool;

    /// Runs tasks until the queue is empty, including tasks submitted by the
    /// tasks being run. Returns how many ran.
    fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }
}

/// FIFO queue of tasks for one thread.
#[derive(Default)]
pub struct TaskQueue {
    tasks: RefCell<VecDeque<Task>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue").field("len", &self.len()).finish()
    }
}

impl Schedule for TaskQueue {
    fn submit(&self, task: Task) {
        let mut tasks = self.tasks.borrow_mut();
        tasks.push_back(task);
        tracing::trace!(queued = tasks.len(), "task submitted");
    }

    fn run_next(&self) -> bool {
        // The borrow must end before the task runs; tasks submit more tasks.
        let task = self.tasks.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
use super::*;
use std::rc::Rc;

#[test]
fn test_runs_in_submission_order() {
    let queue = TaskQueue::new();
    let log = Rc::new(RefCell::new(vec![]));
    for i in 0..3 {
        let log = log.clone();
        queue.submit(Box::new(move || log.borrow_mut().push(i)));
    }
    assert!(log.borrow().is_empty());
    assert_eq!(queue.run_until_idle(), 3);
    assert_eq!(*log.borrow(), vec![0, 1, 2]);
}

#[test]
fn test_tasks_submitted_while_draining_run_last() {
    let queue = Rc::new(TaskQueue::new());
    let log = Rc::new(RefCell::new(vec![]));
    let (q, l) = (queue.clone(), log.clone());
    queue.submit(Box::new(move || {
        l.borrow_mut().push("outer");
        let l = l.clone();
        q.submit(Box::new(move || l.borrow_mut().push("inner")));
    }));
    let l = log.clone();
    queue.submit(Box::new(move || l.borrow_mut().push("second")));
    assert_eq!(queue.run_until_idle(), 3);
    assert_eq!(*log.borrow(), vec!["outer", "second", "inner"]);
    assert!(queue.is_empty());
}

#[test]
fn test_run_next_on_empty_queue() {
    let queue = TaskQueue::new();
    assert!(!queue.run_next());
    assert_eq!(queue.run_until_idle(), 0);
}
}
