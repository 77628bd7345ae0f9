//! A deque of closures sorted by fire time, kept small enough that a linear
//! insertion scan is cheaper than a heap.
//!
//! Grounded on sockpuppet's `ToDos` (`original_source/src/socket_async_priv.cpp`,
//! the `ToDos::Insert`/`Remove`/`Move` trio): stable insertion after the last
//! entry whose `when` is not later, identity-based removal that tolerates
//! "already gone", and `move` as remove-then-reinsert under a new time.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Identifies a scheduled task independently of its position in the list,
/// so a handle held by a caller on another thread can still find it after
/// the list has reordered around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    fn next() -> TaskId {
        TaskId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

pub struct Task {
    pub id: TaskId,
    pub when: Instant,
    pub what: Box<dyn FnOnce() + Send + 'static>,
}

/// A `when`-sorted queue of pending tasks. Not thread-safe on its own; the
/// driver serializes access behind its step/pause mutex pair.
#[derive(Default)]
pub struct TimedTaskList {
    tasks: VecDeque<Task>,
}

impl TimedTaskList {
    pub fn new() -> TimedTaskList {
        TimedTaskList {
            tasks: VecDeque::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn front(&self) -> Option<&Task> {
        self.tasks.front()
    }

    pub fn pop_front(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    /// Allocate an id and insert a new task, ordered after every existing
    /// entry whose `when` is not later than this one's.
    pub fn schedule(&mut self, when: Instant, what: Box<dyn FnOnce() + Send + 'static>) -> TaskId {
        let id = TaskId::next();
        self.insert(Task { id, when, what });
        id
    }

    fn insert(&mut self, task: Task) {
        let pos = self
            .tasks
            .iter()
            .rposition(|t| t.when <= task.when)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.tasks.insert(pos, task);
    }

    /// Remove a task by id. A no-op if it already fired or was removed.
    pub fn remove(&mut self, id: TaskId) {
        if let Some(pos) = self.tasks.iter().position(|t| t.id == id) {
            self.tasks.remove(pos);
        }
    }

    /// Remove and reinsert a task at a new `when`. A no-op if the task is
    /// no longer present.
    pub fn shift(&mut self, id: TaskId, when: Instant) {
        if let Some(pos) = self.tasks.iter().position(|t| t.id == id) {
            let mut task = self.tasks.remove(pos).unwrap();
            task.when = when;
            self.insert(task);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn at(secs: u64) -> Instant {
        Instant::now() + Duration::from_secs(secs)
    }

    #[test]
    fn fires_in_when_order_regardless_of_insertion_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut list = TimedTaskList::new();

        let push = |o: Arc<Mutex<Vec<i32>>>, n: i32| {
            Box::new(move || o.lock().unwrap().push(n)) as Box<dyn FnOnce() + Send>
        };

        list.schedule(at(3), push(order.clone(), 3));
        list.schedule(at(1), push(order.clone(), 1));
        list.schedule(at(2), push(order.clone(), 2));

        while let Some(task) = list.pop_front() {
            (task.what)();
        }
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn remove_is_a_noop_for_unknown_id() {
        let mut list = TimedTaskList::new();
        let id = list.schedule(at(1), Box::new(|| {}));
        list.remove(id);
        list.remove(id);
        assert!(list.is_empty());
    }

    #[test]
    fn shift_reorders_by_new_when() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut list = TimedTaskList::new();
        let push = |o: Arc<Mutex<Vec<i32>>>, n: i32| {
            Box::new(move || o.lock().unwrap().push(n)) as Box<dyn FnOnce() + Send>
        };

        let a = list.schedule(at(1), push(order.clone(), 1));
        list.schedule(at(2), push(order.clone(), 2));
        list.shift(a, at(5));

        while let Some(task) = list.pop_front() {
            (task.what)();
        }
        assert_eq!(*order.lock().unwrap(), vec![2, 1]);
    }
}
