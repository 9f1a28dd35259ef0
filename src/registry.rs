use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::error;

use crate::task::{Task, TaskKey};

/// All tasks that have been submitted but not yet finalized, keyed by
/// [`TaskKey`]. One mutex guards the whole structure; `snapshot` copies
/// under the lock and releases it before returning, so no caller ever holds
/// the lock across slow work (cancellation in particular may block).
pub(crate) struct Registry {
    items: Mutex<BTreeMap<TaskKey, Task>>,
    drained: Condvar,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(BTreeMap::new()),
            drained: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<TaskKey, Task>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a freshly created task. Key collisions violate the
    /// key-generation contract and cannot happen for a well-formed queue.
    pub fn insert(&self, task: Task) {
        let key = task.key();
        let prev = self.lock().insert(key, task);
        if prev.is_some() {
            error!(%key, "duplicate task key in registry");
            debug_assert!(false, "duplicate task key {key}");
        }
    }

    pub fn remove(&self, key: TaskKey) -> Option<Task> {
        let mut items = self.lock();
        let task = items.remove(&key);
        if items.is_empty() {
            self.drained.notify_all();
        }
        task
    }

    pub fn get(&self, key: TaskKey) -> Option<Task> {
        self.lock().get(&key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Point-in-time copy of all registered tasks, ascending by key.
    /// Unaffected by mutations after the call returns.
    pub fn snapshot(&self) -> Vec<Task> {
        self.lock().values().cloned().collect()
    }

    pub fn wait_empty(&self) {
        let mut items = self.lock();
        while !items.is_empty() {
            items = self
                .drained
                .wait(items)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn wait_empty_timeout(&self, timeout: Duration) -> bool {
        let items = self.lock();
        match self
            .drained
            .wait_timeout_while(items, timeout, |items| !items.is_empty())
        {
            Ok((_, res)) => !res.timed_out(),
            Err(poisoned) => {
                let (_guard, res) = poisoned.into_inner();
                !res.timed_out()
            }
        }
    }
}
