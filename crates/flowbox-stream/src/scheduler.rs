use flowbox_core::ConversationId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::AbortHandle;

/// Identifies a timer-driven task. Scheduling a key that is already running
/// replaces the old task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskKey {
    Poll,
    Countdown(ConversationId),
}

#[derive(Debug)]
struct ScheduledTask {
    generation: u64,
    handle: AbortHandle,
}

/// Owns every background task the engine starts. Dropping it aborts them.
#[derive(Debug, Default)]
pub struct Scheduler {
    tasks: Mutex<HashMap<TaskKey, ScheduledTask>>,
    next_generation: AtomicU64,
}

impl Scheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskKey, ScheduledTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns `task` under `key`. The entry is removed when the task
    /// finishes on its own. A task must not cancel its own key.
    pub fn schedule<F>(self: &Arc<Self>, key: TaskKey, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let scheduler = Arc::downgrade(self);
        let finished_key = key.clone();

        let mut tasks = self.tasks();
        if let Some(previous) = tasks.remove(&key) {
            tracing::debug!(?key, "replacing scheduled task");
            previous.handle.abort();
        }

        let handle = tokio::spawn(async move {
            task.await;
            if let Some(scheduler) = scheduler.upgrade() {
                scheduler.finish(&finished_key, generation);
            }
        })
        .abort_handle();

        tasks.insert(key, ScheduledTask { generation, handle });
    }

    fn finish(&self, key: &TaskKey, generation: u64) {
        let mut tasks = self.tasks();
        if tasks.get(key).map(|task| task.generation) == Some(generation) {
            tasks.remove(key);
        }
    }

    /// Aborts the task under `key`. Returns whether one was running.
    pub fn cancel(&self, key: &TaskKey) -> bool {
        match self.tasks().remove(key) {
            Some(task) => {
                task.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, key: &TaskKey) -> bool {
        self.tasks().contains_key(key)
    }

    pub fn active(&self) -> usize {
        self.tasks().len()
    }

    pub fn cancel_all(&self) {
        let drained = self.tasks().drain().map(|(_, task)| task).collect::<Vec<_>>();
        for task in drained {
            task.handle.abort();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
