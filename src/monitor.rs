//! Control-surface hooks.
//!
//! [`Monitor`] is what a front end talks to. It pairs the task store with the
//! watcher registry so every edit lands in storage first and the matching
//! registry call follows:
//!
//! | front-end event     | registry call      |
//! |---------------------|--------------------|
//! | task created        | `start(id)`        |
//! | task completed      | `stop(id)`         |
//! | task deleted        | `stop(id)`         |
//! | process startup     | `start_all_open()` |
//! | process shutdown    | `shutdown()`       |

use std::sync::Arc;

use tracing::info;

use crate::error::Result;
use crate::registry::WatcherRegistry;
use crate::store::TaskStore;
use crate::task::{NewTask, Task, TaskId};

#[derive(Clone)]
pub struct Monitor {
    store: Arc<dyn TaskStore>,
    registry: WatcherRegistry,
}

impl Monitor {
    pub fn new(store: Arc<dyn TaskStore>, registry: WatcherRegistry) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn registry(&self) -> &WatcherRegistry {
        &self.registry
    }

    pub fn on_task_created(&self, task: &Task) {
        if task.is_open() {
            self.registry.start(task.id);
        }
    }

    pub fn on_task_completed(&self, task_id: TaskId) {
        self.registry.stop(task_id);
    }

    pub fn on_task_deleted(&self, task_id: TaskId) {
        self.registry.stop(task_id);
    }

    /// Resume monitoring after a restart. Returns how many watchers started.
    pub fn on_startup(&self) -> Result<usize> {
        let started = self.registry.start_all_open()?;
        info!(started, "monitoring resumed");
        Ok(started)
    }

    pub async fn on_shutdown(&self) {
        self.registry.shutdown().await;
    }

    // =========================================================================
    // Edits that keep storage and watchers in step
    // =========================================================================

    pub fn add_task(&self, task: NewTask) -> Result<Task> {
        let task = self.store.insert(task)?;
        self.on_task_created(&task);
        Ok(task)
    }

    pub fn complete_task(&self, task_id: TaskId) -> Result<Task> {
        let task = self.store.complete(task_id)?;
        self.on_task_completed(task_id);
        Ok(task)
    }

    pub fn delete_task(&self, task_id: TaskId) -> Result<Task> {
        let task = self.store.delete(task_id)?;
        self.on_task_deleted(task_id);
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::sink::AlarmOutbox;
    use crate::store::MemoryTaskStore;
    use crate::watcher::{WatchContext, WatchSettings};
    use std::time::Duration;

    fn monitor() -> Monitor {
        let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
        let (outbox, _rx) = AlarmOutbox::channel();
        let registry = WatcherRegistry::new(WatchContext {
            store: store.clone(),
            clock: Arc::new(SystemClock),
            outbox,
            settings: WatchSettings {
                poll_interval: Duration::from_millis(10),
                ..WatchSettings::default()
            },
        })
        .unwrap();
        Monitor::new(store, registry)
    }

    fn essay() -> NewTask {
        NewTask::new("Essay", "History", "2099-01-01 00:00", "Ms. Rahma")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn edits_drive_the_registry() {
        let monitor = monitor();

        let task = monitor.add_task(essay()).unwrap();
        assert!(monitor.registry().is_watching(task.id));

        monitor.complete_task(task.id).unwrap();
        assert!(!monitor.registry().is_watching(task.id));
        assert!(monitor.store().get_by_id(task.id).unwrap().completed);

        let other = monitor.add_task(essay()).unwrap();
        monitor.delete_task(other.id).unwrap();
        assert!(!monitor.registry().is_watching(other.id));
        assert_eq!(monitor.registry().live_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_edit_leaves_watchers_alone() {
        let monitor = monitor();
        let task = monitor.add_task(essay()).unwrap();

        assert!(monitor.complete_task(task.id + 100).is_err());
        assert!(monitor
            .add_task(NewTask::new("Essay", "History", "tomorrow", "Ms. Rahma"))
            .is_err());
        assert_eq!(monitor.registry().watched_ids(), vec![task.id]);

        monitor.on_shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn startup_resumes_only_open_tasks() {
        let monitor = monitor();
        let open = monitor.store().insert(essay()).unwrap();
        let done = monitor.store().insert(essay()).unwrap();
        monitor.store().complete(done.id).unwrap();

        assert_eq!(monitor.on_startup().unwrap(), 1);
        assert_eq!(monitor.registry().watched_ids(), vec![open.id]);

        // Second startup finds everything already watched.
        assert_eq!(monitor.on_startup().unwrap(), 0);

        monitor.on_shutdown().await;
        monitor.on_shutdown().await;
        assert_eq!(monitor.registry().live_count(), 0);
    }
}
