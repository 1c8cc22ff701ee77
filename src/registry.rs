//! Watcher registry.
//!
//! Owns the map `task id → live watcher`. The control surface starts and stops
//! watchers; a watcher whose task completes, disappears or fails removes
//! itself. Both paths go through one mutex, and self-removal is keyed by the
//! watcher's instance number so a slow-exiting old watcher can never evict the
//! replacement registered after it.
//!
//! A watcher that stopped on a malformed deadline leaves the task parked under
//! that deadline text. Bulk resumes skip parked tasks until the text changes,
//! so one bad record is reported once rather than on every rescan. An explicit
//! [`WatcherRegistry::start`] always unparks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::task::TaskId;
use crate::watcher::{StopReason, WatchContext, Watcher};

struct WatchHandle {
    instance: u64,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

#[derive(Default)]
struct Slots {
    live: HashMap<TaskId, WatchHandle>,
    /// Tasks whose watcher failed on this raw deadline text.
    parked: HashMap<TaskId, String>,
}

struct Inner {
    ctx: WatchContext,
    runtime: Handle,
    next_instance: AtomicU64,
    slots: Mutex<Slots>,
}

impl Inner {
    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn retire(&self, task_id: TaskId, instance: u64, reason: StopReason) {
        let mut slots = self.slots();
        if !slots
            .live
            .get(&task_id)
            .is_some_and(|handle| handle.instance == instance)
        {
            return;
        }
        slots.live.remove(&task_id);
        debug!(task_id, instance, reason = ?reason, "watcher unregistered itself");
        if let StopReason::Failed {
            deadline: Some(deadline),
            ..
        } = reason
        {
            slots.parked.insert(task_id, deadline);
        }
    }
}

/// Cheap to clone; clones share the same map.
#[derive(Clone)]
pub struct WatcherRegistry {
    inner: Arc<Inner>,
}

impl WatcherRegistry {
    /// Build a registry that spawns watchers on the current tokio runtime.
    pub fn new(ctx: WatchContext) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|err| {
            Error::OperationFailed(format!("watcher registry needs a tokio runtime: {err}"))
        })?;
        Ok(Self::with_runtime(ctx, runtime))
    }

    pub fn with_runtime(ctx: WatchContext, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                ctx,
                runtime,
                next_instance: AtomicU64::new(1),
                slots: Mutex::new(Slots::default()),
            }),
        }
    }

    /// Start watching `task_id`. No-op if a live watcher already exists.
    ///
    /// Returns whether a new watcher was started.
    pub fn start(&self, task_id: TaskId) -> bool {
        let mut slots = self.inner.slots();
        slots.parked.remove(&task_id);
        self.spawn_locked(&mut slots, task_id)
    }

    fn spawn_locked(&self, slots: &mut Slots, task_id: TaskId) -> bool {
        if slots.live.contains_key(&task_id) {
            return false;
        }

        let instance = self.inner.next_instance.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let watcher = Watcher::new(task_id, instance, self.inner.ctx.clone(), cancel.clone());
        let registry = Arc::downgrade(&self.inner);

        // Registered under the lock before the task can observe the map, so
        // its self-removal always finds its own entry (or a later one).
        let join = self.inner.runtime.spawn(async move {
            let reason = watcher.run().await;
            if let Some(inner) = registry.upgrade() {
                inner.retire(task_id, instance, reason);
            }
        });

        slots.live.insert(
            task_id,
            WatchHandle {
                instance,
                cancel,
                join,
            },
        );
        info!(task_id, instance, "watching task");
        true
    }

    /// Cancel and unregister the watcher for `task_id`, if any.
    ///
    /// Returns whether a watcher was registered.
    pub fn stop(&self, task_id: TaskId) -> bool {
        let handle = {
            let mut slots = self.inner.slots();
            slots.parked.remove(&task_id);
            slots.live.remove(&task_id)
        };
        match handle {
            Some(handle) => {
                handle.cancel.cancel();
                info!(task_id, instance = handle.instance, "stopped watching task");
                true
            }
            None => false,
        }
    }

    /// Start a watcher for every open task in the store, except tasks parked
    /// on a deadline that has not been edited since.
    ///
    /// Returns how many new watchers were started.
    pub fn start_all_open(&self) -> Result<usize> {
        let tasks = self.inner.ctx.store.list_all()?;
        let mut slots = self.inner.slots();
        let mut started = 0;
        for task in tasks.iter().filter(|task| task.is_open()) {
            if let Some(parked) = slots.parked.get(&task.id) {
                if *parked == task.deadline {
                    continue;
                }
                debug!(task_id = task.id, "deadline edited; watching again");
                slots.parked.remove(&task.id);
            }
            if self.spawn_locked(&mut slots, task.id) {
                started += 1;
            }
        }
        debug!(started, total = tasks.len(), "resumed watchers for open tasks");
        Ok(started)
    }

    /// Stop every watcher and wait for each to exit. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let drained: Vec<(TaskId, WatchHandle)> = self.inner.slots().live.drain().collect();
        if drained.is_empty() {
            return;
        }

        for (_, handle) in &drained {
            handle.cancel.cancel();
        }
        let count = drained.len();
        for (task_id, handle) in drained {
            if let Err(err) = handle.join.await {
                warn!(task_id, error = %err, "watcher task ended abnormally");
            }
        }
        info!(count, "all watchers stopped");
    }

    pub fn is_watching(&self, task_id: TaskId) -> bool {
        self.inner.slots().live.contains_key(&task_id)
    }

    /// Whether `task_id` is held back after a malformed deadline.
    pub fn is_parked(&self, task_id: TaskId) -> bool {
        self.inner.slots().parked.contains_key(&task_id)
    }

    pub fn live_count(&self) -> usize {
        self.inner.slots().live.len()
    }

    /// Watched task ids, ascending.
    pub fn watched_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.inner.slots().live.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
