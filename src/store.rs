//! Task storage
//!
//! [`TaskStore`] is the contract watchers and the control surface share. Reads
//! hand out owned clones of whole records, so a watcher never observes a task
//! halfway through an update.
//!
//! Two implementations:
//! - [`MemoryTaskStore`]: process-local, `RwLock`-guarded.
//! - [`FileTaskStore`]: a JSON document on disk, shared between processes
//!   through an advisory lock and atomic replace.
//!
//! ```text
//! tasks.json
//! {
//!   "next_id": 4,
//!   "tasks": [ { "id": 1, "title": ..., "deadline": "2026-05-10 23:59", ... } ]
//! }
//! ```
//!
//! Ids come from `next_id`, which only grows, so a deleted task's id is never
//! handed out again.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::lock::{self, DEFAULT_LOCK_TIMEOUT_MS};
use crate::task::{NewTask, Task, TaskId};

pub trait TaskStore: Send + Sync {
    /// Snapshot of one task.
    fn get_by_id(&self, id: TaskId) -> Result<Task>;

    /// Snapshot of every task, in insertion order.
    fn list_all(&self) -> Result<Vec<Task>>;

    fn insert(&self, task: NewTask) -> Result<Task>;

    /// Mark a task completed. Completing twice is not an error.
    fn complete(&self, id: TaskId) -> Result<Task>;

    fn delete(&self, id: TaskId) -> Result<Task>;
}

/// On-disk and in-memory shape of the task collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskDocument {
    #[serde(default)]
    pub next_id: TaskId,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// Older task files are a bare array of tasks.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredTasks {
    Document(TaskDocument),
    Legacy(Vec<Task>),
}

impl TaskDocument {
    fn normalized(mut self) -> Self {
        let floor = self.tasks.iter().map(|task| task.id).max().unwrap_or(0) + 1;
        if self.next_id < floor {
            self.next_id = floor;
        }
        self
    }

    pub fn find(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    fn insert(&mut self, task: NewTask, clock: &dyn Clock) -> Result<Task> {
        let task = task.validate()?;
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        let task = task.into_task(id, clock.now());
        self.tasks.push(task.clone());
        Ok(task)
    }

    fn complete(&mut self, id: TaskId) -> Result<Task> {
        let task = self
            .tasks
            .iter_mut()
            .find(|task| task.id == id)
            .ok_or(Error::TaskNotFound(id))?;
        task.completed = true;
        Ok(task.clone())
    }

    fn delete(&mut self, id: TaskId) -> Result<Task> {
        let index = self
            .tasks
            .iter()
            .position(|task| task.id == id)
            .ok_or(Error::TaskNotFound(id))?;
        Ok(self.tasks.remove(index))
    }
}

pub fn parse_document(raw: &str) -> Result<TaskDocument> {
    if raw.trim().is_empty() {
        return Ok(TaskDocument::default().normalized());
    }
    let doc = match serde_json::from_str::<StoredTasks>(raw)? {
        StoredTasks::Document(doc) => doc,
        StoredTasks::Legacy(tasks) => TaskDocument { next_id: 0, tasks },
    };
    Ok(doc.normalized())
}

// =============================================================================
// In-memory store
// =============================================================================

pub struct MemoryTaskStore {
    doc: RwLock<TaskDocument>,
    clock: Box<dyn Clock>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::with_clock(Box::new(SystemClock))
    }

    pub fn with_clock(clock: Box<dyn Clock>) -> Self {
        Self {
            doc: RwLock::new(TaskDocument::default().normalized()),
            clock,
        }
    }

    /// Insert a record verbatim, bypassing validation.
    ///
    /// Lets callers seed tasks the way a hand-edited file would hold them,
    /// malformed deadlines included.
    pub fn insert_raw(&self, task: Task) {
        let mut doc = self.write();
        doc.tasks.push(task);
        let taken = std::mem::take(&mut *doc);
        *doc = taken.normalized();
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, TaskDocument> {
        self.doc.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, TaskDocument> {
        self.doc.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore for MemoryTaskStore {
    fn get_by_id(&self, id: TaskId) -> Result<Task> {
        self.read().find(id).cloned().ok_or(Error::TaskNotFound(id))
    }

    fn list_all(&self) -> Result<Vec<Task>> {
        Ok(self.read().tasks.clone())
    }

    fn insert(&self, task: NewTask) -> Result<Task> {
        self.write().insert(task, self.clock.as_ref())
    }

    fn complete(&self, id: TaskId) -> Result<Task> {
        self.write().complete(id)
    }

    fn delete(&self, id: TaskId) -> Result<Task> {
        self.write().delete(id)
    }
}

// =============================================================================
// File store
// =============================================================================

pub struct FileTaskStore {
    path: PathBuf,
    lock_timeout_ms: u64,
}

impl FileTaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }

    pub fn with_lock_timeout(mut self, timeout_ms: u64) -> Self {
        self.lock_timeout_ms = timeout_ms;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the whole document under the file lock.
    pub fn load(&self) -> Result<TaskDocument> {
        lock::with_lock(&self.path, self.lock_timeout_ms, || self.read_unlocked())
    }

    fn read_unlocked(&self) -> Result<TaskDocument> {
        if !self.path.exists() {
            return Ok(TaskDocument::default().normalized());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        parse_document(&raw)
    }

    fn update<T>(&self, mutate: impl FnOnce(&mut TaskDocument) -> Result<T>) -> Result<T> {
        lock::with_lock(&self.path, self.lock_timeout_ms, || {
            let mut doc = self.read_unlocked()?;
            let result = mutate(&mut doc)?;
            let json = serde_json::to_string_pretty(&doc)?;
            lock::write_atomic(&self.path, json.as_bytes())?;
            debug!(path = %self.path.display(), tasks = doc.tasks.len(), "task file written");
            Ok(result)
        })
    }
}

impl TaskStore for FileTaskStore {
    fn get_by_id(&self, id: TaskId) -> Result<Task> {
        self.load()?.find(id).cloned().ok_or(Error::TaskNotFound(id))
    }

    fn list_all(&self) -> Result<Vec<Task>> {
        Ok(self.load()?.tasks)
    }

    fn insert(&self, task: NewTask) -> Result<Task> {
        self.update(|doc| doc.insert(task, &SystemClock))
    }

    fn complete(&self, id: TaskId) -> Result<Task> {
        self.update(|doc| doc.complete(id))
    }

    fn delete(&self, id: TaskId) -> Result<Task> {
        self.update(|doc| doc.delete(id))
    }
}
