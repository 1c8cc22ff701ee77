//! Alarm delivery.
//!
//! Watchers never call a sink directly. They post [`Notice`]s to an
//! [`AlarmOutbox`]; one dispatcher thread drains the queue in FIFO order and
//! hands each notice to the configured [`AlarmSink`]. A slow sink (the overdue
//! bell pauses between rings) or a failing one therefore never stalls or
//! breaks a watcher, and each watcher's notices arrive in the order it posted
//! them.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::policy::Tier;
use crate::task::{Task, TaskId};

pub const ALARM_SCHEMA_VERSION: &str = "duewatch.alarm.v1";

/// A reminder fired by a watcher.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AlarmEvent {
    pub task_id: TaskId,
    pub tier: Tier,
    pub task: Task,
    pub timestamp: NaiveDateTime,
}

/// Everything a watcher can send towards the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Alarm(AlarmEvent),
    /// A watcher stopped because its task could not be watched.
    Fault { task_id: TaskId, message: String },
}

pub trait AlarmSink: Send + Sync {
    fn deliver(&self, event: &AlarmEvent) -> Result<()>;

    /// Error channel for watcher diagnostics.
    fn report_error(&self, task_id: TaskId, message: &str) -> Result<()>;
}

// =============================================================================
// Outbox + dispatcher
// =============================================================================

/// Sending half handed to watchers. Posting never blocks and never fails
/// loudly: once the dispatcher is gone, notices are dropped with a log line.
#[derive(Debug, Clone)]
pub struct AlarmOutbox {
    tx: mpsc::UnboundedSender<Notice>,
}

impl AlarmOutbox {
    /// A bare outbox and its receiving end, for callers that drain notices
    /// themselves instead of running a dispatcher.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn post(&self, notice: Notice) {
        if self.tx.send(notice).is_err() {
            warn!("alarm dispatcher closed; notice dropped");
        }
    }
}

/// Start the dispatcher thread for `sink`.
///
/// The thread exits once every [`AlarmOutbox`] clone is dropped and the queue
/// is drained; join the handle to flush pending alarms at shutdown.
pub fn spawn_dispatcher(sink: Arc<dyn AlarmSink>) -> Result<(AlarmOutbox, JoinHandle<()>)> {
    let (outbox, mut rx) = AlarmOutbox::channel();
    let handle = thread::Builder::new()
        .name("duewatch-alarms".to_string())
        .spawn(move || {
            while let Some(notice) = rx.blocking_recv() {
                dispatch(sink.as_ref(), &notice);
            }
            debug!("alarm dispatcher drained");
        })?;
    Ok((outbox, handle))
}

fn dispatch(sink: &dyn AlarmSink, notice: &Notice) {
    let outcome = match notice {
        Notice::Alarm(event) => sink.deliver(event),
        Notice::Fault { task_id, message } => sink.report_error(*task_id, message),
    };
    if let Err(err) = outcome {
        warn!(error = %err, "alarm sink failed; continuing");
    }
}

// =============================================================================
// Console sink
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct BellOptions {
    pub enabled: bool,
    pub repeats: u32,
    pub gap: Duration,
}

impl Default for BellOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            repeats: 3,
            gap: Duration::from_millis(500),
        }
    }
}

/// Human-facing rendering: one line per advance warning, a banner and a
/// terminal bell for an overdue task.
pub struct ConsoleSink {
    out: Mutex<Box<dyn Write + Send>>,
    err: Mutex<Box<dyn Write + Send>>,
    bell: BellOptions,
}

impl ConsoleSink {
    pub fn stdout(bell: BellOptions) -> Self {
        Self::with_writers(Box::new(io::stdout()), Box::new(io::stderr()), bell)
    }

    pub fn with_writers(
        out: Box<dyn Write + Send>,
        err: Box<dyn Write + Send>,
        bell: BellOptions,
    ) -> Self {
        Self {
            out: Mutex::new(out),
            err: Mutex::new(err),
            bell,
        }
    }

    fn write_out(&self, text: &str) -> Result<()> {
        let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        out.write_all(text.as_bytes())
            .and_then(|()| out.flush())
            .map_err(|err| Error::SinkFailure(err.to_string()))
    }

    fn ring(&self) -> Result<()> {
        if !self.bell.enabled {
            return Ok(());
        }
        for ring in 0..self.bell.repeats {
            if ring > 0 {
                thread::sleep(self.bell.gap);
            }
            self.write_out("\x07")?;
        }
        Ok(())
    }
}

pub fn render_alarm(event: &AlarmEvent) -> String {
    let task = &event.task;
    match event.tier {
        Tier::T24h => format!(
            "\n[reminder] '{}' ({}) is due in 24 hours ({})\n",
            task.title, task.subject, task.deadline
        ),
        Tier::T12h => format!(
            "\n[reminder] '{}' ({}) is due in 12 hours ({})\n",
            task.title, task.subject, task.deadline
        ),
        Tier::T1h => format!(
            "\n[URGENT] '{}' ({}) is due in 1 hour ({})\n",
            task.title, task.subject, task.deadline
        ),
        Tier::Overdue => {
            let rule = "!".repeat(60);
            format!(
                "\n{rule}\nDEADLINE PASSED\n{rule}\n\
                 Task:     {}\n\
                 Subject:  {}\n\
                 Issuer:   {}\n\
                 Deadline: {}\n\
                 \nThis assignment is overdue. Finish it and mark it done.\n{rule}\n",
                task.title, task.subject, task.issuer, task.deadline
            )
        }
    }
}

impl AlarmSink for ConsoleSink {
    fn deliver(&self, event: &AlarmEvent) -> Result<()> {
        self.write_out(&render_alarm(event))?;
        if event.tier == Tier::Overdue {
            self.ring()?;
        }
        Ok(())
    }

    fn report_error(&self, task_id: TaskId, message: &str) -> Result<()> {
        let mut stderr = self.err.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        writeln!(stderr, "error: reminders stopped for task {task_id}: {message}")
            .and_then(|()| stderr.flush())
            .map_err(|err| Error::SinkFailure(err.to_string()))
    }
}

// =============================================================================
// JSON-lines sink
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonlDestination {
    Stdout,
    File(PathBuf),
}

impl JsonlDestination {
    /// `-` means stdout; blank means no mirror.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        let trimmed = raw?.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed == "-" {
            return Some(JsonlDestination::Stdout);
        }
        Some(JsonlDestination::File(PathBuf::from(trimmed)))
    }

    pub fn open(&self) -> Result<JsonlSink> {
        match self {
            JsonlDestination::Stdout => Ok(JsonlSink::stdout()),
            JsonlDestination::File(path) => JsonlSink::file(path),
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum JsonlRecord<'a> {
    Alarm {
        schema_version: &'static str,
        #[serde(flatten)]
        event: &'a AlarmEvent,
    },
    Fault {
        schema_version: &'static str,
        task_id: TaskId,
        message: &'a str,
    },
}

pub struct JsonlSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonlSink {
    pub fn stdout() -> Self {
        Self::from_writer(Box::new(io::stdout()))
    }

    /// Append to `path`, creating it if necessary.
    pub fn file(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self::from_writer(Box::new(file)))
    }

    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    fn emit(&self, record: &JsonlRecord<'_>) -> Result<()> {
        let serialized = serde_json::to_vec(record)?;
        let mut writer = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        writer
            .write_all(&serialized)
            .and_then(|()| writer.write_all(b"\n"))
            .and_then(|()| writer.flush())
            .map_err(|err| Error::SinkFailure(err.to_string()))
    }
}

impl AlarmSink for JsonlSink {
    fn deliver(&self, event: &AlarmEvent) -> Result<()> {
        self.emit(&JsonlRecord::Alarm {
            schema_version: ALARM_SCHEMA_VERSION,
            event,
        })
    }

    fn report_error(&self, task_id: TaskId, message: &str) -> Result<()> {
        self.emit(&JsonlRecord::Fault {
            schema_version: ALARM_SCHEMA_VERSION,
            task_id,
            message,
        })
    }
}

// =============================================================================
// Composition and capture
// =============================================================================

/// Delivers to every inner sink; the first failure is returned after all
/// sinks have been tried.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AlarmSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn AlarmSink>>) -> Self {
        Self { sinks }
    }

    fn each(&self, mut f: impl FnMut(&dyn AlarmSink) -> Result<()>) -> Result<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(err) = f(sink.as_ref()) {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl AlarmSink for FanoutSink {
    fn deliver(&self, event: &AlarmEvent) -> Result<()> {
        self.each(|sink| sink.deliver(event))
    }

    fn report_error(&self, task_id: TaskId, message: &str) -> Result<()> {
        self.each(|sink| sink.report_error(task_id, message))
    }
}

/// Keeps every notice in memory; used by embedders that render alarms
/// themselves and by tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    notices: Mutex<Vec<Notice>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn alarms(&self) -> Vec<AlarmEvent> {
        self.notices()
            .into_iter()
            .filter_map(|notice| match notice {
                Notice::Alarm(event) => Some(event),
                Notice::Fault { .. } => None,
            })
            .collect()
    }

    pub fn faults(&self) -> Vec<(TaskId, String)> {
        self.notices()
            .into_iter()
            .filter_map(|notice| match notice {
                Notice::Fault { task_id, message } => Some((task_id, message)),
                Notice::Alarm(_) => None,
            })
            .collect()
    }

    /// Tiers delivered for one task, in delivery order.
    pub fn tiers_for(&self, task_id: TaskId) -> Vec<Tier> {
        self.alarms()
            .into_iter()
            .filter(|event| event.task_id == task_id)
            .map(|event| event.tier)
            .collect()
    }

    fn push(&self, notice: Notice) {
        self.notices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(notice);
    }
}

impl AlarmSink for MemorySink {
    fn deliver(&self, event: &AlarmEvent) -> Result<()> {
        self.push(Notice::Alarm(event.clone()));
        Ok(())
    }

    fn report_error(&self, task_id: TaskId, message: &str) -> Result<()> {
        self.push(Notice::Fault {
            task_id,
            message: message.to_string(),
        });
        Ok(())
    }
}
