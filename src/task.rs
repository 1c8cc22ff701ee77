//! Assignment records.
//!
//! A task's deadline is kept in its textual `YYYY-MM-DD HH:MM` form so that a
//! hand-edited task file can carry a value we cannot parse. Parsing happens on
//! read, and a bad value surfaces as [`Error::MalformedDeadline`].

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Format of a task deadline.
pub const DEADLINE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Format of `created_at` stamps.
pub const CREATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub type TaskId = u64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub subject: String,
    pub issuer: String,
    pub deadline: String,
    pub created_at: String,
    #[serde(default)]
    pub completed: bool,
}

impl Task {
    /// Parse the deadline into a local wall-clock timestamp.
    pub fn deadline_at(&self) -> Result<NaiveDateTime> {
        parse_deadline(&self.deadline).ok_or_else(|| Error::MalformedDeadline {
            task_id: self.id,
            raw: self.deadline.clone(),
        })
    }

    /// Whole seconds left until the deadline; negative once it has passed.
    pub fn remaining_seconds(&self, now: NaiveDateTime) -> Result<i64> {
        Ok((self.deadline_at()? - now).num_seconds())
    }

    pub fn is_open(&self) -> bool {
        !self.completed
    }
}

/// Input for creating a task. The store assigns the id and creation stamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub subject: String,
    pub issuer: String,
    pub deadline: String,
}

impl NewTask {
    pub fn new(
        title: impl Into<String>,
        subject: impl Into<String>,
        deadline: impl Into<String>,
        issuer: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            subject: subject.into(),
            issuer: issuer.into(),
            deadline: deadline.into(),
        }
    }

    /// Trim every field and reject blanks or an unparsable deadline.
    pub fn validate(self) -> Result<Self> {
        let task = Self {
            title: self.title.trim().to_string(),
            subject: self.subject.trim().to_string(),
            issuer: self.issuer.trim().to_string(),
            deadline: self.deadline.trim().to_string(),
        };

        for (field, value) in [
            ("title", &task.title),
            ("subject", &task.subject),
            ("issuer", &task.issuer),
            ("deadline", &task.deadline),
        ] {
            if value.is_empty() {
                return Err(Error::InvalidArgument(format!("{field} cannot be empty")));
            }
        }

        if parse_deadline(&task.deadline).is_none() {
            return Err(Error::InvalidArgument(format!(
                "invalid deadline '{}' (expected YYYY-MM-DD HH:MM)",
                task.deadline
            )));
        }

        Ok(task)
    }

    pub(crate) fn into_task(self, id: TaskId, created_at: NaiveDateTime) -> Task {
        Task {
            id,
            title: self.title,
            subject: self.subject,
            issuer: self.issuer,
            deadline: self.deadline,
            created_at: created_at.format(CREATED_AT_FORMAT).to_string(),
            completed: false,
        }
    }
}

pub fn parse_deadline(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), DEADLINE_FORMAT).ok()
}

pub fn format_deadline(at: NaiveDateTime) -> String {
    at.format(DEADLINE_FORMAT).to_string()
}

/// Human label for time left: `2d 3h 15m`, `OVERDUE`, or `INVALID`.
pub fn remaining_label(task: &Task, now: NaiveDateTime) -> String {
    match task.deadline_at() {
        Ok(deadline) => {
            let left = deadline - now;
            if left > Duration::zero() {
                format_span(left)
            } else {
                "OVERDUE".to_string()
            }
        }
        Err(_) => "INVALID".to_string(),
    }
}

fn format_span(span: Duration) -> String {
    let days = span.num_days();
    let hours = span.num_hours() % 24;
    let minutes = span.num_minutes() % 60;
    format!("{days}d {hours}h {minutes}m")
}

/// Open tasks that are still ahead of their deadline, soonest first.
///
/// Tasks with a malformed deadline are left out.
pub fn upcoming(tasks: &[Task], now: NaiveDateTime) -> Vec<(Task, i64)> {
    let mut ahead: Vec<(Task, i64)> = tasks
        .iter()
        .filter(|task| task.is_open())
        .filter_map(|task| {
            let remaining = task.remaining_seconds(now).ok()?;
            (remaining >= 0).then(|| (task.clone(), remaining))
        })
        .collect();
    ahead.sort_by_key(|(task, remaining)| (*remaining, task.id));
    ahead
}
