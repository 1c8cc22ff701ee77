//! duewatch task command implementations.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::cli::Context;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::output::{emit_success, format_table, HumanOutput};
use crate::store::TaskStore;
use crate::task::{remaining_label, upcoming, NewTask, Task, TaskId};

const TITLE_WIDTH: usize = 18;
const SUBJECT_WIDTH: usize = 16;
const ISSUER_WIDTH: usize = 14;

pub struct AddOptions {
    pub title: String,
    pub subject: String,
    pub deadline: String,
    pub issuer: String,
}

#[derive(Serialize)]
struct TaskRow<'a> {
    #[serde(flatten)]
    task: &'a Task,
    remaining: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining_seconds: Option<i64>,
}

#[derive(Serialize)]
struct TaskListOutput<'a> {
    count: usize,
    tasks: Vec<TaskRow<'a>>,
}

pub fn run_add(ctx: &Context, options: AddOptions) -> Result<()> {
    let input = NewTask::new(
        options.title,
        options.subject,
        options.deadline,
        options.issuer,
    );
    let task = ctx.store.insert(input)?;
    let now = SystemClock.now();

    let mut human = HumanOutput::new(format!("Task {} added", task.id));
    push_task_summary(&mut human, &task, now);
    human.push_next_step("duewatch watch");

    emit_success(ctx.output(), "add", &row(&task, now), Some(&human))
}

pub fn run_list(ctx: &Context) -> Result<()> {
    let tasks = ctx.store.list_all()?;
    let now = SystemClock.now();

    let human = HumanOutput::new(if tasks.is_empty() {
        "No tasks yet.".to_string()
    } else {
        list_table(&tasks, now)
    });
    let output = TaskListOutput {
        count: tasks.len(),
        tasks: tasks.iter().map(|task| row(task, now)).collect(),
    };
    emit_success(ctx.output(), "list", &output, Some(&human))
}

pub fn run_upcoming(ctx: &Context) -> Result<()> {
    let tasks = ctx.store.list_all()?;
    let now = SystemClock.now();
    let ahead = upcoming(&tasks, now);

    let human = HumanOutput::new(if ahead.is_empty() {
        "No upcoming deadlines.".to_string()
    } else {
        upcoming_table(&ahead, now)
    });
    let output = TaskListOutput {
        count: ahead.len(),
        tasks: ahead.iter().map(|(task, _)| row(task, now)).collect(),
    };
    emit_success(ctx.output(), "upcoming", &output, Some(&human))
}

pub fn run_done(ctx: &Context, id: TaskId) -> Result<()> {
    let task = ctx.store.complete(id)?;
    let now = SystemClock.now();

    let mut human = HumanOutput::new(format!("Task {id} completed"));
    push_task_summary(&mut human, &task, now);
    emit_success(ctx.output(), "done", &row(&task, now), Some(&human))
}

pub fn run_rm(ctx: &Context, id: TaskId) -> Result<()> {
    let task = ctx.store.delete(id)?;
    let now = SystemClock.now();

    let mut human = HumanOutput::new(format!("Task {id} deleted"));
    human.push_summary("Title", task.title.clone());
    emit_success(ctx.output(), "rm", &row(&task, now), Some(&human))
}

/// Every task in insertion order.
pub(crate) fn list_table(tasks: &[Task], now: NaiveDateTime) -> String {
    let rows: Vec<Vec<String>> = tasks
        .iter()
        .map(|task| {
            vec![
                task.id.to_string(),
                if task.completed { "done" } else { "open" }.to_string(),
                clip(&task.title, TITLE_WIDTH),
                clip(&task.subject, SUBJECT_WIDTH),
                clip(&task.issuer, ISSUER_WIDTH),
                task.deadline.clone(),
                if task.completed {
                    "-".to_string()
                } else {
                    remaining_label(task, now)
                },
            ]
        })
        .collect();
    format_table(
        &["ID", "STATUS", "TITLE", "SUBJECT", "ISSUER", "DEADLINE", "LEFT"],
        &rows,
    )
}

pub(crate) fn upcoming_table(ahead: &[(Task, i64)], now: NaiveDateTime) -> String {
    let rows: Vec<Vec<String>> = ahead
        .iter()
        .map(|(task, _)| {
            vec![
                task.id.to_string(),
                clip(&task.title, TITLE_WIDTH),
                clip(&task.subject, SUBJECT_WIDTH),
                clip(&task.issuer, ISSUER_WIDTH),
                task.deadline.clone(),
                remaining_label(task, now),
            ]
        })
        .collect();
    format_table(
        &["ID", "TITLE", "SUBJECT", "ISSUER", "DEADLINE", "LEFT"],
        &rows,
    )
}

fn row(task: &Task, now: NaiveDateTime) -> TaskRow<'_> {
    TaskRow {
        task,
        remaining: remaining_label(task, now),
        remaining_seconds: task.remaining_seconds(now).ok(),
    }
}

fn push_task_summary(human: &mut HumanOutput, task: &Task, now: NaiveDateTime) {
    human.push_summary("Title", task.title.clone());
    human.push_summary("Subject", task.subject.clone());
    human.push_summary("Issuer", task.issuer.clone());
    human.push_summary("Deadline", task.deadline.clone());
    if task.is_open() {
        human.push_summary("Left", remaining_label(task, now));
    }
}

fn clip(value: &str, width: usize) -> String {
    value.chars().take(width).collect()
}
