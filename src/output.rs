//! Command output: a JSON envelope for scripts, plain text for people.
//!
//! Every JSON response has the shape
//! `{schema_version, command, status, data | error}` where `status` is
//! `"success"` or `"error"`.

use serde::Serialize;

use crate::error::{Error, Result};

pub const SCHEMA_VERSION: &str = "duewatch.v1";

#[derive(Debug, Clone, Copy, Default)]
pub struct OutputOptions {
    pub json: bool,
    pub quiet: bool,
}

/// Text shown for a successful command: a headline, `key: value` facts, and
/// suggested follow-up commands.
#[derive(Debug, Clone)]
pub struct HumanOutput {
    header: String,
    summary: Vec<(String, String)>,
    next_steps: Vec<String>,
}

impl HumanOutput {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            summary: Vec::new(),
            next_steps: Vec::new(),
        }
    }

    pub fn push_summary(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.summary.push((key.into(), value.into()));
    }

    pub fn push_next_step(&mut self, value: impl Into<String>) {
        self.next_steps.push(value.into());
    }
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    schema_version: &'static str,
    command: &'a str,
    #[serde(flatten)]
    body: Body<'a, T>,
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum Body<'a, T: Serialize> {
    Success {
        data: &'a T,
    },
    Error {
        error: ErrorBody,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        next_steps: Vec<String>,
    },
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    code: i32,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

fn print_envelope<T: Serialize>(command: &str, body: Body<'_, T>) -> Result<()> {
    let envelope = Envelope {
        schema_version: SCHEMA_VERSION,
        command,
        body,
    };
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}

pub fn emit_success<T: Serialize>(
    options: OutputOptions,
    command: &str,
    data: &T,
    human: Option<&HumanOutput>,
) -> Result<()> {
    if options.json {
        return print_envelope(command, Body::Success { data });
    }
    if let (false, Some(human)) = (options.quiet, human) {
        println!("{}", format_human(human));
    }
    Ok(())
}

pub fn emit_error(command: &str, err: &Error, json: bool) -> Result<()> {
    let next_steps = error_next_steps(err);
    if json {
        let error = ErrorBody {
            message: err.to_string(),
            code: err.exit_code(),
            kind: error_kind(err),
            details: err.details(),
        };
        return print_envelope::<()>(command, Body::Error { error, next_steps });
    }

    eprintln!("error: {err}");
    if let Some(hint) = next_steps.first() {
        eprintln!("hint: {hint}");
    }
    Ok(())
}

pub fn format_human(output: &HumanOutput) -> String {
    let mut text = output.header.clone();
    if !output.summary.is_empty() {
        text.push('\n');
        for (key, value) in &output.summary {
            text.push_str(&format!("\n  {key}: {value}"));
        }
    }
    if !output.next_steps.is_empty() {
        text.push_str("\n\nNext:");
        for step in &output.next_steps {
            text.push_str(&format!("\n  {step}"));
        }
    }
    text
}

/// Left-aligned text table. Column widths follow the widest cell.
pub fn format_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let render = |cells: &[&str]| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(render(headers));
    lines.push(
        widths
            .iter()
            .map(|width| "-".repeat(*width))
            .collect::<Vec<_>>()
            .join("  "),
    );
    for row in rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        lines.push(render(&cells));
    }
    lines.join("\n")
}

/// Subcommand name for error envelopes, read before clap has parsed anything.
pub fn infer_command_name_from_args() -> String {
    command_name(std::env::args().skip(1))
}

fn command_name(mut args: impl Iterator<Item = String>) -> String {
    while let Some(arg) = args.next() {
        if matches!(arg.as_str(), "--file" | "--config") {
            args.next();
        } else if !arg.starts_with('-') {
            return arg;
        }
    }
    "duewatch".to_string()
}

fn error_kind(err: &Error) -> &'static str {
    if err.exit_code() == crate::error::exit_codes::USER_ERROR {
        "user_error"
    } else {
        "operation_failed"
    }
}

fn error_next_steps(err: &Error) -> Vec<String> {
    match err {
        Error::TaskNotFound(_) => vec!["duewatch list".to_string()],
        Error::MalformedDeadline { task_id, .. } => vec![format!("duewatch rm {task_id}")],
        Error::InvalidConfig(_) => vec!["fix duewatch.toml then retry".to_string()],
        Error::LockFailed(_) => vec!["retry once the other duewatch process finishes".to_string()],
        _ => Vec::new(),
    }
}
