//! duewatch - deadline monitoring CLI
//!
//! Tracks assignments with deadlines and raises reminders 24 hours, 12 hours
//! and 1 hour ahead, then once more when a deadline passes.
//!
//! Logs go to stderr at `warn` and above unless `RUST_LOG` says otherwise.
//! Failed alarm deliveries and unreadable task files are logged at `warn`, so
//! they stay visible in a plain `duewatch watch` run.

use clap::Parser;
use duewatch::cli::Cli;
use duewatch::output::{emit_error, infer_command_name_from_args};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() {
    // Warnings by default; RUST_LOG overrides. Invalid or huge filters are
    // ignored so a bad environment cannot stop the program from starting.
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|raw| {
            let raw = raw.trim();
            if raw.is_empty() || raw.len() > 4096 {
                return None;
            }
            EnvFilter::try_new(raw).ok()
        })
        .unwrap_or_else(|| EnvFilter::new("warn"));

    // stdout carries alarms and command output; logs go to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let command = infer_command_name_from_args();
    let cli = Cli::parse();
    let json = cli.json;
    if let Err(err) = cli.run() {
        let _ = emit_error(&command, &err, json);
        std::process::exit(err.exit_code());
    }
}
