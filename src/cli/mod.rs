//! Command-line interface for duewatch
//!
//! This module defines the CLI structure using clap derive macros.
//! Task editing lives in `task`, long-running modes in `watch`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{default_config_path, Config};
use crate::error::Result;
use crate::store::FileTaskStore;

mod task;
mod watch;

/// duewatch - deadline monitoring with escalating reminders
///
/// Keeps a list of assignments with deadlines and warns 24 hours, 12 hours
/// and 1 hour ahead, then once more when a deadline passes.
#[derive(Parser, Debug)]
#[command(name = "duewatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Task file (defaults to the per-user data directory)
    #[arg(long, global = true, env = "DUEWATCH_FILE")]
    pub file: Option<PathBuf>,

    /// Config file (defaults to the per-user config directory)
    #[arg(long, global = true, env = "DUEWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Add a task
    Add {
        #[arg(long)]
        title: String,

        #[arg(long)]
        subject: String,

        /// Deadline as "YYYY-MM-DD HH:MM" (local time)
        #[arg(long)]
        deadline: String,

        /// Who set the assignment
        #[arg(long)]
        issuer: String,
    },

    /// List every task with the time left
    List,

    /// Open tasks not yet due, soonest first
    Upcoming,

    /// Mark a task completed
    Done {
        id: u64,
    },

    /// Delete a task
    Rm {
        id: u64,
    },

    /// Watch all open tasks and raise reminders until interrupted
    Watch {
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        for_secs: Option<u64>,
    },

    /// Interactive session with watchers running in the background
    Shell,
}

/// Resolved config and task file for one invocation.
pub(crate) struct Context {
    pub config: Config,
    pub store: FileTaskStore,
    pub json: bool,
    pub quiet: bool,
}

impl Context {
    fn load(file: Option<PathBuf>, config: Option<PathBuf>, json: bool, quiet: bool) -> Result<Self> {
        let config_path = config.unwrap_or_else(default_config_path);
        let config = Config::load_or_default(&config_path)?;
        let store = FileTaskStore::new(file.unwrap_or_else(|| config.tasks_path()))
            .with_lock_timeout(config.store.lock_timeout_ms);
        tracing::debug!(
            config = %config_path.display(),
            tasks = %store.path().display(),
            "resolved paths"
        );
        Ok(Self {
            store,
            config,
            json,
            quiet,
        })
    }

    pub fn output(&self) -> crate::output::OutputOptions {
        crate::output::OutputOptions {
            json: self.json,
            quiet: self.quiet,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let ctx = Context::load(self.file, self.config, self.json, self.quiet)?;
        match self.command {
            Commands::Add {
                title,
                subject,
                deadline,
                issuer,
            } => task::run_add(&ctx, task::AddOptions {
                title,
                subject,
                deadline,
                issuer,
            }),
            Commands::List => task::run_list(&ctx),
            Commands::Upcoming => task::run_upcoming(&ctx),
            Commands::Done { id } => task::run_done(&ctx, id),
            Commands::Rm { id } => task::run_rm(&ctx, id),
            Commands::Watch { for_secs } => watch::run_watch(ctx, for_secs),
            Commands::Shell => watch::run_shell(ctx),
        }
    }
}
