//! duewatch - Deadline Monitoring Library
//!
//! This library provides the engine behind the duewatch CLI: it keeps a
//! list of assignments with deadlines and raises escalating reminders as
//! each deadline approaches.
//!
//! # Core Concepts
//!
//! - **Reminder tiers**: 24 hours, 12 hours and 1 hour ahead, then overdue
//! - **Watchers**: one concurrent poller per open task, each with its own
//!   forward-only reminder cursor
//! - **Registry**: the single owner of live watchers, keyed by task id
//! - **Alarm sink**: where reminders end up (console, JSON lines, tests)
//!
//! # Module Organization
//!
//! - `cli`: Command-line interface using clap
//! - `config`: Configuration loading from `duewatch.toml`
//! - `error`: Error types and result aliases
//! - `task`: Task records and deadline parsing
//! - `store`: Task store trait with in-memory and file-backed stores
//! - `lock`: File locking and atomic writes for the task file
//! - `clock`: Wall-clock abstraction
//! - `policy`: Tier classification
//! - `watcher`: Per-task polling state machine
//! - `registry`: Watcher lifecycle management
//! - `sink`: Alarm dispatch and rendering
//! - `monitor`: Hooks that keep store edits and watchers in step

pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod lock;
pub mod monitor;
pub mod output;
pub mod policy;
pub mod registry;
pub mod sink;
pub mod store;
pub mod task;
pub mod watcher;

pub use error::{Error, Result};
