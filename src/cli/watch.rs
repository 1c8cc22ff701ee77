//! Long-running modes: `watch` and the interactive `shell`.
//!
//! Both build the same session: a multi-thread tokio runtime for the
//! watchers, an alarm dispatcher thread in front of the configured sinks, and
//! a [`Monitor`] tying the task file to the watcher registry.

use std::future::Future;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Runtime;
use tracing::{info, warn};

use crate::cli::task::{list_table, upcoming_table};
use crate::cli::Context;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::monitor::Monitor;
use crate::output::{emit_error, emit_success, HumanOutput, OutputOptions};
use crate::registry::WatcherRegistry;
use crate::sink::{spawn_dispatcher, AlarmSink, ConsoleSink, FanoutSink, JsonlDestination, JsonlSink};
use crate::store::TaskStore;
use crate::task::{upcoming, NewTask, TaskId};
use crate::watcher::WatchContext;

struct Session {
    runtime: Runtime,
    monitor: Monitor,
    dispatcher: JoinHandle<()>,
    output: OutputOptions,
    rescan_interval: Duration,
}

impl Session {
    fn open(ctx: Context) -> Result<Self> {
        let output = ctx.output();
        let rescan_interval = ctx.config.rescan_interval();
        let settings = ctx.config.watch_settings();
        let sink = build_sink(&ctx.config, ctx.json)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("duewatch-watcher")
            .build()?;
        let (outbox, dispatcher) = spawn_dispatcher(sink)?;

        let store: Arc<dyn TaskStore> = Arc::new(ctx.store);
        let registry = WatcherRegistry::with_runtime(
            WatchContext {
                store: store.clone(),
                clock: Arc::new(SystemClock),
                outbox,
                settings,
            },
            runtime.handle().clone(),
        );

        Ok(Self {
            runtime,
            monitor: Monitor::new(store, registry),
            dispatcher,
            output,
            rescan_interval,
        })
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Stop every watcher, then let the dispatcher drain what they posted.
    fn close(self) {
        let Session {
            runtime,
            monitor,
            dispatcher,
            ..
        } = self;
        runtime.block_on(monitor.on_shutdown());
        // The registry holds the last outbox; the dispatcher exits once it
        // and the runtime's finished tasks are gone.
        drop(monitor);
        drop(runtime);
        if dispatcher.join().is_err() {
            warn!("alarm dispatcher panicked");
        }
    }
}

fn build_sink(config: &Config, json: bool) -> Result<Arc<dyn AlarmSink>> {
    let primary: Arc<dyn AlarmSink> = if json {
        Arc::new(JsonlSink::stdout())
    } else {
        Arc::new(ConsoleSink::stdout(config.bell_options()))
    };

    match JsonlDestination::parse(config.alarm.events_file.as_deref()) {
        Some(destination) => {
            let mirror: Arc<dyn AlarmSink> = Arc::new(destination.open()?);
            Ok(Arc::new(FanoutSink::new(vec![primary, mirror])))
        }
        None => Ok(primary),
    }
}

// =============================================================================
// watch
// =============================================================================

#[derive(Serialize)]
struct WatchOutput {
    resumed: usize,
    watching_at_exit: usize,
}

pub fn run_watch(ctx: Context, for_secs: Option<u64>) -> Result<()> {
    let session = Session::open(ctx)?;
    let output = session.output;
    let monitor = session.monitor.clone();
    let rescan_interval = session.rescan_interval;

    let outcome = session.block_on(async move {
        let resumed = monitor.on_startup()?;
        if !output.json && !output.quiet {
            println!("Watching {resumed} open task(s). Press Ctrl-C to stop.");
        }

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let time_limit = stop_after(for_secs.map(Duration::from_secs));
        tokio::pin!(time_limit);

        let mut rescan = tokio::time::interval(rescan_interval);
        rescan.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick is immediate and on_startup already covered it.
        rescan.tick().await;

        loop {
            tokio::select! {
                result = &mut ctrl_c => {
                    if let Err(err) = result {
                        warn!(error = %err, "cannot listen for Ctrl-C; stopping");
                    }
                    break;
                }
                _ = &mut time_limit => break,
                _ = rescan.tick() => {
                    match monitor.registry().start_all_open() {
                        Ok(0) => {}
                        Ok(started) => info!(started, "picked up new tasks"),
                        Err(err) => warn!(error = %err, "rescan failed"),
                    }
                }
            }
        }

        let watching_at_exit = monitor.registry().live_count();
        Ok::<_, Error>(WatchOutput {
            resumed,
            watching_at_exit,
        })
    });
    session.close();

    let summary = outcome?;
    let mut human = HumanOutput::new("Stopped watching");
    human.push_summary("Resumed", summary.resumed.to_string());
    human.push_summary("Watching at exit", summary.watching_at_exit.to_string());
    emit_success(output, "watch", &summary, Some(&human))
}

async fn stop_after(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// shell
// =============================================================================

const SHELL_HELP: &str = "\
Commands:
  add <title> | <subject> | <YYYY-MM-DD HH:MM> | <issuer>
  list
  upcoming
  done <id>
  rm <id>
  help
  quit";

#[derive(Debug, PartialEq, Eq)]
enum ShellCommand {
    Add(NewTask),
    List,
    Upcoming,
    Done(TaskId),
    Rm(TaskId),
    Help,
    Quit,
    Nothing,
}

fn parse_command(line: &str) -> Result<ShellCommand> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    match verb.to_ascii_lowercase().as_str() {
        "" => Ok(ShellCommand::Nothing),
        "add" => {
            let fields: Vec<&str> = rest.split('|').map(str::trim).collect();
            match fields.as_slice() {
                [title, subject, deadline, issuer] => Ok(ShellCommand::Add(NewTask::new(
                    *title, *subject, *deadline, *issuer,
                ))),
                _ => Err(Error::InvalidArgument(
                    "usage: add <title> | <subject> | <YYYY-MM-DD HH:MM> | <issuer>".to_string(),
                )),
            }
        }
        "list" | "ls" => Ok(ShellCommand::List),
        "upcoming" => Ok(ShellCommand::Upcoming),
        "done" => parse_id(rest).map(ShellCommand::Done),
        "rm" | "delete" => parse_id(rest).map(ShellCommand::Rm),
        "help" | "?" => Ok(ShellCommand::Help),
        "quit" | "exit" | "q" => Ok(ShellCommand::Quit),
        other => Err(Error::InvalidArgument(format!(
            "unknown command '{other}' (try 'help')"
        ))),
    }
}

fn parse_id(raw: &str) -> Result<TaskId> {
    raw.parse::<TaskId>()
        .map_err(|_| Error::InvalidArgument(format!("expected a task id, got '{raw}'")))
}

fn execute(monitor: &Monitor, command: ShellCommand) -> Result<()> {
    match command {
        ShellCommand::Add(input) => {
            let task = monitor.add_task(input)?;
            println!("Added task {} ({}), watching.", task.id, task.title);
        }
        ShellCommand::List => {
            let tasks = monitor.store().list_all()?;
            if tasks.is_empty() {
                println!("No tasks yet.");
            } else {
                println!("{}", list_table(&tasks, SystemClock.now()));
            }
        }
        ShellCommand::Upcoming => {
            let now = SystemClock.now();
            let ahead = upcoming(&monitor.store().list_all()?, now);
            if ahead.is_empty() {
                println!("No upcoming deadlines.");
            } else {
                println!("{}", upcoming_table(&ahead, now));
            }
        }
        ShellCommand::Done(id) => {
            let task = monitor.complete_task(id)?;
            println!("Task {id} ({}) completed.", task.title);
        }
        ShellCommand::Rm(id) => {
            let task = monitor.delete_task(id)?;
            println!("Task {id} ({}) deleted.", task.title);
        }
        ShellCommand::Help => println!("{SHELL_HELP}"),
        ShellCommand::Quit | ShellCommand::Nothing => {}
    }
    Ok(())
}

pub fn run_shell(ctx: Context) -> Result<()> {
    let session = Session::open(ctx)?;
    let result = shell_loop(&session);
    session.close();
    result
}

fn shell_loop(session: &Session) -> Result<()> {
    let resumed = session.monitor.on_startup()?;
    if !session.output.quiet {
        println!("duewatch shell: watching {resumed} open task(s). Type 'help' for commands.");
    }

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("duewatch> ");
        io::stdout().flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        let outcome = parse_command(&line).and_then(|command| {
            if command == ShellCommand::Quit {
                return Ok(false);
            }
            execute(&session.monitor, command).map(|()| true)
        });
        match outcome {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => {
                let _ = emit_error("shell", &err, false);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_add_with_pipes() {
        let cmd = parse_command("add Lab report | Biology | 2026-05-05 10:30 | Mr. Okafor\n")
            .unwrap();
        assert_eq!(
            cmd,
            ShellCommand::Add(NewTask::new(
                "Lab report",
                "Biology",
                "2026-05-05 10:30",
                "Mr. Okafor"
            ))
        );
    }

    #[test]
    fn add_needs_four_fields() {
        assert!(matches!(
            parse_command("add Lab report | Biology"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn parses_ids_and_simple_verbs() {
        assert_eq!(parse_command("done 3").unwrap(), ShellCommand::Done(3));
        assert_eq!(parse_command("RM 12").unwrap(), ShellCommand::Rm(12));
        assert_eq!(parse_command("list").unwrap(), ShellCommand::List);
        assert_eq!(parse_command("upcoming").unwrap(), ShellCommand::Upcoming);
        assert_eq!(parse_command("quit").unwrap(), ShellCommand::Quit);
        assert_eq!(parse_command("   ").unwrap(), ShellCommand::Nothing);
    }

    #[test]
    fn rejects_bad_ids_and_unknown_verbs() {
        assert!(matches!(parse_command("done x"), Err(Error::InvalidArgument(_))));
        assert!(matches!(parse_command("done"), Err(Error::InvalidArgument(_))));
        assert!(matches!(parse_command("fly"), Err(Error::InvalidArgument(_))));
    }
}
