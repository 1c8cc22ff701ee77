//! Per-task deadline watcher.
//!
//! A [`Watcher`] owns one task's reminder cursor. Each cycle it re-reads the
//! task from the store, classifies the time left, and posts an alarm when a
//! new tier is reached:
//!
//! ```text
//!   RUNNING ──(task missing | completed | cancelled | unreadable)──> STOPPED
//!      │  ^
//!      └──┘ fetch → classify → maybe post → sleep(poll_interval)
//! ```
//!
//! The cursor only moves forward through `T24h → T12h → T1h → Overdue`, so one
//! watcher instance never repeats or reorders a tier. It lives only as long as
//! the watcher: a replacement watcher for the same task (after a restart or a
//! reload) starts from an empty cursor and will announce again whatever tier
//! the task is currently in. That repeat is intended reload behaviour.
//!
//! A malformed deadline or a store failure stops the watcher and is reported
//! once on the sink's error channel. The watcher does not retry; a malformed
//! deadline also carries the offending text so the registry can leave the
//! task alone until that text is edited.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::Error;
use crate::policy::{ReminderPolicy, Tier};
use crate::sink::{AlarmEvent, AlarmOutbox, Notice};
use crate::store::TaskStore;
use crate::task::TaskId;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct WatchSettings {
    pub poll_interval: Duration,
    pub policy: ReminderPolicy,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            policy: ReminderPolicy::default(),
        }
    }
}

/// What every watcher needs besides its own task id.
#[derive(Clone)]
pub struct WatchContext {
    pub store: Arc<dyn TaskStore>,
    pub clock: Arc<dyn Clock>,
    pub outbox: AlarmOutbox,
    pub settings: WatchSettings,
}

/// Reminder cursor of one watcher. Never shared, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderState {
    pub task_id: TaskId,
    pub last_tier: Option<Tier>,
}

impl ReminderState {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            last_tier: None,
        }
    }

    /// Record `tier` if it is past the cursor. Returns whether it should fire.
    pub fn advance(&mut self, tier: Tier) -> bool {
        if self.last_tier.is_some_and(|last| tier <= last) {
            return false;
        }
        self.last_tier = Some(tier);
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Completed,
    /// The task was deleted.
    Vanished,
    Cancelled,
    /// Deadline unparsable or store unreadable; reported to the sink.
    /// `deadline` holds the raw text when the deadline was the problem.
    Failed {
        message: String,
        deadline: Option<String>,
    },
}

/// Outcome of a single watch cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll {
    Quiet,
    Fired(AlarmEvent),
    Stop(StopReason),
}

pub struct Watcher {
    task_id: TaskId,
    instance: u64,
    ctx: WatchContext,
    cancel: CancellationToken,
    state: ReminderState,
}

impl Watcher {
    pub fn new(task_id: TaskId, instance: u64, ctx: WatchContext, cancel: CancellationToken) -> Self {
        Self {
            task_id,
            instance,
            ctx,
            cancel,
            state: ReminderState::new(task_id),
        }
    }

    pub fn state(&self) -> &ReminderState {
        &self.state
    }

    /// Run one fetch → classify → emit cycle.
    pub fn poll_once(&mut self) -> Poll {
        let task = match self.ctx.store.get_by_id(self.task_id) {
            Ok(task) => task,
            Err(Error::TaskNotFound(_)) => return Poll::Stop(StopReason::Vanished),
            Err(err) => return self.fail(err, None),
        };

        if task.completed {
            return Poll::Stop(StopReason::Completed);
        }

        let now = self.ctx.clock.now();
        let remaining = match task.remaining_seconds(now) {
            Ok(remaining) => remaining,
            Err(err) => return self.fail(err, Some(task.deadline)),
        };

        let Some(tier) = self.ctx.settings.policy.classify(remaining) else {
            return Poll::Quiet;
        };

        if self.cancel.is_cancelled() {
            return Poll::Stop(StopReason::Cancelled);
        }

        if !self.state.advance(tier) {
            return Poll::Quiet;
        }

        debug!(task_id = self.task_id, %tier, remaining, "reminder tier reached");
        let event = AlarmEvent {
            task_id: self.task_id,
            tier,
            task,
            timestamp: now,
        };
        self.ctx.outbox.post(Notice::Alarm(event.clone()));
        Poll::Fired(event)
    }

    fn fail(&self, err: Error, deadline: Option<String>) -> Poll {
        let message = err.to_string();
        warn!(task_id = self.task_id, error = %message, "watcher cannot continue");
        self.ctx.outbox.post(Notice::Fault {
            task_id: self.task_id,
            message: message.clone(),
        });
        Poll::Stop(StopReason::Failed { message, deadline })
    }

    /// Loop until the task is done, gone, unreadable, or the watcher is
    /// cancelled. Cancellation also cuts a pending sleep short.
    pub async fn run(mut self) -> StopReason {
        debug!(task_id = self.task_id, instance = self.instance, "watcher started");

        let reason = loop {
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            // Store reads may touch the disk; keep them off the async scheduler.
            let poll = match Handle::current().runtime_flavor() {
                RuntimeFlavor::MultiThread => tokio::task::block_in_place(|| self.poll_once()),
                _ => self.poll_once(),
            };
            if let Poll::Stop(reason) = poll {
                break reason;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break StopReason::Cancelled,
                _ = tokio::time::sleep(self.ctx.settings.poll_interval) => {}
            }
        };

        info!(
            task_id = self.task_id,
            instance = self.instance,
            reason = ?reason,
            "watcher stopped"
        );
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryTaskStore;
    use crate::task::{format_deadline, NewTask, Task};
    use chrono::{NaiveDate, NaiveDateTime};
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Rig {
        store: Arc<MemoryTaskStore>,
        clock: Arc<ManualClock>,
        ctx: WatchContext,
        rx: UnboundedReceiver<Notice>,
    }

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 5, 4)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn rig() -> Rig {
        let store = Arc::new(MemoryTaskStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let (outbox, rx) = AlarmOutbox::channel();
        let ctx = WatchContext {
            store: store.clone(),
            clock: clock.clone(),
            outbox,
            settings: WatchSettings::default(),
        };
        Rig {
            store,
            clock,
            ctx,
            rx,
        }
    }

    fn add_due_in(rig: &Rig, seconds: i64) -> Task {
        // Deadlines have minute precision; start() is on a minute boundary.
        let deadline = start() + chrono::Duration::seconds(seconds);
        rig.store
            .insert(NewTask::new(
                "Essay",
                "History",
                format_deadline(deadline),
                "Ms. Rahma",
            ))
            .unwrap()
    }

    fn drain(rx: &mut UnboundedReceiver<Notice>) -> Vec<Notice> {
        let mut out = Vec::new();
        while let Ok(notice) = rx.try_recv() {
            out.push(notice);
        }
        out
    }

    fn tiers(notices: &[Notice]) -> Vec<Tier> {
        notices
            .iter()
            .filter_map(|notice| match notice {
                Notice::Alarm(event) => Some(event.tier),
                Notice::Fault { .. } => None,
            })
            .collect()
    }

    /// Poll every 10 s of simulated time for `total` seconds.
    fn tick(watcher: &mut Watcher, clock: &ManualClock, total: i64) -> Option<StopReason> {
        for _ in 0..total / 10 {
            if let Poll::Stop(reason) = watcher.poll_once() {
                return Some(reason);
            }
            clock.advance(chrono::Duration::seconds(10));
        }
        None
    }

    #[test]
    fn cursor_only_moves_forward() {
        let mut state = ReminderState::new(1);
        assert!(state.advance(Tier::T12h));
        assert!(!state.advance(Tier::T12h));
        assert!(!state.advance(Tier::T24h));
        assert!(state.advance(Tier::Overdue));
        assert_eq!(state.last_tier, Some(Tier::Overdue));
    }

    #[test]
    fn escalates_through_every_tier_once() {
        let mut rig = rig();
        // Deadlines have minute precision: shift the clock 30 s so the time
        // left starts at 86430.
        rig.clock.advance(chrono::Duration::seconds(30));
        let task = add_due_in(&rig, 86_460);
        let mut watcher = Watcher::new(task.id, 1, rig.ctx.clone(), CancellationToken::new());

        // remaining = 86430: inside the 24h window.
        assert!(matches!(watcher.poll_once(), Poll::Fired(ref e) if e.tier == Tier::T24h));
        assert_eq!(tick(&mut watcher, &rig.clock, 600), None);
        assert_eq!(tiers(&drain(&mut rig.rx)), vec![Tier::T24h]);

        // Jump to remaining = 43230.
        rig.clock.set(start() + chrono::Duration::seconds(86_460 - 43_230));
        assert_eq!(tick(&mut watcher, &rig.clock, 600), None);
        assert_eq!(tiers(&drain(&mut rig.rx)), vec![Tier::T12h]);

        // Walk through the 1h window.
        rig.clock.set(start() + chrono::Duration::seconds(86_460 - 3_700));
        assert_eq!(tick(&mut watcher, &rig.clock, 300), None);
        assert_eq!(tiers(&drain(&mut rig.rx)), vec![Tier::T1h]);

        // Past the deadline: one overdue, then silence.
        rig.clock.set(start() + chrono::Duration::seconds(86_460 + 5));
        assert_eq!(tick(&mut watcher, &rig.clock, 3_600), None);
        assert_eq!(tiers(&drain(&mut rig.rx)), vec![Tier::Overdue]);

        rig.store.complete(task.id).unwrap();
        assert_eq!(watcher.poll_once(), Poll::Stop(StopReason::Completed));
        assert!(drain(&mut rig.rx).is_empty());
    }

    #[test]
    fn already_overdue_fires_once() {
        let mut rig = rig();
        let task = add_due_in(&rig, -3_600);
        let mut watcher = Watcher::new(task.id, 1, rig.ctx.clone(), CancellationToken::new());

        assert!(matches!(watcher.poll_once(), Poll::Fired(ref e) if e.tier == Tier::Overdue));
        for _ in 0..50 {
            assert_eq!(watcher.poll_once(), Poll::Quiet);
            rig.clock.advance(chrono::Duration::seconds(10));
        }
        assert_eq!(tiers(&drain(&mut rig.rx)), vec![Tier::Overdue]);
    }

    #[test]
    fn completed_task_stops_without_events() {
        let mut rig = rig();
        let task = add_due_in(&rig, 3_600);
        rig.store.complete(task.id).unwrap();
        let mut watcher = Watcher::new(task.id, 1, rig.ctx.clone(), CancellationToken::new());

        assert_eq!(watcher.poll_once(), Poll::Stop(StopReason::Completed));
        assert!(drain(&mut rig.rx).is_empty());
    }

    #[test]
    fn deleted_task_stops_silently() {
        let mut rig = rig();
        let task = add_due_in(&rig, 3_600);
        let mut watcher = Watcher::new(task.id, 1, rig.ctx.clone(), CancellationToken::new());

        assert!(matches!(watcher.poll_once(), Poll::Fired(_)));
        rig.store.delete(task.id).unwrap();
        assert_eq!(watcher.poll_once(), Poll::Stop(StopReason::Vanished));
        assert_eq!(tiers(&drain(&mut rig.rx)), vec![Tier::T1h]);
    }

    #[test]
    fn malformed_deadline_reports_once_and_stops() {
        let mut rig = rig();
        let mut task = add_due_in(&rig, 3_600);
        rig.store.delete(task.id).unwrap();
        task.deadline = "next friday".to_string();
        rig.store.insert_raw(task.clone());

        let mut watcher = Watcher::new(task.id, 1, rig.ctx.clone(), CancellationToken::new());
        assert!(matches!(
            watcher.poll_once(),
            Poll::Stop(StopReason::Failed { deadline: Some(ref raw), .. }) if raw == "next friday"
        ));

        let notices = drain(&mut rig.rx);
        assert_eq!(notices.len(), 1);
        assert!(matches!(
            &notices[0],
            Notice::Fault { task_id, message } if *task_id == task.id && message.contains("next friday")
        ));
    }

    #[test]
    fn cancelled_watcher_does_not_emit() {
        let mut rig = rig();
        let task = add_due_in(&rig, -60);
        let cancel = CancellationToken::new();
        let mut watcher = Watcher::new(task.id, 1, rig.ctx.clone(), cancel.clone());

        cancel.cancel();
        assert_eq!(watcher.poll_once(), Poll::Stop(StopReason::Cancelled));
        assert!(drain(&mut rig.rx).is_empty());
    }

    #[test]
    fn new_instance_starts_from_empty_cursor() {
        let mut rig = rig();
        let task = add_due_in(&rig, -60);

        let mut first = Watcher::new(task.id, 1, rig.ctx.clone(), CancellationToken::new());
        assert!(matches!(first.poll_once(), Poll::Fired(_)));
        drop(first);

        let mut second = Watcher::new(task.id, 2, rig.ctx.clone(), CancellationToken::new());
        assert_eq!(second.state().last_tier, None);
        assert!(matches!(second.poll_once(), Poll::Fired(_)));
        assert_eq!(
            tiers(&drain(&mut rig.rx)),
            vec![Tier::Overdue, Tier::Overdue]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_exits_promptly_on_cancel_mid_sleep() {
        let rig = rig();
        let task = add_due_in(&rig, 7 * 86_400);
        let mut ctx = rig.ctx.clone();
        ctx.settings.poll_interval = Duration::from_secs(3_600);
        let cancel = CancellationToken::new();
        let watcher = Watcher::new(task.id, 1, ctx, cancel.clone());

        let handle = tokio::spawn(watcher.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let reason = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("watcher should stop after cancel")
            .unwrap();
        assert_eq!(reason, StopReason::Cancelled);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_stops_after_completion() {
        let mut rig = rig();
        let task = add_due_in(&rig, -60);
        let mut ctx = rig.ctx.clone();
        ctx.settings.poll_interval = Duration::from_millis(10);
        let watcher = Watcher::new(task.id, 1, ctx, CancellationToken::new());

        let handle = tokio::spawn(watcher.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        rig.store.complete(task.id).unwrap();

        let reason = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("watcher should notice completion")
            .unwrap();
        assert_eq!(reason, StopReason::Completed);
        assert_eq!(tiers(&drain(&mut rig.rx)), vec![Tier::Overdue]);
    }
}
