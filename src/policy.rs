//! Reminder tiers and the policy that maps time-left onto them.
//!
//! Watchers sample on a fixed interval rather than waking exactly at each
//! boundary, so every advance-warning tier owns a short hit window above its
//! boundary. The window must be wider than the poll interval for a boundary to
//! be seen at least once.
//!
//! | remaining (s)          | tier    |
//! |------------------------|---------|
//! | `< 0`                  | Overdue |
//! | `86400 ..< 86400 + w`  | T24h    |
//! | `43200 ..< 43200 + w`  | T12h    |
//! | `3600  ..< 3600  + w`  | T1h     |
//! | anything else          | none    |

use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_HIT_WINDOW_SECS: i64 = 60;

/// Widest hit window. Windows must stay narrower than the smallest lead (1 h)
/// so no two tiers overlap.
pub const MAX_HIT_WINDOW_SECS: i64 = 3599;

/// Reminder tiers, ordered by when they fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[serde(rename = "t24h")]
    T24h,
    #[serde(rename = "t12h")]
    T12h,
    #[serde(rename = "t1h")]
    T1h,
    Overdue,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::T24h, Tier::T12h, Tier::T1h, Tier::Overdue];

    /// Seconds before the deadline at which the tier opens. `None` for Overdue.
    pub fn lead_seconds(self) -> Option<i64> {
        match self {
            Tier::T24h => Some(24 * 3600),
            Tier::T12h => Some(12 * 3600),
            Tier::T1h => Some(3600),
            Tier::Overdue => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::T24h => "t24h",
            Tier::T12h => "t12h",
            Tier::T1h => "t1h",
            Tier::Overdue => "overdue",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderPolicy {
    hit_window_secs: i64,
}

impl ReminderPolicy {
    pub fn new(hit_window_secs: i64) -> Self {
        Self {
            hit_window_secs: hit_window_secs.clamp(1, MAX_HIT_WINDOW_SECS),
        }
    }

    pub fn hit_window_secs(&self) -> i64 {
        self.hit_window_secs
    }

    pub fn classify(&self, remaining_seconds: i64) -> Option<Tier> {
        if remaining_seconds < 0 {
            return Some(Tier::Overdue);
        }
        Tier::ALL.into_iter().find(|tier| {
            tier.lead_seconds().is_some_and(|lead| {
                remaining_seconds >= lead && remaining_seconds < lead + self.hit_window_secs
            })
        })
    }
}

impl Default for ReminderPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_HIT_WINDOW_SECS)
    }
}

/// Classify with the default 60 second hit window.
pub fn classify(remaining_seconds: i64) -> Option<Tier> {
    ReminderPolicy::default().classify(remaining_seconds)
}
