//! [`CompletionWatchdog`] – liveness from completion signals.
//!
//! The passes never report failure on their output streams; a deferred pass
//! simply emits nothing.  Downstream consumers therefore infer liveness from
//! how long it has been since the last "done" marker of each pass kind.
//!
//! Register each pass kind with a deadline, feed every observed completion
//! into [`CompletionWatchdog::record_completion`], and poll
//! [`CompletionWatchdog::overdue`] from a supervisor loop.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sceneparse_types::PassKind;

/// Liveness of one pass kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassHealth {
    /// Completed (or was registered) within its deadline.
    Live,
    /// No completion within the deadline.
    Stalled,
}

#[derive(Debug, Clone)]
struct PassEntry {
    last_seen: Instant,
    deadline: Duration,
    completions: u64,
}

/// Tracks the last completion per [`PassKind`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use sceneparse_runtime::liveness::{CompletionWatchdog, PassHealth};
/// use sceneparse_types::PassKind;
///
/// let mut wd = CompletionWatchdog::new();
/// wd.register(PassKind::Detection, Duration::from_secs(5));
/// wd.record_completion(PassKind::Detection);
///
/// assert_eq!(wd.health(PassKind::Detection), PassHealth::Live);
/// assert_eq!(wd.completions(PassKind::Detection), 1);
/// ```
#[derive(Debug, Default)]
pub struct CompletionWatchdog {
    passes: HashMap<PassKind, PassEntry>,
}

impl CompletionWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch `pass` with the given `deadline`.  The clock starts now;
    /// re-registering resets it.
    pub fn register(&mut self, pass: PassKind, deadline: Duration) {
        self.register_at(pass, deadline, Instant::now());
    }

    pub fn register_at(&mut self, pass: PassKind, deadline: Duration, now: Instant) {
        self.passes.insert(
            pass,
            PassEntry {
                last_seen: now,
                deadline,
                completions: 0,
            },
        );
    }

    /// Record a completion of `pass`.  Unregistered kinds are ignored.
    pub fn record_completion(&mut self, pass: PassKind) {
        self.record_completion_at(pass, Instant::now());
    }

    pub fn record_completion_at(&mut self, pass: PassKind, now: Instant) {
        if let Some(entry) = self.passes.get_mut(&pass) {
            entry.last_seen = now;
            entry.completions += 1;
        }
    }

    /// Restart the deadline of `pass` without touching its completion count.
    /// Unregistered kinds are ignored.
    pub fn rearm(&mut self, pass: PassKind) {
        self.rearm_at(pass, Instant::now());
    }

    pub fn rearm_at(&mut self, pass: PassKind, now: Instant) {
        if let Some(entry) = self.passes.get_mut(&pass) {
            entry.last_seen = entry.last_seen.max(now);
        }
    }

    /// Number of completions recorded for `pass`.
    pub fn completions(&self, pass: PassKind) -> u64 {
        self.passes.get(&pass).map_or(0, |e| e.completions)
    }

    /// Unregistered kinds report [`PassHealth::Stalled`].
    pub fn health(&self, pass: PassKind) -> PassHealth {
        self.health_at(pass, Instant::now())
    }

    pub fn health_at(&self, pass: PassKind, now: Instant) -> PassHealth {
        match self.passes.get(&pass) {
            Some(entry) if now.saturating_duration_since(entry.last_seen) <= entry.deadline => {
                PassHealth::Live
            }
            _ => PassHealth::Stalled,
        }
    }

    /// Pass kinds whose deadline has lapsed, in unspecified order.
    pub fn overdue(&self) -> Vec<PassKind> {
        self.overdue_at(Instant::now())
    }

    pub fn overdue_at(&self, now: Instant) -> Vec<PassKind> {
        self.passes
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.last_seen) > e.deadline)
            .map(|(pass, _)| *pass)
            .collect()
    }
}
