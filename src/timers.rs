//! Countdown timers for delayed kitchen fires and block-time rentals.
//!
//! A timer is nothing but a server-supplied start timestamp plus a duration,
//! so the displayed value can be re-derived at any time (after a restart,
//! or when the window comes back to the foreground) without drift. The
//! ticker only decides when to re-derive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayTimer {
    pub started_at: DateTime<Utc>,
    pub duration_secs: i64,
}

impl DelayTimer {
    pub fn new(started_at: DateTime<Utc>, duration_secs: i64) -> Self {
        Self {
            started_at,
            duration_secs: duration_secs.max(0),
        }
    }

    pub fn ends_at(&self) -> DateTime<Utc> {
        self.started_at + chrono::Duration::seconds(self.duration_secs)
    }

    /// Whole seconds left, never negative.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.ends_at() - now).num_seconds().max(0)
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        now >= self.ends_at()
    }

    pub fn label(&self, now: DateTime<Utc>) -> String {
        format_countdown(self.remaining_secs(now))
    }
}

/// `m:ss`, or `h:mm:ss` from an hour up.
pub fn format_countdown(secs: i64) -> String {
    let secs = secs.max(0);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tick {
    pub id: String,
    pub remaining_secs: i64,
    pub label: String,
    pub ready: bool,
}

/// Periodic re-derivation of a set of timers, pushed over a channel.
///
/// Stops once every timer is ready, when cancelled, when the receiver is
/// dropped, or when the ticker itself is dropped.
pub struct CountdownTicker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl CountdownTicker {
    pub fn spawn(timers: Vec<(String, DelayTimer)>, period: Duration) -> (Self, mpsc::Receiver<Tick>) {
        let (tx, rx) = mpsc::channel(timers.len().max(1) * 4);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let now = Utc::now();
                let mut all_ready = true;
                for (id, timer) in &timers {
                    let ready = timer.is_ready(now);
                    all_ready &= ready;
                    let tick = Tick {
                        id: id.clone(),
                        remaining_secs: timer.remaining_secs(now),
                        label: timer.label(now),
                        ready,
                    };
                    if tx.send(tick).await.is_err() {
                        return;
                    }
                }
                if all_ready {
                    break;
                }
            }
            debug!(timers = timers.len(), "countdown ticker stopped");
        });

        (Self { cancel, handle }, rx)
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for CountdownTicker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
