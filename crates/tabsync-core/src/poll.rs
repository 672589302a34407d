//! Per-view background refresh timers.
//!
//! The scheduler owns one spawned task per active view. The first tick fires
//! one full interval after `start`; the immediate load on entering a view is
//! the controller's job. A failing tick is logged and the schedule carries on.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Context passed to every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// 1 for the first tick after `start`.
    pub number: u64,
    /// Background ticks never show a loading indicator.
    pub silent: bool,
}

#[derive(Debug)]
pub struct PollTask {
    pub view_key: String,
    pub interval: Duration,
    handle: JoinHandle<()>,
}

impl PollTask {
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

#[derive(Debug, Default)]
pub struct PollingScheduler {
    tasks: HashMap<String, PollTask>,
}

impl PollingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `task` every `interval` until stopped. Replaces any timer already
    /// running for `view_key`. Must be called within a tokio runtime.
    ///
    /// A zero interval schedules nothing and returns false.
    pub fn start<F, Fut, E>(&mut self, view_key: &str, interval: Duration, task: F) -> bool
    where
        F: Fn(Tick) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display,
    {
        self.stop(view_key);
        if interval.is_zero() {
            warn!(view = view_key, "Zero poll interval, polling disabled");
            return false;
        }

        let key = view_key.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut number = 0;
            loop {
                ticker.tick().await;
                number += 1;
                debug!(view = %key, tick = number, "Poll tick");
                let run = task(Tick { number, silent: true });
                if let Err(e) = run.await {
                    warn!(view = %key, tick = number, error = %e, "Poll tick failed");
                }
            }
        });

        debug!(view = view_key, interval_ms = interval.as_millis() as u64, "Polling started");
        self.tasks.insert(
            view_key.to_string(),
            PollTask {
                view_key: view_key.to_string(),
                interval,
                handle,
            },
        );
        true
    }

    /// Cancel the timer for `view_key`. Idempotent.
    pub fn stop(&mut self, view_key: &str) {
        if let Some(task) = self.tasks.remove(view_key) {
            task.handle.abort();
            debug!(view = view_key, "Polling stopped");
        }
    }

    pub fn stop_all(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.handle.abort();
        }
    }

    pub fn is_active(&self, view_key: &str) -> bool {
        self.tasks.get(view_key).is_some_and(PollTask::is_active)
    }

    pub fn task(&self, view_key: &str) -> Option<&PollTask> {
        self.tasks.get(view_key)
    }

    pub fn active_count(&self) -> usize {
        self.tasks.values().filter(|t| t.is_active()).count()
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}

// ============================================================================
// Tests
// ============================================================================
