// vigil/src/audit/scheduler.rs
//
// Cooperative tick loop for the audit agent.
//
// One tokio task, no thread-local state. Each tick computes the bucket
// key for every check's frequency and dispatches the checks whose bucket
// has not run yet: daily once per UTC calendar day, weekly on Monday's
// first tick, monthly on the 1st, quarterly on the 1st of
// Jan/Apr/Jul/Oct, continuous on every tick. Cancellation is a watch
// channel observed at tick boundaries — an in-flight run finishes (its
// checks bounded by the agent's soft deadline) before the loop exits.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc, Weekday};
use tokio::sync::watch;
use tracing::{error, info};

use crate::audit::{AuditAgent, CheckFrequency};
use crate::config::Config;
use crate::error::{Result, VigilError};

pub struct AuditScheduler {
    agent:       Arc<AuditAgent>,
    tick:        std::time::Duration,
    last_bucket: HashMap<String, String>,
    shutdown:    watch::Receiver<bool>,
}

impl AuditScheduler {
    pub fn new(agent: Arc<AuditAgent>, config: &Config, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            agent,
            tick: std::time::Duration::from_secs(config.audit.tick_seconds),
            last_bucket: HashMap::new(),
            shutdown,
        }
    }

    /// Tick until cancelled. Surfaces `Cancelled` so the composition
    /// root can map it to the cancellation exit code.
    pub async fn run(mut self) -> Result<()> {
        info!(tick_seconds = self.tick.as_secs(), "audit scheduler started");
        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        info!("audit scheduler stopping");
                        return Err(VigilError::Cancelled);
                    }
                }
                _ = tokio::time::sleep(self.tick) => {
                    self.dispatch_due(Utc::now()).await;
                }
            }
        }
    }

    /// Dispatch every check whose frequency bucket has not run yet.
    /// Public within the crate so tests can drive the clock directly.
    pub async fn dispatch_due(&mut self, now: DateTime<Utc>) {
        let due: Vec<String> = self
            .agent
            .catalog_summary()
            .into_iter()
            .filter_map(|(id, freq)| {
                let bucket = due_bucket(freq, now)?;
                if self.last_bucket.get(&id) == Some(&bucket) {
                    return None;
                }
                self.last_bucket.insert(id.clone(), bucket);
                Some(id)
            })
            .collect();

        if due.is_empty() {
            return;
        }
        if let Err(e) = self.agent.run_scope(Some(due.as_slice())).await {
            error!("scheduled audit run failed: {e}");
        }
    }
}

/// Bucket key for a frequency at an instant, or None when the frequency
/// is not eligible to fire at all on this date.
pub fn due_bucket(freq: CheckFrequency, now: DateTime<Utc>) -> Option<String> {
    match freq {
        CheckFrequency::Daily => Some(now.format("%Y-%m-%d").to_string()),
        CheckFrequency::Weekly => {
            if now.weekday() == Weekday::Mon {
                let iso = now.iso_week();
                Some(format!("{}-W{:02}", iso.year(), iso.week()))
            } else {
                None
            }
        }
        CheckFrequency::Monthly => {
            if now.day() == 1 {
                Some(now.format("%Y-%m").to_string())
            } else {
                None
            }
        }
        CheckFrequency::Quarterly => {
            if now.day() == 1 && matches!(now.month(), 1 | 4 | 7 | 10) {
                Some(format!("{}-Q{}", now.year(), (now.month() - 1) / 3 + 1))
            } else {
                None
            }
        }
        CheckFrequency::Continuous => Some(now.timestamp().to_string()),
    }
}
