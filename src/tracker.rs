use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use snafu::Snafu;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info};

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum TrackerError {
    #[snafu(display("Process {} is already tracked", id))]
    AlreadyTracked { id: u64 },
}

type Result<T, E = TrackerError> = std::result::Result<T, E>;

/// A long-running system statement visible to operators.
#[derive(Debug, Clone)]
pub struct TrackedProcess {
    pub id: u64,
    pub sql: String,
    pub started_at: Instant,
}

impl TrackedProcess {
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Resolves once the tracked process has been killed.
#[derive(Debug, Clone, Default)]
pub struct KillSignal(Arc<Notify>);

impl KillSignal {
    pub async fn killed(&self) {
        self.0.notified().await;
    }

    fn fire(&self) {
        // Stores a permit, so a kill issued before anyone waits is not lost.
        self.0.notify_one();
    }
}

/// Registry of system processes that can be listed and cancelled.
pub trait ProcessTracker: Send + Sync {
    fn track(&self, id: u64, sql: &str) -> Result<KillSignal>;

    fn untrack(&self, id: u64);

    fn processes(&self) -> Vec<TrackedProcess>;

    /// Returns false when no process with this id is tracked.
    fn kill(&self, id: u64) -> bool;
}

#[derive(Debug)]
struct TrackedEntry {
    process: TrackedProcess,
    signal: KillSignal,
}

#[derive(Debug, Default)]
pub struct InMemoryProcessTracker {
    processes: DashMap<u64, TrackedEntry>,
}

impl InMemoryProcessTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProcessTracker for InMemoryProcessTracker {
    fn track(&self, id: u64, sql: &str) -> Result<KillSignal> {
        match self.processes.entry(id) {
            Entry::Occupied(_) => AlreadyTrackedSnafu { id }.fail(),
            Entry::Vacant(slot) => {
                let signal = KillSignal::default();
                slot.insert(TrackedEntry {
                    process: TrackedProcess {
                        id,
                        sql: sql.to_string(),
                        started_at: Instant::now(),
                    },
                    signal: signal.clone(),
                });
                debug!("Tracking process {}: {}", id, sql);
                Ok(signal)
            }
        }
    }

    fn untrack(&self, id: u64) {
        if self.processes.remove(&id).is_some() {
            debug!("Untracked process {}", id);
        }
    }

    fn processes(&self) -> Vec<TrackedProcess> {
        let mut processes: Vec<TrackedProcess> = self
            .processes
            .iter()
            .map(|entry| entry.process.clone())
            .collect();
        processes.sort_by_key(|p| p.id);
        processes
    }

    fn kill(&self, id: u64) -> bool {
        match self.processes.get(&id) {
            Some(entry) => {
                info!("Killing auto-analyze process {}: {}", id, entry.process.sql);
                entry.signal.fire();
                true
            }
            None => false,
        }
    }
}
