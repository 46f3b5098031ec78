//! Auto-analyze jobs: what to analyze, how urgent it is, and how the outcome
//! is reported back to the scheduler.

pub mod eligibility;
mod non_partitioned;

pub use non_partitioned::NonPartitionedTableAnalysisJob;

use crate::session::{SessionError, StatsHandle};
use crate::tracker::ProcessTracker;
use async_trait::async_trait;
use eligibility::EligibilityOracle;
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Snafu)]
pub enum JobError {
    #[snafu(display("Failed to acquire session for table {}: {}", table_id, source))]
    AcquireSession {
        table_id: i64,
        source: SessionError,
    },

    #[snafu(display("Table {} was rejected by the validity check", table_id))]
    RejectedByValidityCheck { table_id: i64 },

    #[snafu(display("Job for table {} has already been analyzed", table_id))]
    AlreadyAnalyzed { table_id: i64 },
}

/// Staleness signals captured when the job was created.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Indicators {
    /// Fraction of rows changed since the last analyze, in `[0, 1]`.
    pub change_percentage: f64,
    /// Estimated row count of the table.
    pub table_size: f64,
    pub last_analysis_duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnalyzeType {
    #[serde(rename = "analyzeTable")]
    AnalyzeTable,
    #[serde(rename = "analyzeIndex")]
    AnalyzeIndex,
}

impl AnalyzeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyzeType::AnalyzeTable => "analyzeTable",
            AnalyzeType::AnalyzeIndex => "analyzeIndex",
        }
    }
}

impl fmt::Display for AnalyzeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of running a job's analyze statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisOutcome {
    Succeeded,
    Failed,
}

impl From<bool> for AnalysisOutcome {
    fn from(success: bool) -> Self {
        if success {
            AnalysisOutcome::Succeeded
        } else {
            AnalysisOutcome::Failed
        }
    }
}

/// One-shot callback invoked with the job once its outcome is known.
pub type JobHook = Box<dyn FnOnce(&dyn AnalysisJob) + Send + Sync>;

/// The capability every auto-analyze job variant provides to the scheduler.
#[async_trait]
pub trait AnalysisJob: fmt::Display + Send + Sync {
    fn table_id(&self) -> i64;

    fn weight(&self) -> f64;

    fn set_weight(&mut self, weight: f64);

    fn indicators(&self) -> Indicators;

    fn set_indicators(&mut self, indicators: Indicators);

    fn has_newly_added_index(&self) -> bool;

    /// Asks the oracle whether the table may be analyzed now.
    ///
    /// A negative answer fires the failure hook before returning, and the
    /// job must not be analyzed afterwards.
    async fn is_valid_to_analyze(&mut self, oracle: &dyn EligibilityOracle) -> (bool, String);

    fn register_success_hook(&mut self, hook: JobHook);

    fn register_failure_hook(&mut self, hook: JobHook);

    /// Runs the analyze statements and fires exactly one hook.
    ///
    /// Statement failures are reported through the failure hook only; the
    /// returned error covers session acquisition and misuse of the job.
    async fn analyze(
        &mut self,
        stats_handle: &dyn StatsHandle,
        tracker: &dyn ProcessTracker,
    ) -> Result<(), JobError>;
}

/// Fires the hook matching the recorded outcome when dropped.
///
/// Unwinding always reports failure.
pub(crate) struct HookGuard<'a> {
    job: &'a dyn AnalysisJob,
    success_hook: Option<JobHook>,
    failure_hook: Option<JobHook>,
    outcome: AnalysisOutcome,
}

impl<'a> HookGuard<'a> {
    pub(crate) fn new(
        job: &'a dyn AnalysisJob,
        success_hook: Option<JobHook>,
        failure_hook: Option<JobHook>,
    ) -> Self {
        Self {
            job,
            success_hook,
            failure_hook,
            outcome: AnalysisOutcome::Succeeded,
        }
    }

    pub(crate) fn record(&mut self, outcome: AnalysisOutcome) {
        self.outcome = outcome;
    }
}

impl Drop for HookGuard<'_> {
    fn drop(&mut self) {
        let outcome = if std::thread::panicking() {
            AnalysisOutcome::Failed
        } else {
            self.outcome
        };

        let hook = match outcome {
            AnalysisOutcome::Succeeded => self.success_hook.take(),
            AnalysisOutcome::Failed => self.failure_hook.take(),
        };
        if let Some(hook) = hook {
            hook(self.job);
        }
    }
}
