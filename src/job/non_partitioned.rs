use super::eligibility::EligibilityOracle;
use super::{
    AcquireSessionSnafu, AlreadyAnalyzedSnafu, AnalysisJob, AnalysisOutcome, AnalyzeType,
    HookGuard, Indicators, JobError, JobHook, RejectedByValidityCheckSnafu,
};
use crate::exec::auto_analyze;
use crate::exec::sql::SqlTemplate;
use crate::session::{Session, StatsHandle};
use crate::tracker::ProcessTracker;
use async_trait::async_trait;
use itertools::Itertools;
use snafu::ResultExt;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Pending,
    Rejected,
    Consumed,
}

/// Analyzes a non-partitioned table, or only its newly added indexes.
pub struct NonPartitionedTableAnalysisJob {
    pub table_schema: String,
    pub table_name: String,
    pub table_id: i64,
    /// Indexes added since the last full analyze, not every index of the table.
    pub indexes: Vec<String>,
    pub table_stats_ver: i64,
    pub weight: f64,
    indicators: Indicators,
    success_hook: Option<JobHook>,
    failure_hook: Option<JobHook>,
    state: JobState,
}

impl NonPartitionedTableAnalysisJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        schema: impl Into<String>,
        table_name: impl Into<String>,
        table_id: i64,
        indexes: Vec<String>,
        table_stats_ver: i64,
        change_percentage: f64,
        table_size: f64,
        last_analysis_duration: Duration,
    ) -> Self {
        Self {
            table_schema: schema.into(),
            table_name: table_name.into(),
            table_id,
            indexes,
            table_stats_ver,
            weight: 0.0,
            indicators: Indicators {
                change_percentage,
                table_size,
                last_analysis_duration,
            },
            success_hook: None,
            failure_hook: None,
            state: JobState::Pending,
        }
    }

    /// Recomputed on every call from the newly added indexes.
    pub fn analyze_type(&self) -> AnalyzeType {
        if self.has_newly_added_index() {
            AnalyzeType::AnalyzeIndex
        } else {
            AnalyzeType::AnalyzeTable
        }
    }

    pub fn gen_sql_for_analyze_table(&self) -> SqlTemplate {
        SqlTemplate::new(
            "analyze table %n.%n",
            vec![self.table_schema.clone(), self.table_name.clone()],
        )
    }

    pub fn gen_sql_for_analyze_index(&self, index: &str) -> SqlTemplate {
        SqlTemplate::new(
            "analyze table %n.%n index %n",
            vec![
                self.table_schema.clone(),
                self.table_name.clone(),
                index.to_string(),
            ],
        )
    }

    async fn execute(
        &self,
        session: &mut dyn Session,
        stats_handle: &dyn StatsHandle,
        tracker: &dyn ProcessTracker,
    ) -> AnalysisOutcome {
        let success = match self.analyze_type() {
            AnalyzeType::AnalyzeTable => {
                self.analyze_table(session, stats_handle, tracker).await
            }
            AnalyzeType::AnalyzeIndex => {
                self.analyze_indexes(session, stats_handle, tracker).await
            }
        };
        success.into()
    }

    async fn analyze_table(
        &self,
        session: &mut dyn Session,
        stats_handle: &dyn StatsHandle,
        tracker: &dyn ProcessTracker,
    ) -> bool {
        let template = self.gen_sql_for_analyze_table();
        auto_analyze(session, stats_handle, tracker, self.table_stats_ver, &template).await
    }

    async fn analyze_indexes(
        &self,
        session: &mut dyn Session,
        stats_handle: &dyn StatsHandle,
        tracker: &dyn ProcessTracker,
    ) -> bool {
        let Some(first_index) = self.indexes.first() else {
            return true;
        };

        // Version 1 statistics only refresh the analyzed index, so every new
        // index needs its own statement.
        if session.analyze_version() == 1 {
            for index in &self.indexes {
                let template = self.gen_sql_for_analyze_index(index);
                if !auto_analyze(
                    &mut *session,
                    stats_handle,
                    tracker,
                    self.table_stats_ver,
                    &template,
                )
                .await
                {
                    return false;
                }
            }
            return true;
        }

        // From version 2 on, analyzing one index refreshes every index and
        // column of the table.
        let template = self.gen_sql_for_analyze_index(first_index);
        auto_analyze(session, stats_handle, tracker, self.table_stats_ver, &template).await
    }
}

#[async_trait]
impl AnalysisJob for NonPartitionedTableAnalysisJob {
    fn table_id(&self) -> i64 {
        self.table_id
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn set_weight(&mut self, weight: f64) {
        self.weight = weight;
    }

    fn indicators(&self) -> Indicators {
        self.indicators
    }

    fn set_indicators(&mut self, indicators: Indicators) {
        self.indicators = indicators;
    }

    fn has_newly_added_index(&self) -> bool {
        !self.indexes.is_empty()
    }

    async fn is_valid_to_analyze(&mut self, oracle: &dyn EligibilityOracle) -> (bool, String) {
        let (valid, reason) = oracle
            .check_eligible(&self.table_schema, &self.table_name)
            .await;
        if valid {
            return (true, String::new());
        }

        info!(
            "Skipping auto analyze for {}.{}: {}",
            self.table_schema, self.table_name, reason
        );
        if self.state == JobState::Pending {
            self.state = JobState::Rejected;
        }
        if let Some(hook) = self.failure_hook.take() {
            hook(&*self);
        }

        (false, reason)
    }

    fn register_success_hook(&mut self, hook: JobHook) {
        self.success_hook = Some(hook);
    }

    fn register_failure_hook(&mut self, hook: JobHook) {
        self.failure_hook = Some(hook);
    }

    async fn analyze(
        &mut self,
        stats_handle: &dyn StatsHandle,
        tracker: &dyn ProcessTracker,
    ) -> Result<(), JobError> {
        match self.state {
            JobState::Pending => {}
            JobState::Rejected => {
                return RejectedByValidityCheckSnafu {
                    table_id: self.table_id,
                }
                .fail()
            }
            JobState::Consumed => {
                return AlreadyAnalyzedSnafu {
                    table_id: self.table_id,
                }
                .fail()
            }
        }
        self.state = JobState::Consumed;

        let success_hook = self.success_hook.take();
        let failure_hook = self.failure_hook.take();
        let job: &Self = self;
        let mut guard = HookGuard::new(job, success_hook, failure_hook);

        debug!("Running {}", job);
        // A job dropped while waiting for a session has not analyzed anything.
        guard.record(AnalysisOutcome::Failed);
        // Declared after the guard so the session returns to the pool before
        // any hook fires.
        let mut session = match stats_handle.session_pool().acquire().await.context(
            AcquireSessionSnafu {
                table_id: job.table_id,
            },
        ) {
            Ok(session) => session,
            Err(err) => {
                guard.record(AnalysisOutcome::Succeeded);
                return Err(err);
            }
        };

        let outcome = job
            .execute(session.as_mut(), stats_handle, tracker)
            .await;
        guard.record(outcome);

        Ok(())
    }
}

impl fmt::Display for NonPartitionedTableAnalysisJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "NonPartitionedTableAnalysisJob:")?;
        writeln!(f, "\tAnalyzeType: {}", self.analyze_type())?;
        writeln!(f, "\tIndexes: {}", self.indexes.iter().join(", "))?;
        writeln!(f, "\tSchema: {}", self.table_schema)?;
        writeln!(f, "\tTable: {}", self.table_name)?;
        writeln!(f, "\tTableID: {}", self.table_id)?;
        writeln!(f, "\tTableStatsVer: {}", self.table_stats_ver)?;
        writeln!(
            f,
            "\tChangePercentage: {:.6}",
            self.indicators.change_percentage
        )?;
        writeln!(f, "\tTableSize: {:.2}", self.indicators.table_size)?;
        writeln!(
            f,
            "\tLastAnalysisDuration: {:?}",
            self.indicators.last_analysis_duration
        )?;
        writeln!(f, "\tWeight: {:.6}", self.weight)
    }
}

impl fmt::Debug for NonPartitionedTableAnalysisJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NonPartitionedTableAnalysisJob")
            .field("table_schema", &self.table_schema)
            .field("table_name", &self.table_name)
            .field("table_id", &self.table_id)
            .field("indexes", &self.indexes)
            .field("table_stats_ver", &self.table_stats_ver)
            .field("weight", &self.weight)
            .field("indicators", &self.indicators)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
