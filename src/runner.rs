use crate::config::AppConfig;
use crate::job::eligibility::{AnalyzeHistoryOracle, EligibilityOracle, MySqlAnalyzeHistory};
use crate::job::{AnalysisJob, JobError, NonPartitionedTableAnalysisJob};
use crate::models::{JobReport, JobStatus};
use crate::session::{AutoAnalyzeHandle, MySqlSessionPool, SessionError, StatsHandle};
use crate::tracker::{InMemoryProcessTracker, ProcessTracker};
use snafu::{ResultExt, Snafu};
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Snafu)]
pub enum RunnerError {
    #[snafu(display("{}", source))]
    Connect { source: SessionError },

    #[snafu(display("Failed to analyze table {}: {}", table_id, source))]
    Analyze { table_id: i64, source: JobError },
}

type Result<T, E = RunnerError> = std::result::Result<T, E>;

/// Drives jobs through the validity gate and analysis, one at a time.
pub struct AutoAnalyzeRunner {
    stats_handle: Arc<dyn StatsHandle>,
    tracker: Arc<dyn ProcessTracker>,
    oracle: Arc<dyn EligibilityOracle>,
}

impl AutoAnalyzeRunner {
    pub fn new(
        stats_handle: Arc<dyn StatsHandle>,
        tracker: Arc<dyn ProcessTracker>,
        oracle: Arc<dyn EligibilityOracle>,
    ) -> Self {
        Self {
            stats_handle,
            tracker,
            oracle,
        }
    }

    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let sessions = MySqlSessionPool::connect(&config.connection)
            .await
            .context(ConnectSnafu)?;
        let history = MySqlAnalyzeHistory::new(sessions.pool().clone());
        let oracle =
            AnalyzeHistoryOracle::with_failed_analysis_wait(history, config.failed_analysis_wait());

        Ok(Self::new(
            Arc::new(AutoAnalyzeHandle::new(sessions)),
            Arc::new(InMemoryProcessTracker::new()),
            Arc::new(oracle),
        ))
    }

    /// Runs one job to completion and reports which hook it fired.
    pub async fn run(&self, mut job: NonPartitionedTableAnalysisJob) -> Result<JobReport> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let success_tx = tx.clone();
        job.register_success_hook(Box::new(move |job: &dyn AnalysisJob| {
            let _ = success_tx.send((job.table_id(), JobStatus::Succeeded));
        }));
        job.register_failure_hook(Box::new(move |job: &dyn AnalysisJob| {
            let _ = tx.send((job.table_id(), JobStatus::Failed));
        }));

        let mut report = JobReport {
            table_id: job.table_id,
            schema: job.table_schema.clone(),
            table_name: job.table_name.clone(),
            analyze_type: job.analyze_type(),
            indexes: job.indexes.clone(),
            weight: job.weight,
            status: JobStatus::Failed,
            reason: None,
        };

        let (valid, reason) = job.is_valid_to_analyze(self.oracle.as_ref()).await;
        if !valid {
            report.status = JobStatus::Skipped;
            report.reason = Some(reason);
            return Ok(report);
        }

        info!("Analyzing {}", report.full_table_name());
        job.analyze(self.stats_handle.as_ref(), self.tracker.as_ref())
            .await
            .context(AnalyzeSnafu {
                table_id: report.table_id,
            })?;
        drop(job);

        if let Ok((_, status)) = rx.try_recv() {
            report.status = status;
        }
        if report.status == JobStatus::Failed {
            report.reason = Some("analyze statement failed".to_string());
        }
        Ok(report)
    }

    /// Runs jobs in descending weight order; structural errors are reported
    /// as failed jobs instead of aborting the batch.
    pub async fn run_all(&self, mut jobs: Vec<NonPartitionedTableAnalysisJob>) -> Vec<JobReport> {
        jobs.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(Ordering::Equal));

        let mut reports = Vec::with_capacity(jobs.len());
        for job in jobs {
            let fallback = JobReport {
                table_id: job.table_id,
                schema: job.table_schema.clone(),
                table_name: job.table_name.clone(),
                analyze_type: job.analyze_type(),
                indexes: job.indexes.clone(),
                weight: job.weight,
                status: JobStatus::Failed,
                reason: None,
            };

            match self.run(job).await {
                Ok(report) => reports.push(report),
                Err(err) => {
                    warn!("Auto analyze of {} aborted: {err}", fallback.full_table_name());
                    reports.push(JobReport {
                        reason: Some(err.to_string()),
                        ..fallback
                    });
                }
            }
        }
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::AnalyzeType;
    use crate::testing::{FakeOracle, FakeStatsHandle, SessionLog};
    use std::time::Duration;

    fn job(table: &str, table_id: i64, weight: f64) -> NonPartitionedTableAnalysisJob {
        let mut job = NonPartitionedTableAnalysisJob::new(
            "test",
            table,
            table_id,
            vec![],
            2,
            0.4,
            100.0,
            Duration::from_secs(1),
        );
        job.set_weight(weight);
        job
    }

    fn runner(handle: FakeStatsHandle, oracle: FakeOracle) -> AutoAnalyzeRunner {
        AutoAnalyzeRunner::new(
            Arc::new(handle),
            Arc::new(InMemoryProcessTracker::new()),
            Arc::new(oracle),
        )
    }

    #[tokio::test]
    async fn reports_success_from_hook() {
        let log = SessionLog::default();
        let runner = runner(FakeStatsHandle::new(2, log.clone()), FakeOracle::accepting());

        let report = runner.run(job("t1", 1, 1.0)).await.unwrap();

        assert_eq!(report.status, JobStatus::Succeeded);
        assert_eq!(report.analyze_type, AnalyzeType::AnalyzeTable);
        assert!(report.reason.is_none());
        assert_eq!(log.analyze_statements(), vec!["analyze table `test`.`t1`"]);
    }

    #[tokio::test]
    async fn reports_failed_statement() {
        let log = SessionLog::default();
        log.fail_on("`t1`");
        let runner = runner(FakeStatsHandle::new(2, log), FakeOracle::accepting());

        let report = runner.run(job("t1", 1, 1.0)).await.unwrap();

        assert_eq!(report.status, JobStatus::Failed);
        assert!(report.reason.is_some());
    }

    #[tokio::test]
    async fn skips_rejected_tables_without_running_sql() {
        let log = SessionLog::default();
        let runner = runner(
            FakeStatsHandle::new(2, log.clone()),
            FakeOracle::rejecting("last analysis just failed"),
        );

        let report = runner.run(job("t1", 1, 1.0)).await.unwrap();

        assert_eq!(report.status, JobStatus::Skipped);
        assert_eq!(report.reason.as_deref(), Some("last analysis just failed"));
        assert!(log.statements().is_empty());
    }

    #[tokio::test]
    async fn run_all_orders_by_weight_and_keeps_going_on_errors() {
        let log = SessionLog::default();
        let runner = runner(FakeStatsHandle::new(2, log.clone()), FakeOracle::accepting());

        let reports = runner
            .run_all(vec![job("low", 1, 0.1), job("high", 2, 0.9), job("mid", 3, 0.5)])
            .await;

        let order: Vec<&str> = reports.iter().map(|r| r.table_name.as_str()).collect();
        assert_eq!(order, vec!["high", "mid", "low"]);
        assert_eq!(
            log.analyze_statements(),
            vec![
                "analyze table `test`.`high`",
                "analyze table `test`.`mid`",
                "analyze table `test`.`low`",
            ]
        );

        let unavailable = runner_with_unavailable_pool();
        let reports = unavailable.run_all(vec![job("t1", 1, 1.0)]).await;
        assert_eq!(reports[0].status, JobStatus::Failed);
        assert!(reports[0]
            .reason
            .as_deref()
            .unwrap()
            .contains("Failed to acquire session"));
    }

    fn runner_with_unavailable_pool() -> AutoAnalyzeRunner {
        runner(FakeStatsHandle::unavailable(), FakeOracle::accepting())
    }
}
