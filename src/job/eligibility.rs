//! Decides whether a table may be auto-analyzed now, based on the history of
//! previous analyze jobs.

use async_trait::async_trait;
use snafu::{ResultExt, Snafu};
use sqlx::mysql::MySql;
use sqlx::Pool;
use std::time::Duration;
use tracing::warn;

/// How long a table whose analyze jobs have only ever failed is left alone.
pub const DEFAULT_FAILED_ANALYSIS_WAIT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Snafu)]
pub enum HistoryError {
    #[snafu(display("Failed to execute query: {}", query))]
    Query {
        query: &'static str,
        source: sqlx::Error,
    },
}

type Result<T, E = HistoryError> = std::result::Result<T, E>;

/// Answers whether a table is eligible for analysis, with a reason when not.
#[async_trait]
pub trait EligibilityOracle: Send + Sync {
    async fn check_eligible(&self, schema: &str, table: &str) -> (bool, String);
}

/// Past analyze jobs of a table.
#[async_trait]
pub trait AnalyzeHistory: Send + Sync {
    /// Time since the most recent failed analyze job ended, `None` without failures.
    async fn last_failed_analysis_duration(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Option<Duration>>;

    /// Average run time of finished analyze jobs, `None` without any.
    async fn average_analysis_duration(&self, schema: &str, table: &str)
        -> Result<Option<Duration>>;
}

pub struct AnalyzeHistoryOracle<H> {
    history: H,
    failed_analysis_wait: Duration,
}

impl<H: AnalyzeHistory> AnalyzeHistoryOracle<H> {
    pub fn new(history: H) -> Self {
        Self::with_failed_analysis_wait(history, DEFAULT_FAILED_ANALYSIS_WAIT)
    }

    pub fn with_failed_analysis_wait(history: H, failed_analysis_wait: Duration) -> Self {
        Self {
            history,
            failed_analysis_wait,
        }
    }
}

#[async_trait]
impl<H: AnalyzeHistory> EligibilityOracle for AnalyzeHistoryOracle<H> {
    async fn check_eligible(&self, schema: &str, table: &str) -> (bool, String) {
        let last_failed = match self
            .history
            .last_failed_analysis_duration(schema, table)
            .await
        {
            Ok(duration) => duration,
            Err(err) => {
                warn!("Failed to read last failed analysis of {schema}.{table}: {err}");
                return (
                    false,
                    format!("fail to get last failed analysis duration: {err}"),
                );
            }
        };

        let average = match self.history.average_analysis_duration(schema, table).await {
            Ok(duration) => duration,
            Err(err) => {
                warn!("Failed to read average analysis duration of {schema}.{table}: {err}");
                return (
                    false,
                    format!("fail to get average analysis duration: {err}"),
                );
            }
        };

        let Some(last_failed) = last_failed else {
            return (true, String::new());
        };

        if last_failed.is_zero() {
            return (false, "last analysis just failed".to_string());
        }

        match average {
            None if last_failed < self.failed_analysis_wait => (
                false,
                format!(
                    "only failed analysis, last failed analysis duration: {:?}",
                    last_failed
                ),
            ),
            Some(average) if last_failed < average * 2 => (
                false,
                format!(
                    "last failed analysis duration is less than 2 times the average analysis duration, \
                     last failed analysis duration: {:?}, average analysis duration: {:?}",
                    last_failed, average
                ),
            ),
            _ => (true, String::new()),
        }
    }
}

/// Reads analyze history from TiDB's `mysql.analyze_jobs` table.
pub struct MySqlAnalyzeHistory {
    pool: Pool<MySql>,
}

impl MySqlAnalyzeHistory {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AnalyzeHistory for MySqlAnalyzeHistory {
    async fn last_failed_analysis_duration(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Option<Duration>> {
        const QUERY: &str = r#"
            SELECT CAST(TIMESTAMPDIFF(SECOND, MAX(end_time), NOW()) AS SIGNED)
            FROM mysql.analyze_jobs
            WHERE table_schema = ?
              AND table_name = ?
              AND state = 'failed'
              AND partition_name = ''
        "#;

        let seconds: Option<i64> = sqlx::query_scalar(QUERY)
            .bind(schema)
            .bind(table)
            .fetch_one(&self.pool)
            .await
            .context(QuerySnafu { query: QUERY })?;

        Ok(seconds.map(seconds_to_duration))
    }

    async fn average_analysis_duration(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Option<Duration>> {
        const QUERY: &str = r#"
            SELECT CAST(AVG(TIMESTAMPDIFF(SECOND, start_time, end_time)) AS SIGNED)
            FROM mysql.analyze_jobs
            WHERE table_schema = ?
              AND table_name = ?
              AND state = 'finished'
              AND partition_name = ''
              AND job_info NOT LIKE 'merge global stats%'
        "#;

        let seconds: Option<i64> = sqlx::query_scalar(QUERY)
            .bind(schema)
            .bind(table)
            .fetch_one(&self.pool)
            .await
            .context(QuerySnafu { query: QUERY })?;

        Ok(seconds.map(seconds_to_duration))
    }
}

fn seconds_to_duration(seconds: i64) -> Duration {
    // Clock skew between end_time and NOW() can yield negative values.
    Duration::from_secs(seconds.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    struct FixedHistory {
        last_failed: Option<Duration>,
        average: Option<Duration>,
        broken: bool,
    }

    #[async_trait]
    impl AnalyzeHistory for FixedHistory {
        async fn last_failed_analysis_duration(
            &self,
            _schema: &str,
            _table: &str,
        ) -> Result<Option<Duration>> {
            if self.broken {
                return Err(HistoryError::Query {
                    query: "select 1",
                    source: sqlx::Error::PoolClosed,
                });
            }
            Ok(self.last_failed)
        }

        async fn average_analysis_duration(
            &self,
            _schema: &str,
            _table: &str,
        ) -> Result<Option<Duration>> {
            Ok(self.average)
        }
    }

    fn secs(s: u64) -> Option<Duration> {
        Some(Duration::from_secs(s))
    }

    #[rstest]
    #[case::never_failed(None, secs(60), true)]
    #[case::never_analyzed(None, None, true)]
    #[case::just_failed(secs(0), secs(60), false)]
    #[case::only_failures_recent(secs(600), None, false)]
    #[case::only_failures_old(secs(3600), None, true)]
    #[case::failed_within_twice_average(secs(100), secs(60), false)]
    #[case::failed_long_ago(secs(120), secs(60), true)]
    #[tokio::test]
    async fn applies_failure_backoff(
        #[case] last_failed: Option<Duration>,
        #[case] average: Option<Duration>,
        #[case] expected: bool,
    ) {
        let oracle = AnalyzeHistoryOracle::new(FixedHistory {
            last_failed,
            average,
            broken: false,
        });

        let (valid, reason) = oracle.check_eligible("test", "t1").await;

        assert_eq!(valid, expected);
        assert_eq!(reason.is_empty(), expected);
    }

    #[tokio::test]
    async fn history_errors_make_table_ineligible() {
        let oracle = AnalyzeHistoryOracle::new(FixedHistory {
            last_failed: None,
            average: None,
            broken: true,
        });

        let (valid, reason) = oracle.check_eligible("test", "t1").await;

        assert!(!valid);
        assert!(reason.starts_with("fail to get last failed analysis duration"));
    }

    #[tokio::test]
    async fn custom_wait_time_is_honoured() {
        let oracle = AnalyzeHistoryOracle::with_failed_analysis_wait(
            FixedHistory {
                last_failed: secs(90),
                average: None,
                broken: false,
            },
            Duration::from_secs(60),
        );

        let (valid, _) = oracle.check_eligible("test", "t1").await;
        assert!(valid);
    }

    #[test]
    fn negative_seconds_clamp_to_zero() {
        assert_eq!(seconds_to_duration(-5), Duration::ZERO);
        assert_eq!(seconds_to_duration(42), Duration::from_secs(42));
    }
}
