//! Execution of auto-analyze statements on a borrowed session.

pub mod sql;

use crate::session::{Session, SessionError, StatsHandle};
use crate::tracker::{ProcessTracker, TrackerError};
use snafu::{ResultExt, Snafu};
use sql::{RenderError, SqlTemplate};
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Snafu)]
pub enum ExecError {
    #[snafu(display("Unsupported statistics version {}", version))]
    UnsupportedStatsVersion { version: i64 },

    #[snafu(display("Failed to render analyze statement: {}", source))]
    Render { source: RenderError },

    #[snafu(display("Failed to track auto-analyze process: {}", source))]
    Track { source: TrackerError },

    #[snafu(display("{}", source))]
    Statement { source: SessionError },

    #[snafu(display("Auto-analyze process {} was killed", id))]
    Killed { id: u64 },
}

type Result<T, E = ExecError> = std::result::Result<T, E>;

/// Runs one auto-analyze statement and reports whether it succeeded.
///
/// Failures are logged here and collapsed into `false`; callers only need
/// the outcome.
pub async fn auto_analyze(
    session: &mut dyn Session,
    stats_handle: &dyn StatsHandle,
    tracker: &dyn ProcessTracker,
    stats_ver: i64,
    template: &SqlTemplate,
) -> bool {
    let start = Instant::now();
    info!("Auto analyze triggered: {}", template);

    match run_analyze_stmt(session, stats_handle, tracker, stats_ver, template).await {
        Ok(()) => {
            info!(
                "Auto analyze succeeded: {} (cost {:?})",
                template,
                start.elapsed()
            );
            true
        }
        Err(err) => {
            warn!(
                "Auto analyze failed: {} (cost {:?}): {}",
                template,
                start.elapsed(),
                err
            );
            false
        }
    }
}

async fn run_analyze_stmt(
    session: &mut dyn Session,
    stats_handle: &dyn StatsHandle,
    tracker: &dyn ProcessTracker,
    stats_ver: i64,
    template: &SqlTemplate,
) -> Result<()> {
    let pinned = statement_analyze_version(stats_ver)?;
    let sql = template.render().context(RenderSnafu)?;

    // The pinned version only applies to this statement; pooled sessions
    // keep their variables, so the session's own value is put back afterwards.
    let previous = session.analyze_version();
    session
        .execute(&analyze_version_statement(pinned))
        .await
        .context(StatementSnafu)?;

    let result = run_tracked(&mut *session, stats_handle, tracker, &sql).await;

    if previous != pinned {
        if let Err(err) = session
            .execute(&analyze_version_statement(previous))
            .await
        {
            warn!("Failed to restore tidb_analyze_version to {}: {}", previous, err);
        }
    }
    result
}

async fn run_tracked(
    session: &mut dyn Session,
    stats_handle: &dyn StatsHandle,
    tracker: &dyn ProcessTracker,
    sql: &str,
) -> Result<()> {
    let id = stats_handle.auto_analyze_proc_id();
    let killed = tracker.track(id, sql).context(TrackSnafu)?;
    let _tracked = TrackedGuard { tracker, id };

    tokio::select! {
        result = session.execute(sql) => result.context(StatementSnafu),
        _ = killed.killed() => KilledSnafu { id }.fail(),
    }
}

/// Version 0 tables are analyzed with version 1 statistics.
fn statement_analyze_version(stats_ver: i64) -> Result<i64> {
    match stats_ver {
        0 | 1 => Ok(1),
        2 => Ok(2),
        version => UnsupportedStatsVersionSnafu { version }.fail(),
    }
}

fn analyze_version_statement(version: i64) -> String {
    format!("set @@session.tidb_analyze_version = {}", version)
}

struct TrackedGuard<'a> {
    tracker: &'a dyn ProcessTracker,
    id: u64,
}

impl Drop for TrackedGuard<'_> {
    fn drop(&mut self) {
        self.tracker.untrack(self.id);
    }
}
