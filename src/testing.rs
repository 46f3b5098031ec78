//! In-memory collaborators for unit tests.

use crate::job::eligibility::EligibilityOracle;
use crate::job::{AnalysisJob, JobHook};
use crate::session::{Session, SessionError, SessionPool, StatsHandle};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct LogState {
    statements: Vec<String>,
    fail_on: Vec<String>,
    hang_on: Vec<String>,
    released: usize,
    /// `tidb_analyze_version` left on the pooled connection, if ever set.
    session_version: Option<i64>,
}

/// Records statements run by fake sessions and injects failures.
#[derive(Debug, Clone, Default)]
pub struct SessionLog(Arc<Mutex<LogState>>);

impl SessionLog {
    pub fn fail_on(&self, pattern: &str) {
        self.0.lock().unwrap().fail_on.push(pattern.to_string());
    }

    pub fn hang_on(&self, pattern: &str) {
        self.0.lock().unwrap().hang_on.push(pattern.to_string());
    }

    pub fn statements(&self) -> Vec<String> {
        self.0.lock().unwrap().statements.clone()
    }

    pub fn analyze_statements(&self) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|sql| sql.starts_with("analyze"))
            .collect()
    }

    pub fn released(&self) -> usize {
        self.0.lock().unwrap().released
    }

    pub fn session_version(&self) -> Option<i64> {
        self.0.lock().unwrap().session_version
    }
}

pub struct FakeSession {
    analyze_version: i64,
    log: SessionLog,
}

impl FakeSession {
    pub fn new(analyze_version: i64, log: SessionLog) -> Self {
        Self {
            analyze_version,
            log,
        }
    }
}

#[async_trait]
impl Session for FakeSession {
    fn analyze_version(&self) -> i64 {
        self.analyze_version
    }

    async fn execute(&mut self, sql: &str) -> Result<(), SessionError> {
        let (fail, hang) = {
            let mut state = self.log.0.lock().unwrap();
            state.statements.push(sql.to_string());
            if let Some(version) = sql.strip_prefix("set @@session.tidb_analyze_version = ") {
                state.session_version = version.parse().ok();
            }
            (
                state.fail_on.iter().any(|p| sql.contains(p.as_str())),
                state.hang_on.iter().any(|p| sql.contains(p.as_str())),
            )
        };

        if hang {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(SessionError::Execute {
                sql: sql.to_string(),
                source: sqlx::Error::Protocol("injected failure".into()),
            });
        }
        Ok(())
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.log.0.lock().unwrap().released += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolMode {
    Available,
    Unavailable,
    Hanging,
}

/// Hands out sessions sharing one connection, so session variables set by
/// one job are seen by the next.
pub struct FakeSessionPool {
    analyze_version: i64,
    log: SessionLog,
    mode: PoolMode,
}

#[async_trait]
impl SessionPool for FakeSessionPool {
    async fn acquire(&self) -> Result<Box<dyn Session>, SessionError> {
        match self.mode {
            PoolMode::Available => {}
            PoolMode::Unavailable => {
                return Err(SessionError::Acquire {
                    source: sqlx::Error::PoolTimedOut,
                })
            }
            PoolMode::Hanging => std::future::pending::<()>().await,
        }
        let analyze_version = self
            .log
            .session_version()
            .unwrap_or(self.analyze_version);
        Ok(Box::new(FakeSession::new(analyze_version, self.log.clone())))
    }
}

pub struct FakeStatsHandle {
    pool: FakeSessionPool,
    next_proc_id: AtomicU64,
}

impl FakeStatsHandle {
    pub fn new(analyze_version: i64, log: SessionLog) -> Self {
        Self {
            pool: FakeSessionPool {
                analyze_version,
                log,
                mode: PoolMode::Available,
            },
            next_proc_id: AtomicU64::new(1),
        }
    }

    pub fn unavailable() -> Self {
        let mut handle = Self::new(2, SessionLog::default());
        handle.pool.mode = PoolMode::Unavailable;
        handle
    }

    /// A pool that never hands out a session.
    pub fn hanging() -> Self {
        let mut handle = Self::new(2, SessionLog::default());
        handle.pool.mode = PoolMode::Hanging;
        handle
    }

    pub fn log(&self) -> &SessionLog {
        &self.pool.log
    }
}

impl Default for FakeStatsHandle {
    fn default() -> Self {
        Self::new(2, SessionLog::default())
    }
}

impl StatsHandle for FakeStatsHandle {
    fn session_pool(&self) -> &dyn SessionPool {
        &self.pool
    }

    fn auto_analyze_proc_id(&self) -> u64 {
        self.next_proc_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Oracle with a fixed verdict that remembers what it was asked.
pub struct FakeOracle {
    verdict: (bool, String),
    checked: Mutex<Vec<(String, String)>>,
}

impl FakeOracle {
    pub fn accepting() -> Self {
        Self {
            verdict: (true, String::new()),
            checked: Mutex::default(),
        }
    }

    pub fn rejecting(reason: &str) -> Self {
        Self {
            verdict: (false, reason.to_string()),
            checked: Mutex::default(),
        }
    }

    pub fn checked(&self) -> Vec<(String, String)> {
        self.checked.lock().unwrap().clone()
    }
}

#[async_trait]
impl EligibilityOracle for FakeOracle {
    async fn check_eligible(&self, schema: &str, table: &str) -> (bool, String) {
        self.checked
            .lock()
            .unwrap()
            .push((schema.to_string(), table.to_string()));
        self.verdict.clone()
    }
}

/// Counts hook invocations.
#[derive(Debug, Clone, Default)]
pub struct HookCalls {
    successes: Arc<AtomicU32>,
    failures: Arc<AtomicU32>,
}

impl HookCalls {
    pub fn success_hook(&self) -> JobHook {
        let successes = Arc::clone(&self.successes);
        Box::new(move |_: &dyn AnalysisJob| {
            successes.fetch_add(1, Ordering::SeqCst);
        })
    }

    pub fn failure_hook(&self) -> JobHook {
        let failures = Arc::clone(&self.failures);
        Box::new(move |_: &dyn AnalysisJob| {
            failures.fetch_add(1, Ordering::SeqCst);
        })
    }

    pub fn successes(&self) -> u32 {
        self.successes.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> u32 {
        self.successes() + self.failures()
    }
}
