use crate::config::DbConfig;
use async_trait::async_trait;
use snafu::{ResultExt, Snafu};
use sqlx::mysql::{MySql, MySqlPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::Pool;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

#[derive(Debug, Snafu)]
pub enum SessionError {
    #[snafu(display("Failed to connect to TiDB: {}", source))]
    Connect { source: sqlx::Error },

    #[snafu(display("Failed to acquire session from pool: {}", source))]
    Acquire { source: sqlx::Error },

    #[snafu(display("Failed to read tidb_analyze_version: {}", source))]
    AnalyzeVersion { source: sqlx::Error },

    #[snafu(display("Failed to execute statement `{}`: {}", sql, source))]
    Execute { sql: String, source: sqlx::Error },
}

type Result<T, E = SessionError> = std::result::Result<T, E>;

/// A database session borrowed from a [`SessionPool`].
///
/// Dropping the session hands it back to the pool.
#[async_trait]
pub trait Session: Send {
    /// The statistics format version active on this session.
    fn analyze_version(&self) -> i64;

    async fn execute(&mut self, sql: &str) -> Result<()>;
}

#[async_trait]
pub trait SessionPool: Send + Sync {
    /// Waits until a session is available or the pool rejects the request.
    async fn acquire(&self) -> Result<Box<dyn Session>>;
}

/// Statistics handle shared by every auto-analyze job.
pub trait StatsHandle: Send + Sync {
    fn session_pool(&self) -> &dyn SessionPool;

    /// Allocates the process id an auto-analyze statement is tracked under.
    fn auto_analyze_proc_id(&self) -> u64;
}

pub struct MySqlSessionPool {
    pool: Pool<MySql>,
}

impl MySqlSessionPool {
    pub async fn connect(config: &DbConfig) -> Result<Self> {
        info!("Connecting to TiDB at {}:{}", config.host, config.port);

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connection_string())
            .await
            .context(ConnectSnafu)?;

        info!("Successfully connected to database: {}", config.database);

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<MySql> {
        &self.pool
    }
}

#[async_trait]
impl SessionPool for MySqlSessionPool {
    async fn acquire(&self) -> Result<Box<dyn Session>> {
        let mut conn = self.pool.acquire().await.context(AcquireSnafu)?;

        let analyze_version: i64 =
            sqlx::query_scalar("SELECT CAST(@@tidb_analyze_version AS SIGNED)")
                .fetch_one(&mut *conn)
                .await
                .context(AnalyzeVersionSnafu)?;
        debug!("Acquired session with tidb_analyze_version={}", analyze_version);

        Ok(Box::new(MySqlSession {
            conn,
            analyze_version,
        }))
    }
}

pub struct MySqlSession {
    conn: PoolConnection<MySql>,
    analyze_version: i64,
}

#[async_trait]
impl Session for MySqlSession {
    fn analyze_version(&self) -> i64 {
        self.analyze_version
    }

    async fn execute(&mut self, sql: &str) -> Result<()> {
        // Identifiers are already escaped by the template renderer; ANALYZE
        // cannot run as a prepared statement.
        sqlx::Executor::execute(&mut *self.conn, sqlx::raw_sql(sql))
            .await
            .context(ExecuteSnafu { sql })?;
        Ok(())
    }
}

/// [`StatsHandle`] backed by a MySQL-protocol connection pool.
pub struct AutoAnalyzeHandle {
    sessions: MySqlSessionPool,
    next_proc_id: AtomicU64,
}

impl AutoAnalyzeHandle {
    pub fn new(sessions: MySqlSessionPool) -> Self {
        Self {
            sessions,
            next_proc_id: AtomicU64::new(1),
        }
    }
}

impl StatsHandle for AutoAnalyzeHandle {
    fn session_pool(&self) -> &dyn SessionPool {
        &self.sessions
    }

    fn auto_analyze_proc_id(&self) -> u64 {
        self.next_proc_id.fetch_add(1, Ordering::Relaxed)
    }
}
