use crate::job::eligibility::DEFAULT_FAILED_ANALYSIS_WAIT;
use crate::job::NonPartitionedTableAnalysisJob;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use std::fs;
use std::time::Duration;

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("Failed to read config file: {}", source))]
    FileRead { source: std::io::Error },

    #[snafu(display("Failed to parse YAML config: {}", source))]
    YamlParse { source: serde_yaml::Error },
}

type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Contents of a YAML config file: where to connect and what to analyze.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub connection: DbConfig,
    #[serde(default = "default_failed_analysis_wait_secs")]
    pub failed_analysis_wait_secs: u64,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

/// A table that became an auto-analyze candidate, with its staleness
/// indicators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobConfig {
    pub schema: String,
    pub table: String,
    pub table_id: i64,
    /// Indexes added since the last analyze of the table.
    #[serde(default)]
    pub indexes: Vec<String>,
    pub table_stats_version: i64,
    pub change_percentage: f64,
    pub table_size: f64,
    pub last_analysis_duration_secs: u64,
    #[serde(default)]
    pub weight: f64,
}

fn default_port() -> u16 {
    4000
}

fn default_max_connections() -> u32 {
    5
}

fn default_failed_analysis_wait_secs() -> u64 {
    DEFAULT_FAILED_ANALYSIS_WAIT.as_secs()
}

impl DbConfig {
    pub fn from_connection_params(
        host: String,
        port: u16,
        database: String,
        username: String,
        password: String,
        max_connections: u32,
    ) -> Self {
        Self {
            host,
            port,
            database,
            username,
            password,
            max_connections,
        }
    }

    pub fn connection_string(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }
}

impl AppConfig {
    pub fn from_config_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path).context(FileReadSnafu)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context(YamlParseSnafu)
    }

    pub fn failed_analysis_wait(&self) -> Duration {
        Duration::from_secs(self.failed_analysis_wait_secs)
    }
}

impl JobConfig {
    pub fn into_job(self) -> NonPartitionedTableAnalysisJob {
        let mut job = NonPartitionedTableAnalysisJob::new(
            self.schema,
            self.table,
            self.table_id,
            self.indexes,
            self.table_stats_version,
            self.change_percentage,
            self.table_size,
            Duration::from_secs(self.last_analysis_duration_secs),
        );
        job.weight = self.weight;
        job
    }
}
