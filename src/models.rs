use crate::job::AnalyzeType;
use serde::{Deserialize, Serialize};

/// How an auto-analyze job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Every analyze statement succeeded
    Succeeded,
    /// An analyze statement failed or the job could not run
    Failed,
    /// The validity check rejected the table
    Skipped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
            JobStatus::Skipped => "SKIPPED",
        }
    }
}

/// Summary of one job run, as rendered by the reporters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub table_id: i64,
    pub schema: String,
    pub table_name: String,
    pub analyze_type: AnalyzeType,
    pub indexes: Vec<String>,
    pub weight: f64,
    pub status: JobStatus,
    pub reason: Option<String>,
}

impl JobReport {
    pub fn full_table_name(&self) -> String {
        format!("{}.{}", self.schema, self.table_name)
    }
}
