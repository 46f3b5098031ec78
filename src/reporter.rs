use crate::models::{JobReport, JobStatus};
use clap::ValueEnum;
use snafu::{ResultExt, Snafu};
use std::io::Write;

#[derive(Debug, Snafu)]
pub enum ReporterError {
    #[snafu(display("Failed to write output: {}", source))]
    OutputError { source: std::io::Error },

    #[snafu(display("Failed to serialize report: {}", source))]
    JsonError { source: serde_json::Error },
}

type Result<T, E = ReporterError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ReportFormat {
    /// Markdown formatted report
    Markdown,
    /// JSON formatted report
    Json,
    /// Plain text summary
    Text,
}

pub struct Reporter {
    format: ReportFormat,
}

impl Reporter {
    pub fn new(format: ReportFormat) -> Self {
        Self { format }
    }

    pub fn report(&self, reports: &[JobReport]) -> Result<()> {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        self.report_to(&mut handle, reports)
    }

    pub fn report_to<W: Write>(&self, out: &mut W, reports: &[JobReport]) -> Result<()> {
        match self.format {
            ReportFormat::Markdown => self.report_markdown(out, reports)?,
            ReportFormat::Json => self.report_json(out, reports)?,
            ReportFormat::Text => self.report_text(out, reports)?,
        }
        Ok(())
    }

    fn report_markdown<W: Write>(&self, out: &mut W, reports: &[JobReport]) -> Result<()> {
        writeln!(out, "# TiDB Auto-Analyze Report\n").context(OutputSnafu)?;

        writeln!(out, "## Summary\n").context(OutputSnafu)?;
        writeln!(out, "- **Jobs**: {}", reports.len()).context(OutputSnafu)?;
        for status in [JobStatus::Succeeded, JobStatus::Failed, JobStatus::Skipped] {
            let count = count_status(reports, status);
            if count > 0 {
                writeln!(out, "- **{}**: {}", status.as_str(), count).context(OutputSnafu)?;
            }
        }
        writeln!(out).context(OutputSnafu)?;

        if reports.is_empty() {
            return Ok(());
        }

        writeln!(out, "## Jobs\n").context(OutputSnafu)?;
        writeln!(
            out,
            "| Table | Table ID | Analyze Type | Indexes | Weight | Status | Reason |"
        )
        .context(OutputSnafu)?;
        writeln!(
            out,
            "|-------|----------|--------------|---------|--------|--------|--------|"
        )
        .context(OutputSnafu)?;

        for report in reports {
            writeln!(
                out,
                "| {} | {} | {} | {} | {:.6} | {} | {} |",
                report.full_table_name(),
                report.table_id,
                report.analyze_type,
                report.indexes.join(", "),
                report.weight,
                report.status.as_str(),
                report.reason.as_deref().unwrap_or("")
            )
            .context(OutputSnafu)?;
        }
        writeln!(out).context(OutputSnafu)?;

        Ok(())
    }

    fn report_json<W: Write>(&self, out: &mut W, reports: &[JobReport]) -> Result<()> {
        let json = serde_json::to_string_pretty(reports).context(JsonSnafu)?;
        writeln!(out, "{}", json).context(OutputSnafu)?;
        Ok(())
    }

    fn report_text<W: Write>(&self, out: &mut W, reports: &[JobReport]) -> Result<()> {
        writeln!(out, "TiDB Auto-Analyze Report").context(OutputSnafu)?;
        writeln!(out, "========================\n").context(OutputSnafu)?;

        writeln!(out, "Summary:").context(OutputSnafu)?;
        writeln!(out, "  Total Jobs: {}", reports.len()).context(OutputSnafu)?;
        for status in [JobStatus::Succeeded, JobStatus::Failed, JobStatus::Skipped] {
            let count = count_status(reports, status);
            if count > 0 {
                writeln!(out, "  {}: {}", status.as_str(), count).context(OutputSnafu)?;
            }
        }
        writeln!(out).context(OutputSnafu)?;

        for report in reports {
            writeln!(
                out,
                "  [{}] {} ({})",
                report.status.as_str(),
                report.full_table_name(),
                report.analyze_type
            )
            .context(OutputSnafu)?;
            if !report.indexes.is_empty() {
                writeln!(out, "    Indexes: {}", report.indexes.join(", "))
                    .context(OutputSnafu)?;
            }
            if let Some(reason) = &report.reason {
                writeln!(out, "    Why:     {}", reason).context(OutputSnafu)?;
            }
        }

        Ok(())
    }
}

fn count_status(reports: &[JobReport], status: JobStatus) -> usize {
    reports.iter().filter(|r| r.status == status).count()
}
