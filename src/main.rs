use clap::{Parser, Subcommand};
use tidb_autoanalyze::config::{AppConfig, DbConfig, JobConfig};
use tidb_autoanalyze::job::eligibility::DEFAULT_FAILED_ANALYSIS_WAIT;
use tidb_autoanalyze::reporter::{ReportFormat, Reporter};
use tidb_autoanalyze::runner::AutoAnalyzeRunner;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// TiDB auto-analyze runner - Refreshes table and index statistics for stale tables
#[derive(Parser, Debug)]
#[command(name = "tidb-autoanalyze")]
#[command(version = "0.1.0")]
#[command(about = "Runs TiDB auto-analyze jobs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(short = 'f', long = "format", value_enum, default_value = "markdown")]
    format: ReportFormat,

    /// Enable verbose logging
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze a single table
    Run {
        /// Database host
        #[arg(
            short = 'H',
            long = "host",
            env = "TIDB_HOST",
            default_value = "localhost"
        )]
        host: String,

        /// Database port
        #[arg(long = "port", env = "TIDB_PORT", default_value = "4000")]
        port: u16,

        /// Database name
        #[arg(short = 'd', long = "database", env = "TIDB_DATABASE")]
        database: String,

        /// Username
        #[arg(short = 'u', long = "username", env = "TIDB_USER")]
        username: String,

        /// Password
        #[arg(short = 'p', long = "password", env = "TIDB_PASSWORD", default_value = "")]
        password: String,

        /// Maximum pooled sessions
        #[arg(long = "max-connections", default_value = "5")]
        max_connections: u32,

        /// Schema of the table to analyze
        #[arg(long = "schema")]
        schema: String,

        /// Table to analyze
        #[arg(long = "table")]
        table: String,

        /// Numeric table id
        #[arg(long = "table-id")]
        table_id: i64,

        /// Newly added index; repeat for several, in analyze order
        #[arg(long = "index")]
        indexes: Vec<String>,

        /// Statistics version of the table
        #[arg(long = "stats-version", default_value = "2")]
        stats_version: i64,

        /// Fraction of rows changed since the last analyze
        #[arg(long = "change-percentage")]
        change_percentage: f64,

        /// Estimated table size in rows
        #[arg(long = "table-size")]
        table_size: f64,

        /// Duration of the previous analyze in seconds
        #[arg(long = "last-analysis-duration")]
        last_analysis_duration_secs: u64,

        /// Scheduling weight of the job
        #[arg(long = "weight", default_value = "0")]
        weight: f64,

        /// Seconds to leave a table alone after only failed analyze jobs
        #[arg(long = "failed-analysis-wait", default_value_t = DEFAULT_FAILED_ANALYSIS_WAIT.as_secs())]
        failed_analysis_wait_secs: u64,
    },
    /// Analyze every table listed in a YAML config file
    Config {
        /// Path to YAML config file
        #[arg(short = 'c', long = "config")]
        config_path: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match cli.command {
        Commands::Run {
            host,
            port,
            database,
            username,
            password,
            max_connections,
            schema,
            table,
            table_id,
            indexes,
            stats_version,
            change_percentage,
            table_size,
            last_analysis_duration_secs,
            weight,
            failed_analysis_wait_secs,
        } => AppConfig {
            connection: DbConfig::from_connection_params(
                host,
                port,
                database,
                username,
                password,
                max_connections,
            ),
            failed_analysis_wait_secs,
            jobs: vec![JobConfig {
                schema,
                table,
                table_id,
                indexes,
                table_stats_version: stats_version,
                change_percentage,
                table_size,
                last_analysis_duration_secs,
                weight,
            }],
        },
        Commands::Config { config_path } => {
            info!("Loading config from: {}", config_path);
            AppConfig::from_config_file(&config_path)?
        }
    };

    info!(
        "Running {} auto-analyze job(s) against {}",
        config.jobs.len(),
        config.connection.database
    );
    let runner = AutoAnalyzeRunner::connect(&config).await?;
    let jobs = config.jobs.into_iter().map(JobConfig::into_job).collect();
    let reports = runner.run_all(jobs).await;

    let reporter = Reporter::new(cli.format);
    reporter.report(&reports)?;

    Ok(())
}
