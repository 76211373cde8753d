use clap::{Parser, Subcommand};

/// placegrid - queue-backed place scraping pipeline
///
/// A job is one (keyword, state, page depth) request. Creation expands the
/// job into per-(zip, page) search queries and enqueues them; one or more
/// `process-batches` workers then drain the queue against the search API.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log formatter to use
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate, budget-check, expand, and enqueue a new job
    CreateJob {
        /// Search keyword, e.g. "coffee roasters"
        #[arg(long)]
        keyword: String,
        /// Two-letter U.S. state code, e.g. AZ
        #[arg(long)]
        state: String,
        /// Client-chosen job id; re-run with the same id to resume an
        /// interrupted creation (generated when omitted)
        #[arg(long)]
        job_id: Option<String>,
        /// Result pages fetched per zip (defaults to DEFAULT_PAGES)
        #[arg(long)]
        pages: Option<i32>,
        /// Queries claimed per batch (defaults to DEFAULT_BATCH_SIZE)
        #[arg(long)]
        batch_size: Option<i32>,
        /// In-flight search requests per batch (defaults to DEFAULT_CONCURRENCY)
        #[arg(long)]
        concurrency: Option<i32>,
        /// Run the job against the synthetic search client (no external spend)
        #[arg(long)]
        dry_run: bool,
    },
    /// Run coordinator workers until every running job is complete
    ProcessBatches,
    /// Print a job's rollup and per-status counts until it finishes
    MonitorJob {
        job_id: String,
        /// Seconds between refreshes
        #[arg(long, default_value_t = 5)]
        interval: u64,
    },
    /// Check component reachability
    HealthCheck {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum TracingFormat {
    /// Use pretty formatter (default in debug mode)
    Pretty,
    /// Use JSON formatter (default in release mode)
    Json,
}

#[cfg(debug_assertions)]
const DEFAULT_TRACING_FORMAT: TracingFormat = TracingFormat::Pretty;
#[cfg(not(debug_assertions))]
const DEFAULT_TRACING_FORMAT: TracingFormat = TracingFormat::Json;

fn default_tracing_format() -> TracingFormat {
    DEFAULT_TRACING_FORMAT
}

/// Process exit codes for `create-job`.
pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const FAILURE: i32 = 1;
    pub const VALIDATION: i32 = 2;
    pub const BUDGET_EXCEEDED: i32 = 3;
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn args_parse_create_job() {
        let args = Args::parse_from([
            "placegrid",
            "create-job",
            "--keyword",
            "bars",
            "--state",
            "AZ",
            "--pages",
            "3",
            "--dry-run",
        ]);
        match args.command {
            Command::CreateJob {
                keyword,
                state,
                job_id,
                pages,
                batch_size,
                concurrency,
                dry_run,
            } => {
                assert_eq!(keyword, "bars");
                assert_eq!(state, "AZ");
                assert_eq!(job_id, None);
                assert_eq!(pages, Some(3));
                assert_eq!(batch_size, None);
                assert_eq!(concurrency, None);
                assert!(dry_run);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        Args::command().debug_assert();
    }
}
