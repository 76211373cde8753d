use clap::Parser;
use placegrid::cli::{Args, Command, exit_codes};
use placegrid::config::Config;
use placegrid::db::DbContext;
use placegrid::db::models::JobStatus;
use placegrid::error::Error;
use placegrid::health;
use placegrid::logging::setup_logging;
use placegrid::pipeline::ProcessorService;
use placegrid::pipeline::executor::{BatchExecutor, ExecutorSettings};
use placegrid::pipeline::lifecycle::{JobSpec, create_job};
use placegrid::serper::{MockSearchApi, RetryPolicy, SearchApi, SerperClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(exit_codes::FAILURE);
        }
    };

    setup_logging(&config, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        },
        "starting placegrid"
    );

    let exit_code = match args.command {
        Command::CreateJob {
            keyword,
            state,
            job_id,
            pages,
            batch_size,
            concurrency,
            dry_run,
        } => {
            let spec_pages = pages.unwrap_or(config.default_pages);
            let spec_batch = batch_size.unwrap_or(config.default_batch_size);
            let spec_concurrency = concurrency.unwrap_or(config.default_concurrency);
            run_create_job(
                &config,
                JobSpec {
                    job_id,
                    keyword,
                    state,
                    pages: spec_pages,
                    batch_size: spec_batch,
                    concurrency: spec_concurrency,
                    dry_run,
                },
            )
            .await
        }
        Command::ProcessBatches => run_process_batches(&config).await,
        Command::MonitorJob { job_id, interval } => {
            run_monitor_job(&config, &job_id, Duration::from_secs(interval)).await
        }
        Command::HealthCheck { json } => run_health_check(&config, json).await,
    };

    std::process::exit(exit_code);
}

async fn run_create_job(config: &Config, spec: JobSpec) -> i32 {
    let ctx = match DbContext::connect(config).await {
        Ok(ctx) => ctx,
        Err(e) => {
            error!(error = %e, "database connection failed");
            return exit_codes::FAILURE;
        }
    };

    match create_job(&ctx, config, spec).await {
        Ok(job_id) => {
            println!("{job_id}");
            exit_codes::OK
        }
        Err(err @ Error::Validation(_)) => {
            error!("{err}");
            exit_codes::VALIDATION
        }
        Err(err @ Error::BudgetExceeded { .. }) => {
            error!("{err}");
            exit_codes::BUDGET_EXCEEDED
        }
        Err(err) => {
            error!("{err}");
            exit_codes::FAILURE
        }
    }
}

async fn run_process_batches(config: &Config) -> i32 {
    let ctx = match DbContext::connect(config).await {
        Ok(ctx) => ctx,
        Err(e) => {
            error!(error = %e, "database connection failed");
            return exit_codes::FAILURE;
        }
    };

    let live: Arc<dyn SearchApi> = if config.use_mock_api {
        info!("using the mock search client (USE_MOCK_API)");
        Arc::new(MockSearchApi::default())
    } else {
        match SerperClient::from_config(config) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                error!("{e}");
                return exit_codes::FAILURE;
            }
        }
    };
    let dry: Arc<dyn SearchApi> = Arc::new(MockSearchApi::default());

    let executor = Arc::new(BatchExecutor::new(
        ctx.clone(),
        live,
        dry,
        RetryPolicy::from_config(config),
        ExecutorSettings::from_config(config),
    ));
    let service = ProcessorService::from_config(ctx, executor, config);

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut service_task = tokio::spawn({
        let shutdown_tx = shutdown_tx.clone();
        async move { service.run(shutdown_tx).await }
    });

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm_stream =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM signal handler");
        sigterm_stream.recv().await;
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        joined = &mut service_task => {
            return match joined {
                Ok(Ok(())) => {
                    info!("all running jobs complete");
                    exit_codes::OK
                }
                Ok(Err(e)) => {
                    error!(error = %e, "processor failed");
                    exit_codes::FAILURE
                }
                Err(e) => {
                    error!(error = %e, "processor task panicked");
                    exit_codes::FAILURE
                }
            };
        }
        _ = ctrl_c => {
            info!("received ctrl+c, gracefully shutting down...");
        }
        _ = sigterm => {
            info!("received SIGTERM, gracefully shutting down...");
        }
    }

    let _ = shutdown_tx.send(());
    match tokio::time::timeout(config.shutdown_timeout, service_task).await {
        Ok(Ok(Ok(()))) => {
            info!("graceful shutdown complete");
            exit_codes::OK
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "processor failed during shutdown");
            exit_codes::FAILURE
        }
        Ok(Err(e)) => {
            error!(error = %e, "processor task panicked during shutdown");
            exit_codes::FAILURE
        }
        Err(_) => {
            warn!(
                timeout = format!("{:.2?}", config.shutdown_timeout),
                "graceful shutdown elapsed, abandoning in-flight work"
            );
            2
        }
    }
}

async fn run_monitor_job(config: &Config, job_id: &str, interval: Duration) -> i32 {
    let ctx = match DbContext::connect(config).await {
        Ok(ctx) => ctx,
        Err(e) => {
            error!(error = %e, "database connection failed");
            return exit_codes::FAILURE;
        }
    };

    loop {
        let job = match ctx.jobs().get(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                error!(job_id, "job not found");
                return exit_codes::FAILURE;
            }
            Err(e) => {
                error!(error = %e, "failed to read job");
                return exit_codes::FAILURE;
            }
        };
        let counts = match ctx.queries().status_counts(job_id).await {
            Ok(counts) => counts,
            Err(e) => {
                error!(error = %e, "failed to read query counts");
                return exit_codes::FAILURE;
            }
        };

        println!(
            "job {} status={} zips={} queries={} queued={} processing={} success={} failed={} skipped={} places={} credits={}",
            job.job_id,
            match job.status {
                JobStatus::Running => "running",
                JobStatus::Done => "done",
            },
            job.total_zips,
            job.total_queries,
            counts.queued,
            counts.processing,
            counts.success,
            counts.failed,
            counts.skipped,
            job.total_places,
            job.total_credits,
        );

        if job.status == JobStatus::Done {
            return exit_codes::OK;
        }
        tokio::time::sleep(interval).await;
    }
}

async fn run_health_check(config: &Config, json: bool) -> i32 {
    let report = health::run_checks(config).await;
    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(out) => println!("{out}"),
            Err(e) => {
                error!(error = %e, "failed to serialize health report");
                return exit_codes::FAILURE;
            }
        }
    } else {
        print!("{}", report.render_text());
    }
    if report.healthy {
        exit_codes::OK
    } else {
        exit_codes::FAILURE
    }
}
