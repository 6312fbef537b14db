use crate::{
    commands::{Commands, JobArgs},
    env::EnvManager,
    error::CliError,
    shutdown::{ExitCode, ShutdownCoordinator},
};
use chrono::Utc;
use clap::Parser;
use engine_core::{
    connectors::{source::Source, supervisor::ConnectionSupervisor},
    metrics::Metrics,
};
use engine_runtime::{
    controller::TransferController,
    error::TransferError,
    execution::{
        endpoints::{EndpointProvider, PgEndpointProvider},
        verifier::Verifier,
    },
};
use model::execution::job::JobConfig;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod conn;
mod env;
mod error;
mod report;
mod shutdown;

#[derive(Parser)]
#[command(name = "transfer-cli", version = "0.1.0", about = "Batch PostgreSQL table transfer")]
struct Cli {
    #[arg(long, global = true, help = "Load KEY=VALUE settings from this file")]
    env_file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "Command failed");
            eprintln!("Error: {err}");
            ExitCode::GeneralError
        }
    };
    std::process::exit(code.as_i32());
}

fn load_job(env_file: Option<&str>, args: &JobArgs, verify: bool) -> Result<JobConfig, CliError> {
    let mut env = EnvManager::new();
    if let Some(path) = env_file {
        env.load_from_file(path)?;
    }
    config::build_job(&env, args, verify)
}

async fn dispatch(cli: Cli) -> Result<ExitCode, CliError> {
    let env_file = cli.env_file.as_deref();

    match cli.command {
        Commands::Run {
            job,
            verify,
            poll_ms,
            json,
        } => {
            let job = load_job(env_file, &job, verify)?;
            run_transfer(job, Duration::from_millis(poll_ms.max(50)), json).await
        }
        Commands::TestConn { job, target, json } => {
            let job = load_job(env_file, &job, false)?;
            let connection = conn::check(&job, target).await?;
            if json {
                report::print_json(&connection)?;
            } else {
                conn::print_report(&connection);
            }
            Ok(ExitCode::Success)
        }
        Commands::Verify { job, json } => {
            let job = load_job(env_file, &job, true)?;
            let endpoints = PgEndpointProvider::default()
                .open(&job, &Metrics::new())
                .await?;
            let filter = job.effective_filter(Utc::now().date_naive());
            let verification = Verifier::new(endpoints.source, endpoints.destination)
                .verify(filter.as_deref())
                .await?;

            if json {
                report::print_json(&verification)?;
            } else {
                report::print_verification(&verification);
            }
            Ok(if verification.rows_match() {
                ExitCode::Success
            } else {
                ExitCode::VerificationFailed
            })
        }
        Commands::Count { job, json } => {
            let job = load_job(env_file, &job, false)?;
            let endpoints = PgEndpointProvider::default()
                .open(&job, &Metrics::new())
                .await?;
            let filter = job.effective_filter(Utc::now().date_naive());
            let rows = endpoints
                .source
                .count(filter.as_deref())
                .await
                .map_err(TransferError::from)?;

            let count = report::CountReport {
                table: job.source_table.to_string(),
                filter,
                rows,
            };
            if json {
                report::print_json(&count)?;
            } else {
                report::print_count(&count);
            }
            Ok(ExitCode::Success)
        }
    }
}

async fn run_transfer(job: JobConfig, poll: Duration, json: bool) -> Result<ExitCode, CliError> {
    let controller = TransferController::postgres(ConnectionSupervisor::default());
    let shutdown = ShutdownCoordinator::new(controller.clone());
    let signals = shutdown.register_handlers();

    let handle = controller.start(job)?;
    info!(transfer_id = %handle.transfer_id(), "Transfer started");

    let wait = handle.wait();
    tokio::pin!(wait);
    let mut ticker = tokio::time::interval(poll);
    let mut last_line = String::new();

    let outcome = loop {
        tokio::select! {
            outcome = &mut wait => break outcome?,
            _ = ticker.tick() => {
                if json {
                    continue;
                }
                let line = report::progress_line(&controller.snapshot());
                if line != last_line {
                    println!("{line}");
                    last_line = line;
                }
            }
        }
    };
    signals.abort();

    if shutdown.is_shutdown_requested() {
        info!("Transfer interrupted by signal");
    }

    if json {
        report::print_json(&outcome)?;
    } else {
        report::print_outcome(&outcome);
    }
    Ok(report::exit_code(outcome.status))
}
