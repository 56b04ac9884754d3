//! `hildist-agent` -- client or worker end of a distributed hardware run.
//!
//! Flags are documented by `--help`; the most common ones can come from the
//! environment instead (a `.env` file is loaded first).
//!
//! | Variable              | Default                 | Description                          |
//! |-----------------------|-------------------------|--------------------------------------|
//! | `HILDIST_SERVER_URL`  | `http://localhost:8000` | Orchestrator base URL                |
//! | `HILDIST_WORKER`      | `false`                 | Run as a worker                      |
//! | `HILDIST_WORKER_ID`   | --                      | Worker identity (worker mode)        |
//! | `HILDIST_TAGS`        | --                      | Comma-separated capability tags      |
//! | `HILDIST_JOBS`        | --                      | Job list JSON (client / local mode)  |
//! | `HILDIST_RUN_COMMAND` | --                      | Command executed per job phase       |
//! | `HILDIST_WORKING_DIR` | --                      | Job directory when no env bundle     |
//! | `RUST_LOG`            | `hildist_agent=info,..` | Log filter                           |
//!
//! Exit code is 0 only when every job ran and none failed.

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hildist_agent::cli::{load_jobs, Cli, Mode};
use hildist_agent::client_driver::ClientDriver;
use hildist_agent::local::run_local;
use hildist_agent::summary::SummaryReporter;
use hildist_agent::worker_driver::WorkerDriver;
use hildist_agent::DriverError;
use hildist_client::DispatchApi;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "hildist_agent=info,hildist_client=info,hildist_worker=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let code = match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Run failed");
            e.exit_code()
        }
    };
    std::process::exit(code);
}

/// Run the selected mode and return the process exit code.
async fn run(cli: &Cli) -> Result<i32, DriverError> {
    match cli.mode()? {
        Mode::Client { jobs, config } => {
            let jobs = load_jobs(&jobs)?;
            let api = DispatchApi::new(cli.server_url.clone());
            let mut summary = SummaryReporter::new();

            let outcome = ClientDriver::new(api, config).run(jobs, &mut summary).await;
            summary.log();
            let outcome = outcome?;
            tracing::info!(
                session_id = %outcome.session_id,
                artifacts = outcome.artifacts.len(),
                "Client run finished"
            );
            Ok(exit_code(&summary))
        }
        Mode::Worker(config) => {
            let engine = Arc::new(cli.engine(Some(&config.worker_id))?);
            let api = DispatchApi::new(cli.server_url.clone());

            let cancel = CancellationToken::new();
            tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

            match WorkerDriver::new(api, engine, config).run(cancel).await? {
                Some(outcome) => tracing::info!(
                    session_id = %outcome.session_id,
                    jobs_run = outcome.jobs_run,
                    reports = outcome.reports_submitted,
                    "Worker run finished"
                ),
                None => tracing::info!("Cancelled before a session was found"),
            }
            Ok(0)
        }
        Mode::Local { jobs, workers } => {
            let jobs = load_jobs(&jobs)?;
            let engine = Arc::new(cli.engine(None)?);
            let mut summary = SummaryReporter::new();

            let result = run_local(workers, engine, jobs, &mut summary).await;
            summary.log();
            let completed = result?;
            tracing::info!(completed, "Local run finished");
            Ok(exit_code(&summary))
        }
    }
}

fn exit_code(summary: &SummaryReporter) -> i32 {
    if summary.has_failures() {
        for node_id in summary.failing() {
            tracing::warn!(node_id, "Failing job");
        }
        1
    } else {
        0
    }
}

/// Stop pulling new jobs on Ctrl-C. The job in progress still finishes.
async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl-C handler");
        return;
    }
    tracing::info!("Received SIGINT (Ctrl-C), finishing current job");
    cancel.cancel();
}
