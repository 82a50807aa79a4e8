use std::process::ExitCode;

use anyhow::{Result, anyhow};
use clap::Parser;
use pis::config::{self, Cli, LogLevel};
use pis::manifest::Manifest;
use pis::registry;
use pis::step::{Step, build_context};
use pis::storage;
use pis::task::Status;
use pis::validate::ensure_work_dir;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match config::init_config(cli) {
        Ok(settings) => settings,
        Err(err) => {
            let _ = configure_tracing(LogLevel::Info);
            error!(error = format!("{err:#}"), "configuration failed");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = configure_tracing(settings.log_level) {
        eprintln!("failed to configure tracing: {err:#}");
        return ExitCode::FAILURE;
    }

    match run().await {
        Ok(Status::Completed) => ExitCode::SUCCESS,
        Ok(status @ (Status::Staged | Status::Validated)) => {
            warn!(
                result = status.as_str(),
                "run stopped before upload; configure --remote-uri to publish resources"
            );
            ExitCode::SUCCESS
        }
        Ok(status) => {
            error!(result = status.as_str(), "run did not complete");
            ExitCode::FAILURE
        }
        Err(err) => {
            error!(error = format!("{err:#}"), "run failed");
            ExitCode::FAILURE
        }
    }
}

fn configure_tracing(level: LogLevel) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))?;
    Ok(())
}

async fn run() -> Result<Status> {
    let settings = config::settings();
    let registry = registry::register_tasks();
    ensure_work_dir(&settings.work_dir)?;

    let storage = match &settings.remote_uri {
        Some(uri) => Some(storage::storage_for(uri)?),
        None => None,
    };
    let ctx = build_context(
        &settings.work_dir,
        settings.remote_uri.as_deref(),
        storage.clone(),
        config::scratchpad().clone(),
    );

    let mut step = Step::new(
        &settings.step,
        config::task_definitions().to_vec(),
        ctx,
        settings.pool,
    );
    info!(step = settings.step.as_str(), pool = settings.pool, "step starting");
    let step_outcome = step.execute(registry).await;

    // The manifest is persisted even when the step failed partway; it is
    // the durable record of whatever did happen.
    let mut manifest = Manifest::new(&settings.work_dir, settings.remote_uri.as_deref());
    manifest.update_step(step.into_manifest());
    let root_status = manifest
        .complete(storage.as_deref(), &settings.summary())
        .await?;
    info!(
        manifest = %manifest.path().display(),
        result = root_status.as_str(),
        "manifest written"
    );

    step_outcome?;
    Ok(root_status)
}
