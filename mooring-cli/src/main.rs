mod config;
mod ops;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;
use log::warn;
use mooring_core::provider::Provider;
use mooring_provider_aws::AwsProvider;
use mooring_provider_aws::resources::resource_types;
use mooring_state::{LocalBackend, StateBackend};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, DEFAULT_CONFIG_FILE};

#[derive(Parser)]
#[command(name = "mooring")]
#[command(about = "Attach load balancers to autoscaling groups", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration file without calling AWS
    Validate {
        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        file: PathBuf,
    },
    /// Show execution plan without applying changes
    Plan {
        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        file: PathBuf,
    },
    /// Apply changes to reach the desired state
    Apply {
        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        file: PathBuf,
    },
    /// Drop recorded attachments that no longer exist
    Refresh {
        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        file: PathBuf,
    },
    /// Detach every recorded attachment
    Destroy {
        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        file: PathBuf,

        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Remove a stale state lock
    ForceUnlock {
        lock_id: String,

        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // First Ctrl-C finishes the current step and stops; a second one exits
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            warn!("Interrupted, stopping after the current step (Ctrl-C again to exit now)");
            cancel.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        }
    });

    let result = match cli.command {
        Commands::Validate { file } => run_validate(&file),
        Commands::Plan { file } => run_plan(&file, cancel).await,
        Commands::Apply { file } => run_apply(&file, cancel).await,
        Commands::Refresh { file } => run_refresh(&file, cancel).await,
        Commands::Destroy { file, auto_approve } => run_destroy(&file, auto_approve, cancel).await,
        Commands::ForceUnlock { lock_id, file } => run_force_unlock(&lock_id, &file).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

/// Load and validate the configuration, then set up the provider and backend
async fn setup(
    file: &Path,
    cancel: CancellationToken,
) -> Result<(Config, Box<dyn Provider>, LocalBackend), String> {
    let config = Config::load(file)?;
    ops::validate_resources(&config.resources(), &ops::schemas(&resource_types()))?;

    let provider: Box<dyn Provider> =
        Box::new(AwsProvider::new(config.region()).await.with_cancellation(cancel));
    let backend = LocalBackend::with_path(config.state_path(file));
    Ok((config, provider, backend))
}

fn run_validate(file: &Path) -> Result<(), String> {
    let config = Config::load(file)?;
    let resources = config.resources();
    ops::validate_resources(&resources, &ops::schemas(&resource_types()))?;
    println!(
        "{}",
        format!(
            "Validation successful: {} attachment(s) in {}",
            resources.len(),
            file.display()
        )
        .green()
    );
    Ok(())
}

async fn run_plan(file: &Path, cancel: CancellationToken) -> Result<(), String> {
    let (config, provider, backend) = setup(file, cancel.clone()).await?;
    let plan = ops::plan(&provider, &backend, &config.resources(), &cancel).await?;
    ops::print_plan(&plan);
    Ok(())
}

async fn run_apply(file: &Path, cancel: CancellationToken) -> Result<(), String> {
    let (config, provider, backend) = setup(file, cancel.clone()).await?;
    let outcome = ops::apply(&provider, &backend, &config.resources(), &cancel).await?;
    if outcome.skipped > 0 {
        return Err(format!("Interrupted, {} change(s) not applied", outcome.skipped));
    }
    if outcome.failed > 0 {
        return Err(format!("{} change(s) failed", outcome.failed));
    }
    Ok(())
}

async fn run_refresh(file: &Path, cancel: CancellationToken) -> Result<(), String> {
    let (_, provider, backend) = setup(file, cancel).await?;
    ops::refresh(&provider, &backend).await.map(|_| ())
}

async fn run_destroy(
    file: &Path,
    auto_approve: bool,
    cancel: CancellationToken,
) -> Result<(), String> {
    let (_, provider, backend) = setup(file, cancel.clone()).await?;
    let outcome = ops::destroy(&provider, &backend, auto_approve, &cancel).await?;
    if outcome.skipped > 0 {
        return Err(format!(
            "Interrupted, {} attachment(s) not destroyed",
            outcome.skipped
        ));
    }
    if outcome.failed > 0 {
        return Err(format!("{} attachment(s) could not be destroyed", outcome.failed));
    }
    Ok(())
}

async fn run_force_unlock(lock_id: &str, file: &Path) -> Result<(), String> {
    let config = Config::load(file)?;
    let backend = LocalBackend::with_path(config.state_path(file));
    backend
        .force_unlock(lock_id)
        .await
        .map_err(|e| e.to_string())?;
    println!("{}", format!("Lock {} released.", lock_id).green());
    Ok(())
}
