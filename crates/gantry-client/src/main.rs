//! Gantry worker.

use anyhow::Context;
use clap::{Parser, Subcommand};
use gantry_client::{HttpServerApi, InterruptBridge, Scheduler, ServerApi, ShellRunner};
use gantry_config::{WorkerConfig, parse_worker_config};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gantry-client")]
#[command(about = "Claims and runs Gantry CI jobs", long_about = None)]
struct Cli {
    /// Worker configuration file
    #[arg(long, env = "GANTRY_CLIENT_CONFIG", default_value = "gantry-client.kdl")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll for jobs and run them
    Run {
        /// Run at most one job, then exit
        #[arg(long)]
        single_shot: bool,
        /// Directory steps run in
        #[arg(long, env = "GANTRY_WORK_DIR")]
        work_dir: Option<PathBuf>,
    },
    /// Check the worker configuration and exit
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Run {
            single_shot,
            work_dir,
        } => {
            let mut config = config;
            config.single_shot |= single_shot;
            init_logging(&config)?;

            let servers = config
                .servers
                .iter()
                .map(|url| {
                    HttpServerApi::new(url.clone()).map(|api| Arc::new(api) as Arc<dyn ServerApi>)
                })
                .collect::<Result<Vec<_>, _>>()?;
            let runner = match work_dir {
                Some(dir) => ShellRunner::with_work_dir(dir),
                None => ShellRunner::new(),
            };

            let scheduler = Scheduler::new(config, servers, Arc::new(runner));
            let interrupts = InterruptBridge::install(scheduler.commands());
            let mut scheduler = scheduler.with_interrupts(interrupts);
            scheduler.run().await;
        }
        Commands::Validate => {
            if let Some(path) = config.resolved_log_file() {
                open_log_file(&path)?;
            }
            println!(
                "Worker {} OK: {} server(s), configs {}",
                config.name,
                config.servers.len(),
                config.build_configs.join(", ")
            );
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<WorkerConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config = parse_worker_config(&text)
        .with_context(|| format!("invalid worker config {}", path.display()))?;
    Ok(config)
}

fn open_log_file(path: &Path) -> anyhow::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("log file {} is not writable", path.display()))
}

fn init_logging(config: &WorkerConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match config.resolved_log_file() {
        Some(path) => {
            let file = open_log_file(&path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
            info!(log_file = %path.display(), "Logging to file");
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}
