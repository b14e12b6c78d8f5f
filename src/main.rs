//! Berth - status monitor for CLI-managed container runtimes
//!
//! Polls the runtime's command-line tool, publishes the runtime status and
//! container list, and runs service and container lifecycle commands without
//! letting them race the background poller.

mod config;
mod core;
mod integrations;
mod ui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;
use crate::core::monitor::{wait_for_check, Monitor};
use crate::core::operations::ContainerAction;
use crate::core::state::RuntimeStatus;

/// Delay between attempts to get an initial status check through
const CHECK_RETRY: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "berth")]
#[command(author = "Berth Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Status monitor for CLI-managed container runtimes", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Poll interval in seconds
    #[arg(long, value_name = "SECS", env = "BERTH_INTERVAL", global = true)]
    interval: Option<u64>,

    /// Runtime executable, checked before the standard locations
    #[arg(long, value_name = "PATH", env = "BERTH_TOOL", global = true)]
    tool: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the runtime and print every change (default)
    Watch,

    /// Check the runtime once and print its status
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Control the runtime service
    Service {
        #[command(subcommand)]
        command: ServiceCommands,
    },

    /// Start a container
    Start { name: String },

    /// Stop a container
    Stop {
        name: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Restart a container
    Restart { name: String },

    /// Remove a container
    #[command(alias = "remove")]
    Rm {
        name: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Write a default configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum ServiceCommands {
    /// Start the runtime service
    Start,
    /// Stop the runtime service
    Stop {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Stop the service if running, otherwise start it
    Toggle,
}

fn setup_logging(verbosity: u8) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let log_dir = dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("berth")
        .join("logs");

    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "berth.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Keep the guard alive for the duration of the program
    let _logging_guard = setup_logging(cli.verbose)?;

    let config_path = cli.config.clone().or_else(|| {
        let default_config = Config::default_path()?;
        if default_config.exists() {
            Some(default_config)
        } else {
            None
        }
    });

    let mut config = if let Some(path) = &config_path {
        Config::load(path).with_context(|| format!("loading {}", path.display()))?
    } else {
        Config::default()
    };

    if let Some(secs) = cli.interval {
        config.polling.interval_secs = secs;
    }
    if let Some(tool) = cli.tool {
        config.runtime.tool = Some(tool);
    }

    match cli.command.unwrap_or(Commands::Watch) {
        Commands::Watch => watch(&config).await?,
        Commands::Status { json } => print_status(&config, json).await?,
        Commands::Service { command } => service(&config, command).await?,
        Commands::Start { name } => container(&config, ContainerAction::Start, &name, true).await?,
        Commands::Stop { name, yes } => {
            container(&config, ContainerAction::Stop, &name, yes).await?
        }
        Commands::Restart { name } => {
            container(&config, ContainerAction::Restart, &name, true).await?
        }
        Commands::Rm { name, yes } => {
            container(&config, ContainerAction::Remove, &name, yes).await?
        }
        Commands::Init { force } => {
            let path = match cli.config {
                Some(path) => path,
                None => Config::default_path().context("no configuration directory")?,
            };
            config::init_config(&path, force)?;
        }
    }

    Ok(())
}

async fn watch(config: &Config) -> Result<()> {
    let monitor = Monitor::spawn(config);
    wait_for_check(&monitor, CHECK_RETRY).await;

    let mut changes = monitor.subscribe();
    print!("{}", ui::render_state(&monitor.snapshot()));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            change = changes.recv() => match change {
                Ok(change) => {
                    tracing::debug!(?change, "state changed");
                    // One redraw covers every change already queued
                    while changes.try_recv().is_ok() {}
                    println!();
                    print!("{}", ui::render_state(&monitor.snapshot()));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "state changes lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    monitor.shutdown();
    Ok(())
}

async fn print_status(config: &Config, json: bool) -> Result<()> {
    let monitor = Monitor::spawn(config);
    wait_for_check(&monitor, CHECK_RETRY).await;

    let state = monitor.snapshot();
    if json {
        println!("{}", ui::render_json(&state)?);
    } else {
        print!("{}", ui::render_state(&state));
    }
    Ok(())
}

async fn service(config: &Config, command: ServiceCommands) -> Result<()> {
    if let ServiceCommands::Stop { yes: false } = command {
        if !confirm("Stop the container service?")? {
            println!("Aborted");
            return Ok(());
        }
    }

    let monitor = require_executable(config)?;
    wait_for_check(&monitor, CHECK_RETRY).await;

    let (succeeded, expected) = match command {
        ServiceCommands::Start => (monitor.start_service().await, RuntimeStatus::Running),
        ServiceCommands::Stop { .. } => (monitor.stop_service().await, RuntimeStatus::Stopped),
        ServiceCommands::Toggle => {
            let expected = match monitor.status() {
                RuntimeStatus::Running => RuntimeStatus::Stopped,
                _ => RuntimeStatus::Running,
            };
            (monitor.toggle_service().await, expected)
        }
    };

    print!("{}", ui::render_state(&monitor.snapshot()));

    if !succeeded {
        anyhow::bail!("service command failed");
    }
    if monitor.status() != expected {
        anyhow::bail!("service is {} after the command", monitor.status());
    }
    Ok(())
}

async fn container(
    config: &Config,
    action: ContainerAction,
    name: &str,
    confirmed: bool,
) -> Result<()> {
    if action.is_destructive()
        && !confirmed
        && !confirm(&format!("{} container '{}'?", action, name))?
    {
        println!("Aborted");
        return Ok(());
    }

    let monitor = require_executable(config)?;

    let succeeded = match action {
        ContainerAction::Start => monitor.start_container(name).await,
        ContainerAction::Stop => monitor.stop_container(name).await,
        ContainerAction::Restart => monitor.restart_container(name).await,
        ContainerAction::Remove => monitor.remove_container(name).await,
    };
    print!("{}", ui::render_state(&monitor.snapshot()));

    if !succeeded {
        anyhow::bail!("failed to {} container '{}'", action, name);
    }
    Ok(())
}

fn require_executable(config: &Config) -> Result<Monitor> {
    let monitor = Monitor::spawn(config);
    if monitor.resolved_path().is_none() {
        anyhow::bail!("container executable not found; set --tool or runtime.tool");
    }
    Ok(monitor)
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
}
