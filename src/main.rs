use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use serde_json::Value;
use tracing::{error, info, warn};

use hookrelay::cli::{self, Cli, Command, ConfigCommand};
use hookrelay::config::{self, Config, ConfigSource, Severity};
use hookrelay::logging;
use hookrelay::server::{run_server_with_config, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_path = cli.config_path();

    match cli.command {
        // No subcommand or explicit `start` both launch the server.
        None | Some(Command::Start) => run_server(&config_path).await,

        Some(Command::Config(sub)) => {
            match sub {
                ConfigCommand::Show => cli::handle_config_show(&config_path)?,
                ConfigCommand::Check => {
                    if !cli::handle_config_check(&config_path)? {
                        std::process::exit(1);
                    }
                }
                ConfigCommand::Path => cli::handle_config_path(&config_path),
            }
            Ok(())
        }

        Some(Command::Status { port, host }) => {
            cli::handle_status(&host, port, &config_path).await
        }

        Some(Command::Version) => {
            cli::handle_version();
            Ok(())
        }
    }
}

async fn run_server(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    init_logging_from_env()?;
    let cfg = load_and_validate_config(config_path)?;

    info!("hookrelay v{}", env!("CARGO_PKG_VERSION"));
    info!(target: "config", path = %config_path.display(), "Configuration loaded");
    info!(target: "config", hooks_path = %cfg.hooks_path.display(), "Hooks directory");
    if cfg.github_ips_only {
        info!(target: "origin", url = %cfg.github_meta_url, "Restricting deliveries to GitHub hook ranges");
    }
    if cfg.enforce_secret.is_empty() {
        warn!(target: "config", "No webhook secret configured; signatures are not checked");
    }

    let source = Arc::new(ConfigSource::from_file(config_path));
    let server_config = ServerConfig::from_config(source, &cfg)?;
    let handle = run_server_with_config(server_config).await?;

    let reason = await_shutdown_trigger().await;
    info!("Shutdown signal received ({})", reason);
    handle.shutdown().await;

    info!("Receiver shut down");
    Ok(())
}

/// Initialize logging based on the HOOKRELAY_DEV environment variable.
fn init_logging_from_env() -> Result<(), Box<dyn std::error::Error>> {
    let log_config = if std::env::var("HOOKRELAY_DEV")
        .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
        .unwrap_or(false)
    {
        logging::LogConfig::development()
    } else {
        logging::LogConfig::production()
    };
    logging::init_logging(log_config)?;
    Ok(())
}

fn load_and_validate_config(path: &Path) -> Result<Config, Box<dyn std::error::Error>> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let raw: Value = json5::from_str(&content)?;
        for issue in config::validate_config(&raw) {
            match issue.severity {
                Severity::Error => {
                    error!(target: "config", "Config error at {}: {}", issue.path, issue.message);
                }
                Severity::Warning => {
                    warn!(target: "config", "Config warning at {}: {}", issue.path, issue.message);
                }
            }
        }
    } else {
        warn!(target: "config", path = %path.display(), "Config file not found, hooks are disabled");
    }

    // Validation errors surface here and abort startup.
    Ok(config::load_config_uncached(path)?)
}

/// Wait for either Ctrl+C or SIGTERM (Unix only) and return a label for logging.
#[cfg(unix)]
async fn await_shutdown_trigger() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => "ctrl-c",
                _ = sigterm.recv() => "SIGTERM",
            }
        }
        Err(e) => {
            warn!(
                "Failed to install SIGTERM handler: {}; falling back to Ctrl+C only",
                e
            );
            ctrl_c_only().await
        }
    }
}

/// On non-Unix platforms, only Ctrl+C is available.
#[cfg(not(unix))]
async fn await_shutdown_trigger() -> &'static str {
    ctrl_c_only().await
}

async fn ctrl_c_only() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "ctrl-c",
        Err(e) => {
            error!("Failed to install Ctrl+C handler: {}; running until killed", e);
            std::future::pending::<&'static str>().await
        }
    }
}
