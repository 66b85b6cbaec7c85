//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommand hierarchy:
//! - `start` (default) -- start the webhook receiver
//! - `config show|check|path` -- inspect configuration
//! - `status` -- query a running instance
//! - `version` -- print version info

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde_json::Value;

use crate::config::{self, Severity};

/// GitHub webhook receiver dispatching local hook scripts.
#[derive(Parser, Debug)]
#[command(
    name = "hookrelay",
    version = env!("CARGO_PKG_VERSION"),
    about = "hookrelay - run local hook scripts on GitHub webhook deliveries"
)]
pub struct Cli {
    /// Path to the configuration file (default: $HOOKRELAY_CONFIG_PATH or ./config.json).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// Config file path: `--config`, else the environment/default lookup.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(config::get_config_path)
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the receiver (default when no subcommand is given).
    Start,

    /// Inspect configuration.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Query a running instance.
    Status {
        /// Port of the running instance (default: from config or 5000).
        #[arg(short, long)]
        port: Option<u16>,

        /// Host of the running instance.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Print version information.
    Version,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the loaded configuration (secret redacted) as JSON.
    Show,

    /// Validate the configuration file and report issues.
    Check,

    /// Print the resolved configuration file path.
    Path,
}

// ---------------------------------------------------------------------------
// Subcommand handlers
// ---------------------------------------------------------------------------

/// Run the `config path` subcommand.
pub fn handle_config_path(path: &Path) {
    println!("{}", path.display());
}

/// Run the `config show` subcommand.
pub fn handle_config_show(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::load_config_uncached(path)?;
    let pretty = serde_json::to_string_pretty(&cfg.redacted())?;
    println!("{}", pretty);
    Ok(())
}

/// Run the `config check` subcommand. Returns whether the file is usable.
pub fn handle_config_check(path: &Path) -> Result<bool, Box<dyn std::error::Error>> {
    if !path.exists() {
        println!(
            "{}: not found (receiver would start with dispatch disabled)",
            path.display()
        );
        return Ok(true);
    }

    let content = std::fs::read_to_string(path)?;
    let value: Value = match json5::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            println!("{}: parse error: {}", path.display(), e);
            return Ok(false);
        }
    };

    let issues = config::validate_config(&value);
    for issue in &issues {
        let label = match issue.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        println!("{}: {}: {}", label, issue.path, issue.message);
    }

    let ok = !issues.iter().any(|i| i.severity == Severity::Error);
    if ok {
        println!("{}: OK", path.display());
    }
    Ok(ok)
}

/// Port to query when none is given on the command line.
fn resolve_port(explicit: Option<u16>, config_path: &Path) -> u16 {
    if let Some(p) = explicit {
        return p;
    }
    config::load_config_uncached(config_path)
        .map(|cfg| cfg.port)
        .unwrap_or(config::DEFAULT_PORT)
}

/// Run the `status` subcommand.
pub async fn handle_status(
    host: &str,
    port: Option<u16>,
    config_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let port = resolve_port(port, config_path);
    let url = format!("http://{}:{}/status", host, port);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()?;

    let response = match client.get(&url).send().await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Could not connect to hookrelay at {}:{}", host, port);
            eprintln!("  Error: {}", e);
            eprintln!();
            eprintln!("Is the server running? Start it with: hookrelay start");
            std::process::exit(1);
        }
    };

    if !response.status().is_success() {
        eprintln!(
            "Status endpoint returned HTTP {}: {}",
            response.status(),
            response.text().await.unwrap_or_default()
        );
        std::process::exit(1);
    }

    let body: Value = response.json().await?;
    println!("hookrelay status");
    println!("================");
    println!("  Address:  {}:{}", host, port);
    if let Some(status) = body.get("status").and_then(|v| v.as_str()) {
        println!("  Status:   {}", status);
    }
    Ok(())
}

/// Run the `version` subcommand.
pub fn handle_version() {
    println!("hookrelay {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Platform:   {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cli_no_args_defaults_to_none() {
        let cli = Cli::try_parse_from(["hookrelay"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_start_subcommand() {
        let cli = Cli::try_parse_from(["hookrelay", "start"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Start)));
    }

    #[test]
    fn test_cli_version_subcommand() {
        let cli = Cli::try_parse_from(["hookrelay", "version"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Version)));
    }

    #[test]
    fn test_cli_config_subcommands() {
        let cli = Cli::try_parse_from(["hookrelay", "config", "show"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Config(ConfigCommand::Show))
        ));
        let cli = Cli::try_parse_from(["hookrelay", "config", "check"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Config(ConfigCommand::Check))
        ));
        let cli = Cli::try_parse_from(["hookrelay", "config", "path"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Config(ConfigCommand::Path))
        ));
    }

    #[test]
    fn test_cli_global_config_flag() {
        let cli =
            Cli::try_parse_from(["hookrelay", "config", "path", "--config", "/etc/hr.json"])
                .unwrap();
        assert_eq!(cli.config_path(), PathBuf::from("/etc/hr.json"));
    }

    #[test]
    fn test_cli_status_defaults() {
        let cli = Cli::try_parse_from(["hookrelay", "status"]).unwrap();
        match cli.command {
            Some(Command::Status { port, ref host }) => {
                assert_eq!(port, None);
                assert_eq!(host, "127.0.0.1");
            }
            other => panic!("Expected Status, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_status_with_port() {
        let cli = Cli::try_parse_from(["hookrelay", "status", "-p", "9000"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Status { port: Some(9000), .. })
        ));
    }

    #[test]
    fn test_cli_unknown_subcommand() {
        assert!(Cli::try_parse_from(["hookrelay", "frobnicate"]).is_err());
    }

    #[test]
    fn test_resolve_port_explicit_wins() {
        assert_eq!(resolve_port(Some(7000), Path::new("/nonexistent.json")), 7000);
    }

    #[test]
    fn test_resolve_port_from_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "port": 8088 }"#).unwrap();
        assert_eq!(resolve_port(None, &path), 8088);
        assert_eq!(
            resolve_port(None, &dir.path().join("missing.json")),
            config::DEFAULT_PORT
        );
    }

    #[test]
    fn test_config_check_reports_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "port": "eighty", "extra": 1 }"#).unwrap();
        assert!(!handle_config_check(&path).unwrap());

        std::fs::write(&path, r#"{ "hooks_path": "/hooks", "extra": 1 }"#).unwrap();
        assert!(handle_config_check(&path).unwrap());

        std::fs::write(&path, "{ nope").unwrap();
        assert!(!handle_config_check(&path).unwrap());
    }

    #[test]
    fn test_config_check_missing_file_is_ok() {
        let dir = TempDir::new().unwrap();
        assert!(handle_config_check(&dir.path().join("absent.json")).unwrap());
    }
}
