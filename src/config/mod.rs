//! Configuration loading
//!
//! Reads `config.json` (JSON5 is accepted, so comments and trailing commas
//! are fine), applies environment overrides and validates known keys.
//!
//! ```json
//! {
//!     "github_ips_only": true,
//!     "enforce_secret": "",
//!     "return_scripts_info": true,
//!     "hooks_path": "/opt/hooks"
//! }
//! ```
//!
//! A missing file is not an error: the receiver falls back to a default that
//! dispatches nothing (`hooks_path` points at `/missing`).

use parking_lot::RwLock;
use serde_json::Value;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::hooks::origin::{DEFAULT_ALLOWLIST_TTL_SECS, DEFAULT_META_URL};

/// Config file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Hooks directory used when no config file exists.
pub const MISSING_HOOKS_PATH: &str = "/missing";

/// Default listen address and port.
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;

/// Default config cache TTL in milliseconds
const DEFAULT_CACHE_TTL_MS: u64 = 200;

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "HOOKRELAY_CONFIG_PATH";

/// Environment variable overriding `enforce_secret`.
pub const SECRET_ENV: &str = "HOOKRELAY_ENFORCE_SECRET";

/// Environment variable overriding the cache TTL (milliseconds).
pub const CACHE_MS_ENV: &str = "HOOKRELAY_CONFIG_CACHE_MS";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    ReadError { path: String, message: String },

    #[error("Failed to parse config at {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Invalid config at {path}: {}", format_issues(.issues))]
    ValidationError {
        path: String,
        issues: Vec<ValidationIssue>,
    },
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("{}: {}", i.path, i.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Receiver configuration. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Config {
    /// Only accept deliveries from GitHub's published hook ranges.
    pub github_ips_only: bool,
    /// Shared webhook secret; empty disables signature checks.
    pub enforce_secret: String,
    /// Return the per-hook result map instead of `{"status": "done"}`.
    pub return_scripts_info: bool,
    /// Directory holding hook executables.
    pub hooks_path: PathBuf,
    pub host: String,
    pub port: u16,
    /// Endpoint publishing the allowed ranges.
    pub github_meta_url: String,
    /// How long fetched ranges are reused; 0 refetches per request.
    pub allowlist_ttl_secs: u64,
}

impl Config {
    /// Safe default used when no config file exists.
    pub fn missing() -> Self {
        Config {
            github_ips_only: false,
            enforce_secret: String::new(),
            return_scripts_info: false,
            hooks_path: PathBuf::from(MISSING_HOOKS_PATH),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            github_meta_url: DEFAULT_META_URL.to_string(),
            allowlist_ttl_secs: DEFAULT_ALLOWLIST_TTL_SECS,
        }
    }

    /// Build from a parsed document. Absent keys take the defaults of an
    /// existing-but-sparse file: origin filtering on, hooks under
    /// `<base_dir>/hooks`.
    pub fn from_value(value: &Value, base_dir: &Path) -> Self {
        let get_bool = |key: &str, default: bool| {
            value.get(key).and_then(Value::as_bool).unwrap_or(default)
        };
        let get_str = |key: &str| value.get(key).and_then(Value::as_str);

        Config {
            github_ips_only: get_bool("github_ips_only", true),
            enforce_secret: get_str("enforce_secret").unwrap_or_default().to_string(),
            return_scripts_info: get_bool("return_scripts_info", false),
            hooks_path: get_str("hooks_path")
                .map(PathBuf::from)
                .unwrap_or_else(|| base_dir.join("hooks")),
            host: get_str("host").unwrap_or(DEFAULT_HOST).to_string(),
            port: value
                .get("port")
                .and_then(Value::as_u64)
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(DEFAULT_PORT),
            github_meta_url: get_str("github_meta_url")
                .unwrap_or(DEFAULT_META_URL)
                .to_string(),
            allowlist_ttl_secs: value
                .get("allowlist_ttl_secs")
                .and_then(Value::as_u64)
                .unwrap_or(DEFAULT_ALLOWLIST_TTL_SECS),
        }
    }

    /// Apply environment overrides (env wins over the file).
    fn apply_env_overrides(&mut self) {
        if let Ok(secret) = env::var(SECRET_ENV) {
            self.enforce_secret = secret;
        }
    }

    /// Copy safe to print: the secret is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.enforce_secret.is_empty() {
            copy.enforce_secret = "***".to_string();
        }
        copy
    }
}

/// Get the config file path.
/// Priority: HOOKRELAY_CONFIG_PATH > ./config.json
pub fn get_config_path() -> PathBuf {
    env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Load config without any caching.
pub fn load_config_uncached(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        let mut config = Config::missing();
        config.apply_env_overrides();
        return Ok(config);
    }

    let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let value: Value = json5::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let errors: Vec<ValidationIssue> = validate_config(&value)
        .into_iter()
        .filter(|i| i.severity == Severity::Error)
        .collect();
    if !errors.is_empty() {
        return Err(ConfigError::ValidationError {
            path: path.display().to_string(),
            issues: errors,
        });
    }

    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut config = Config::from_value(&value, base_dir);
    config.apply_env_overrides();
    Ok(config)
}

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A problem found while validating the config document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub path: String,
    pub message: String,
}

#[derive(Clone, Copy)]
enum Kind {
    Bool,
    String,
    Port,
    UInt,
}

const KNOWN_KEYS: &[(&str, Kind)] = &[
    ("github_ips_only", Kind::Bool),
    ("enforce_secret", Kind::String),
    ("return_scripts_info", Kind::Bool),
    ("hooks_path", Kind::String),
    ("host", Kind::String),
    ("port", Kind::Port),
    ("github_meta_url", Kind::String),
    ("allowlist_ttl_secs", Kind::UInt),
];

/// Validate a config document: unknown keys warn, wrongly-typed known keys
/// are errors.
pub fn validate_config(config: &Value) -> Vec<ValidationIssue> {
    let Some(obj) = config.as_object() else {
        return vec![ValidationIssue {
            severity: Severity::Error,
            path: "$".to_string(),
            message: "config must be an object".to_string(),
        }];
    };

    let mut issues = Vec::new();
    for (key, value) in obj {
        let Some((_, kind)) = KNOWN_KEYS.iter().find(|(k, _)| k == key) else {
            issues.push(ValidationIssue {
                severity: Severity::Warning,
                path: key.clone(),
                message: "unknown key".to_string(),
            });
            continue;
        };

        let expected = match kind {
            Kind::Bool if !value.is_boolean() => Some("a boolean"),
            Kind::String if !value.is_string() => Some("a string"),
            Kind::Port
                if !value
                    .as_u64()
                    .is_some_and(|p| (1..=u64::from(u16::MAX)).contains(&p)) =>
            {
                Some("a port number (1-65535)")
            }
            Kind::UInt if !value.is_u64() => Some("a non-negative integer"),
            _ => None,
        };
        if let Some(expected) = expected {
            issues.push(ValidationIssue {
                severity: Severity::Error,
                path: key.clone(),
                message: format!("expected {}", expected),
            });
        }
    }
    issues
}

struct CachedConfig {
    config: Arc<Config>,
    loaded_at: Instant,
}

enum Origin {
    File(PathBuf),
    Fixed(Arc<Config>),
}

/// Where request handlers get their configuration from.
///
/// File-backed sources re-read the file after a short TTL so edits apply
/// without a restart; each call returns one immutable snapshot.
pub struct ConfigSource {
    origin: Origin,
    ttl: Option<Duration>,
    cache: RwLock<Option<CachedConfig>>,
}

impl std::fmt::Debug for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let origin = match &self.origin {
            Origin::File(path) => path.display().to_string(),
            Origin::Fixed(_) => "<fixed>".to_string(),
        };
        f.debug_struct("ConfigSource")
            .field("origin", &origin)
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Get the cache TTL duration (`None` when caching is disabled).
fn get_cache_ttl() -> Option<Duration> {
    let ms = env::var(CACHE_MS_ENV)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_CACHE_TTL_MS);
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl ConfigSource {
    /// Source reading `path`.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        ConfigSource {
            origin: Origin::File(path.into()),
            ttl: get_cache_ttl(),
            cache: RwLock::new(None),
        }
    }

    /// Source that always yields `config`.
    pub fn fixed(config: Config) -> Self {
        ConfigSource {
            origin: Origin::Fixed(Arc::new(config)),
            ttl: None,
            cache: RwLock::new(None),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.origin {
            Origin::File(path) => Some(path),
            Origin::Fixed(_) => None,
        }
    }

    /// Current configuration snapshot.
    pub fn load(&self) -> Result<Arc<Config>, ConfigError> {
        let path = match &self.origin {
            Origin::Fixed(config) => return Ok(config.clone()),
            Origin::File(path) => path,
        };

        if let Some(ttl) = self.ttl {
            let cache = self.cache.read();
            if let Some(cached) = cache.as_ref() {
                if cached.loaded_at.elapsed() < ttl {
                    return Ok(cached.config.clone());
                }
            }
        }

        let config = Arc::new(load_config_uncached(path)?);
        if self.ttl.is_some() {
            *self.cache.write() = Some(CachedConfig {
                config: config.clone(),
                loaded_at: Instant::now(),
            });
        }
        Ok(config)
    }
}
