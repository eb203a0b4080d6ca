//! Configuration loading and validation for the exporter

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use urlcheck::{CheckConfig, Target};
use validator::{Validate, ValidationError};

/// Environment variable naming an explicit configuration file
pub const CONFIG_FILE_ENV: &str = "URL_CONFIG_FILE";

/// Prefix of the per-field environment overrides
pub const ENV_PREFIX: &str = "URL_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("no targets specified")]
    NoTargets,

    #[error("invalid value {value:?} for {name}: {reason}")]
    InvalidEnv {
        name: String,
        value: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("failed to determine host name: {0}")]
    Hostname(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    #[validate(custom = "validate_targets")]
    pub targets: Vec<String>,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_check_interval")]
    pub check_interval: Duration,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_timeout")]
    pub timeout: Duration,

    pub listen_port: u16,

    /// Defaults to the host name
    pub instance_id: String,

    #[validate(range(max = 100))]
    pub retries: u32,

    #[validate(length(min = 1))]
    pub log_level: String,

    #[validate(custom = "validate_log_format")]
    pub log_format: String,

    pub telemetry: TelemetrySettings,
}

/// OpenTelemetry export settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TelemetrySettings {
    pub enabled: bool,
    pub service_name: String,
    pub otlp_endpoint: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            service_name: "url-exporter".to_string(),
            otlp_endpoint: "http://localhost:4317".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            targets: vec![
                "https://google.com".to_string(),
                "https://github.com".to_string(),
            ],
            check_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            listen_port: 8412,
            instance_id: String::new(),
            retries: 3,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            telemetry: TelemetrySettings::default(),
        }
    }
}

// Custom validators

fn validate_targets(targets: &[String]) -> Result<(), ValidationError> {
    for target in targets {
        if Target::parse(target.as_str()).url().is_none() {
            let mut err = ValidationError::new("target_invalid_url");
            err.add_param("target".into(), target);
            return Err(err);
        }
    }
    Ok(())
}

fn validate_check_interval(interval: &Duration) -> Result<(), ValidationError> {
    if *interval < Duration::from_secs(1) || *interval > Duration::from_secs(24 * 60 * 60) {
        return Err(ValidationError::new("check_interval_out_of_range"));
    }
    Ok(())
}

fn validate_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    if *timeout < Duration::from_millis(1) || *timeout > Duration::from_secs(10 * 60) {
        return Err(ValidationError::new("timeout_out_of_range"));
    }
    Ok(())
}

fn validate_log_format(format: &str) -> Result<(), ValidationError> {
    match format.to_ascii_lowercase().as_str() {
        "text" | "json" => Ok(()),
        _ => Err(ValidationError::new("log_format_unknown")),
    }
}

// Configuration loading implementation

impl Config {
    /// Load configuration from the process environment and search paths
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|name| std::env::var(name).ok())
    }

    /// Load configuration with an injectable environment lookup
    pub fn load_with<F>(env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match Self::find_config_file(&env) {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Self::parse_file(&path)?
            }
            None => {
                tracing::info!("No configuration file found, using defaults");
                Self::default()
            }
        };

        config.apply_env(&env)?;
        config.finalize()
    }

    /// Load configuration from a specific file, without environment overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::parse_file(path.as_ref())?.finalize()
    }

    fn parse_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    /// Find configuration file: explicit override first, then standard locations
    fn find_config_file<F>(env: &F) -> Option<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(explicit) = env(CONFIG_FILE_ENV).filter(|p| !p.trim().is_empty()) {
            let path = PathBuf::from(explicit.trim());
            if path.is_file() {
                return Some(path);
            }
            tracing::warn!(
                path = %path.display(),
                "Configuration file not found, using defaults"
            );
            return None;
        }

        Self::search_paths()
            .into_iter()
            .find(|p: &PathBuf| p.exists() && p.is_file())
    }

    /// Standard locations, in priority order
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("./config.yaml"),
            PathBuf::from("./configs/config.yaml"),
            PathBuf::from("/etc/url-exporter/config.yaml"),
        ];

        if let Some(home_path) = dirs::home_dir().map(|home| home.join(".url-exporter/config.yaml")) {
            paths.push(home_path);
        }

        paths
    }

    /// Apply `URL_*` environment overrides
    fn apply_env<F>(&mut self, env: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| {
            let name = format!("{}{}", ENV_PREFIX, key);
            env(&name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(|v| (name, v))
        };

        if let Some((_, value)) = lookup("TARGETS") {
            self.targets = value
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some((name, value)) = lookup("CHECKINTERVAL") {
            self.check_interval = parse_duration(name, value)?;
        }
        if let Some((name, value)) = lookup("TIMEOUT") {
            self.timeout = parse_duration(name, value)?;
        }
        if let Some((name, value)) = lookup("LISTENPORT") {
            self.listen_port = parse_number(name, value)?;
        }
        if let Some((_, value)) = lookup("INSTANCEID") {
            self.instance_id = value;
        }
        if let Some((name, value)) = lookup("RETRIES") {
            self.retries = parse_number(name, value)?;
        }
        if let Some((_, value)) = lookup("LOGLEVEL") {
            self.log_level = value;
        }
        if let Some((_, value)) = lookup("LOGFORMAT") {
            self.log_format = value;
        }

        Ok(())
    }

    /// Fill derived defaults and validate
    fn finalize(mut self) -> Result<Self, ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        if self.instance_id.trim().is_empty() {
            self.instance_id = default_instance_id()?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Scheduling settings for the orchestrator
    pub fn to_check_config(&self) -> CheckConfig {
        CheckConfig {
            check_interval: self.check_interval,
            timeout: self.timeout,
            retries: self.retries,
        }
    }
}

fn parse_duration(name: String, value: String) -> Result<Duration, ConfigError> {
    humantime::parse_duration(&value).map_err(|e| ConfigError::InvalidEnv {
        reason: e.to_string(),
        name,
        value,
    })
}

fn parse_number<T>(name: String, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        reason: e.to_string(),
        name,
        value,
    })
}

/// Host name of this machine
pub fn default_instance_id() -> Result<String, ConfigError> {
    nix::unistd::gethostname()
        .map_err(|e| ConfigError::Hostname(e.to_string()))?
        .into_string()
        .map_err(|_| ConfigError::Hostname("host name is not valid UTF-8".to_string()))
}
