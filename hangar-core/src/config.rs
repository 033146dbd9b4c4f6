//! Process configuration, loaded from `.env` and the environment.
//! `.env` is loaded first via `dotenvy::dotenv()` and never overwrites a
//! variable already set in the process environment.

use std::path::PathBuf;

/// Error loading or parsing a configuration value.
#[derive(Debug)]
pub struct ConfigError {
    pub key: &'static str,
    pub detail: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid config value for '{}': {}", self.key, self.detail)
    }
}

impl std::error::Error for ConfigError {}

/// Resolved process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub log_level: String,
    pub admin_username: String,
    pub admin_password: String,
    pub jwt_secret: String,
    pub slack_webhook_url: Option<String>,
    pub functions_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub backups_dir: PathBuf,
    pub max_log_size_bytes: u64,
    pub max_log_files: usize,
    pub debounce_ms: u64,
    pub backup_retention: usize,
    pub validation_timeout_secs: u64,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw.parse().map_err(|_| ConfigError {
            key,
            detail: format!("'{raw}' is not a valid value"),
        }),
    }
}

impl Config {
    /// Load configuration for the process: `.env` first (without
    /// clobbering already-set variables), then environment variables with
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_env()
    }

    /// Build a `Config` purely from the current process environment,
    /// skipping the `.env` load step — used by tests that set variables
    /// programmatically.
    pub fn from_env() -> Result<Self, ConfigError> {
        let log_level = env_or("LOG_LEVEL", "info");
        if !matches!(
            log_level.as_str(),
            "error" | "warn" | "info" | "debug" | "trace"
        ) {
            return Err(ConfigError {
                key: "LOG_LEVEL",
                detail: format!("'{log_level}' is not one of error|warn|info|debug|trace"),
            });
        }

        Ok(Config {
            port: env_parsed("PORT", 3000)?,
            log_level,
            admin_username: env_or("ADMIN_USERNAME", "admin"),
            admin_password: env_or("ADMIN_PASSWORD", "admin"),
            jwt_secret: env_or("JWT_SECRET", "dev-secret-change-me"),
            slack_webhook_url: std::env::var("SLACK_WEBHOOK_URL").ok(),
            functions_dir: PathBuf::from(env_or("FUNCTIONS_DIR", "functions")),
            logs_dir: PathBuf::from(env_or("LOGS_DIR", "logs")),
            backups_dir: PathBuf::from(env_or("BACKUPS_DIR", ".deployment-backups")),
            max_log_size_bytes: env_parsed("MAX_LOG_SIZE_BYTES", 10 * 1024 * 1024)?,
            max_log_files: env_parsed("MAX_LOG_FILES", 5)?,
            debounce_ms: env_parsed("DEBOUNCE_MS", 250)?,
            backup_retention: env_parsed("BACKUP_RETENTION", 5)?,
            validation_timeout_secs: env_parsed("VALIDATION_TIMEOUT_SECS", 30)?,
        })
    }
}
