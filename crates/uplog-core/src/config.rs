use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::ConfigError;

/// Environment variable carrying the raw OAuth client credentials JSON.
pub const ENV_OAUTH_CREDENTIALS: &str = "OAUTH_CREDENTIALS";
pub const ENV_OAUTH_CREDENTIALS_PATH: &str = "OAUTH_CREDENTIALS_PATH";
pub const ENV_OAUTH_TOKEN_PATH: &str = "OAUTH_TOKEN_PATH";
pub const ENV_CALENDAR_DESCRIPTION: &str = "CALENDAR_DESCRIPTION";
pub const ENV_SCHEDULE_PATH: &str = "SCHEDULE_PATH";

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a single-line summary of all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Calendar synchronization settings
    #[serde(default)]
    pub calendar: CalendarConfig,

    /// OAuth settings
    #[serde(default)]
    pub auth: AuthConfig,

    /// JSON file holding the workout schedule to mirror at startup
    #[serde(default)]
    pub schedule_path: Option<PathBuf>,
}

/// Which remote calendar the sync engine talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Google,
    /// In-process calendar, nothing leaves the machine
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    #[serde(default)]
    pub backend: BackendKind,

    /// Remote calendar to manage events in
    #[serde(default = "default_calendar_id")]
    pub calendar_id: String,

    /// Description attached to every synced workout event
    #[serde(default)]
    pub description: String,

    /// Delay between the first buffered change and the flush of its batch
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,

    /// Maximum number of commands waiting for the dispatch worker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_calendar_id() -> String {
    "primary".to_string()
}

fn default_debounce_secs() -> u64 {
    5
}

fn default_queue_capacity() -> usize {
    1000
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            calendar_id: default_calendar_id(),
            description: String::new(),
            debounce_secs: default_debounce_secs(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Google OAuth client credentials file (client_secret_*.json)
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,

    /// Raw credentials JSON, only ever set from the environment
    #[serde(skip)]
    pub credentials: Option<String>,

    /// Where the OAuth token is persisted between runs
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,

    /// Local port the OAuth redirect lands on
    #[serde(default = "default_callback_port")]
    pub callback_port: u16,

    /// Overrides the first redirect URI of the credentials file
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

fn default_token_path() -> PathBuf {
    PathBuf::from("./secrets/oauth_token.json")
}

fn default_callback_port() -> u16 {
    8080
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            credentials_path: None,
            credentials: None,
            token_path: default_token_path(),
            callback_port: default_callback_port(),
            redirect_uri: None,
        }
    }
}

impl AuthConfig {
    /// Raw OAuth client credentials, preferring the environment over the file.
    pub fn credentials_json(&self) -> Result<String, ConfigError> {
        if let Some(raw) = self.credentials.as_ref().filter(|s| !s.trim().is_empty()) {
            return Ok(raw.clone());
        }

        let path = self.credentials_path.as_ref().ok_or_else(|| {
            ConfigError::MissingSetting(format!(
                "auth.credentials_path (or {})",
                ENV_OAUTH_CREDENTIALS
            ))
        })?;

        std::fs::read_to_string(path)
            .map_err(|e| ConfigError::NotFound(format!("{}: {}", path.display(), e)))
    }

    fn has_credentials(&self) -> bool {
        self.credentials.as_ref().is_some_and(|s| !s.trim().is_empty())
            || self.credentials_path.is_some()
    }
}

impl Config {
    /// Load configuration from the default location, creating it if missing,
    /// then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a specific file, writing defaults there if it
    /// doesn't exist yet.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path).context("Failed to read config file")?;

        toml::from_str(&contents).context("Failed to parse config file")
    }

    /// Load configuration and validate it
    ///
    /// Warnings are logged; errors fail the load.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        for warning in &validation.warnings {
            tracing::warn!(field = %warning.field, "config warning: {}", warning.message);
        }

        Ok((config, validation))
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(raw) = non_empty(ENV_OAUTH_CREDENTIALS) {
            self.auth.credentials = Some(raw);
        }
        if let Some(path) = non_empty(ENV_OAUTH_CREDENTIALS_PATH) {
            self.auth.credentials_path = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty(ENV_OAUTH_TOKEN_PATH) {
            self.auth.token_path = PathBuf::from(path);
        }
        if let Some(description) = non_empty(ENV_CALENDAR_DESCRIPTION) {
            self.calendar.description = description;
        }
        if let Some(path) = non_empty(ENV_SCHEDULE_PATH) {
            self.schedule_path = Some(PathBuf::from(path));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.calendar.queue_capacity == 0 {
            result.add_error(
                "calendar.queue_capacity",
                "Queue capacity must be greater than 0",
            );
        }

        if self.calendar.debounce_secs == 0 {
            result.add_warning(
                "calendar.debounce_secs",
                "Debounce disabled, every change is flushed on its own",
            );
        } else if self.calendar.debounce_secs > 3600 {
            result.add_warning(
                "calendar.debounce_secs",
                "Debounce is more than an hour, changes will reach the calendar late",
            );
        }

        if self.calendar.calendar_id.trim().is_empty() {
            result.add_error("calendar.calendar_id", "Calendar ID must not be empty");
        }

        if let Some(uri) = &self.auth.redirect_uri {
            self.validate_url(uri, "auth.redirect_uri", &mut result);
        }

        if self.auth.callback_port == 0 {
            result.add_error("auth.callback_port", "Port cannot be 0");
        }

        if self.calendar.backend == BackendKind::Google && !self.auth.has_credentials() {
            result.add_warning(
                "auth",
                "OAuth credentials not configured - calendar sync will be unavailable",
            );
        }

        if let Some(parent) = self.auth.token_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                result.add_warning(
                    "auth.token_path",
                    format!("Directory does not exist: {}", parent.display()),
                );
            }
        }

        result
    }

    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to a file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("uplog");

        Ok(config_dir.join("config.toml"))
    }
}
