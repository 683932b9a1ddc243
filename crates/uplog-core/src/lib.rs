pub mod config;
pub mod error;

pub use config::{AuthConfig, BackendKind, CalendarConfig, Config, ValidationResult};
pub use error::{AppError, ConfigError};

use anyhow::Result;

/// Initialize logging.
///
/// `RUST_LOG` wins when set; otherwise `DEBUG` in the environment switches the
/// default filter from `info` to `debug`.
pub fn init() -> Result<()> {
    let default_level = if std::env::var_os("DEBUG").is_some_and(|v| !v.is_empty()) {
        "debug"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    tracing::debug!("uplog core initialized");
    Ok(())
}
