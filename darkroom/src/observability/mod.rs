//! Observability (logging)
//!
//! Installs a `tracing-subscriber` registry with environment-based
//! filtering. Development builds log in a human-readable format; release
//! builds log JSON lines.

use crate::error::{DarkroomError, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format of the log layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, colored output
    Pretty,
    /// Single-line output
    Compact,
    /// JSON lines
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Filter used when `RUST_LOG` is not set
    pub default_filter: String,

    /// Output format
    pub format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            default_filter: if cfg!(debug_assertions) {
                "info,darkroom=debug".to_string()
            } else {
                "info".to_string()
            },
            format: LogFormat::default(),
        }
    }
}

impl ObservabilityConfig {
    /// Use `filter` when `RUST_LOG` is not set
    #[must_use]
    pub fn with_default_filter(mut self, filter: impl Into<String>) -> Self {
        self.default_filter = filter.into();
        self
    }

    /// Use a specific output format
    #[must_use]
    pub const fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_filter))
    }
}

/// Initialize logging with the default configuration
///
/// # Errors
///
/// Returns [`DarkroomError::Observability`] if a global subscriber is
/// already installed.
///
/// # Example
///
/// ```rust,no_run
/// use darkroom::observability;
///
/// # fn main() -> darkroom::Result<()> {
/// observability::init()?;
/// tracing::info!("Application started");
/// # Ok(())
/// # }
/// ```
pub fn init() -> Result<()> {
    init_with(&ObservabilityConfig::default())
}

/// Initialize logging with an explicit configuration
///
/// # Errors
///
/// Returns [`DarkroomError::Observability`] if a global subscriber is
/// already installed.
pub fn init_with(config: &ObservabilityConfig) -> Result<()> {
    let registry = tracing_subscriber::registry().with(config.env_filter());

    let result = match config.format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).try_init(),
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
    };

    result.map_err(|e| DarkroomError::Observability(e.to_string()))
}
