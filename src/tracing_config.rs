//! Tracing subscriber setup for the CLI
//!
//! The library only emits `tracing` spans and `log` records; the binary owns
//! the subscriber. `log` records are bridged into the same subscriber.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Configuration for tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable console output with colors (default for CLI)
    Console,
    /// Compact console output without colors for CI environments
    Compact,
    /// JSON structured logging
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Tracing configuration builder
#[derive(Debug)]
pub struct TracingConfig {
    /// Verbosity level (maps to log levels)
    pub verbosity: u8,
    pub format: TracingFormat,
    /// Environment filter string (overrides verbosity if set)
    pub env_filter: Option<String>,
    /// Session ID for correlation
    pub session_id: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            env_filter: None,
            session_id: None,
        }
    }
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set verbosity level (0-3+)
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    /// Set custom environment filter
    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Set session ID for correlating one CLI run
    #[must_use]
    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Convert verbosity level to tracing filter string
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "warn",  // Default: warnings and errors only
            1 => "info",  // -v: stage progress and results
            2 => "debug", // -vv: internal state and computations
            _ => "trace", // -vvv+: extremely detailed traces
        }
    }

    /// Install the global subscriber
    ///
    /// # Errors
    /// - Invalid filter directive
    /// - A global subscriber is already installed
    pub fn init(self) -> anyhow::Result<()> {
        use tracing_subscriber::fmt;

        let filter = match &self.env_filter {
            Some(directives) => EnvFilter::try_new(directives)?,
            None => EnvFilter::try_new(self.verbosity_to_filter())?,
        };
        let registry = Registry::default().with(filter);

        match self.format {
            TracingFormat::Console => {
                let fmt_layer = fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .with_level(true)
                    .compact();
                registry.with(fmt_layer).try_init()?;
            },
            TracingFormat::Compact => {
                let fmt_layer = fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .compact();
                registry.with(fmt_layer).try_init()?;
            },
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => {
                let fmt_layer = fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(true);
                registry.with(fmt_layer).try_init()?;
            },
        }

        if let Some(session_id) = &self.session_id {
            tracing::debug!(session_id = %session_id, "bgfill session started");
        }
        Ok(())
    }
}

/// Initialize tracing with CLI defaults
///
/// `RUST_LOG` takes precedence over the verbosity level when set.
///
/// # Errors
/// - See [`TracingConfig::init`]
pub fn init_cli_tracing(verbosity: u8, format: TracingFormat) -> anyhow::Result<()> {
    let mut config = TracingConfig::new()
        .with_verbosity(verbosity)
        .with_format(format)
        .with_session_id(uuid::Uuid::new_v4().to_string());

    if let Ok(directives) = std::env::var("RUST_LOG") {
        if !directives.trim().is_empty() {
            config = config.with_env_filter(directives);
        }
    }
    config.init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_mapping() {
        assert_eq!(TracingConfig::new().with_verbosity(0).verbosity_to_filter(), "warn");
        assert_eq!(TracingConfig::new().with_verbosity(1).verbosity_to_filter(), "info");
        assert_eq!(TracingConfig::new().with_verbosity(2).verbosity_to_filter(), "debug");
        assert_eq!(TracingConfig::new().with_verbosity(3).verbosity_to_filter(), "trace");
        assert_eq!(TracingConfig::new().with_verbosity(10).verbosity_to_filter(), "trace");
    }

    #[test]
    fn test_config_builder() {
        let config = TracingConfig::new()
            .with_verbosity(2)
            .with_format(TracingFormat::Compact)
            .with_session_id("test-session");

        assert_eq!(config.verbosity, 2);
        assert_eq!(config.format, TracingFormat::Compact);
        assert_eq!(config.session_id.as_deref(), Some("test-session"));
        assert!(config.env_filter.is_none());
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let result = TracingConfig::new().with_env_filter("bgfill=notalevel").init();
        assert!(result.is_err());
    }
}
