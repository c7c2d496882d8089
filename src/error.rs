//! Error types for background replacement operations

use thiserror::Error;

/// Result type alias for background replacement operations
pub type Result<T> = std::result::Result<T, BgFillError>;

/// Error taxonomy for the pipeline and its supporting services
#[derive(Error, Debug)]
pub enum BgFillError {
    /// Source bytes could not be fetched or decoded into a bitmap
    #[error("Decode error: {0}")]
    Decode(String),

    /// The segmentation model produced no usable mask
    #[error("Segmentation error: {0}")]
    Segmentation(String),

    /// The final bitmap could not be serialized to the output format
    #[error("Encode error: {0}")]
    Encode(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Model files missing or backend construction failed
    #[error("Model error: {0}")]
    Model(String),

    /// Model download failures
    #[error("Network error: {0}")]
    Network(String),

    /// Input/output errors outside the pipeline (cache, downloads)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BgFillError {
    /// Create a new decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new segmentation error
    pub fn segmentation<S: Into<String>>(msg: S) -> Self {
        Self::Segmentation(msg.into())
    }

    /// Create a new encode error
    pub fn encode<S: Into<String>>(msg: S) -> Self {
        Self::Encode(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a network error from any displayable cause
    pub fn network_error<S: Into<String>, E: std::fmt::Display>(context: S, error: E) -> Self {
        Self::Network(format!("{}: {}", context.into(), error))
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Whether this error is one of the three pipeline stage failures
    #[must_use]
    pub fn is_stage_failure(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::Segmentation(_) | Self::Encode(_)
        )
    }
}
