//! Error types for CLI operations.

use contracts::ContractError;
use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration parsing error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String },

    /// Pipeline execution error
    #[error("Verification failed: {message}")]
    PipelineExecution { message: String },

    /// Report output error
    #[error("Failed to write report to {path}: {message}")]
    Report { path: String, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn pipeline_execution(message: impl Into<String>) -> Self {
        Self::PipelineExecution {
            message: message.into(),
        }
    }

    pub fn report(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Report {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl From<ContractError> for CliError {
    fn from(err: ContractError) -> Self {
        match err {
            ContractError::ConfigParse { .. } => Self::ConfigParse {
                message: err.to_string(),
            },
            e if e.is_config() => Self::ConfigValidation {
                message: e.to_string(),
            },
            ContractError::Io(e) => Self::Io(e),
            e => Self::pipeline_execution(e.to_string()),
        }
    }
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
