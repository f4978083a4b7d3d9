//! Layered error definitions
//!
//! Categorized by source: config / evaluation / sink

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    /// A configured check has no limits for its data type
    #[error("no '{limit_key}' limits configured for data type '{data_type}'")]
    MissingLimits {
        data_type: String,
        limit_key: String,
    },

    /// Unknown quality check identifier
    #[error("unknown quality check '{name}'")]
    UnknownCheck { name: String },

    // ===== Evaluation Errors =====
    /// A check could not compute a value for a frame
    #[error("check '{check}' failed to evaluate: {message}")]
    Evaluation { check: String, message: String },

    // ===== Sink Errors =====
    /// Sink write error
    #[error("sink '{sink_name}' write error: {message}")]
    SinkWrite { sink_name: String, message: String },

    /// Sink connection error
    #[error("sink '{sink_name}' connection error: {message}")]
    SinkConnection { sink_name: String, message: String },

    /// Process variable write-back error
    #[error("pv '{pv}' write error: {message}")]
    PvWrite { pv: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create missing limits error
    pub fn missing_limits(data_type: impl Into<String>, limit_key: impl Into<String>) -> Self {
        Self::MissingLimits {
            data_type: data_type.into(),
            limit_key: limit_key.into(),
        }
    }

    /// Create evaluation error
    pub fn evaluation(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Evaluation {
            check: check.into(),
            message: message.into(),
        }
    }

    /// Create sink write error
    pub fn sink_write(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }

    /// Create PV write error
    pub fn pv_write(pv: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PvWrite {
            pv: pv.into(),
            message: message.into(),
        }
    }

    /// Whether the error stems from configuration (fatal at startup)
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::ConfigParse { .. }
                | Self::ConfigValidation { .. }
                | Self::MissingLimits { .. }
                | Self::UnknownCheck { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_classified() {
        assert!(ContractError::missing_limits("data", "mean").is_config());
        assert!(ContractError::config_validation("x", "y").is_config());
        assert!(!ContractError::evaluation("mean", "empty slice").is_config());
        assert!(!ContractError::pv_write("data_mean", "unknown").is_config());
    }

    #[test]
    fn missing_limits_message_names_the_key() {
        let err = ContractError::missing_limits("data_dark", "stat_mean");
        assert_eq!(
            err.to_string(),
            "no 'stat_mean' limits configured for data type 'data_dark'"
        );
    }
}
