//! Dispatcher error types

use thiserror::Error;

/// Errors raised while building or running consumers and feedback sinks
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Sink creation error
    #[error("failed to create sink '{name}': {message}")]
    SinkCreation { name: String, message: String },

    /// Consumer queue full, delivery dropped
    #[error("queue full for sink '{sink_name}', {data_type}[{index}] dropped")]
    QueueFull {
        sink_name: String,
        data_type: String,
        index: u64,
    },

    /// Error surfaced by a sink or PV writer
    #[error("sink error: {0}")]
    Contract(#[from] contracts::ContractError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatcherError {
    /// Create a sink creation error
    pub fn sink_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkCreation {
            name: name.into(),
            message: message.into(),
        }
    }
}
