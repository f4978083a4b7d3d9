//! Output interfaces: downstream consumers, feedback sinks, PV write-back.

use crate::{ContractError, Delivery, FailureNotice};

/// Downstream consumer of the reordered delivery stream
///
/// All consumer implementations must implement this trait.
#[trait_variant::make(ConsumerSink: Send)]
pub trait LocalConsumerSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Write one released delivery
    ///
    /// # Errors
    /// Returns write error (should include context)
    async fn write(&mut self, delivery: &Delivery) -> Result<(), ContractError>;

    /// Flush buffer (if any)
    async fn flush(&mut self) -> Result<(), ContractError>;

    /// Close sink
    async fn close(&mut self) -> Result<(), ContractError>;
}

/// Real-time failure feedback target
#[trait_variant::make(FeedbackSink: Send)]
pub trait LocalFeedbackSink {
    fn name(&self) -> &str;

    /// Render one failure notice
    async fn notify(&mut self, notice: &FailureNotice) -> Result<(), ContractError>;

    /// Release resources once every data type finished
    async fn close(&mut self) -> Result<(), ContractError>;
}

/// Process-variable write-back capability
pub trait PvWriter: Send + Sync {
    /// Publish the index of a failed frame on the named PV
    fn write(&self, name: &str, index: u64) -> Result<(), ContractError>;
}
