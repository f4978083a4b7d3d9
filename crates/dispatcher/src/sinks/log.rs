//! LogSink - logs a summary of each released delivery via tracing

use contracts::{ConsumerSink, ContractError, Delivery, DeliveryEvent};
use tracing::{info, instrument, warn};

/// Sink that logs delivery summaries for debugging
pub struct LogSink {
    name: String,
    verified: u64,
    failed: u64,
    missing: u64,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            verified: 0,
            failed: 0,
            missing: 0,
        }
    }

    fn log_delivery(&mut self, delivery: &Delivery) {
        match &delivery.event {
            DeliveryEvent::Verified { frame, failed } => {
                self.verified += 1;
                if *failed {
                    self.failed += 1;
                }
                info!(
                    sink = %self.name,
                    data_type = %delivery.data_type,
                    index = delivery.index,
                    width = frame.slice.width(),
                    height = frame.slice.height(),
                    failed,
                    "Frame delivered"
                );
            }
            DeliveryEvent::Missing => {
                self.missing += 1;
                warn!(
                    sink = %self.name,
                    data_type = %delivery.data_type,
                    index = delivery.index,
                    "Missing frame delivered"
                );
            }
            DeliveryEvent::End => {
                info!(
                    sink = %self.name,
                    data_type = %delivery.data_type,
                    index = delivery.index,
                    verified = self.verified,
                    failed = self.failed,
                    missing = self.missing,
                    "End of stream"
                );
            }
        }
    }
}

impl ConsumerSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_write",
        skip(self, delivery),
        fields(sink = %self.name, index = delivery.index)
    )]
    async fn write(&mut self, delivery: &Delivery) -> Result<(), ContractError> {
        self.log_delivery(delivery);
        Ok(())
    }

    #[instrument(name = "log_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(sink = %self.name, "LogSink closed");
        Ok(())
    }
}
