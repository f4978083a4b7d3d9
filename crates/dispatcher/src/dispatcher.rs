//! ConsumerDispatcher - reorders verified deliveries and fans them out to consumers

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use contracts::{ConsumerConfig, ConsumerType, Delivery, ReorderConfig};

use crate::error::DispatcherError;
use crate::handle::SinkHandle;
use crate::metrics::MetricsSnapshot;
use crate::reorder::ReorderBuffer;
use crate::sinks::{FileSink, LogSink, NetworkSink};

/// Consumer dispatcher configuration
#[derive(Debug, Clone, Default)]
pub struct ConsumerDispatcherConfig {
    pub consumers: Vec<ConsumerConfig>,
    pub reorder: ReorderConfig,
}

/// Builder for creating a ConsumerDispatcher
pub struct ConsumerDispatcherBuilder {
    config: ConsumerDispatcherConfig,
    input_rx: mpsc::UnboundedReceiver<Delivery>,
}

impl ConsumerDispatcherBuilder {
    pub fn new(
        config: ConsumerDispatcherConfig,
        input_rx: mpsc::UnboundedReceiver<Delivery>,
    ) -> Self {
        Self { config, input_rx }
    }

    /// Create every consumer and spawn its worker
    #[instrument(name = "consumer_dispatcher_build", skip(self))]
    pub async fn build(self) -> Result<ConsumerDispatcher, DispatcherError> {
        let handles = Self::initialize_handles(&self.config.consumers).await?;

        Ok(ConsumerDispatcher {
            handles,
            reorder: ReorderBuffer::new(self.config.reorder.max_pending),
            input_rx: self.input_rx,
        })
    }

    #[instrument(
        name = "consumer_dispatcher_initialize_handles",
        skip(consumers),
        fields(consumer_count = consumers.len())
    )]
    async fn initialize_handles(
        consumers: &[ConsumerConfig],
    ) -> Result<Vec<SinkHandle>, DispatcherError> {
        let mut handles = Vec::with_capacity(consumers.len());
        for consumer in consumers {
            handles.push(create_sink_handle(consumer).await?);
        }
        Ok(handles)
    }
}

/// Create a SinkHandle from a consumer configuration
#[instrument(
    name = "consumer_dispatcher_create_sink_handle",
    skip(config),
    fields(sink = %config.name, sink_type = ?config.sink_type)
)]
async fn create_sink_handle(config: &ConsumerConfig) -> Result<SinkHandle, DispatcherError> {
    match config.sink_type {
        ConsumerType::Log => {
            let sink = LogSink::new(&config.name);
            Ok(SinkHandle::spawn(sink, config.queue_capacity))
        }
        ConsumerType::File => {
            let sink = FileSink::from_params(&config.name, &config.params)
                .map_err(|e| DispatcherError::sink_creation(&config.name, e.to_string()))?;
            Ok(SinkHandle::spawn(sink, config.queue_capacity))
        }
        ConsumerType::Network => {
            let sink = NetworkSink::from_params(&config.name, &config.params)
                .await
                .map_err(|e| DispatcherError::sink_creation(&config.name, e.to_string()))?;
            Ok(SinkHandle::spawn(sink, config.queue_capacity))
        }
    }
}

/// What the consumers received once the delivery stream closed
#[derive(Debug, Clone, Default)]
pub struct DeliverySummary {
    /// Deliveries released by the reorder buffer
    pub released: u64,
    pub consumers: Vec<(String, MetricsSnapshot)>,
}

/// Fans reordered deliveries out to every registered consumer
pub struct ConsumerDispatcher {
    handles: Vec<SinkHandle>,
    reorder: ReorderBuffer,
    input_rx: mpsc::UnboundedReceiver<Delivery>,
}

impl ConsumerDispatcher {
    /// Create a dispatcher with pre-built sink handles (for testing)
    pub fn with_handles(
        handles: Vec<SinkHandle>,
        max_pending: usize,
        input_rx: mpsc::UnboundedReceiver<Delivery>,
    ) -> Self {
        Self {
            handles,
            reorder: ReorderBuffer::new(max_pending),
            input_rx,
        }
    }

    pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.metrics().snapshot()))
            .collect()
    }

    /// Run until every delivery sender is dropped
    ///
    /// Pending deliveries are force-released in index order before the
    /// consumers are flushed and closed.
    #[instrument(name = "consumer_dispatcher_run", skip(self))]
    pub async fn run(mut self) -> DeliverySummary {
        info!(consumers = self.handles.len(), "Consumer dispatcher started");

        let mut received: u64 = 0;
        let mut released: u64 = 0;

        while let Some(delivery) = self.input_rx.recv().await {
            received += 1;
            for ready in self.reorder.admit(delivery) {
                released += 1;
                self.fan_out(ready);
            }

            if received.is_multiple_of(100) {
                debug!(received, released, "Consumer dispatcher progress");
            }
        }

        for ready in self.reorder.finish() {
            released += 1;
            self.fan_out(ready);
        }

        info!(released, "Delivery stream closed, shutting down consumers");

        let metrics: Vec<_> = self
            .handles
            .iter()
            .map(|h| (h.name().to_string(), Arc::clone(h.metrics())))
            .collect();
        Self::shutdown_handles(self.handles).await;
        let consumers = metrics
            .into_iter()
            .map(|(name, m)| (name, m.snapshot()))
            .collect();

        info!("Consumer dispatcher shutdown complete");
        DeliverySummary {
            released,
            consumers,
        }
    }

    /// Spawn the dispatcher as a background task
    pub fn spawn(self) -> JoinHandle<DeliverySummary> {
        tokio::spawn(self.run())
    }

    fn fan_out(&self, delivery: Delivery) {
        // 发送失败已在 SinkHandle 内记录
        if let Some((last, rest)) = self.handles.split_last() {
            for handle in rest {
                let _ = handle.try_send(delivery.clone());
            }
            let _ = last.try_send(delivery);
        }
    }

    async fn shutdown_handles(handles: Vec<SinkHandle>) {
        for handle in handles {
            handle.shutdown().await;
        }
    }
}

/// Build a consumer dispatcher from configuration
#[instrument(name = "consumer_dispatcher_create", skip(config, input_rx))]
pub async fn create_consumer_dispatcher(
    config: ConsumerDispatcherConfig,
    input_rx: mpsc::UnboundedReceiver<Delivery>,
) -> Result<ConsumerDispatcher, DispatcherError> {
    ConsumerDispatcherBuilder::new(config, input_rx).build().await
}
