//! SinkHandle - one consumer behind its own bounded queue and worker task.
//!
//! 慢 consumer 只会填满自己的队列；满了之后该 consumer 丢弃新投递，
//! 其余 consumer 与校验链路不受影响。每个数据类型的 `End` 到达时刷新一次 sink。

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use contracts::{ConsumerSink, ContractError, Delivery};

use crate::error::DispatcherError;
use crate::metrics::SinkMetrics;

/// Handle to a running consumer worker
pub struct SinkHandle {
    name: String,
    tx: mpsc::Sender<Delivery>,
    metrics: Arc<SinkMetrics>,
    worker: JoinHandle<()>,
}

impl SinkHandle {
    /// Spawn the worker task for `sink` with a queue of `queue_capacity`
    pub fn spawn<S: ConsumerSink + Send + 'static>(sink: S, queue_capacity: usize) -> Self {
        let name = sink.name().to_string();
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let metrics = Arc::new(SinkMetrics::new());

        let worker = SinkWorker {
            sink,
            rx,
            metrics: Arc::clone(&metrics),
            ended: Vec::new(),
        };
        let worker = tokio::spawn(worker.run());

        Self {
            name,
            tx,
            metrics,
            worker,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    /// Queue a delivery without waiting
    pub fn try_send(&self, delivery: Delivery) -> Result<(), DispatcherError> {
        match self.tx.try_send(delivery) {
            Ok(()) => {
                self.metrics
                    .set_queue_len(self.tx.max_capacity() - self.tx.capacity());
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(rejected)) => {
                self.metrics.inc_dropped_count();
                warn!(
                    sink = %self.name,
                    data_type = %rejected.data_type,
                    index = rejected.index,
                    "Consumer queue full, delivery dropped"
                );
                Err(DispatcherError::QueueFull {
                    sink_name: self.name.clone(),
                    data_type: rejected.data_type,
                    index: rejected.index,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!(sink = %self.name, "Consumer worker stopped");
                Err(ContractError::sink_write(&self.name, "worker stopped").into())
            }
        }
    }

    /// Close the queue and wait until the worker drained, flushed and closed the sink
    #[instrument(name = "sink_handle_shutdown", skip(self), fields(sink = %self.name))]
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            error!(error = ?e, "Consumer worker panicked");
        }
    }
}

struct SinkWorker<S> {
    sink: S,
    rx: mpsc::Receiver<Delivery>,
    metrics: Arc<SinkMetrics>,
    /// 已收到 `End` 的数据类型
    ended: Vec<String>,
}

impl<S: ConsumerSink> SinkWorker<S> {
    async fn run(mut self) {
        let name = self.sink.name().to_string();
        debug!(sink = %name, "Consumer worker started");

        while let Some(delivery) = self.rx.recv().await {
            self.metrics.set_queue_len(self.rx.len());
            self.write(&name, &delivery).await;
            if delivery.is_end() {
                self.on_end(&name, delivery.data_type).await;
            }
        }

        if let Err(e) = self.sink.flush().await {
            error!(sink = %name, error = %e, "Flush failed on shutdown");
        }
        if let Err(e) = self.sink.close().await {
            error!(sink = %name, error = %e, "Close failed on shutdown");
        }
        debug!(sink = %name, ended = ?self.ended, "Consumer worker stopped");
    }

    async fn write(&mut self, name: &str, delivery: &Delivery) {
        match self.sink.write(delivery).await {
            Ok(()) => self.metrics.record_write(delivery.index),
            Err(e) => {
                self.metrics.inc_failure_count();
                error!(
                    sink = %name,
                    data_type = %delivery.data_type,
                    index = delivery.index,
                    error = %e,
                    "Consumer write failed"
                );
            }
        }
    }

    async fn on_end(&mut self, name: &str, data_type: String) {
        if let Err(e) = self.sink.flush().await {
            error!(sink = %name, data_type = %data_type, error = %e, "Flush after End failed");
        }
        debug!(sink = %name, data_type = %data_type, "Data type complete");
        self.ended.push(data_type);
    }
}
