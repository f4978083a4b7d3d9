//! 探测器适配器
//!
//! 把 `AcquisitionSource` 的回调接到有界 async-channel 上，队列满时丢弃新采集。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_channel::{Sender, TrySendError};
use tracing::{debug, trace, warn};

use crate::config::IngestionMetrics;
use crate::source::{Acquisition, AcquisitionCallback, AcquisitionSource};

/// Adapter between one acquisition source and its raw queue
pub struct DetectorAdapter {
    source: Box<dyn AcquisitionSource>,
    listening: Arc<AtomicBool>,
}

impl DetectorAdapter {
    pub fn new(source: Box<dyn AcquisitionSource>) -> Self {
        Self {
            source,
            listening: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn data_type(&self) -> &str {
        self.source.data_type()
    }

    pub fn source(&self) -> &dyn AcquisitionSource {
        self.source.as_ref()
    }

    /// Start the source; acquisitions go to `tx` until it stops or finishes
    pub fn start(&self, tx: Sender<Acquisition>, metrics: Arc<IngestionMetrics>) {
        if self.listening.swap(true, Ordering::SeqCst) {
            return;
        }

        let data_type = self.data_type().to_string();
        let listening = Arc::clone(&self.listening);

        debug!(data_type = %data_type, "starting detector adapter");

        let callback: AcquisitionCallback = Arc::new(move |acquisition| {
            if !listening.load(Ordering::Relaxed) {
                return;
            }
            metrics.record_received();
            send_acquisition(&tx, acquisition, &metrics, &data_type);
        });

        self.source.listen(callback);
    }

    pub fn stop(&self) {
        if self.listening.swap(false, Ordering::SeqCst) {
            debug!(data_type = %self.data_type(), "stopping detector adapter");
            self.source.stop();
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Relaxed)
    }
}

/// Send without waiting; a full queue drops the acquisition
#[inline]
pub fn send_acquisition(
    tx: &Sender<Acquisition>,
    acquisition: Acquisition,
    metrics: &IngestionMetrics,
    data_type: &str,
) {
    let counter = acquisition.counter;
    match tx.try_send(acquisition) {
        Ok(()) => {
            metrics.update_queue_len(tx.len());
            trace!(data_type = %data_type, counter, "acquisition queued");
        }
        Err(TrySendError::Full(_)) => {
            metrics.record_dropped();
            metrics::counter!(
                "frame_verifier_acquisitions_dropped_total",
                "data_type" => data_type.to_string()
            )
            .increment(1);
            trace!(data_type = %data_type, counter, "queue full, acquisition dropped");
        }
        Err(TrySendError::Closed(_)) => {
            warn!(data_type = %data_type, counter, "acquisition channel closed");
        }
    }
}
