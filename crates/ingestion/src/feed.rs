//! FrameFeed - turns detector acquisitions into an indexed frame stream.
//!
//! - 第一个计数器作为基准，此后计数器跳号 `delta > 1` 时插入 `delta - 1` 个 `Missing`
//! - 收到 `no_frames` 次采集（按计数器计算）或源关闭后发送 `End`
//! - 配置了采集时间时附加到每一帧，供计数率饱和检查使用
//! - 单次跳号超过 `MAX_COUNTER_GAP` 视为计数器异常：不补 `Missing`，只记录

use std::sync::Arc;

use async_channel::Receiver;
use contracts::{Frame, FrameData};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::config::IngestionMetrics;
use crate::error::{IngestionError, Result};
use crate::source::Acquisition;

/// Widest counter jump still filled with `Missing` markers
pub const MAX_COUNTER_GAP: u64 = 65_536;

/// Settings of one data type's feed
#[derive(Debug, Clone, Default)]
pub struct FeedSettings {
    /// 预期采集数；为 None 时只在源关闭时结束
    pub no_frames: Option<u64>,
    /// 采集时间 (秒)
    pub acquire_time: Option<f64>,
}

/// Statistics returned when a feed ends
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub frames: u64,
    pub missing: u64,
    pub decode_errors: u64,
    /// Acquisitions ignored because their counter did not advance
    pub stale: u64,
    /// Counter jumps too wide to fill
    pub counter_glitches: u64,
    /// Index carried by the `End` marker
    pub end_index: u64,
}

/// Counter-to-index state machine, independent of channels
#[derive(Debug)]
pub struct FeedState {
    data_type: String,
    settings: FeedSettings,
    /// (first counter, last counter)
    counters: Option<(u64, u64)>,
    next_index: u64,
    finished: bool,
    stats: FeedStats,
}

impl FeedState {
    pub fn new(data_type: impl Into<String>, settings: FeedSettings) -> Self {
        Self {
            data_type: data_type.into(),
            settings,
            counters: None,
            next_index: 0,
            finished: false,
            stats: FeedStats::default(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn stats(&self) -> &FeedStats {
        &self.stats
    }

    /// Feed one acquisition; returns the frames it produces in order
    pub fn accept(&mut self, acquisition: Acquisition) -> Vec<Frame> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }

        let counter = acquisition.counter;
        let (first, last) = match self.counters {
            None => (counter, None),
            Some((first, last)) => (first, Some(last)),
        };

        if let Some(no_frames) = self.settings.no_frames {
            if counter >= first.saturating_add(no_frames) {
                // 超过预期采集数：补齐尾部缺失后结束
                self.pad_missing_to(first.saturating_add(no_frames), last, &mut out);
                self.end(&mut out);
                return out;
            }
        }

        if let Some(last) = last {
            if counter <= last {
                self.stats.stale += 1;
                warn!(
                    data_type = %self.data_type,
                    counter,
                    last,
                    "acquisition counter did not advance, ignored"
                );
                return out;
            }
            self.insert_missing(counter - last - 1, &mut out);
        }
        self.counters = Some((first, counter));

        match acquisition.decode(&self.data_type) {
            Ok(slice) => {
                let mut data = FrameData::new(slice);
                if let Some(seconds) = self.settings.acquire_time {
                    data = data.with_acquire_time(seconds);
                }
                out.push(Frame::data(&self.data_type, self.next_index, data));
                self.stats.frames += 1;
            }
            Err(e) => {
                // 无法解码的采集以 Missing 占位，保持索引连续
                warn!(data_type = %self.data_type, error = %e, "acquisition decode failed");
                self.stats.decode_errors += 1;
                out.push(Frame::missing(&self.data_type, self.next_index));
                self.stats.missing += 1;
            }
        }
        self.next_index += 1;
        out
    }

    /// Source closed: pad to the expected count and emit End
    pub fn close(&mut self) -> Vec<Frame> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        if let (Some(no_frames), Some((first, last))) = (self.settings.no_frames, self.counters) {
            self.pad_missing_to(first.saturating_add(no_frames), Some(last), &mut out);
        }
        self.end(&mut out);
        out
    }

    fn pad_missing_to(&mut self, limit: u64, last: Option<u64>, out: &mut Vec<Frame>) {
        if let Some(last) = last {
            let remaining = limit.saturating_sub(last.saturating_add(1));
            self.insert_missing(remaining, out);
        }
    }

    fn insert_missing(&mut self, count: u64, out: &mut Vec<Frame>) {
        if count == 0 {
            return;
        }
        if count > MAX_COUNTER_GAP {
            warn!(
                data_type = %self.data_type,
                from = self.next_index,
                count,
                "counter jump too wide, no missing markers inserted"
            );
            self.stats.counter_glitches += 1;
            return;
        }
        debug!(
            data_type = %self.data_type,
            from = self.next_index,
            count,
            "counter gap, inserting missing markers"
        );
        for _ in 0..count {
            out.push(Frame::missing(&self.data_type, self.next_index));
            self.next_index += 1;
        }
        self.stats.missing += count;
    }

    fn end(&mut self, out: &mut Vec<Frame>) {
        self.finished = true;
        self.stats.end_index = self.next_index;
        out.push(Frame::end(&self.data_type, self.next_index));
    }
}

/// Async task driving a [`FeedState`] from the raw queue into the verifier channel
pub struct FrameFeed {
    state: FeedState,
    metrics: Arc<IngestionMetrics>,
}

impl FrameFeed {
    pub fn new(data_type: impl Into<String>, settings: FeedSettings, metrics: Arc<IngestionMetrics>) -> Self {
        Self {
            state: FeedState::new(data_type, settings),
            metrics,
        }
    }

    /// Run until the expected count is reached or the source closes
    #[instrument(name = "frame_feed_run", skip_all, fields(data_type = %self.state.data_type))]
    pub async fn run(
        mut self,
        acquisitions: Receiver<Acquisition>,
        frames: mpsc::Sender<Frame>,
    ) -> Result<FeedStats> {
        while !self.state.is_finished() {
            let batch = match acquisitions.recv().await {
                Ok(acquisition) => {
                    self.metrics.update_queue_len(acquisitions.len());
                    self.state.accept(acquisition)
                }
                Err(_) => {
                    debug!(data_type = %self.state.data_type, "acquisition source closed");
                    self.state.close()
                }
            };
            self.forward(batch, &frames).await?;
        }

        // 结束后关闭原始队列，让仍在运行的源停止推送
        acquisitions.close();

        let stats = self.state.stats().clone();
        info!(
            data_type = %self.state.data_type,
            frames = stats.frames,
            missing = stats.missing,
            end_index = stats.end_index,
            "frame feed finished"
        );
        Ok(stats)
    }

    async fn forward(&self, batch: Vec<Frame>, frames: &mpsc::Sender<Frame>) -> Result<()> {
        for frame in batch {
            match &frame.status {
                contracts::FrameStatus::Missing => {
                    self.metrics.record_missing(1);
                    metrics::counter!(
                        "frame_verifier_feed_missing_total",
                        "data_type" => self.state.data_type.clone()
                    )
                    .increment(1);
                }
                contracts::FrameStatus::Data(_) => self.metrics.record_emitted(),
                contracts::FrameStatus::End => {}
            }
            frames
                .send(frame)
                .await
                .map_err(|_| IngestionError::ChannelClosed {
                    data_type: self.state.data_type.clone(),
                })?;
        }
        Ok(())
    }
}
