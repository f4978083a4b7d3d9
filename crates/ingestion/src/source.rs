//! 探测器采集源 trait
//!
//! 采集源以回调方式推送原始 16 位帧，每次采集携带探测器的帧计数器。

use std::sync::Arc;

use bytes::Bytes;
use contracts::{FileOffset, Slice};

use crate::error::{IngestionError, Result};

/// One raw detector acquisition
#[derive(Debug, Clone, PartialEq)]
pub struct Acquisition {
    /// 探测器帧计数器（单调递增，跳号表示丢帧）
    pub counter: u64,
    pub width: usize,
    pub height: usize,
    /// Little-endian 16-bit pixel counts, row-major
    pub data: Bytes,
}

impl Acquisition {
    /// Pack 16-bit counts into an acquisition
    pub fn from_counts(counter: u64, width: usize, height: usize, counts: &[u16]) -> Self {
        let le: Vec<u16> = counts.iter().map(|c| c.to_le()).collect();
        Self {
            counter,
            width,
            height,
            data: Bytes::copy_from_slice(bytemuck::cast_slice(&le)),
        }
    }

    /// Decode the raw buffer into a slice
    pub fn decode(&self, data_type: &str) -> Result<Slice> {
        let expected = self
            .width
            .checked_mul(self.height)
            .and_then(|n| n.checked_mul(2))
            .ok_or_else(|| IngestionError::decode(data_type, self.counter, "shape overflows"))?;
        if self.data.len() != expected {
            return Err(IngestionError::decode(
                data_type,
                self.counter,
                format!(
                    "buffer has {} bytes, {}x{} frame needs {}",
                    self.data.len(),
                    self.width,
                    self.height,
                    expected
                ),
            ));
        }

        // Bytes 不保证 u16 对齐，未对齐时逐对字节解码
        let counts: Vec<u16> = match bytemuck::try_cast_slice::<u8, u16>(&self.data) {
            Ok(aligned) => aligned.iter().map(|&c| u16::from_le(c)).collect(),
            Err(_) => self
                .data
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect(),
        };
        Slice::from_counts(self.width, self.height, &counts)
            .map_err(|e| IngestionError::decode(data_type, self.counter, e.to_string()))
    }
}

/// Callback invoked for each acquisition
///
/// The source drops the callback once it finished or was stopped, which
/// closes the downstream channel.
pub type AcquisitionCallback = Arc<dyn Fn(Acquisition) + Send + Sync>;

/// Unified interface over synthetic and file-backed detectors
pub trait AcquisitionSource: Send + Sync {
    /// Data type the acquisitions belong to
    fn data_type(&self) -> &str;

    /// Start pushing acquisitions into `callback`
    fn listen(&self, callback: AcquisitionCallback);

    fn stop(&self);

    fn is_listening(&self) -> bool;

    /// Number of acquisitions the source intends to deliver, if known
    fn expected_frames(&self) -> Option<u64> {
        None
    }

    /// Start index of each backing file
    fn file_offsets(&self) -> Vec<FileOffset> {
        Vec::new()
    }
}
