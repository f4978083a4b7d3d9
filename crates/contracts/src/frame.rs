//! Frame - the unit of work flowing from a frame source into the verifier.

use std::sync::Arc;

use crate::ContractError;

/// 2-D detector slice stored row-major
#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    width: usize,
    height: usize,
    pixels: Vec<f64>,
}

impl Slice {
    /// Create a slice, checking that the buffer matches the shape
    pub fn new(width: usize, height: usize, pixels: Vec<f64>) -> Result<Self, ContractError> {
        let expected = width
            .checked_mul(height)
            .ok_or_else(|| ContractError::Other(format!("slice shape {width}x{height} overflows")))?;
        if pixels.len() != expected {
            return Err(ContractError::Other(format!(
                "slice buffer has {} elements, shape {}x{} needs {}",
                pixels.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Build a slice from raw 16-bit detector counts
    pub fn from_counts(width: usize, height: usize, counts: &[u16]) -> Result<Self, ContractError> {
        Self::new(width, height, counts.iter().map(|&c| f64::from(c)).collect())
    }

    /// Constant-valued slice (used for synthetic frames)
    pub fn filled(width: usize, height: usize, value: f64) -> Self {
        Self {
            width,
            height,
            pixels: vec![value; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[f64] {
        &self.pixels
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

/// Payload of a `Data` frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameData {
    /// 图像数据
    pub slice: Slice,
    /// 采集时间（秒），计数率饱和检查需要
    pub acquire_time: Option<f64>,
}

impl FrameData {
    pub fn new(slice: Slice) -> Self {
        Self {
            slice,
            acquire_time: None,
        }
    }

    pub fn with_acquire_time(mut self, seconds: f64) -> Self {
        self.acquire_time = Some(seconds);
        self
    }
}

/// Frame status, replacing in-band string sentinels
#[derive(Debug, Clone, PartialEq)]
pub enum FrameStatus {
    /// 正常帧，载荷在检查任务之间只读共享
    Data(Arc<FrameData>),
    /// 采集丢帧占位
    Missing,
    /// 数据流结束
    End,
}

/// One frame of one data type
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// 数据类型（分区键）
    pub data_type: String,
    /// 帧序号，按数据类型严格递增
    pub index: u64,
    /// 状态
    pub status: FrameStatus,
}

impl Frame {
    pub fn data(data_type: impl Into<String>, index: u64, data: FrameData) -> Self {
        Self {
            data_type: data_type.into(),
            index,
            status: FrameStatus::Data(Arc::new(data)),
        }
    }

    pub fn missing(data_type: impl Into<String>, index: u64) -> Self {
        Self {
            data_type: data_type.into(),
            index,
            status: FrameStatus::Missing,
        }
    }

    /// Terminal marker; `index` is the position after the last frame
    pub fn end(data_type: impl Into<String>, index: u64) -> Self {
        Self {
            data_type: data_type.into(),
            index,
            status: FrameStatus::End,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self.status, FrameStatus::End)
    }
}
