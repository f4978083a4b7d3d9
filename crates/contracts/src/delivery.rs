//! Delivery - verified frames and markers handed to downstream consumers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::FrameData;

/// Event admitted to the reorder buffer
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryEvent {
    /// 已完成校验的帧及其判定
    Verified { frame: Arc<FrameData>, failed: bool },
    /// 丢帧占位
    Missing,
    /// 结束标记
    End,
}

/// One delivery, keyed by data type and index
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub data_type: String,
    pub index: u64,
    pub event: DeliveryEvent,
}

impl Delivery {
    pub fn verified(
        data_type: impl Into<String>,
        index: u64,
        frame: Arc<FrameData>,
        failed: bool,
    ) -> Self {
        Self {
            data_type: data_type.into(),
            index,
            event: DeliveryEvent::Verified { frame, failed },
        }
    }

    pub fn missing(data_type: impl Into<String>, index: u64) -> Self {
        Self {
            data_type: data_type.into(),
            index,
            event: DeliveryEvent::Missing,
        }
    }

    pub fn end(data_type: impl Into<String>, index: u64) -> Self {
        Self {
            data_type: data_type.into(),
            index,
            event: DeliveryEvent::End,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self.event, DeliveryEvent::End)
    }

    pub fn is_missing(&self) -> bool {
        matches!(self.event, DeliveryEvent::Missing)
    }

    /// Payload-free summary for serialization
    pub fn record(&self) -> DeliveryRecord {
        let (status, failed, shape) = match &self.event {
            DeliveryEvent::Verified { frame, failed } => (
                DeliveryStatus::Verified,
                Some(*failed),
                Some((frame.slice.width(), frame.slice.height())),
            ),
            DeliveryEvent::Missing => (DeliveryStatus::Missing, None, None),
            DeliveryEvent::End => (DeliveryStatus::End, None, None),
        };
        DeliveryRecord {
            data_type: self.data_type.clone(),
            index: self.index,
            status,
            failed,
            shape,
        }
    }
}

/// Delivery status tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Verified,
    Missing,
    End,
}

/// Serializable summary of a delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub data_type: String,
    pub index: u64,
    pub status: DeliveryStatus,
    pub failed: Option<bool>,
    pub shape: Option<(usize, usize)>,
}
