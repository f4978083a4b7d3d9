//! Ingestion 错误类型

use std::path::PathBuf;

use thiserror::Error;

/// Ingestion 错误
#[derive(Debug, Error)]
pub enum IngestionError {
    /// 原始帧解码失败
    #[error("failed to decode acquisition {counter} of '{data_type}': {message}")]
    Decode {
        data_type: String,
        counter: u64,
        message: String,
    },

    /// 文件读取失败
    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 数据源配置无效
    #[error("invalid source for '{data_type}': {message}")]
    InvalidSource { data_type: String, message: String },

    /// 同一数据类型重复注册
    #[error("data type '{data_type}' already has a source")]
    DuplicateSource { data_type: String },

    /// 下游通道已关闭
    #[error("channel closed for data type '{data_type}'")]
    ChannelClosed { data_type: String },
}

impl IngestionError {
    pub fn decode(data_type: impl Into<String>, counter: u64, message: impl Into<String>) -> Self {
        Self::Decode {
            data_type: data_type.into(),
            counter,
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_source(data_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSource {
            data_type: data_type.into(),
            message: message.into(),
        }
    }
}

/// Ingestion Result 类型别名
pub type Result<T> = std::result::Result<T, IngestionError>;
