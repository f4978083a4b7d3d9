//! FileSink - JSON-lines delivery manifest plus optional 16-bit PNG frames

use contracts::{ConsumerSink, ContractError, Delivery, DeliveryEvent, FrameData};
use image::{ImageBuffer, Luma};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{debug, error, instrument};

const MANIFEST_FILE: &str = "deliveries.jsonl";

/// Configuration for FileSink
#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    /// Base output directory
    pub base_path: PathBuf,
    /// 是否把校验过的帧保存为 16 位 PNG
    pub save_frames: bool,
}

impl FileSinkConfig {
    /// Create config from params map (`base_path`, `save_frames`)
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let base_path = params
            .get("base_path")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./output"));
        let save_frames = params
            .get("save_frames")
            .is_some_and(|v| matches!(v.as_str(), "true" | "1" | "yes"));

        Self {
            base_path,
            save_frames,
        }
    }
}

/// Sink that persists deliveries to disk
pub struct FileSink {
    name: String,
    config: FileSinkConfig,
    manifest: Option<BufWriter<File>>,
    created_dirs: HashSet<PathBuf>,
}

impl FileSink {
    pub fn new(name: impl Into<String>, config: FileSinkConfig) -> std::io::Result<Self> {
        fs::create_dir_all(&config.base_path)?;
        let manifest = File::create(config.base_path.join(MANIFEST_FILE))?;

        Ok(Self {
            name: name.into(),
            config,
            manifest: Some(BufWriter::new(manifest)),
            created_dirs: HashSet::new(),
        })
    }

    /// Create from params map (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> std::io::Result<Self> {
        Self::new(name, FileSinkConfig::from_params(params))
    }

    fn write_delivery_to_disk(&mut self, delivery: &Delivery) -> std::io::Result<()> {
        let manifest = self
            .manifest
            .as_mut()
            .ok_or_else(|| std::io::Error::other("manifest closed"))?;
        serde_json::to_writer(&mut *manifest, &delivery.record())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        manifest.write_all(b"\n")?;

        if let DeliveryEvent::Verified { frame, .. } = &delivery.event {
            if self.config.save_frames {
                self.save_frame(&delivery.data_type, delivery.index, frame)?;
            }
        }
        Ok(())
    }

    fn save_frame(&mut self, data_type: &str, index: u64, frame: &FrameData) -> std::io::Result<()> {
        let dir = self.config.base_path.join(data_type);
        if !self.created_dirs.contains(&dir) {
            fs::create_dir_all(&dir)?;
            self.created_dirs.insert(dir.clone());
        }

        let slice = &frame.slice;
        let width = u32::try_from(slice.width()).map_err(std::io::Error::other)?;
        let height = u32::try_from(slice.height()).map_err(std::io::Error::other)?;
        let counts: Vec<u16> = slice
            .pixels()
            .iter()
            .map(|&v| v.round().clamp(0.0, f64::from(u16::MAX)) as u16)
            .collect();

        let image: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::from_raw(width, height, counts)
            .ok_or_else(|| std::io::Error::other("frame buffer does not match its shape"))?;
        image
            .save(dir.join(format!("{index}.png")))
            .map_err(std::io::Error::other)
    }

    fn persist_delivery(&mut self, delivery: &Delivery) -> Result<(), ContractError> {
        self.write_delivery_to_disk(delivery).map_err(|e| {
            error!(sink = %self.name, index = delivery.index, error = %e, "Write failed");
            ContractError::sink_write(&self.name, e.to_string())
        })
    }
}

impl ConsumerSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "file_sink_write",
        skip(self, delivery),
        fields(sink = %self.name, index = delivery.index)
    )]
    async fn write(&mut self, delivery: &Delivery) -> Result<(), ContractError> {
        self.persist_delivery(delivery)
    }

    #[instrument(name = "file_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        if let Some(manifest) = self.manifest.as_mut() {
            manifest.flush()?;
        }
        Ok(())
    }

    #[instrument(name = "file_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        if let Some(mut manifest) = self.manifest.take() {
            manifest.flush()?;
        }
        debug!(sink = %self.name, "FileSink closed");
        Ok(())
    }
}
