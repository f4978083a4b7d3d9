//! 原始帧堆栈读取器
//!
//! GE 探测器布局：固定长度文件头之后是连续的 16 位 little-endian 帧。
//! 多个文件按顺序拼接成一个数据类型的索引空间，记录每个文件的起始索引。

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use contracts::{FileOffset, RawSourceConfig};
use tracing::{debug, error, warn};

use crate::error::{IngestionError, Result};
use crate::source::{Acquisition, AcquisitionCallback, AcquisitionSource};

/// One stack file and the number of whole frames it holds
#[derive(Debug, Clone, PartialEq, Eq)]
struct StackFile {
    path: PathBuf,
    frames: u64,
}

/// Reads frame stacks from one or more files
pub struct RawStackReader {
    data_type: String,
    config: RawSourceConfig,
    files: Vec<StackFile>,
    running: Arc<AtomicBool>,
}

impl RawStackReader {
    /// Inspect the configured files and count their frames
    pub fn open(data_type: impl Into<String>, config: RawSourceConfig) -> Result<Self> {
        let data_type = data_type.into();
        let frame_bytes = Self::frame_bytes(&data_type, &config)?;

        let mut files = Vec::with_capacity(config.files.len());
        for path in &config.files {
            let len = std::fs::metadata(path)
                .map_err(|e| IngestionError::io(path, e))?
                .len();
            let payload = len.saturating_sub(config.header_bytes as u64);
            let frames = payload / frame_bytes;
            if payload % frame_bytes != 0 {
                warn!(
                    data_type = %data_type,
                    file = %path.display(),
                    trailing = payload % frame_bytes,
                    "stack file ends with a partial frame"
                );
            }
            files.push(StackFile {
                path: path.clone(),
                frames,
            });
        }

        Ok(Self {
            data_type,
            config,
            files,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    fn frame_bytes(data_type: &str, config: &RawSourceConfig) -> Result<u64> {
        config
            .width
            .checked_mul(config.height)
            .and_then(|n| n.checked_mul(2))
            .filter(|&n| n > 0)
            .map(|n| n as u64)
            .ok_or_else(|| IngestionError::invalid_source(data_type, "frame shape must be non-zero"))
    }

    /// Total number of frames over all files
    pub fn total_frames(&self) -> u64 {
        self.files.iter().map(|f| f.frames).sum()
    }

    fn read_file(
        path: &Path,
        config: &RawSourceConfig,
        first_counter: u64,
        frames: u64,
        running: &AtomicBool,
        callback: &AcquisitionCallback,
    ) -> Result<u64> {
        let file = File::open(path).map_err(|e| IngestionError::io(path, e))?;
        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(config.header_bytes as u64))
            .map_err(|e| IngestionError::io(path, e))?;

        let frame_len = config.width * config.height * 2;
        let mut sent = 0;
        for i in 0..frames {
            if !running.load(Ordering::Relaxed) {
                break;
            }
            let mut buf = vec![0u8; frame_len];
            reader
                .read_exact(&mut buf)
                .map_err(|e| IngestionError::io(path, e))?;
            callback(Acquisition {
                counter: first_counter + i,
                width: config.width,
                height: config.height,
                data: Bytes::from(buf),
            });
            sent += 1;
        }
        Ok(sent)
    }
}

impl AcquisitionSource for RawStackReader {
    fn data_type(&self) -> &str {
        &self.data_type
    }

    fn listen(&self, callback: AcquisitionCallback) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let data_type = self.data_type.clone();
        let config = self.config.clone();
        let files = self.files.clone();
        let running = Arc::clone(&self.running);

        std::thread::spawn(move || {
            let mut counter = 1;
            for file in &files {
                match Self::read_file(&file.path, &config, counter, file.frames, &running, &callback) {
                    Ok(sent) => {
                        debug!(
                            data_type = %data_type,
                            file = %file.path.display(),
                            frames = sent,
                            "stack file read"
                        );
                    }
                    Err(e) => {
                        // 计数器照常前进，未读出的帧由下游补 Missing
                        error!(data_type = %data_type, error = %e, "stack file read failed");
                    }
                }
                counter += file.frames;
                if !running.load(Ordering::Relaxed) {
                    break;
                }
            }
            running.store(false, Ordering::SeqCst);
        });
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_listening(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn expected_frames(&self) -> Option<u64> {
        Some(self.total_frames())
    }

    fn file_offsets(&self) -> Vec<FileOffset> {
        let mut start = 0;
        self.files
            .iter()
            .map(|f| {
                let offset = FileOffset {
                    file: f.path.display().to_string(),
                    start,
                };
                start += f.frames;
                offset
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    const HEADER: usize = 16;

    fn stack_file(frames: &[[u16; 4]]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0xAB; HEADER]).unwrap();
        for frame in frames {
            for count in frame {
                file.write_all(&count.to_le_bytes()).unwrap();
            }
        }
        file.flush().unwrap();
        file
    }

    fn config(files: Vec<PathBuf>) -> RawSourceConfig {
        RawSourceConfig {
            files,
            width: 2,
            height: 2,
            header_bytes: HEADER,
            acquire_time: None,
        }
    }

    #[test]
    fn offsets_follow_file_order() {
        let a = stack_file(&[[1; 4], [2; 4]]);
        let b = stack_file(&[[3; 4]]);
        let reader = RawStackReader::open(
            "data",
            config(vec![a.path().to_path_buf(), b.path().to_path_buf()]),
        )
        .unwrap();

        assert_eq!(reader.total_frames(), 3);
        let offsets = reader.file_offsets();
        assert_eq!(offsets[0].start, 0);
        assert_eq!(offsets[1].start, 2);
    }

    #[test]
    fn frames_are_read_after_the_header() {
        let a = stack_file(&[[1, 2, 3, 4], [5, 6, 7, 8]]);
        let reader = RawStackReader::open("data", config(vec![a.path().to_path_buf()])).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        reader.listen(Arc::new(move |acq: Acquisition| {
            sink.lock().unwrap().push(acq);
            let _ = done_tx.send(());
        }));
        while done_rx.recv().is_ok() {}

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].counter, 2);
        assert_eq!(
            seen[1].decode("data").unwrap().pixels(),
            &[5.0, 6.0, 7.0, 8.0]
        );
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = RawStackReader::open("data", config(vec!["/nonexistent/stack.ge".into()]))
            .err()
            .unwrap();
        assert!(matches!(err, IngestionError::Io { .. }));
    }
}
