//! Mock 探测器
//!
//! 用于无真实探测器环境的试运行和测试。按配置生成带噪声的 16 位帧，
//! 可以周期性跳过帧计数器来模拟丢帧。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use contracts::SyntheticSourceConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use crate::source::{Acquisition, AcquisitionCallback, AcquisitionSource};

/// Mock 探测器
pub struct MockDetector {
    data_type: String,
    config: SyntheticSourceConfig,
    running: Arc<AtomicBool>,
}

impl MockDetector {
    pub fn new(data_type: impl Into<String>, config: SyntheticSourceConfig) -> Self {
        Self {
            data_type: data_type.into(),
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Constant-mean detector without noise, dropped counters or pacing
    pub fn constant(data_type: &str, frames: u64, width: usize, height: usize, mean: f64) -> Self {
        Self::new(
            data_type,
            SyntheticSourceConfig {
                frames,
                width,
                height,
                mean,
                noise: 0.0,
                saturated_pixels: 0,
                acquire_time: None,
                drop_every: None,
                interval_ms: 0,
                seed: Some(0),
            },
        )
    }

    /// Whether the detector skips `counter` (simulated lost acquisition)
    fn is_dropped(config: &SyntheticSourceConfig, counter: u64) -> bool {
        matches!(config.drop_every, Some(n) if n > 0 && counter % n == 0)
    }

    /// Generate the pixel counts of one acquisition
    fn generate(config: &SyntheticSourceConfig, rng: &mut StdRng) -> Vec<u16> {
        let len = config.width * config.height;
        let max = f64::from(u16::MAX);
        let mut counts: Vec<u16> = (0..len)
            .map(|_| {
                let noise = if config.noise > 0.0 {
                    rng.random_range(-config.noise..=config.noise)
                } else {
                    0.0
                };
                (config.mean + noise).round().clamp(0.0, max) as u16
            })
            .collect();
        for pixel in counts.iter_mut().take(config.saturated_pixels) {
            *pixel = u16::MAX;
        }
        counts
    }
}

impl AcquisitionSource for MockDetector {
    fn data_type(&self) -> &str {
        &self.data_type
    }

    fn listen(&self, callback: AcquisitionCallback) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let data_type = self.data_type.clone();
        let config = self.config.clone();
        let running = Arc::clone(&self.running);

        std::thread::spawn(move || {
            let mut rng = match config.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            };
            let interval = Duration::from_millis(config.interval_ms);

            debug!(
                data_type = %data_type,
                frames = config.frames,
                "mock detector started"
            );

            for counter in 1..=config.frames {
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                if Self::is_dropped(&config, counter) {
                    trace!(data_type = %data_type, counter, "mock counter skipped");
                    continue;
                }

                let counts = Self::generate(&config, &mut rng);
                callback(Acquisition::from_counts(
                    counter,
                    config.width,
                    config.height,
                    &counts,
                ));

                if !interval.is_zero() {
                    std::thread::sleep(interval);
                }
            }

            running.store(false, Ordering::SeqCst);
            debug!(data_type = %data_type, "mock detector finished");
        });
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_listening(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn expected_frames(&self) -> Option<u64> {
        Some(self.config.frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn collect(detector: &MockDetector) -> Vec<Acquisition> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        let callback: AcquisitionCallback = Arc::new(move |acq: Acquisition| {
            sink.lock().unwrap().push(acq);
            let _ = done_tx.send(());
        });
        detector.listen(callback);
        // 回调被释放后 done_rx 断开
        while done_rx.recv().is_ok() {}
        let out = seen.lock().unwrap().clone();
        out
    }

    #[test]
    fn constant_frames_have_the_mean() {
        let detector = MockDetector::constant("data", 3, 4, 2, 120.0);
        let acquisitions = collect(&detector);

        assert_eq!(acquisitions.len(), 3);
        let slice = acquisitions[0].decode("data").unwrap();
        assert!(slice.pixels().iter().all(|&p| p == 120.0));
        assert_eq!(
            acquisitions.iter().map(|a| a.counter).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn dropped_counters_leave_gaps() {
        let mut config = MockDetector::constant("data", 7, 2, 2, 10.0).config;
        config.drop_every = Some(3);
        let detector = MockDetector::new("data", config);

        let counters: Vec<u64> = collect(&detector).iter().map(|a| a.counter).collect();
        assert_eq!(counters, vec![1, 2, 4, 5, 7]);
    }

    #[test]
    fn noise_and_saturation_are_applied() {
        let mut config = MockDetector::constant("data", 1, 10, 10, 1000.0).config;
        config.noise = 50.0;
        config.saturated_pixels = 5;
        config.seed = Some(42);
        let detector = MockDetector::new("data", config);

        let slice = collect(&detector)[0].decode("data").unwrap();
        let pixels = slice.pixels();
        assert_eq!(pixels.iter().filter(|&&p| p == 65535.0).count(), 5);
        assert!(pixels[5..].iter().all(|&p| (950.0..=1050.0).contains(&p)));
    }
}
