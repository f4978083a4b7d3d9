//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 端到端测试：source → engine → consumers / feedback → report
//! - 重排序与多数据类型交错

#[cfg(test)]
mod contract_tests {
    use contracts::CheckId;

    #[test]
    fn test_check_codes_are_stable() {
        let codes: Vec<u16> = CheckId::ALL.iter().map(|c| c.code()).collect();
        assert_eq!(codes, vec![1, 2, 3, 4, 5, 6, 100, 101]);
        for check in CheckId::ALL {
            assert_eq!(CheckId::from_code(check.code()), Some(check));
            assert_eq!(check.is_statistical(), check.source().is_some());
        }
    }

    #[test]
    fn test_pv_names_follow_check_names() {
        assert_eq!(contracts::pv_name("data_white", CheckId::Mean), "data_white_mean");
        assert_eq!(contracts::pv_name("data", CheckId::StatMean), "data_stat_mean");
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::BTreeMap;
    use std::fs;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use config_loader::ConfigLoader;
    use contracts::{
        CheckId, CheckSelection, ConsumerSink, ContractError, DataTypeChecks, Delivery,
        DeliveryEvent, FeedbackEvent, Frame, FrameData, LimitPair, Limits, PvWriter,
        QualityError, Slice, SourceConfig, SourceKind, SyntheticSourceConfig, VerificationReport,
    };
    use dispatcher::{
        ConsumerDispatcher, ConsumerDispatcherConfig, FeedbackDispatcher, FeedbackSummary,
        FeedbackTarget, LogFeedback, PvFeedback, PvFeedbackDriver, ReorderBuffer, SinkHandle,
        create_consumer_dispatcher,
    };
    use ingestion::{BackpressureConfig, IngestionPipeline};
    use tokio::sync::mpsc;
    use verifier::{CheckRegistry, DispatcherConfig, EngineConfig, VerificationEngine};

    const TIMEOUT: Duration = Duration::from_secs(10);

    /// Consumer recording every delivery it receives
    struct RecordingSink {
        name: String,
        seen: Arc<Mutex<Vec<Delivery>>>,
    }

    impl RecordingSink {
        fn new(name: &str) -> (Self, Arc<Mutex<Vec<Delivery>>>) {
            let seen = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    name: name.to_string(),
                    seen: Arc::clone(&seen),
                },
                seen,
            )
        }
    }

    impl ConsumerSink for RecordingSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn write(&mut self, delivery: &Delivery) -> Result<(), ContractError> {
            self.seen.lock().unwrap().push(delivery.clone());
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), ContractError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            Ok(())
        }
    }

    fn engine_config() -> EngineConfig {
        EngineConfig {
            dispatcher: DispatcherConfig {
                poll_interval: Duration::from_millis(1),
                max_concurrent_checks: 4,
                max_pending_frames: 16,
            },
            ..Default::default()
        }
    }

    fn synthetic(data_type: &str, frames: u64, mean: f64, drop_every: Option<u64>) -> SourceConfig {
        SourceConfig {
            data_type: data_type.to_string(),
            kind: SourceKind::Synthetic(SyntheticSourceConfig {
                frames,
                width: 4,
                height: 4,
                mean,
                noise: 0.0,
                saturated_pixels: 0,
                acquire_time: Some(0.1),
                drop_every,
                interval_ms: 0,
                seed: Some(7),
            }),
        }
    }

    /// Mean limits {0, 10}; Mean feeds StatMean with a wide drift window
    fn mean_registry(data_types: &[&str]) -> Arc<CheckRegistry> {
        let mut limits = Limits::default();
        let mut selection = CheckSelection::new();
        for data_type in data_types {
            limits = limits
                .with(data_type, "mean", LimitPair::between(0.0, 10.0))
                .with(data_type, "stat_mean", LimitPair::between(-3.0, 3.0));
            selection = selection.with(
                *data_type,
                DataTypeChecks::new().with(CheckId::Mean, [CheckId::StatMean]),
            );
        }
        Arc::new(CheckRegistry::new(&limits, &selection).unwrap())
    }

    struct RunResult {
        report: VerificationReport,
        deliveries: Vec<Delivery>,
        feedback: FeedbackSummary,
        pv: Arc<PvFeedbackDriver>,
    }

    /// sources → engine → consumer dispatcher + feedback (log, pv)
    async fn run_pipeline(sources: Vec<SourceConfig>, registry: Arc<CheckRegistry>) -> RunResult {
        let mut ingestion =
            IngestionPipeline::from_sources(&sources, BackpressureConfig::new(256, 256)).unwrap();

        let pv_names: Vec<String> = registry
            .data_types()
            .flat_map(|dt| {
                registry
                    .basic_checks(dt)
                    .iter()
                    .copied()
                    .chain(registry.statistical_checks(dt))
                    .map(move |check| contracts::pv_name(dt, check))
            })
            .collect();
        let pv = Arc::new(PvFeedbackDriver::new("verifier", pv_names));
        let (fb_tx, fb_rx) = mpsc::channel(64);
        let feedback = FeedbackDispatcher::new(
            vec![
                FeedbackTarget::Log(LogFeedback),
                FeedbackTarget::Pv(PvFeedback::new(Arc::clone(&pv) as Arc<dyn PvWriter>)),
            ],
            sources.len(),
            fb_rx,
        )
        .spawn();

        let (sink, seen) = RecordingSink::new("recording");
        let (del_tx, del_rx) = mpsc::unbounded_channel();
        let consumers =
            ConsumerDispatcher::with_handles(vec![SinkHandle::spawn(sink, 256)], 64, del_rx).spawn();

        let engine = VerificationEngine::new(registry, engine_config())
            .with_feedback(fb_tx)
            .with_deliveries(del_tx);

        let receivers = ingestion.start_all();
        let outcome = tokio::time::timeout(TIMEOUT, engine.run(receivers))
            .await
            .expect("engine timed out")
            .unwrap();
        ingestion.join().await;

        let delivery = tokio::time::timeout(TIMEOUT, consumers).await.unwrap().unwrap();
        let feedback = tokio::time::timeout(TIMEOUT, feedback).await.unwrap().unwrap();
        assert_eq!(delivery.consumers[0].1.failure_count, 0);

        let deliveries = seen.lock().unwrap().clone();
        RunResult {
            report: outcome.report,
            deliveries,
            feedback,
            pv,
        }
    }

    fn describe(deliveries: &[Delivery], data_type: &str) -> Vec<(u64, &'static str)> {
        deliveries
            .iter()
            .filter(|d| d.data_type == data_type)
            .map(|d| {
                let kind = match d.event {
                    DeliveryEvent::Verified { failed: false, .. } => "good",
                    DeliveryEvent::Verified { failed: true, .. } => "bad",
                    DeliveryEvent::Missing => "missing",
                    DeliveryEvent::End => "end",
                };
                (d.index, kind)
            })
            .collect()
    }

    /// End-to-end: MockDetector -> FrameFeed -> VerificationEngine -> consumers
    ///
    /// 验证完整的数据流：
    /// 1. 合成探测器跳过计数器 3 和 6，feed 插入 Missing
    /// 2. 全部通过的帧进入 good 索引与 Mean 历史
    /// 3. consumer 按索引顺序收到帧、Missing 与唯一的 End
    #[tokio::test]
    async fn test_e2e_passing_frames_with_gaps() {
        let result = run_pipeline(
            vec![synthetic("data", 6, 5.0, Some(3))],
            mean_registry(&["data"]),
        )
        .await;

        let snapshot = result.report.get("data").unwrap();
        assert!(snapshot.bad_indexes.is_empty());
        assert_eq!(snapshot.good_indexes.keys().copied().collect::<Vec<_>>(), vec![0, 1, 3, 4]);
        assert_eq!(snapshot.history_len(CheckId::Mean), 4);

        assert_eq!(
            describe(&result.deliveries, "data"),
            vec![
                (0, "good"),
                (1, "good"),
                (2, "missing"),
                (3, "good"),
                (4, "good"),
                (5, "missing"),
                (6, "end"),
            ]
        );

        assert_eq!(result.feedback.notices, 0);
        assert_eq!(result.feedback.completed, vec!["data".to_string()]);
        assert_eq!(result.pv.counter("data_mean"), Some(0));
    }

    /// 越限帧进入 bad 索引，失败经反馈写入 PV 表
    #[tokio::test]
    async fn test_e2e_failures_reach_pv_table() {
        let result = run_pipeline(
            vec![synthetic("data", 3, 5.0, None), synthetic("data_white", 3, 15.0, None)],
            mean_registry(&["data", "data_white"]),
        )
        .await;

        let white = result.report.get("data_white").unwrap();
        assert_eq!(white.bad_index_list(), vec![0, 1, 2]);
        assert!(white.good_indexes.is_empty());
        let mean = white.bad_indexes[&0][&CheckId::Mean];
        assert_eq!(mean.value, 15.0);
        assert_eq!(mean.error, QualityError::High);
        // 基础检查失败的帧不跑统计检查
        assert!(!white.bad_indexes[&0].contains_key(&CheckId::StatMean));
        assert_eq!(white.history_len(CheckId::Mean), 0);

        let data = result.report.get("data").unwrap();
        assert_eq!(data.good_indexes.len(), 3);

        assert_eq!(result.feedback.notices, 3);
        assert_eq!(result.feedback.failed, 0);
        let mut completed = result.feedback.completed.clone();
        completed.sort();
        assert_eq!(completed, vec!["data".to_string(), "data_white".to_string()]);

        assert_eq!(result.pv.counter("data_white_mean"), Some(3));
        // 帧按完成顺序结算，最后写入的序号是三者之一
        assert!(matches!(result.pv.index("data_white_mean"), Some(0..=2)));
        assert_eq!(result.pv.index("data_mean"), None);
        assert_eq!(result.pv.values()["verifier:data_white_mean_ctr"], 3);

        assert!(describe(&result.deliveries, "data_white")
            .iter()
            .take(3)
            .all(|(_, kind)| *kind == "bad"));
    }

    /// 均值通过但相对历史均值漂移过大的帧由 StatMean 判定失败
    #[tokio::test]
    async fn test_e2e_stat_mean_drift() {
        let registry = mean_registry(&["data"]);
        let (tx, rx) = mpsc::channel(16);
        for (index, mean) in [5.0, 5.0, 5.0, 9.0, 5.0].into_iter().enumerate() {
            let frame = FrameData::new(Slice::filled(4, 4, mean));
            tx.send(Frame::data("data", index as u64, frame)).await.unwrap();
        }
        tx.send(Frame::end("data", 5)).await.unwrap();
        drop(tx);

        let outcome = VerificationEngine::new(registry, engine_config())
            .run(BTreeMap::from([("data".to_string(), rx)]))
            .await
            .unwrap();

        let snapshot = outcome.report.get("data").unwrap();
        assert_eq!(snapshot.bad_index_list(), vec![3]);
        assert!(snapshot.bad_indexes[&3][&CheckId::Mean].passed());
        let drift = snapshot.bad_indexes[&3][&CheckId::StatMean];
        assert!((drift.value - 4.0).abs() < 1e-9);
        assert_eq!(drift.error, QualityError::High);
        // 失败帧不进入历史
        assert_eq!(snapshot.history_len(CheckId::Mean), 4);
    }

    /// 两个数据类型交错进入同一个 consumer，各自保持严格递增并以一个 End 结束
    #[tokio::test]
    async fn test_e2e_interleaved_data_types_stay_ordered() {
        let result = run_pipeline(
            vec![
                synthetic("data", 20, 5.0, Some(4)),
                synthetic("data_dark", 15, 1.0, Some(5)),
            ],
            mean_registry(&["data", "data_dark"]),
        )
        .await;

        for (data_type, end) in [("data", 20u64), ("data_dark", 15u64)] {
            let seen = describe(&result.deliveries, data_type);
            let indexes: Vec<u64> = seen.iter().map(|(i, _)| *i).collect();
            assert_eq!(indexes, (0..=end).collect::<Vec<_>>(), "{data_type}");
            assert_eq!(seen.iter().filter(|(_, k)| *k == "end").count(), 1);
            assert_eq!(seen.last().unwrap().1, "end");
        }
    }

    /// Feedback-only 模式：不保留索引，失败仍实时转发
    #[tokio::test]
    async fn test_e2e_feedback_only_mode() {
        let registry = mean_registry(&["data"]);
        let mut ingestion = IngestionPipeline::from_sources(
            &[synthetic("data", 4, 20.0, None)],
            BackpressureConfig::default(),
        )
        .unwrap();

        let (fb_tx, mut fb_rx) = mpsc::channel(64);
        let config = EngineConfig {
            mode: contracts::AggregateMode::FeedbackOnly,
            ..engine_config()
        };
        let outcome = VerificationEngine::new(registry, config)
            .with_feedback(fb_tx)
            .run(ingestion.start_all())
            .await
            .unwrap();
        ingestion.join().await;

        assert!(outcome.report.get("data").is_none_or(|s| s.is_empty()));
        let mut failures = 0;
        while let Ok(event) = fb_rx.try_recv() {
            if let FeedbackEvent::Failure(notice) = event {
                assert_eq!(notice.pv_name(), "data_mean");
                failures += 1;
            }
        }
        assert_eq!(failures, 4);
    }

    fn write_stack(path: &std::path::Path, header: usize, means: &[u16]) {
        let mut file = fs::File::create(path).unwrap();
        file.write_all(&vec![0u8; header]).unwrap();
        for &mean in means {
            for _ in 0..4 {
                file.write_all(&mean.to_le_bytes()).unwrap();
            }
        }
    }

    /// 配置文件驱动：raw 堆栈 → 校验 → file consumer → 按文件列出失败帧
    #[tokio::test]
    async fn test_e2e_config_raw_stacks_to_file_consumer() {
        let dir = tempfile::TempDir::new().unwrap();
        write_stack(&dir.path().join("a.ge"), 16, &[5, 5, 5]);
        write_stack(&dir.path().join("b.ge"), 16, &[15, 5]);
        fs::write(
            dir.path().join("limits.json"),
            r#"{ "data": { "mean": { "low_limit": 0, "high_limit": 10 } } }"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("qc.json"),
            r#"{ "data": { "QUALITYCHECK_MEAN": [] } }"#,
        )
        .unwrap();
        let output = dir.path().join("out");
        let config = format!(
            r#"
[verification]
limits = "limits.json"
quality_checks = "qc.json"
report_type = "errors"
report_by_file = true

[reorder]
max_pending = 16

[[sources]]
data_type = "data"
kind = "raw"
files = ["a.ge", "b.ge"]
width = 2
height = 2
header_bytes = 16

[[consumers]]
name = "files"
sink_type = "file"
params = {{ base_path = "{}" }}
"#,
            output.display()
        );
        let config_path = dir.path().join("verifier.toml");
        fs::write(&config_path, config).unwrap();

        let blueprint = ConfigLoader::load_from_path(&config_path).unwrap();
        let limits = ConfigLoader::load_limits(&blueprint.verification.limits).unwrap();
        let selection =
            ConfigLoader::load_check_selection(&blueprint.verification.quality_checks).unwrap();
        config_loader::validate_inputs(&blueprint, &selection).unwrap();
        let registry = Arc::new(CheckRegistry::new(&limits, &selection).unwrap());

        let mut ingestion =
            IngestionPipeline::from_sources(&blueprint.sources, BackpressureConfig::default())
                .unwrap();
        let (del_tx, del_rx) = mpsc::unbounded_channel();
        let consumers = create_consumer_dispatcher(
            ConsumerDispatcherConfig {
                consumers: blueprint.consumers.clone(),
                reorder: blueprint.reorder.clone(),
            },
            del_rx,
        )
        .await
        .unwrap()
        .spawn();

        let outcome = VerificationEngine::new(registry, EngineConfig::from(&blueprint.verification))
            .with_deliveries(del_tx)
            .run(ingestion.start_all())
            .await
            .unwrap();
        let feeds = ingestion.join().await;
        let delivery = tokio::time::timeout(TIMEOUT, consumers).await.unwrap().unwrap();

        assert_eq!(feeds["data"].frames, 5);
        assert_eq!(outcome.report.bad_indexes()["data"], vec![3]);

        let per_file = outcome.report.bad_indexes_per_file(&ingestion.file_offsets());
        let a = dir.path().join("a.ge").display().to_string();
        let b = dir.path().join("b.ge").display().to_string();
        assert!(per_file["data"][&a].is_empty());
        assert_eq!(per_file["data"][&b], vec![0]);

        // 5 帧 + End
        assert_eq!(delivery.released, 6);
        let manifest = fs::read_to_string(output.join("deliveries.jsonl")).unwrap();
        let records: Vec<serde_json::Value> = manifest
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 6);
        assert_eq!(records[3]["failed"], true);
        assert_eq!(records[5]["status"], "end");
        let indexes: Vec<u64> = records.iter().map(|r| r["index"].as_u64().unwrap()).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3, 4, 5]);
    }

    /// 乱序到达的投递经重排序后按索引交给 consumer
    #[tokio::test]
    async fn test_consumer_dispatcher_reorders_random_admission() {
        use rand::rngs::StdRng;
        use rand::seq::SliceRandom;
        use rand::SeedableRng;

        let mut deliveries: Vec<Delivery> = (0..30)
            .map(|i| {
                if i % 7 == 3 {
                    Delivery::missing("data", i)
                } else {
                    let frame = Arc::new(FrameData::new(Slice::filled(2, 2, 1.0)));
                    Delivery::verified("data", i, frame, false)
                }
            })
            .collect();
        let mut rng = StdRng::seed_from_u64(11);
        deliveries.shuffle(&mut rng);
        deliveries.push(Delivery::end("data", 30));

        let (sink, seen) = RecordingSink::new("recording");
        let (tx, rx) = mpsc::unbounded_channel();
        let handle =
            ConsumerDispatcher::with_handles(vec![SinkHandle::spawn(sink, 64)], 64, rx).spawn();
        for delivery in deliveries {
            tx.send(delivery).unwrap();
        }
        drop(tx);
        let summary = tokio::time::timeout(TIMEOUT, handle).await.unwrap().unwrap();

        assert_eq!(summary.released, 31);
        let indexes: Vec<u64> = seen.lock().unwrap().iter().map(|d| d.index).collect();
        assert_eq!(indexes, (0..=30).collect::<Vec<_>>());
    }

    /// 索引不从 0 开始且中间跳号时，重排序无需等到 finish 即可全部释放
    #[tokio::test]
    async fn test_unmarked_gaps_release_without_finish() {
        let registry = mean_registry(&["data"]);
        let (frame_tx, frame_rx) = mpsc::channel(32);
        for index in [5, 6, 8, 9, 11] {
            let frame = FrameData::new(Slice::filled(4, 4, 5.0));
            frame_tx.send(Frame::data("data", index, frame)).await.unwrap();
        }
        frame_tx.send(Frame::end("data", 12)).await.unwrap();

        let (del_tx, mut del_rx) = mpsc::unbounded_channel();
        let outcome = VerificationEngine::new(registry, engine_config())
            .with_deliveries(del_tx)
            .run(BTreeMap::from([("data".to_string(), frame_rx)]))
            .await
            .unwrap();
        assert_eq!(outcome.summaries["data"].gap_filled, 7);

        let mut buffer = ReorderBuffer::new(1024);
        let mut released = Vec::new();
        while let Some(delivery) = del_rx.recv().await {
            released.extend(buffer.admit(delivery));
        }
        assert!(buffer.finish().is_empty());
        assert!(buffer.is_complete());

        let indexes: Vec<u64> = released.iter().map(|d| d.index).collect();
        assert_eq!(indexes, (0..=12).collect::<Vec<_>>());
        let missing: Vec<u64> = released
            .iter()
            .filter(|d| d.is_missing())
            .map(|d| d.index)
            .collect();
        assert_eq!(missing, vec![0, 1, 2, 3, 4, 7, 10]);
    }

    #[tokio::test]
    async fn test_unknown_data_type_fails_before_frames() {
        let registry = mean_registry(&["data"]);
        let (_tx, rx) = mpsc::channel::<Frame>(1);
        let err = VerificationEngine::new(registry, engine_config())
            .run(BTreeMap::from([("data_flat".to_string(), rx)]))
            .await
            .unwrap_err();
        assert!(err.is_config());
    }
}
