//! 配置校验模块
//!
//! 字段级约束由 `validator` derive 完成，此处负责跨字段规则：
//! - 数据源 data_type 唯一
//! - 合成源尺寸 / 饱和像素 / 采集时间合法
//! - 原始帧源文件列表非空
//! - 消费者名称唯一，network 消费者必须配置 addr
//! - 反馈类型不重复

use std::collections::HashSet;

use ::validator::{Validate, ValidationErrors, ValidationErrorsKind};
use contracts::{
    ConsumerType, ContractError, SourceKind, SyntheticSourceConfig, VerifierBlueprint,
};

/// 校验 VerifierBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &VerifierBlueprint) -> Result<(), ContractError> {
    validate_fields(blueprint)?;
    validate_data_types(blueprint)?;
    validate_sources(blueprint)?;
    validate_consumers(blueprint)?;
    validate_feedback(blueprint)?;
    Ok(())
}

/// 字段级校验 (derive)
fn validate_fields(blueprint: &VerifierBlueprint) -> Result<(), ContractError> {
    blueprint.validate().map_err(|errors| {
        ContractError::config_validation(first_invalid_field(&errors, ""), errors.to_string())
    })
}

/// 取第一个出错字段的完整路径 (如 `verification.poll_interval_ms`)
fn first_invalid_field(errors: &ValidationErrors, prefix: &str) -> String {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(_) => return path,
            ValidationErrorsKind::Struct(inner) => return first_invalid_field(inner, &path),
            ValidationErrorsKind::List(items) => {
                if let Some((idx, inner)) = items.iter().next() {
                    return first_invalid_field(inner, &format!("{path}[{idx}]"));
                }
            }
        }
    }
    if prefix.is_empty() {
        "blueprint".to_string()
    } else {
        prefix.to_string()
    }
}

/// 校验 verification.data_types 无空名 / 重复
fn validate_data_types(blueprint: &VerifierBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for data_type in &blueprint.verification.data_types {
        if data_type.is_empty() {
            return Err(ContractError::config_validation(
                "verification.data_types",
                "data type name cannot be empty",
            ));
        }
        if !seen.insert(data_type) {
            return Err(ContractError::config_validation(
                format!("verification.data_types[{data_type}]"),
                "duplicate data type",
            ));
        }
    }
    Ok(())
}

/// 校验数据源
fn validate_sources(blueprint: &VerifierBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, source) in blueprint.sources.iter().enumerate() {
        if source.data_type.is_empty() {
            return Err(ContractError::config_validation(
                format!("sources[{idx}].data_type"),
                "data type cannot be empty",
            ));
        }
        if !seen.insert(&source.data_type) {
            return Err(ContractError::config_validation(
                format!("sources[data_type={}]", source.data_type),
                "duplicate source data_type",
            ));
        }

        let field = format!("sources[{}]", source.data_type);
        match &source.kind {
            SourceKind::Synthetic(synthetic) => validate_synthetic(&field, synthetic)?,
            SourceKind::Raw(raw) => {
                if raw.files.is_empty() {
                    return Err(ContractError::config_validation(
                        format!("{field}.files"),
                        "raw source needs at least one file",
                    ));
                }
                check_shape(&field, raw.width, raw.height)?;
                check_acquire_time(&field, raw.acquire_time)?;
            }
        }
    }
    Ok(())
}

fn validate_synthetic(field: &str, synthetic: &SyntheticSourceConfig) -> Result<(), ContractError> {
    check_shape(field, synthetic.width, synthetic.height)?;
    check_acquire_time(field, synthetic.acquire_time)?;

    if !synthetic.mean.is_finite() || synthetic.mean < 0.0 {
        return Err(ContractError::config_validation(
            format!("{field}.mean"),
            format!("mean must be finite and >= 0, got {}", synthetic.mean),
        ));
    }
    if !synthetic.noise.is_finite() || synthetic.noise < 0.0 {
        return Err(ContractError::config_validation(
            format!("{field}.noise"),
            format!("noise must be finite and >= 0, got {}", synthetic.noise),
        ));
    }
    if synthetic.saturated_pixels > synthetic.width * synthetic.height {
        return Err(ContractError::config_validation(
            format!("{field}.saturated_pixels"),
            format!(
                "saturated_pixels ({}) exceeds frame size ({})",
                synthetic.saturated_pixels,
                synthetic.width * synthetic.height
            ),
        ));
    }
    if synthetic.drop_every == Some(0) {
        return Err(ContractError::config_validation(
            format!("{field}.drop_every"),
            "drop_every must be > 0",
        ));
    }
    Ok(())
}

fn check_shape(field: &str, width: usize, height: usize) -> Result<(), ContractError> {
    if width == 0 || height == 0 {
        return Err(ContractError::config_validation(
            format!("{field}.width / {field}.height"),
            format!("frame shape must be non-zero, got {width}x{height}"),
        ));
    }
    Ok(())
}

fn check_acquire_time(field: &str, acquire_time: Option<f64>) -> Result<(), ContractError> {
    match acquire_time {
        Some(t) if !(t.is_finite() && t > 0.0) => Err(ContractError::config_validation(
            format!("{field}.acquire_time"),
            format!("acquire_time must be > 0, got {t}"),
        )),
        _ => Ok(()),
    }
}

/// 校验消费者配置
fn validate_consumers(blueprint: &VerifierBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for consumer in &blueprint.consumers {
        if !seen.insert(&consumer.name) {
            return Err(ContractError::config_validation(
                format!("consumers[name={}]", consumer.name),
                "duplicate consumer name",
            ));
        }
        if consumer.sink_type == ConsumerType::Network && !consumer.params.contains_key("addr") {
            return Err(ContractError::config_validation(
                format!("consumers[{}].params.addr", consumer.name),
                "network consumer requires 'addr'",
            ));
        }
    }
    Ok(())
}

/// 校验反馈类型
fn validate_feedback(blueprint: &VerifierBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for feedback_type in &blueprint.feedback.types {
        if !seen.insert(feedback_type) {
            return Err(ContractError::config_validation(
                "feedback.types",
                format!("duplicate feedback type {feedback_type:?}"),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{
        ConfigVersion, ConsumerConfig, FeedbackConfig, FeedbackType, RawSourceConfig,
        ReorderConfig, ReportType, SourceConfig, VerificationConfig,
    };

    fn minimal_blueprint() -> VerifierBlueprint {
        VerifierBlueprint {
            version: ConfigVersion::V1,
            verification: VerificationConfig {
                limits: "limits.json".into(),
                quality_checks: "qc.json".into(),
                data_types: vec!["data".into()],
                aggregate_limit: None,
                history_window: None,
                poll_interval_ms: 5,
                max_concurrent_checks: 4,
                max_pending_frames: 64,
                report_type: ReportType::Full,
                report_path: None,
                report_by_file: false,
            },
            feedback: FeedbackConfig {
                types: vec![FeedbackType::Console],
                ..Default::default()
            },
            reorder: ReorderConfig::default(),
            sources: vec![SourceConfig {
                data_type: "data".into(),
                kind: SourceKind::Synthetic(SyntheticSourceConfig {
                    frames: 10,
                    width: 8,
                    height: 8,
                    mean: 5.0,
                    noise: 1.0,
                    saturated_pixels: 0,
                    acquire_time: Some(0.5),
                    drop_every: None,
                    interval_ms: 0,
                    seed: Some(7),
                }),
            }],
            consumers: vec![ConsumerConfig {
                name: "log".into(),
                sink_type: ConsumerType::Log,
                queue_capacity: 100,
                params: Default::default(),
            }],
        }
    }

    fn synthetic_mut(bp: &mut VerifierBlueprint) -> &mut SyntheticSourceConfig {
        match &mut bp.sources[0].kind {
            SourceKind::Synthetic(s) => s,
            SourceKind::Raw(_) => unreachable!(),
        }
    }

    #[test]
    fn test_valid_config() {
        let bp = minimal_blueprint();
        assert!(validate(&bp).is_ok());
    }

    #[test]
    fn test_field_level_rule() {
        let mut bp = minimal_blueprint();
        bp.verification.max_concurrent_checks = 0;
        let err = validate(&bp).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("max_concurrent_checks"), "got: {err}");

        let mut bp = minimal_blueprint();
        bp.verification.max_pending_frames = 0;
        let err = validate(&bp).unwrap_err();
        assert!(err.to_string().contains("max_pending_frames"), "got: {err}");
    }

    #[test]
    fn test_duplicate_source() {
        let mut bp = minimal_blueprint();
        bp.sources.push(bp.sources[0].clone());
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("duplicate source data_type"), "got: {err}");
    }

    #[test]
    fn test_saturated_pixels_exceed_frame() {
        let mut bp = minimal_blueprint();
        synthetic_mut(&mut bp).saturated_pixels = 65;
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("exceeds frame size"), "got: {err}");
    }

    #[test]
    fn test_non_positive_acquire_time() {
        let mut bp = minimal_blueprint();
        synthetic_mut(&mut bp).acquire_time = Some(0.0);
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("acquire_time must be > 0"), "got: {err}");
    }

    #[test]
    fn test_raw_source_without_files() {
        let mut bp = minimal_blueprint();
        bp.sources[0].kind = SourceKind::Raw(RawSourceConfig {
            files: vec![],
            width: 4,
            height: 4,
            header_bytes: 8192,
            acquire_time: None,
        });
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("at least one file"), "got: {err}");
    }

    #[test]
    fn test_network_consumer_requires_addr() {
        let mut bp = minimal_blueprint();
        bp.consumers.push(ConsumerConfig {
            name: "udp".into(),
            sink_type: ConsumerType::Network,
            queue_capacity: 10,
            params: Default::default(),
        });
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("requires 'addr'"), "got: {err}");
    }

    #[test]
    fn test_duplicate_feedback_type() {
        let mut bp = minimal_blueprint();
        bp.feedback.types = vec![FeedbackType::Log, FeedbackType::Log];
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("duplicate feedback type"), "got: {err}");
    }
}
