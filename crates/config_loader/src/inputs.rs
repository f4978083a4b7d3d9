//! 限值与检查选择文件加载
//!
//! 两者均为 JSON：
//! - limits: `{ "<data_type>": { "<limit_key>": { "low_limit": .., "high_limit": .. } } }`
//! - quality checks: `{ "<data_type>": { "QUALITYCHECK_MEAN": ["STAT_MEAN"], .. } }`

use std::path::Path;

use contracts::{CheckSelection, ContractError, Limits, VerifierBlueprint};
use serde::de::DeserializeOwned;

/// 加载限值文件
pub fn load_limits(path: &Path) -> Result<Limits, ContractError> {
    read_json(path, "limits")
}

/// 加载检查选择文件
pub fn load_check_selection(path: &Path) -> Result<CheckSelection, ContractError> {
    read_json(path, "quality checks")
}

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T, ContractError> {
    let content = std::fs::read_to_string(path).map_err(|e| ContractError::ConfigParse {
        message: format!("cannot read {what} file {}: {e}", path.display()),
        source: Some(Box::new(e)),
    })?;
    serde_json::from_str(&content).map_err(|e| ContractError::ConfigParse {
        message: format!("{what} file {} is invalid: {e}", path.display()),
        source: Some(Box::new(e)),
    })
}

/// 交叉校验：配置中引用的数据类型必须在检查选择文件中出现
pub fn validate_inputs(
    blueprint: &VerifierBlueprint,
    selection: &CheckSelection,
) -> Result<(), ContractError> {
    for data_type in &blueprint.verification.data_types {
        if selection.get(data_type).is_none() {
            return Err(ContractError::config_validation(
                "verification.data_types",
                format!("data type '{data_type}' has no quality checks configured"),
            ));
        }
    }
    for source in &blueprint.sources {
        if selection.get(&source.data_type).is_none() {
            return Err(ContractError::config_validation(
                format!("sources[{}]", source.data_type),
                format!(
                    "data type '{}' has no quality checks configured",
                    source.data_type
                ),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{CheckId, LimitPair};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_limits() {
        let file = write_temp(
            r#"{
                "data": {
                    "mean": { "low_limit": 0, "high_limit": 10 },
                    "sat": { "high_limit": 60000 }
                }
            }"#,
        );
        let limits = load_limits(file.path()).unwrap();
        assert_eq!(
            *limits.get("data", "mean").unwrap(),
            LimitPair::between(0.0, 10.0)
        );
        assert_eq!(limits.get("data", "sat").unwrap().low_limit, None);
        assert!(limits.get("data", "st_dev").is_err());
    }

    #[test]
    fn test_load_check_selection() {
        let file = write_temp(
            r#"{
                "data": {
                    "QUALITYCHECK_MEAN": ["STAT_MEAN"],
                    "QUALITYCHECK_STD": []
                }
            }"#,
        );
        let selection = load_check_selection(file.path()).unwrap();
        let checks = selection.get("data").unwrap();
        assert_eq!(checks.dependents(CheckId::Mean), &[CheckId::StatMean]);
        assert!(checks.dependents(CheckId::StdDev).is_empty());
    }

    #[test]
    fn test_unknown_check_is_parse_error() {
        let file = write_temp(r#"{ "data": { "QUALITYCHECK_MEDIAN": [] } }"#);
        let err = load_check_selection(file.path()).unwrap_err();
        assert!(matches!(err, ContractError::ConfigParse { .. }));
        assert!(err.to_string().contains("QUALITYCHECK_MEDIAN"), "got: {err}");
    }

    #[test]
    fn test_missing_file() {
        let err = load_limits(Path::new("/nonexistent/limits.json")).unwrap_err();
        assert!(err.is_config());
    }
}
