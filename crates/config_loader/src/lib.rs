//! # Config Loader
//!
//! Configuration loading and parsing module.
//!
//! Responsibilities:
//! - Parse TOML/JSON configuration files
//! - Validate configuration legality
//! - Resolve relative paths against the configuration directory
//! - Load limits and quality-check selection files
//! - Generate `VerifierBlueprint`
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let blueprint = ConfigLoader::load_from_path(Path::new("verifier.toml")).unwrap();
//! println!("Limits: {}", blueprint.verification.limits.display());
//! ```

mod inputs;
mod parser;
mod validator;

pub use contracts::VerifierBlueprint;
pub use inputs::validate_inputs;
pub use parser::ConfigFormat;

use contracts::{CheckSelection, ContractError, Limits};
use std::path::Path;

/// Configuration loader
///
/// Provides static methods to load configuration from files or strings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    ///
    /// Automatically detects format from file extension (.toml / .json).
    /// Relative paths inside the configuration are resolved against its directory.
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<VerifierBlueprint, ContractError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        let mut blueprint = Self::load_from_str(&content, format)?;
        if let Some(base_dir) = path.parent() {
            parser::resolve_paths(&mut blueprint, base_dir);
        }
        Ok(blueprint)
    }

    /// Load configuration from string
    ///
    /// # Errors
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<VerifierBlueprint, ContractError> {
        Self::parse_and_validate(content, format)
    }

    /// Load the limits file referenced by `[verification].limits`
    pub fn load_limits(path: &Path) -> Result<Limits, ContractError> {
        inputs::load_limits(path)
    }

    /// Load the quality-check selection referenced by `[verification].quality_checks`
    pub fn load_check_selection(path: &Path) -> Result<CheckSelection, ContractError> {
        inputs::load_check_selection(path)
    }

    /// Serialize VerifierBlueprint to TOML string
    pub fn to_toml(blueprint: &VerifierBlueprint) -> Result<String, ContractError> {
        toml::to_string_pretty(blueprint)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Serialize VerifierBlueprint to JSON string
    pub fn to_json(blueprint: &VerifierBlueprint) -> Result<String, ContractError> {
        serde_json::to_string_pretty(blueprint)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }
}

impl ConfigLoader {
    /// Infer configuration format from file extension
    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }

    /// Read configuration file content
    fn read_file(path: &Path) -> Result<String, ContractError> {
        Ok(std::fs::read_to_string(path)?)
    }

    /// Parse and validate configuration content
    fn parse_and_validate(
        content: &str,
        format: ConfigFormat,
    ) -> Result<VerifierBlueprint, ContractError> {
        let blueprint = parser::parse(content, format)?;
        validator::validate(&blueprint)?;
        Ok(blueprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const MINIMAL_TOML: &str = r#"
[verification]
limits = "limits.json"
quality_checks = "qc.json"
data_types = ["data"]
report_type = "errors"

[feedback]
types = ["log"]

[reorder]
max_pending = 64

[[sources]]
data_type = "data"
kind = "synthetic"
frames = 20
width = 16
height = 16
mean = 5.0
noise = 0.5

[[consumers]]
name = "log_sink"
sink_type = "log"
"#;

    #[test]
    fn test_load_from_str_toml() {
        let result = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let bp = result.unwrap();
        assert_eq!(bp.verification.data_types, vec!["data".to_string()]);
        assert_eq!(bp.reorder.max_pending, 64);
    }

    #[test]
    fn test_round_trip_toml() {
        let bp = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml).unwrap();
        let serialized = ConfigLoader::to_toml(&bp).unwrap();
        let bp2 = ConfigLoader::load_from_str(&serialized, ConfigFormat::Toml).unwrap();
        assert_eq!(bp.verification.limits, bp2.verification.limits);
        assert_eq!(bp.sources.len(), bp2.sources.len());
        assert_eq!(bp.consumers[0].name, bp2.consumers[0].name);
    }

    #[test]
    fn test_round_trip_json() {
        let bp = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml).unwrap();
        let json = ConfigLoader::to_json(&bp).unwrap();
        let bp2 = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(bp.verification.report_type, bp2.verification.report_type);
    }

    #[test]
    fn test_validation_runs_after_parse() {
        let content = MINIMAL_TOML.replace("name = \"log_sink\"\nsink_type = \"log\"", "name = \"udp\"\nsink_type = \"network\"");
        let result = ConfigLoader::load_from_str(&content, ConfigFormat::Toml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("addr"));
    }

    #[test]
    fn test_load_from_path_resolves_inputs() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("verifier.toml"), MINIMAL_TOML).unwrap();
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

        let bp = ConfigLoader::load_from_path(&dir.path().join("verifier.toml")).unwrap();
        assert_eq!(bp.verification.limits, dir.path().join("limits.json"));

        let limits = ConfigLoader::load_limits(&bp.verification.limits).unwrap();
        assert!(limits.contains("data", "mean"));
        let selection = ConfigLoader::load_check_selection(&bp.verification.quality_checks).unwrap();
        assert!(validate_inputs(&bp, &selection).is_ok());
    }

    #[test]
    fn test_unknown_data_type_in_inputs() {
        let bp = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml).unwrap();
        let selection = CheckSelection::new();
        let err = validate_inputs(&bp, &selection).unwrap_err();
        assert!(err.to_string().contains("no quality checks"), "got: {err}");
    }

    #[test]
    fn test_unsupported_extension() {
        let err = ConfigLoader::load_from_path(Path::new("verifier.yaml")).unwrap_err();
        assert!(err.to_string().contains("unsupported config format"));
    }
}
