//! Loading of everything a verification run needs before the first frame.

use std::path::Path;
use std::sync::Arc;

use config_loader::{validate_inputs, ConfigLoader};
use contracts::{pv_name, SourceConfig, VerifierBlueprint};
use tracing::{debug, warn};
use verifier::CheckRegistry;

use crate::error::{CliError, Result};

/// Configuration, limits and check selection, validated together
#[derive(Debug, Clone)]
pub struct VerificationInputs {
    pub blueprint: VerifierBlueprint,
    pub registry: Arc<CheckRegistry>,
    /// Data types that will be verified
    pub data_types: Vec<String>,
}

impl VerificationInputs {
    /// Load the configuration file and the limits / check selection it references
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CliError::config_not_found(path.display().to_string()));
        }
        let blueprint = ConfigLoader::load_from_path(path)?;
        Self::from_blueprint(blueprint)
    }

    pub fn from_blueprint(blueprint: VerifierBlueprint) -> Result<Self> {
        let limits = ConfigLoader::load_limits(&blueprint.verification.limits)?;
        let mut selection =
            ConfigLoader::load_check_selection(&blueprint.verification.quality_checks)?;
        validate_inputs(&blueprint, &selection)?;

        let data_types = blueprint.selected_data_types(selection.data_types());
        selection.retain(&data_types);
        let registry = CheckRegistry::new(&limits, &selection)?;
        debug!(data_types = ?data_types, "check registry built");

        Ok(Self {
            blueprint,
            registry: Arc::new(registry),
            data_types,
        })
    }

    /// Sources whose data type is verified; the others are skipped with a warning
    pub fn active_sources(&self) -> Vec<SourceConfig> {
        self.blueprint
            .sources
            .iter()
            .filter(|source| {
                let active = self.data_types.contains(&source.data_type);
                if !active {
                    warn!(
                        data_type = %source.data_type,
                        "Source skipped: data type not selected for verification"
                    );
                }
                active
            })
            .cloned()
            .collect()
    }

    /// Selected data types without a configured source
    pub fn unsourced_data_types(&self) -> Vec<String> {
        self.data_types
            .iter()
            .filter(|dt| !self.blueprint.sources.iter().any(|s| &s.data_type == *dt))
            .cloned()
            .collect()
    }

    /// One PV per data type and selected check
    pub fn pv_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for data_type in self.registry.data_types() {
            let checks = self
                .registry
                .basic_checks(data_type)
                .iter()
                .copied()
                .chain(self.registry.statistical_checks(data_type));
            names.extend(checks.map(|check| pv_name(data_type, check)));
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
[verification]
limits = "limits.json"
quality_checks = "qc.json"
data_types = ["data"]

[[sources]]
data_type = "data"
kind = "synthetic"
frames = 4
width = 2
height = 2
mean = 5.0

[[sources]]
data_type = "data_dark"
kind = "synthetic"
frames = 4
width = 2
height = 2
mean = 1.0
"#;

    fn write_inputs(dir: &TempDir, limits: &str) -> std::path::PathBuf {
        fs::write(dir.path().join("verifier.toml"), CONFIG).unwrap();
        fs::write(dir.path().join("limits.json"), limits).unwrap();
        fs::write(
            dir.path().join("qc.json"),
            r#"{
                "data": { "QUALITYCHECK_MEAN": ["STAT_MEAN"] },
                "data_dark": { "QUALITYCHECK_MEAN": [] }
            }"#,
        )
        .unwrap();
        dir.path().join("verifier.toml")
    }

    #[test]
    fn loads_and_restricts_to_selected_data_types() {
        let dir = TempDir::new().unwrap();
        let path = write_inputs(
            &dir,
            r#"{ "data": {
                "mean": { "low_limit": 0, "high_limit": 10 },
                "stat_mean": { "high_limit": 2 }
            } }"#,
        );

        let inputs = VerificationInputs::load(&path).unwrap();
        assert_eq!(inputs.data_types, vec!["data".to_string()]);
        assert!(!inputs.registry.contains("data_dark"));

        let sources = inputs.active_sources();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].data_type, "data");
        assert!(inputs.unsourced_data_types().is_empty());
        assert_eq!(
            inputs.pv_names(),
            vec!["data_mean".to_string(), "data_stat_mean".to_string()]
        );
    }

    #[test]
    fn missing_limits_are_a_validation_error() {
        let dir = TempDir::new().unwrap();
        let path = write_inputs(&dir, r#"{ "data": { "mean": { "high_limit": 10 } } }"#);

        let err = VerificationInputs::load(&path).unwrap_err();
        assert!(matches!(err, CliError::ConfigValidation { .. }), "got: {err}");
    }

    #[test]
    fn missing_config_file() {
        let err = VerificationInputs::load(Path::new("/nonexistent/verifier.toml")).unwrap_err();
        assert!(matches!(err, CliError::ConfigNotFound { .. }));
    }
}
