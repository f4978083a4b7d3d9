//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{AggregateMode, ReportType};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;
use crate::pipeline::VerificationInputs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    data_types: Vec<String>,
    source_count: usize,
    consumer_count: usize,
    feedback_types: Vec<String>,
    report_type: String,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    // 配置、限值与检查选择一起校验
    match VerificationInputs::load(&args.config) {
        Ok(inputs) => {
            let warnings = collect_warnings(&inputs);
            let blueprint = &inputs.blueprint;

            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", blueprint.version),
                    data_types: inputs.data_types.clone(),
                    source_count: blueprint.sources.len(),
                    consumer_count: blueprint.consumers.len(),
                    feedback_types: blueprint
                        .feedback
                        .types
                        .iter()
                        .map(|t| format!("{:?}", t).to_lowercase())
                        .collect(),
                    report_type: format!("{:?}", blueprint.verification.report_type).to_lowercase(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(inputs: &VerificationInputs) -> Vec<String> {
    let blueprint = &inputs.blueprint;
    let mut warnings = Vec::new();

    if blueprint.sources.is_empty() {
        warnings.push("No sources configured - nothing will be verified".to_string());
    }

    for data_type in inputs.unsourced_data_types() {
        warnings.push(format!("Data type '{}' has no source configured", data_type));
    }

    for source in &blueprint.sources {
        if !inputs.data_types.contains(&source.data_type) {
            warnings.push(format!(
                "Source '{}' is not in verification.data_types and will be skipped",
                source.data_type
            ));
        }
    }

    if blueprint.consumers.is_empty() {
        warnings.push("No consumers configured - verified frames will not be delivered".to_string());
    }

    if blueprint.verification.aggregate_mode() == AggregateMode::FeedbackOnly {
        if blueprint.verification.report_type != ReportType::None {
            warnings.push(
                "aggregate_limit = -1 keeps no indexes - the report will be empty".to_string(),
            );
        }
        if !blueprint.feedback.is_enabled() {
            warnings.push(
                "aggregate_limit = -1 without feedback types - failures are not surfaced".to_string(),
            );
        }
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Data types: {}", summary.data_types.join(", "));
            println!("  Sources: {}", summary.source_count);
            println!("  Consumers: {}", summary.consumer_count);
            println!("  Feedback: {}", summary.feedback_types.join(", "));
            println!("  Report: {}", summary.report_type);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
