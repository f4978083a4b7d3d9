//! `info` command implementation.

use std::collections::HashMap;

use anyhow::{Context, Result};
use contracts::VerifierBlueprint;
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;
use crate::error::CliError;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    verification: VerificationInfo,
    feedback: FeedbackInfo,
    max_pending: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sources: Vec<SourceInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    consumers: Vec<ConsumerInfo>,
}

#[derive(Serialize)]
struct VerificationInfo {
    limits: String,
    quality_checks: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    data_types: Vec<String>,
    mode: String,
    report_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    report_path: Option<String>,
    report_by_file: bool,
}

#[derive(Serialize)]
struct FeedbackInfo {
    types: Vec<String>,
    pv_prefix: String,
    channel_capacity: usize,
}

#[derive(Serialize)]
struct SourceInfo {
    data_type: String,
    kind: String,
}

#[derive(Serialize)]
struct ConsumerInfo {
    name: String,
    sink_type: String,
    queue_capacity: usize,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    params: HashMap<String, String>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&blueprint, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint, args);
    }

    Ok(())
}

fn build_config_info(blueprint: &VerifierBlueprint, args: &InfoArgs) -> ConfigInfo {
    let verification = &blueprint.verification;

    let sources = if args.sources {
        blueprint
            .sources
            .iter()
            .map(|s| SourceInfo {
                data_type: s.data_type.clone(),
                kind: super::source_kind(&s.kind),
            })
            .collect()
    } else {
        Vec::new()
    };

    let consumers = if args.consumers {
        blueprint
            .consumers
            .iter()
            .map(|c| ConsumerInfo {
                name: c.name.clone(),
                sink_type: format!("{:?}", c.sink_type),
                queue_capacity: c.queue_capacity,
                params: c.params.clone(),
            })
            .collect()
    } else {
        Vec::new()
    };

    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        verification: VerificationInfo {
            limits: verification.limits.display().to_string(),
            quality_checks: verification.quality_checks.display().to_string(),
            data_types: verification.data_types.clone(),
            mode: format!("{:?}", verification.aggregate_mode()),
            report_type: format!("{:?}", verification.report_type),
            report_path: verification
                .report_path
                .as_ref()
                .map(|p| p.display().to_string()),
            report_by_file: verification.report_by_file,
        },
        feedback: FeedbackInfo {
            types: blueprint
                .feedback
                .types
                .iter()
                .map(|t| format!("{:?}", t))
                .collect(),
            pv_prefix: blueprint.feedback.pv_prefix.clone(),
            channel_capacity: blueprint.feedback.channel_capacity,
        },
        max_pending: blueprint.reorder.max_pending,
        sources,
        consumers,
    }
}

fn print_config_info(blueprint: &VerifierBlueprint, args: &InfoArgs) {
    let verification = &blueprint.verification;

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║              Frame Verifier Configuration                    ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("🔍 Verification");
    println!("   ├─ Version: {:?}", blueprint.version);
    println!("   ├─ Limits: {}", verification.limits.display());
    println!("   ├─ Quality checks: {}", verification.quality_checks.display());
    if verification.data_types.is_empty() {
        println!("   ├─ Data types: (all selected)");
    } else {
        println!("   ├─ Data types: {}", verification.data_types.join(", "));
    }
    println!("   ├─ Mode: {:?}", verification.aggregate_mode());
    println!(
        "   ├─ Dispatch: poll {} ms, {} concurrent checks, {} pending frames",
        verification.poll_interval_ms,
        verification.max_concurrent_checks,
        verification.max_pending_frames
    );
    match &verification.report_path {
        Some(path) => println!("   └─ Report: {:?} → {}", verification.report_type, path.display()),
        None => println!("   └─ Report: {:?} → stdout", verification.report_type),
    }

    println!("\n📥 Sources ({})", blueprint.sources.len());
    for (i, source) in blueprint.sources.iter().enumerate() {
        let is_last = i == blueprint.sources.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        if args.sources {
            println!("   {} {} ({})", prefix, source.data_type, super::source_kind(&source.kind));
        } else {
            println!("   {} {}", prefix, source.data_type);
        }
    }

    let feedback = &blueprint.feedback;
    println!("\n🔔 Feedback");
    if feedback.is_enabled() {
        println!("   ├─ Types: {:?}", feedback.types);
        println!("   ├─ PV prefix: {}", feedback.pv_prefix);
        println!("   └─ Channel capacity: {}", feedback.channel_capacity);
    } else {
        println!("   └─ (disabled)");
    }

    println!("\n⚙️  Reorder buffer: max {} pending per data type", blueprint.reorder.max_pending);

    if !blueprint.consumers.is_empty() {
        println!("\n📤 Consumers ({})", blueprint.consumers.len());
        for (i, consumer) in blueprint.consumers.iter().enumerate() {
            let is_last = i == blueprint.consumers.len() - 1;
            let prefix = if is_last { "└─" } else { "├─" };
            if args.consumers {
                println!(
                    "   {} {} ({:?}, queue {}) {:?}",
                    prefix, consumer.name, consumer.sink_type, consumer.queue_capacity, consumer.params
                );
            } else {
                println!("   {} {} ({:?})", prefix, consumer.name, consumer.sink_type);
            }
        }
    }

    println!();
}
