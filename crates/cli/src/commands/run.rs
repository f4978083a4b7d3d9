//! `run` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::cli::RunArgs;
use crate::pipeline::{Pipeline, PipelineConfig, VerificationInputs};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    let inputs = VerificationInputs::load(&args.config)
        .with_context(|| format!("Failed to load inputs for {}", args.config.display()))?;

    let blueprint = &inputs.blueprint;
    info!(
        data_types = ?inputs.data_types,
        sources = blueprint.sources.len(),
        consumers = blueprint.consumers.len(),
        feedback = ?blueprint.feedback.types,
        report_type = ?blueprint.verification.report_type,
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&inputs);
        return Ok(());
    }

    let pipeline_config = PipelineConfig {
        inputs,
        timeout: if args.timeout == 0 {
            None
        } else {
            Some(Duration::from_secs(args.timeout))
        },
        buffer_size: args.buffer_size,
        metrics_port: if args.metrics_port == 0 {
            None
        } else {
            Some(args.metrics_port)
        },
        report_path: args.report.clone(),
    };

    let pipeline = Pipeline::new(pipeline_config);

    info!("Starting verification...");

    let stats = pipeline
        .run(shutdown_signal())
        .await
        .context("Verification failed")?;

    if stats.interrupted {
        warn!("Verification stopped before all sources finished");
    }
    info!(
        frames_verified = stats.frames_verified(),
        bad_frames = stats.bad_frames(),
        missing_frames = stats.missing_frames(),
        duration_secs = stats.duration.as_secs_f64(),
        fps = format!("{:.2}", stats.fps()),
        "Verification completed"
    );

    stats.print_summary();

    info!("Frame Verifier finished");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(inputs: &VerificationInputs) {
    let blueprint = &inputs.blueprint;
    let verification = &blueprint.verification;

    println!("\n=== Configuration Summary ===\n");
    println!("Verification:");
    println!("  Limits: {}", verification.limits.display());
    println!("  Quality checks: {}", verification.quality_checks.display());
    println!("  Mode: {:?}", verification.aggregate_mode());
    println!("  Report: {:?}", verification.report_type);

    println!("\nData types ({}):", inputs.data_types.len());
    for data_type in &inputs.data_types {
        let checks: Vec<String> = inputs
            .registry
            .basic_checks(data_type)
            .iter()
            .copied()
            .chain(inputs.registry.statistical_checks(data_type))
            .map(|c| c.to_string())
            .collect();
        println!("  - {}: {}", data_type, checks.join(", "));
    }

    println!("\nSources ({}):", blueprint.sources.len());
    for source in &blueprint.sources {
        println!("  - {} ({})", source.data_type, super::source_kind(&source.kind));
    }

    if !blueprint.consumers.is_empty() {
        println!("\nConsumers ({}):", blueprint.consumers.len());
        for consumer in &blueprint.consumers {
            println!("  - {} ({:?})", consumer.name, consumer.sink_type);
        }
    }

    if blueprint.feedback.is_enabled() {
        println!("\nFeedback: {:?}", blueprint.feedback.types);
    }

    println!();
}
