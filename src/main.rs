//! ct-pyramid - Multi-resolution pyramids for CT slice stacks.
//!
//! This binary builds, plans and verifies pyramids from the command line.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ct_pyramid::{
    config::{BuildConfig, Cli, Command, PlanConfig, VerifyConfig},
    plan_levels, BuildFailure, BuildHandle, BuildReport, DirectoryStore, LevelSource,
    ProgressSnapshot, PyramidBuilder,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Build(config) => run_build(config).await,
        Command::Plan(config) => run_plan(config),
        Command::Verify(config) => run_verify(config),
    }
}

// =============================================================================
// Build Command
// =============================================================================

async fn run_build(config: BuildConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let output = config.output_dir();
    let builder_config = config.builder_config();

    info!("Configuration:");
    info!("  Input: {}", config.input.display());
    info!("  Output: {}", output.display());
    info!("  Engine: {:?}", builder_config.engine);
    info!("  Workers: {}", builder_config.workers);
    info!(
        "  Stop: min dimension {}, max levels {}, fit within {}",
        builder_config.policy.min_dimension,
        builder_config
            .policy
            .max_levels
            .map_or_else(|| "unlimited".to_string(), |n| n.to_string()),
        builder_config
            .policy
            .fit_within
            .map_or_else(|| "off".to_string(), |n| n.to_string())
    );
    info!("  Resume: {}", builder_config.resume);

    let source = match LevelSource::open_directory(&config.input) {
        Ok(source) => source,
        Err(e) => {
            error!("Cannot use {} as level 0: {}", config.input.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let store = match DirectoryStore::open(&output) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Cannot open output directory: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let handle = PyramidBuilder::new(builder_config).start(source, store);
    watch(&handle, Duration::from_millis(config.progress_interval)).await;

    match handle.wait().await {
        Ok(report) => finish(report),
        Err(e) => {
            error!("Build failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Report progress until the build ends, cancelling it on Ctrl-C.
async fn watch(handle: &BuildHandle, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    while !handle.is_finished() {
        tokio::select! {
            _ = ticker.tick() => report_progress(&handle.progress()),
            result = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                match result {
                    Ok(()) => {
                        warn!("Interrupted, finishing in-flight pairs before stopping");
                        handle.cancel();
                    }
                    Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
                }
            }
        }
    }
}

fn report_progress(snapshot: &ProgressSnapshot) {
    if snapshot.level == 0 {
        return;
    }
    let eta = snapshot
        .eta
        .map(format_duration)
        .unwrap_or_else(|| "estimating".to_string());
    info!(
        "Level {}: {}/{} pair(s), {:.1}% overall, elapsed {}, ETA {}",
        snapshot.level,
        snapshot.pairs_done,
        snapshot.pairs_total,
        snapshot.percent,
        format_duration(snapshot.elapsed),
        eta
    );
}

/// `1h02m03s`, `2m03s` or `3s`.
fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, secs / 60 % 60, secs % 60);
    if h > 0 {
        format!("{}h{:02}m{:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m{:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

fn finish(report: BuildReport) -> ExitCode {
    info!("");
    info!("────────────────────────────────────────────────────────────────");
    for level in report.pyramid.levels() {
        info!(
            "  Level {}: {} slice(s) of {} in {}{}",
            level.index,
            level.count,
            level.shape,
            level.directory.display(),
            level
                .engine
                .as_deref()
                .map(|e| format!(" [{}]", e))
                .unwrap_or_default()
        );
    }
    info!("────────────────────────────────────────────────────────────────");

    match report.failure {
        None => {
            info!("Pyramid complete");
            ExitCode::SUCCESS
        }
        Some(BuildFailure::Cancelled { level }) => {
            warn!(
                "Cancelled while building level {}; levels 0..={} are usable",
                level,
                report.pyramid.top_level()
            );
            ExitCode::FAILURE
        }
        Some(failure) => {
            error!("{}", failure);
            if let BuildFailure::LevelFailure { attempts, .. } = &failure {
                for attempt in attempts {
                    error!("  {}", attempt);
                }
            }
            error!("Levels 0..={} are usable", report.pyramid.top_level());
            ExitCode::FAILURE
        }
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "ct_pyramid=debug"
    } else {
        "ct_pyramid=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Plan Command
// =============================================================================

fn run_plan(config: PlanConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let source = match LevelSource::open_directory(&config.input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let plan = plan_levels(source.shape(), source.len(), &config.policy.policy());

    if config.json {
        let json = serde_json::json!({
            "source": {
                "shape": source.shape(),
                "count": source.len(),
            },
            "levels": plan,
        });
        return match serde_json::to_string_pretty(&json) {
            Ok(text) => {
                println!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    println!("Level 0: {} slice(s) of {}", source.len(), source.shape());
    if plan.is_empty() {
        println!("  (no levels would be generated)");
    }
    for level in &plan {
        println!(
            "Level {}: {} slice(s) of {}",
            level.level, level.count, level.shape
        );
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Verify Command
// =============================================================================

fn run_verify(config: VerifyConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let dir = config.pyramid_dir();
    println!("Verifying {}", dir.display());
    println!("═════════════════════════════════");

    let store = match DirectoryStore::open(&dir) {
        Ok(store) => store,
        Err(e) => {
            println!("✗ {}", e);
            return ExitCode::FAILURE;
        }
    };

    match store.verify() {
        Ok(levels) => {
            for record in &levels {
                println!(
                    "✓ Level {}: {} slice(s) of {} [{}]",
                    record.level,
                    record.count,
                    record.shape(),
                    record.engine
                );
            }
            println!("═════════════════════════════════");
            println!("✓ {} level(s) verified", levels.len());
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("✗ {}", e);
            ExitCode::FAILURE
        }
    }
}
