//! Configuration management for ct-pyramid.
//!
//! This module provides the command-line interface:
//! - Command-line arguments via clap
//! - Environment variables with `CT_PYRAMID_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Example
//!
//! ```ignore
//! use ct_pyramid::config::{Cli, Command};
//!
//! match Cli::parse().into_command() {
//!     Command::Build(config) => println!("building {}", config.input.display()),
//!     Command::Plan(config) => println!("planning {}", config.input.display()),
//!     Command::Verify(config) => println!("verifying {}", config.output.display()),
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `CT_PYRAMID_INPUT` - Directory of level-0 slices
//! - `CT_PYRAMID_OUTPUT` - Pyramid output directory (default: `<input>/.thumbnail`)
//! - `CT_PYRAMID_MIN_DIMENSION` - Smallest width/height of a generated level (default: 1)
//! - `CT_PYRAMID_MAX_LEVELS` - Highest generated level index
//! - `CT_PYRAMID_FIT_WITHIN` - Stop once a level fits within this size (default: 500)
//! - `CT_PYRAMID_ENGINE` - `auto` or `reference` (default: auto)
//! - `CT_PYRAMID_WORKERS` - Pairs computed in parallel (default: available cores)
//! - `CT_PYRAMID_NO_RESUME` - Rebuild every level even if recorded

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::engine::EnginePreference;
use crate::pyramid::{default_workers, BuilderConfig, StopPolicy, DEFAULT_MIN_DIMENSION};

// =============================================================================
// Default Values
// =============================================================================

/// Output directory name created inside the input directory.
pub const DEFAULT_OUTPUT_DIR: &str = ".thumbnail";

/// Default size a level must fit within before the build stops.
pub const DEFAULT_FIT_WITHIN: u32 = 500;

/// Default interval between progress reports in milliseconds.
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 500;

/// Upper bound on worker count.
pub const MAX_WORKERS: usize = 1024;

// =============================================================================
// CLI Arguments
// =============================================================================

/// ct-pyramid - Multi-resolution pyramids for CT slice stacks.
///
/// Builds progressively smaller copies of a directory of CT slices, halving
/// slice count, width and height at every level.
#[derive(Parser, Debug, Clone)]
#[command(name = "ct-pyramid")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Build (or resume) the pyramid of a slice directory.
    Build(BuildConfig),

    /// Show the levels a build would generate without writing anything.
    Plan(PlanConfig),

    /// Check an existing pyramid against its manifest.
    Verify(VerifyConfig),
}

/// Stop policy options shared by `build` and `plan`.
#[derive(Args, Debug, Clone)]
pub struct PolicyArgs {
    /// Smallest width and height a generated level may have.
    #[arg(long, default_value_t = DEFAULT_MIN_DIMENSION, env = "CT_PYRAMID_MIN_DIMENSION")]
    pub min_dimension: u32,

    /// Highest level index to generate.
    #[arg(long, env = "CT_PYRAMID_MAX_LEVELS")]
    pub max_levels: Option<usize>,

    /// Stop once a generated level fits within this many pixels on both sides.
    #[arg(long, default_value_t = DEFAULT_FIT_WITHIN, env = "CT_PYRAMID_FIT_WITHIN")]
    pub fit_within: u32,

    /// Disable the fit-within rule.
    #[arg(long, default_value_t = false)]
    pub no_fit_within: bool,
}

impl PolicyArgs {
    pub fn policy(&self) -> StopPolicy {
        StopPolicy {
            min_dimension: self.min_dimension,
            max_levels: self.max_levels,
            fit_within: (!self.no_fit_within).then_some(self.fit_within),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct BuildConfig {
    /// Directory of level-0 slice images.
    #[arg(env = "CT_PYRAMID_INPUT")]
    pub input: PathBuf,

    /// Output directory for generated levels.
    ///
    /// Defaults to `.thumbnail` inside the input directory.
    #[arg(short, long, env = "CT_PYRAMID_OUTPUT")]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub policy: PolicyArgs,

    /// Engine selection: `auto` tries the fast engine and falls back.
    #[arg(long, value_enum, default_value_t = EnginePreference::Auto, env = "CT_PYRAMID_ENGINE")]
    pub engine: EnginePreference,

    /// Number of pairs computed in parallel.
    #[arg(short, long, default_value_t = default_workers(), env = "CT_PYRAMID_WORKERS")]
    pub workers: usize,

    /// Rebuild every level even if a previous run recorded it.
    #[arg(long, default_value_t = false, env = "CT_PYRAMID_NO_RESUME")]
    pub no_resume: bool,

    /// Milliseconds between progress reports.
    #[arg(long, default_value_t = DEFAULT_PROGRESS_INTERVAL_MS)]
    pub progress_interval: u64,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl BuildConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if !self.input.is_dir() {
            return Err(format!(
                "Input directory {} does not exist",
                self.input.display()
            ));
        }

        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(format!("workers must be between 1 and {}", MAX_WORKERS));
        }

        if self.progress_interval == 0 {
            return Err("progress_interval must be greater than 0".to_string());
        }

        self.policy.policy().validate()
    }

    /// Output directory, defaulting to `<input>/.thumbnail`.
    pub fn output_dir(&self) -> PathBuf {
        resolve_output(&self.input, self.output.as_deref())
    }

    pub fn builder_config(&self) -> BuilderConfig {
        BuilderConfig {
            policy: self.policy.policy(),
            engine: self.engine,
            workers: self.workers,
            resume: !self.no_resume,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct PlanConfig {
    /// Directory of level-0 slice images.
    #[arg(env = "CT_PYRAMID_INPUT")]
    pub input: PathBuf,

    #[command(flatten)]
    pub policy: PolicyArgs,

    /// Print the plan as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl PlanConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.input.is_dir() {
            return Err(format!(
                "Input directory {} does not exist",
                self.input.display()
            ));
        }
        self.policy.policy().validate()
    }
}

#[derive(Args, Debug, Clone)]
pub struct VerifyConfig {
    /// Pyramid output directory, or the input directory it was built in.
    #[arg(env = "CT_PYRAMID_OUTPUT")]
    pub output: PathBuf,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl VerifyConfig {
    /// The directory holding the manifest: `output` itself, or the default
    /// output directory inside it.
    pub fn pyramid_dir(&self) -> PathBuf {
        let nested = self.output.join(DEFAULT_OUTPUT_DIR);
        if nested.is_dir() && !self.output.join(crate::pyramid::MANIFEST_FILE).exists() {
            nested
        } else {
            self.output.clone()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.output.is_dir() {
            return Err(format!("Directory {} does not exist", self.output.display()));
        }
        Ok(())
    }
}

fn resolve_output(input: &Path, output: Option<&Path>) -> PathBuf {
    match output {
        Some(dir) => dir.to_path_buf(),
        None => input.join(DEFAULT_OUTPUT_DIR),
    }
}

// =============================================================================
// Tests
// =============================================================================
