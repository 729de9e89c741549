//! Engine fallback tests.
//!
//! Tests verify:
//! - A fast-engine failure mid-level yields a level fully rebuilt by the
//!   reference engine, identical to a reference-only run
//! - Fallback is decided per level; unavailability is sticky
//! - A level no engine can build ends the build with completed levels intact

use std::sync::Arc;

use tempfile::tempdir;

use ct_pyramid::error::{EngineError, LevelError, PairFailureReason};
use ct_pyramid::{
    BackendSelector, BuildFailure, BuildJob, DirectoryStore, Downsampler, PyramidBuilder,
    ReferenceDownsampler, Slice, FAST_ENGINE, REFERENCE_ENGINE,
};

use super::test_utils::{
    assert_same_levels, build_reference, build_with, config, level_files, write_gradient_stack,
    ScriptedEngine,
};

fn recorded_engines(output: &std::path::Path) -> Vec<String> {
    DirectoryStore::open(output)
        .unwrap()
        .manifest()
        .unwrap()
        .levels
        .into_iter()
        .map(|r| r.engine)
        .collect()
}

// =============================================================================
// Mid-Level Failure
// =============================================================================

#[tokio::test]
async fn test_fast_failure_mid_level_matches_reference_run() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("scan");
    write_gradient_stack(&input, 8, 16, 16);

    let fallback_out = dir.path().join("fallback");
    let reference_out = dir.path().join("reference");

    let report = build_with(
        &input,
        &fallback_out,
        config(1),
        vec![
            Arc::new(ScriptedEngine::new().fail_on_call(2)),
            Arc::new(ReferenceDownsampler::new()),
        ],
        &BuildJob::new(),
    )
    .await
    .unwrap();
    let reference = build_reference(&input, &reference_out, config(1))
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.pyramid.top_level(), reference.pyramid.top_level());
    assert_same_levels(&fallback_out, &reference_out, report.pyramid.top_level());

    let engines = recorded_engines(&fallback_out);
    assert_eq!(engines[0], REFERENCE_ENGINE);
    // The failure was a one-off, so later levels go back to the fast engine.
    assert!(engines[1..].iter().all(|e| e == FAST_ENGINE));
    assert_eq!(
        report.pyramid.level(1).unwrap().engine.as_deref(),
        Some(REFERENCE_ENGINE)
    );
}

#[tokio::test]
async fn test_unavailable_fast_engine_is_sticky() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("scan");
    let output = dir.path().join("pyramid");
    write_gradient_stack(&input, 4, 16, 16);

    let selector = BackendSelector::with_engines(vec![
        Arc::new(ScriptedEngine::new().unavailable()),
        Arc::new(ReferenceDownsampler::new()),
    ]);
    let builder = PyramidBuilder::with_selector(config(1), selector);
    let store = Arc::new(DirectoryStore::open(&output).unwrap());

    let report = builder
        .build_directory(&input, store, &BuildJob::new())
        .await
        .unwrap();

    assert!(report.is_complete());
    assert!(builder.selector().is_unavailable(FAST_ENGINE));
    assert!(recorded_engines(&output)
        .iter()
        .all(|e| e == REFERENCE_ENGINE));
}

// =============================================================================
// Unusable Engine Output
// =============================================================================

/// Returns the first input unchanged, violating the halving contract.
struct IdentityEngine;

impl Downsampler for IdentityEngine {
    fn name(&self) -> &'static str {
        FAST_ENGINE
    }

    fn combine(&self, a: &Slice, _b: &Slice) -> Result<Slice, EngineError> {
        Ok(a.clone())
    }
}

struct PanickingEngine;

impl Downsampler for PanickingEngine {
    fn name(&self) -> &'static str {
        FAST_ENGINE
    }

    fn combine(&self, _a: &Slice, _b: &Slice) -> Result<Slice, EngineError> {
        panic!("kernel crashed")
    }
}

#[tokio::test]
async fn test_wrong_shape_output_falls_back() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("scan");
    write_gradient_stack(&input, 4, 8, 8);

    let output = dir.path().join("pyramid");
    let reference_out = dir.path().join("reference");
    let mut cfg = config(1);
    cfg.policy.max_levels = Some(1);

    let report = build_with(
        &input,
        &output,
        cfg.clone(),
        vec![Arc::new(IdentityEngine), Arc::new(ReferenceDownsampler::new())],
        &BuildJob::new(),
    )
    .await
    .unwrap();
    build_reference(&input, &reference_out, cfg).await.unwrap();

    assert!(report.is_complete());
    assert_same_levels(&output, &reference_out, 1);
}

#[tokio::test]
async fn test_panicking_engine_falls_back() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("scan");
    write_gradient_stack(&input, 4, 8, 8);

    let output = dir.path().join("pyramid");
    let report = build_with(
        &input,
        &output,
        config(1),
        vec![Arc::new(PanickingEngine), Arc::new(ReferenceDownsampler::new())],
        &BuildJob::new(),
    )
    .await
    .unwrap();

    assert!(report.is_complete());
    assert!(recorded_engines(&output)
        .iter()
        .all(|e| e == REFERENCE_ENGINE));
}

// =============================================================================
// Level Failure
// =============================================================================

#[tokio::test]
async fn test_both_engines_fail_first_level() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("scan");
    let output = dir.path().join("pyramid");
    write_gradient_stack(&input, 4, 16, 16);

    let report = build_with(
        &input,
        &output,
        config(1),
        vec![
            Arc::new(ScriptedEngine::new().fail_on_width(16)),
            Arc::new(ScriptedEngine::named(REFERENCE_ENGINE).fail_on_width(16)),
        ],
        &BuildJob::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.pyramid.top_level(), 0);
    match report.failure {
        Some(BuildFailure::LevelFailure { level, attempts }) => {
            assert_eq!(level, 1);
            assert_eq!(attempts.len(), 2);
            for attempt in &attempts {
                match attempt {
                    LevelError::PartiallyFailed { failures, .. } => {
                        assert_eq!(failures.len(), 2);
                        assert!(matches!(failures[0].reason, PairFailureReason::Compute(_)));
                    }
                    other => panic!("unexpected attempt error: {:?}", other),
                }
            }
        }
        other => panic!("expected level failure, got {:?}", other),
    }

    assert!(level_files(&output, 1).is_empty());
    assert!(recorded_engines(&output).is_empty());
}

#[tokio::test]
async fn test_failure_keeps_completed_levels() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("scan");
    let output = dir.path().join("pyramid");
    write_gradient_stack(&input, 4, 16, 16);

    // Level 2 is built from 8-pixel-wide slices.
    let report = build_with(
        &input,
        &output,
        config(1),
        vec![
            Arc::new(ScriptedEngine::new().fail_on_width(8)),
            Arc::new(ScriptedEngine::named(REFERENCE_ENGINE).fail_on_width(8)),
        ],
        &BuildJob::new(),
    )
    .await
    .unwrap();

    assert!(!report.is_complete());
    assert_eq!(report.pyramid.top_level(), 1);
    assert_eq!(report.failure.as_ref().map(|f| f.level()), Some(2));

    let store = DirectoryStore::open(&output).unwrap();
    let verified = store.verify().unwrap();
    assert_eq!(verified.len(), 1);
    assert!(level_files(&output, 2).is_empty());
}

#[tokio::test]
async fn test_no_engine_available() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("scan");
    write_gradient_stack(&input, 2, 4, 4);

    let report = build_with(
        &input,
        &dir.path().join("pyramid"),
        config(1),
        vec![Arc::new(ScriptedEngine::new().unavailable())],
        &BuildJob::new(),
    )
    .await
    .unwrap();

    match report.failure {
        Some(BuildFailure::LevelFailure { level: 1, attempts }) => {
            assert!(matches!(attempts[0], LevelError::EngineUnavailable(_)));
        }
        other => panic!("expected level failure, got {:?}", other),
    }
}
