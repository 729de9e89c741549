//! Resume and verification tests.
//!
//! Tests verify:
//! - Recorded levels are reused instead of recomputed
//! - An interrupted or damaged level keeps its finished slices and only the
//!   missing pairs are computed; everything above it is rebuilt
//! - A changed source invalidates the previous pyramid
//! - Verification catches missing and mismatched slices

use std::fs;
use std::sync::Arc;

use tempfile::tempdir;

use ct_pyramid::error::SliceError;
use ct_pyramid::{BuildJob, DirectoryStore, Downsampler, REFERENCE_ENGINE};

use super::test_utils::{
    assert_same_levels, build_reference, build_with, complete_files, config, slice_path,
    write_gradient_stack, ScriptedEngine,
};

/// Build `input` into `output` with a counting reference engine; returns the
/// number of pairs computed.
async fn counted_build(
    input: &std::path::Path,
    output: &std::path::Path,
    cfg: ct_pyramid::BuilderConfig,
) -> (ct_pyramid::BuildReport, usize) {
    let engine = Arc::new(ScriptedEngine::named(REFERENCE_ENGINE));
    let report = build_with(input, output, cfg, vec![engine.clone()], &BuildJob::new())
        .await
        .unwrap();
    (report, engine.calls())
}

#[tokio::test]
async fn test_resume_reuses_every_level() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("scan");
    let output = dir.path().join("pyramid");
    write_gradient_stack(&input, 8, 16, 16);

    let first = build_reference(&input, &output, config(1)).await.unwrap();
    let (second, calls) = counted_build(&input, &output, config(1)).await;

    assert_eq!(calls, 0);
    assert!(second.is_complete());
    assert_eq!(second.pyramid.levels(), first.pyramid.levels());
}

#[tokio::test]
async fn test_resume_extends_pyramid() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("scan");
    let output = dir.path().join("pyramid");
    let fresh = dir.path().join("fresh");
    write_gradient_stack(&input, 8, 16, 16);

    let mut limited = config(1);
    limited.policy.max_levels = Some(1);
    build_reference(&input, &output, limited).await.unwrap();

    let (report, calls) = counted_build(&input, &output, config(1)).await;
    // Levels 2, 3 and 4 have 2, 1 and 1 pairs.
    assert_eq!(calls, 4);
    assert_eq!(report.pyramid.top_level(), 4);

    build_reference(&input, &fresh, config(1)).await.unwrap();
    assert_same_levels(&output, &fresh, 4);
}

#[tokio::test]
async fn test_no_resume_rebuilds_everything() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("scan");
    let output = dir.path().join("pyramid");
    write_gradient_stack(&input, 8, 16, 16);

    build_reference(&input, &output, config(1)).await.unwrap();

    let mut cfg = config(1);
    cfg.resume = false;
    let (_, calls) = counted_build(&input, &output, cfg).await;
    assert_eq!(calls, 4 + 2 + 1 + 1);
}

#[tokio::test]
async fn test_damaged_level_is_rebuilt() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("scan");
    let output = dir.path().join("pyramid");
    write_gradient_stack(&input, 8, 16, 16);

    build_reference(&input, &output, config(1)).await.unwrap();
    fs::remove_file(slice_path(&output, 2, 1)).unwrap();

    let (report, calls) = counted_build(&input, &output, config(1)).await;
    assert!(report.is_complete());
    // The missing slice of level 2, then levels 3 and 4 in full.
    assert_eq!(calls, 1 + 1 + 1);
    assert_eq!(complete_files(&output, 2).len(), 2);
    assert_eq!(DirectoryStore::open(&output).unwrap().verify().unwrap().len(), 4);
}

#[tokio::test]
async fn test_resume_after_cancel() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("scan");
    let output = dir.path().join("pyramid");
    let fresh = dir.path().join("fresh");
    write_gradient_stack(&input, 8, 16, 16);

    let job = BuildJob::new();
    let mut cfg = config(1);
    cfg.workers = 1;
    // Pairs 0, 1 and 2 are written; the fourth combine cancels.
    let cancelled = build_with(
        &input,
        &output,
        cfg,
        vec![Arc::new(
            ScriptedEngine::named(REFERENCE_ENGINE).cancel_on_call(4, job.cancel.clone()),
        )],
        &job,
    )
    .await
    .unwrap();
    assert!(!cancelled.is_complete());
    assert_eq!(complete_files(&output, 1).len(), 3);

    let (report, calls) = counted_build(&input, &output, config(1)).await;
    assert!(report.is_complete());
    // One missing pair of level 1, then levels 2, 3 and 4.
    assert_eq!(calls, 1 + 2 + 1 + 1);

    build_reference(&input, &fresh, config(1)).await.unwrap();
    assert_same_levels(&output, &fresh, 4);
}

#[tokio::test]
async fn test_resume_after_cancel_in_upper_level() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("scan");
    let output = dir.path().join("pyramid");
    write_gradient_stack(&input, 16, 16, 16);

    let job = BuildJob::new();
    let mut cfg = config(1);
    cfg.workers = 1;
    // Level 1 takes calls 1-8, level 2 pairs 0 and 1 are written, call 11 cancels.
    build_with(
        &input,
        &output,
        cfg,
        vec![Arc::new(
            ScriptedEngine::named(REFERENCE_ENGINE).cancel_on_call(11, job.cancel.clone()),
        )],
        &job,
    )
    .await
    .unwrap();

    let (report, calls) = counted_build(&input, &output, config(1)).await;
    assert!(report.is_complete());
    assert_eq!(calls, 2 + 2 + 1);
    assert_eq!(report.pyramid.top_level(), 4);
}

#[tokio::test]
async fn test_no_resume_discards_interrupted_level() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("scan");
    let output = dir.path().join("pyramid");
    write_gradient_stack(&input, 8, 16, 16);

    let job = BuildJob::new();
    let mut cfg = config(1);
    cfg.workers = 1;
    build_with(
        &input,
        &output,
        cfg,
        vec![Arc::new(
            ScriptedEngine::named(REFERENCE_ENGINE).cancel_on_call(3, job.cancel.clone()),
        )],
        &job,
    )
    .await
    .unwrap();

    let mut cfg = config(1);
    cfg.resume = false;
    let (_, calls) = counted_build(&input, &output, cfg).await;
    assert_eq!(calls, 4 + 2 + 1 + 1);
}

#[tokio::test]
async fn test_interrupted_level_of_other_source_is_not_kept() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("scan");
    let output = dir.path().join("pyramid");
    write_gradient_stack(&input, 8, 16, 16);

    let job = BuildJob::new();
    let mut cfg = config(1);
    cfg.workers = 1;
    build_with(
        &input,
        &output,
        cfg,
        vec![Arc::new(
            ScriptedEngine::named(REFERENCE_ENGINE).cancel_on_call(3, job.cancel.clone()),
        )],
        &job,
    )
    .await
    .unwrap();
    assert!(!complete_files(&output, 1).is_empty());

    write_gradient_stack(&input, 10, 16, 16);
    let (_, calls) = counted_build(&input, &output, config(1)).await;
    assert_eq!(calls, 5 + 3 + 2 + 1);
}

#[tokio::test]
async fn test_fallback_while_resuming_rebuilds_whole_level() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("scan");
    let output = dir.path().join("pyramid");
    let fresh = dir.path().join("fresh");
    write_gradient_stack(&input, 8, 16, 16);

    let mut cfg = config(1);
    cfg.workers = 1;
    cfg.policy.max_levels = Some(1);

    let job = BuildJob::new();
    build_with(
        &input,
        &output,
        cfg.clone(),
        vec![Arc::new(
            ScriptedEngine::named(REFERENCE_ENGINE).cancel_on_call(3, job.cancel.clone()),
        )],
        &job,
    )
    .await
    .unwrap();
    assert_eq!(complete_files(&output, 1).len(), 2);

    // The fast engine fails one of the two missing pairs, so the level is
    // discarded and the reference engine redoes all of it.
    let reference = Arc::new(ScriptedEngine::named(REFERENCE_ENGINE));
    let engines: Vec<Arc<dyn Downsampler>> = vec![
        Arc::new(ScriptedEngine::new().fail_on_call(1)),
        reference.clone(),
    ];
    let report = build_with(&input, &output, cfg.clone(), engines, &BuildJob::new())
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(reference.calls(), 4);
    assert_eq!(
        report.pyramid.level(1).unwrap().engine.as_deref(),
        Some(REFERENCE_ENGINE)
    );

    build_reference(&input, &fresh, cfg).await.unwrap();
    assert_same_levels(&output, &fresh, 1);
}

#[tokio::test]
async fn test_changed_source_is_rebuilt() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("scan");
    let output = dir.path().join("pyramid");
    write_gradient_stack(&input, 8, 16, 16);

    build_reference(&input, &output, config(1)).await.unwrap();
    write_gradient_stack(&input, 10, 16, 16);

    let (report, calls) = counted_build(&input, &output, config(1)).await;
    assert_eq!(calls, 5 + 3 + 2 + 1);
    assert_eq!(report.pyramid.level(1).unwrap().count, 5);
}

// =============================================================================
// Verification
// =============================================================================

#[tokio::test]
async fn test_verify_after_build() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("scan");
    let output = dir.path().join("pyramid");
    write_gradient_stack(&input, 5, 12, 10);

    let report = build_reference(&input, &output, config(1)).await.unwrap();

    let store = DirectoryStore::open(&output).unwrap();
    let verified = store.verify().unwrap();
    assert_eq!(verified.len(), report.pyramid.top_level());
    for (record, level) in verified.iter().zip(&report.pyramid.levels()[1..]) {
        assert_eq!(record.shape(), level.shape);
        assert_eq!(record.count, level.count);
    }
}

#[tokio::test]
async fn test_verify_detects_wrong_shape() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("scan");
    let output = dir.path().join("pyramid");
    write_gradient_stack(&input, 4, 8, 8);

    build_reference(&input, &output, config(1)).await.unwrap();
    image::GrayImage::new(3, 3)
        .save(slice_path(&output, 1, 0))
        .unwrap();

    let store = DirectoryStore::open(&output).unwrap();
    assert!(matches!(
        store.verify(),
        Err(SliceError::InconsistentLevel { .. })
    ));
}

#[tokio::test]
async fn test_verify_ignores_foreign_files() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("scan");
    let output = dir.path().join("pyramid");
    write_gradient_stack(&input, 4, 8, 8);

    build_reference(&input, &output, config(1)).await.unwrap();
    fs::write(output.join("1").join("notes.txt"), b"hello").unwrap();
    fs::write(output.join("1").join("000009.tif.part"), b"partial").unwrap();

    let store = DirectoryStore::open(&output).unwrap();
    assert_eq!(store.verify().unwrap().len(), 3);
}

#[tokio::test]
async fn test_verify_without_manifest() {
    let dir = tempdir().unwrap();
    let store = DirectoryStore::open(dir.path()).unwrap();
    assert!(matches!(store.verify(), Err(SliceError::Manifest(_))));
}
