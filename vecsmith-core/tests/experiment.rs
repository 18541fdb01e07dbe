//! Experiment driver over the fixture source with a scripted verifier.

mod common;

use std::path::Path;
use std::sync::Arc;

use common::{SAMPLE, ScriptedVerifier, fast_retry, mismatching, passing, vector_candidate};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use vecsmith_core::{
    ExperimentDriver, FunctionSelection, MockLlmProvider, VecsmithConfig, WorkspaceContext,
};

fn config(dir: &Path, source: &Path) -> VecsmithConfig {
    let mut config = VecsmithConfig::default();
    config.retry = fast_retry();
    config.benchmark.source = source.to_path_buf();
    config.benchmark.support_dir = dir.to_path_buf();
    config.experiment.max_iterations = 2;
    config.experiment.inter_function_delay_ms = 0;
    config.experiment.output_dir = dir.join("out");
    config
}

fn write_sample(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("tsvc.c");
    std::fs::write(&path, SAMPLE).unwrap();
    path
}

fn load(path: &Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_named_run_writes_results_and_aggregate() {
    let dir = TempDir::new().unwrap();
    let source = write_sample(dir.path());
    let config = config(dir.path(), &source);
    let workspace = WorkspaceContext::new(&config.experiment.output_dir);

    let provider = Arc::new(MockLlmProvider::new());
    provider.queue_text(&vector_candidate("s112"));
    provider.queue_text(&vector_candidate("s1113"));
    provider.queue_text(&vector_candidate("s1113"));
    let verifier = Arc::new(ScriptedVerifier::new(vec![
        passing("s112"),
        mismatching("s1113"),
        mismatching("s1113"),
    ]));

    let driver = ExperimentDriver::new(config, provider, verifier.clone(), workspace.clone());
    let selection = FunctionSelection::Named(vec![
        "s112".to_string(),
        "s9999".to_string(),
        "s1113".to_string(),
    ]);
    let report = driver.run(&selection).await.unwrap();

    let functions: Vec<&str> = report.results.iter().map(|r| r.function.as_str()).collect();
    assert_eq!(functions, vec!["s112", "s1113"]);
    assert_eq!(verifier.functions(), vec!["s112", "s1113", "s1113"]);
    assert_eq!(report.summary.total, 2);
    assert_eq!(report.summary.successful, 1);
    assert_eq!(report.summary.improved, 1);
    assert_eq!(report.summary.by_error_type.get("correctness"), Some(&1));
    assert_eq!(report.model, "mock-model");
    assert_eq!(report.max_iterations, 2);

    assert!(workspace.result_path("s112").exists());
    assert!(workspace.result_path("s1113").exists());
    assert!(!workspace.result_path("s9999").exists());
    assert!(!workspace.scratch_dir().exists());

    let aggregate = load(&workspace.aggregate_path());
    assert_eq!(aggregate["experiment"], "TSVC_vectorization");
    assert_eq!(aggregate["results"].as_array().unwrap().len(), 2);
    assert_eq!(aggregate["results"][1]["total_iterations"], 2);
    assert_eq!(aggregate["summary"]["by_category"]["linear_dependence"]["total"], 2);

    let per_function = load(&workspace.result_path("s112"));
    assert_eq!(per_function["success"], true);
    assert_eq!(per_function["speedup_status"], "improved");

    let rendered = report.render_summary();
    assert!(rendered.contains("Overall: 1/2 functions successfully vectorized"));
    assert!(rendered.contains("FAILED [correctness]"));
}

#[tokio::test]
async fn test_all_selection_follows_source_order() {
    let dir = TempDir::new().unwrap();
    let source = write_sample(dir.path());
    let mut config = config(dir.path(), &source);
    config.experiment.max_iterations = 1;
    let workspace = WorkspaceContext::new(&config.experiment.output_dir);

    // The mock's fallback reply has no intrinsics, so nothing reaches the verifier.
    let provider = Arc::new(MockLlmProvider::new());
    let verifier = Arc::new(ScriptedVerifier::default());
    let driver = ExperimentDriver::new(config, provider.clone(), verifier.clone(), workspace);

    let report = driver.run(&FunctionSelection::All).await.unwrap();

    let functions: Vec<&str> = report.results.iter().map(|r| r.function.as_str()).collect();
    assert_eq!(functions, vec!["s112", "s1113", "s2233", "s242", "s258", "s31111", "s318"]);
    assert_eq!(verifier.calls(), 0);
    assert_eq!(provider.call_count(), 7);
    assert_eq!(report.summary.by_error_type.get("not_vectorized"), Some(&7));
}

#[tokio::test]
async fn test_missing_source_yields_empty_aggregate() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path(), &dir.path().join("missing.c"));
    let workspace = WorkspaceContext::new(&config.experiment.output_dir);
    let provider = Arc::new(MockLlmProvider::new());

    let driver = ExperimentDriver::new(
        config,
        provider.clone(),
        Arc::new(ScriptedVerifier::default()),
        workspace.clone(),
    );
    let report = driver.run(&FunctionSelection::Curated).await.unwrap();

    assert!(report.results.is_empty());
    assert_eq!(report.summary.total, 0);
    assert_eq!(provider.call_count(), 0);
    let aggregate = load(&workspace.aggregate_path());
    assert_eq!(aggregate["results"], serde_json::json!([]));
    assert!(!workspace.scratch_dir().exists());
}

#[tokio::test]
async fn test_unwritable_result_file_still_produces_aggregate() {
    let dir = TempDir::new().unwrap();
    let source = write_sample(dir.path());
    let mut config = config(dir.path(), &source);
    config.experiment.clean_output = false;
    let workspace = WorkspaceContext::new(&config.experiment.output_dir);
    workspace.prepare(false).unwrap();
    // A directory where the result file belongs makes the final rename fail.
    std::fs::create_dir_all(workspace.result_path("s112")).unwrap();

    let provider = Arc::new(MockLlmProvider::new());
    provider.queue_text(&vector_candidate("s112"));
    provider.queue_text(&vector_candidate("s1113"));
    let verifier = Arc::new(ScriptedVerifier::new(vec![passing("s112"), passing("s1113")]));

    let driver = ExperimentDriver::new(config, provider, verifier, workspace.clone());
    let report = driver
        .run(&FunctionSelection::Named(vec!["s112".into(), "s1113".into()]))
        .await
        .unwrap();

    assert_eq!(report.results.len(), 2);
    assert!(workspace.result_path("s112").is_dir());
    assert!(workspace.result_path("s1113").is_file());
    let aggregate = load(&workspace.aggregate_path());
    assert_eq!(aggregate["results"].as_array().unwrap().len(), 2);
    assert!(!workspace.scratch_dir().exists());
}

#[tokio::test]
async fn test_verifier_failure_skips_only_that_function() {
    let dir = TempDir::new().unwrap();
    let source = write_sample(dir.path());
    let config = config(dir.path(), &source);
    let workspace = WorkspaceContext::new(&config.experiment.output_dir);

    let provider = Arc::new(MockLlmProvider::new());
    provider.queue_text(&vector_candidate("s112"));
    provider.queue_text(&vector_candidate("s1113"));
    // One scripted output: the second function's build reports a spawn failure.
    let verifier = Arc::new(ScriptedVerifier::new(vec![passing("s112")]));

    let driver = ExperimentDriver::new(config, provider, verifier, workspace.clone());
    let report = driver
        .run(&FunctionSelection::Named(vec!["s112".into(), "s1113".into()]))
        .await
        .unwrap();

    assert_eq!(report.results.len(), 1);
    assert!(report.results[0].success);
    assert!(!workspace.result_path("s1113").exists());
    assert!(workspace.aggregate_path().exists());
}

#[tokio::test]
async fn test_preflight_surfaces_environment_errors() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path(), &dir.path().join("tsvc.c"));
    let driver = ExperimentDriver::new(
        config,
        Arc::new(MockLlmProvider::new()),
        Arc::new(ScriptedVerifier::failing_preflight("not installed")),
        WorkspaceContext::new(dir.path().join("out")),
    );
    let err = driver.preflight().await.unwrap_err();
    assert!(err.to_string().contains("not installed"));
}
