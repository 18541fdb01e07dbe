//! Experiment driver: runs the repair loop over a set of functions.
//!
//! Functions are processed strictly one after another. A function that is
//! missing from the source, or whose loop fails for environmental reasons,
//! is logged and skipped; the aggregate report is always written.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agent::GenerationAgent;
use crate::brain::LlmProvider;
use crate::classifier::{OutcomeClassifier, SpeedupStatus};
use crate::config::VecsmithConfig;
use crate::error::{EnvironmentError, VecsmithError};
use crate::extractor::{FunctionExtractor, curated_function_names};
use crate::harness::HarnessSynthesizer;
use crate::repair::{FunctionResult, NoOpObserver, RepairLoop, RepairObserver, RepairSettings};
use crate::verifier::{Alive2Verifier, Verify};
use crate::workspace::{WorkspaceContext, write_json};

/// Which functions a run processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionSelection {
    /// The curated default table.
    Curated,
    /// Every benchmark function in the source, in source order.
    All,
    Named(Vec<String>),
}

impl FunctionSelection {
    /// Named functions if any were given, otherwise the curated set.
    pub fn from_names(names: Vec<String>) -> Self {
        if names.is_empty() {
            FunctionSelection::Curated
        } else {
            FunctionSelection::Named(names)
        }
    }

    pub fn resolve(&self, extractor: &FunctionExtractor, source: &str) -> Vec<String> {
        match self {
            FunctionSelection::Curated => curated_function_names(),
            FunctionSelection::All => extractor.list_functions(source),
            FunctionSelection::Named(names) => names.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CategoryStats {
    pub total: usize,
    pub successful: usize,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExperimentSummary {
    pub total: usize,
    pub successful: usize,
    pub improved: usize,
    pub no_improvement: usize,
    pub failed: usize,
    pub by_error_type: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, CategoryStats>,
}

impl ExperimentSummary {
    pub fn from_results(results: &[FunctionResult]) -> Self {
        let mut summary = ExperimentSummary {
            total: results.len(),
            ..Default::default()
        };
        for result in results {
            let stats = summary
                .by_category
                .entry(result.category.clone())
                .or_default();
            stats.total += 1;
            if result.success {
                summary.successful += 1;
                stats.successful += 1;
                match result.speedup_status {
                    Some(SpeedupStatus::Improved) => summary.improved += 1,
                    _ => summary.no_improvement += 1,
                }
            } else {
                summary.failed += 1;
                let error_type = result.final_error_type().unwrap_or("no_attempts");
                *summary
                    .by_error_type
                    .entry(error_type.to_string())
                    .or_default() += 1;
            }
        }
        for stats in summary.by_category.values_mut() {
            stats.success_rate = stats.successful as f64 / stats.total as f64;
        }
        summary
    }
}

/// One run, as written to `vectorization_results.json`.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentReport {
    pub experiment: String,
    pub run_id: Uuid,
    pub model: String,
    pub provider: String,
    pub temperature: f32,
    pub max_iterations: u32,
    pub seed: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<FunctionResult>,
    pub summary: ExperimentSummary,
}

fn status_label(result: &FunctionResult) -> String {
    if !result.success {
        return match result.final_error_type() {
            Some(error_type) => format!("FAILED [{}]", error_type),
            None => "FAILED".to_string(),
        };
    }
    match result.speedup_status {
        Some(SpeedupStatus::Improved) => "SUCCESS (IMPROVED)".to_string(),
        Some(SpeedupStatus::NoImprovement) => "SUCCESS (NO SPEEDUP)".to_string(),
        None => "SUCCESS".to_string(),
    }
}

impl ExperimentReport {
    /// Console summary printed at the end of a run.
    pub fn render_summary(&self) -> String {
        let rule = "=".repeat(60);
        let mut out = format!("\n{rule}\nTSVC VECTORIZATION SUMMARY\n{rule}\n");
        out.push_str(&format!(
            "\nOverall: {}/{} functions successfully vectorized\n",
            self.summary.successful, self.summary.total
        ));

        out.push_str("\nBy Function:\n");
        for result in &self.results {
            let perf = match result.speedup() {
                Some(s) if s > 1.0 => format!(" (Speedup: {:.2}x)", s),
                Some(s) => format!(" (Speedup: {:.2}x - NO IMPROVEMENT)", s),
                None => String::new(),
            };
            out.push_str(&format!(
                "  {:6}: {}{}\n",
                result.function,
                status_label(result),
                perf
            ));
        }

        if !self.summary.by_category.is_empty() {
            out.push_str("\nBy Category:\n");
            for (category, stats) in &self.summary.by_category {
                out.push_str(&format!(
                    "  {}: {}/{} ({:.1}%)\n",
                    category,
                    stats.successful,
                    stats.total,
                    stats.success_rate * 100.0
                ));
            }
        }
        out
    }
}

/// Drives one experiment run.
pub struct ExperimentDriver {
    config: VecsmithConfig,
    provider: Arc<dyn LlmProvider>,
    verifier: Arc<dyn Verify>,
    workspace: WorkspaceContext,
    observer: Arc<dyn RepairObserver>,
}

impl ExperimentDriver {
    pub fn new(
        config: VecsmithConfig,
        provider: Arc<dyn LlmProvider>,
        verifier: Arc<dyn Verify>,
        workspace: WorkspaceContext,
    ) -> Self {
        Self {
            config,
            provider,
            verifier,
            workspace,
            observer: Arc::new(NoOpObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RepairObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn workspace(&self) -> &WorkspaceContext {
        &self.workspace
    }

    pub async fn preflight(&self) -> Result<(), EnvironmentError> {
        self.verifier.preflight().await
    }

    fn report(&self, started_at: DateTime<Utc>, results: Vec<FunctionResult>) -> ExperimentReport {
        ExperimentReport {
            experiment: self.config.experiment.name.clone(),
            run_id: Uuid::new_v4(),
            model: self.provider.model_name().to_string(),
            provider: self.provider.provider_name().to_string(),
            temperature: self.config.llm.temperature,
            max_iterations: self.config.experiment.max_iterations,
            seed: self.config.llm.seed,
            started_at,
            finished_at: Utc::now(),
            summary: ExperimentSummary::from_results(&results),
            results,
        }
    }

    fn repair_loop(&self, reference: String) -> RepairLoop {
        let agent = GenerationAgent::new(
            self.provider.clone(),
            self.config.llm.clone(),
            self.config.retry.clone(),
        );
        let translation_validator = self.config.alive2.enabled.then(|| {
            Alive2Verifier::new(
                &self.config.alive2,
                &self.config.benchmark,
                FunctionExtractor::new().global_definitions(&reference),
                self.workspace.scratch_dir(),
            )
        });
        let synthesizer = HarnessSynthesizer::new(
            reference,
            self.config.benchmark.support_headers.clone(),
            self.config.thresholds.checksum_epsilon,
        );
        let repair = RepairLoop::new(
            agent,
            synthesizer,
            self.verifier.clone(),
            OutcomeClassifier::new(self.config.thresholds.clone()),
            self.workspace.clone(),
            RepairSettings {
                max_iterations: self.config.experiment.max_iterations,
                run_timeout: Duration::from_secs(self.config.compiler.run_timeout_secs),
            },
        )
        .with_observer(self.observer.clone());
        match translation_validator {
            Some(validator) => {
                info!(alive_tv = %self.config.alive2.alive_tv, "Alive2 translation validation enabled");
                repair.with_translation_validation(validator)
            }
            None => repair,
        }
    }

    /// Run every selected function and write the aggregate report.
    pub async fn run(&self, selection: &FunctionSelection) -> Result<ExperimentReport, VecsmithError> {
        let started_at = Utc::now();
        self.workspace.prepare(self.config.experiment.clean_output)?;

        let source_path = &self.config.benchmark.source;
        let reference = match tokio::fs::read_to_string(source_path).await {
            Ok(text) => text,
            Err(e) => {
                error!(
                    path = %source_path.display(),
                    error = %e,
                    "Benchmark source unreadable, no functions processed"
                );
                let report = self.report(started_at, Vec::new());
                write_json(&self.workspace.aggregate_path(), &report)?;
                self.workspace
                    .finish(self.config.experiment.preserve_scratch)?;
                return Ok(report);
            }
        };

        let extractor = FunctionExtractor::new();
        let functions = selection.resolve(&extractor, &reference);
        info!(count = functions.len(), "Starting experiment");
        let repair = self.repair_loop(reference.clone());
        let delay = Duration::from_millis(self.config.experiment.inter_function_delay_ms);

        let mut results = Vec::new();
        for (index, function) in functions.iter().enumerate() {
            if index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let target = match extractor.extract(&reference, function) {
                Ok(target) => target,
                Err(e) => {
                    warn!(function = %function, error = %e, "Skipping function");
                    continue;
                }
            };

            match repair.run(&target).await {
                Ok(result) => {
                    let path = self.workspace.result_path(function);
                    if let Err(e) = write_json(&path, &result) {
                        error!(
                            function = %function,
                            path = %path.display(),
                            error = %e,
                            "Failed to write function result"
                        );
                    }
                    results.push(result);
                }
                Err(e) => {
                    error!(function = %function, error = %e, "Repair loop failed");
                }
            }
        }

        let report = self.report(started_at, results);
        write_json(&self.workspace.aggregate_path(), &report)?;
        self.workspace
            .finish(self.config.experiment.preserve_scratch)?;
        info!(
            successful = report.summary.successful,
            total = report.summary.total,
            "Experiment finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::CandidateTransformation;
    use crate::classifier::{OutcomeKind, PerformanceSample, VerificationOutcome};
    use crate::repair::AttemptRecord;
    use pretty_assertions::assert_eq;

    fn result(function: &str, category: &str, kind: OutcomeKind, speedup: Option<f64>) -> FunctionResult {
        let performance = speedup.map(|s| {
            PerformanceSample::from_measurements(Some(s), Some(1.0), Some(1.0), Some(1.0), None)
        });
        let record = AttemptRecord {
            iteration: 1,
            candidate: CandidateTransformation::new(function, 1, ""),
            outcome: VerificationOutcome {
                kind,
                diagnostic: None,
                test_output: None,
                hint: None,
                performance,
                vectorization: None,
            },
            translation_validation: None,
        };
        FunctionResult::from_attempts(function, category, vec![record], None)
    }

    fn sample_results() -> Vec<FunctionResult> {
        vec![
            result("s000", "linear_dependence", OutcomeKind::Success(SpeedupStatus::Improved), Some(2.0)),
            result("s111", "linear_dependence", OutcomeKind::Success(SpeedupStatus::NoImprovement), Some(0.8)),
            result("s112", "induction_variable", OutcomeKind::CompilationFailed, None),
        ]
    }

    #[test]
    fn test_summary_counts() {
        let summary = ExperimentSummary::from_results(&sample_results());
        assert_eq!(summary.total, 3);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.improved, 1);
        assert_eq!(summary.no_improvement, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.by_error_type.get("compilation"), Some(&1));
        let linear = &summary.by_category["linear_dependence"];
        assert_eq!(linear.successful, 2);
        assert_eq!(linear.success_rate, 1.0);
    }

    #[test]
    fn test_render_summary_lines() {
        let results = sample_results();
        let report = ExperimentReport {
            experiment: "t".into(),
            run_id: Uuid::new_v4(),
            model: "mock-model".into(),
            provider: "mock".into(),
            temperature: 0.7,
            max_iterations: 3,
            seed: None,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            summary: ExperimentSummary::from_results(&results),
            results,
        };
        let text = report.render_summary();
        assert!(text.contains("Overall: 2/3 functions successfully vectorized"));
        assert!(text.contains("  s000  : SUCCESS (IMPROVED) (Speedup: 2.00x)"));
        assert!(text.contains("  s111  : SUCCESS (NO SPEEDUP) (Speedup: 0.80x - NO IMPROVEMENT)"));
        assert!(text.contains("  s112  : FAILED [compilation]\n"));
        assert!(text.contains("  induction_variable: 0/1 (0.0%)"));
    }

    #[test]
    fn test_selection_from_names() {
        assert_eq!(FunctionSelection::from_names(Vec::new()), FunctionSelection::Curated);
        assert_eq!(
            FunctionSelection::from_names(vec!["s000".into()]),
            FunctionSelection::Named(vec!["s000".into()])
        );
    }
}
