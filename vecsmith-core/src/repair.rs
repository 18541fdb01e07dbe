//! The per-function repair loop.
//!
//! A bounded state machine: generate a candidate, verify it, and either stop
//! or feed the classified diagnosis into the next generation. Every attempt
//! is persisted under `attempts/<function>/` before the next transition.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use tracing::{info, warn};

use crate::agent::{Feedback, GenerationAgent, GenerationOutput};
use crate::candidate::{CandidateTransformation, CleanedFunction};
use crate::classifier::{OutcomeClassifier, PerformanceSample, SpeedupStatus, VerificationOutcome};
use crate::error::VecsmithError;
use crate::extractor::TargetFunction;
use crate::harness::{HarnessSynthesizer, arg_setup_for};
use crate::verifier::{Alive2Report, Alive2Verifier, Verify};
use crate::workspace::{WorkspaceContext, write_json, write_text};

/// Why a loop stopped before succeeding or running out of iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// The generator returned nothing after its retries.
    GenerationFailed,
    /// The harness could not be built; retrying cannot help.
    Configuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairState {
    Generating { iteration: u32 },
    Verifying { iteration: u32 },
    Retrying { iteration: u32 },
    Succeeded { iteration: u32 },
    Exhausted { iterations: u32 },
    Aborted { iteration: u32, reason: AbortReason },
}

impl RepairState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RepairState::Succeeded { .. } | RepairState::Exhausted { .. } | RepairState::Aborted { .. }
        )
    }
}

impl std::fmt::Display for RepairState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepairState::Generating { iteration } => write!(f, "generating ({})", iteration),
            RepairState::Verifying { iteration } => write!(f, "verifying ({})", iteration),
            RepairState::Retrying { iteration } => write!(f, "retrying after {}", iteration),
            RepairState::Succeeded { iteration } => write!(f, "succeeded at {}", iteration),
            RepairState::Exhausted { iterations } => write!(f, "exhausted after {}", iterations),
            RepairState::Aborted { iteration, reason } => {
                write!(f, "aborted at {} ({:?})", iteration, reason)
            }
        }
    }
}

/// One generate-verify round. Append-only.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub iteration: u32,
    pub candidate: CandidateTransformation,
    pub outcome: VerificationOutcome,
    /// Advisory Alive2 verdict, when translation validation is enabled.
    pub translation_validation: Option<Alive2Report>,
}

impl AttemptRecord {
    pub fn success(&self) -> bool {
        self.outcome.success()
    }

    pub fn error_type(&self) -> Option<&'static str> {
        self.outcome.kind.error_type()
    }

    pub fn speedup_status(&self) -> Option<SpeedupStatus> {
        self.outcome.kind.speedup_status()
    }
}

impl Serialize for AttemptRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let outcome = &self.outcome;
        let fields = 9
            + usize::from(outcome.vectorization.is_some())
            + usize::from(self.translation_validation.is_some());
        let mut state = serializer.serialize_struct("AttemptRecord", fields)?;
        state.serialize_field("iteration", &self.iteration)?;
        state.serialize_field("success", &self.success())?;
        state.serialize_field("error_type", &self.error_type())?;
        state.serialize_field("speedup_status", &self.speedup_status())?;
        state.serialize_field("vectorized_code", &self.candidate.raw)?;
        state.serialize_field("performance_data", &outcome.performance)?;
        state.serialize_field("test_output", &outcome.test_output)?;
        state.serialize_field("error_message", &outcome.diagnostic)?;
        state.serialize_field("hint", &outcome.hint)?;
        if let Some(report) = &outcome.vectorization {
            state.serialize_field("vectorization_report", report)?;
        } else {
            state.skip_field("vectorization_report")?;
        }
        if let Some(report) = &self.translation_validation {
            state.serialize_field("alive2_result", report)?;
        } else {
            state.skip_field("alive2_result")?;
        }
        state.end()
    }
}

/// Everything the loop produced for one function.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionResult {
    pub function: String,
    pub category: String,
    pub total_iterations: usize,
    pub success: bool,
    pub speedup_status: Option<SpeedupStatus>,
    pub final_performance_data: Option<PerformanceSample>,
    pub attempts: Vec<AttemptRecord>,
    #[serde(skip)]
    pub final_state: Option<RepairState>,
}

impl FunctionResult {
    pub fn from_attempts(
        function: &str,
        category: &str,
        attempts: Vec<AttemptRecord>,
        final_state: Option<RepairState>,
    ) -> Self {
        let last = attempts.last();
        Self {
            function: function.to_string(),
            category: category.to_string(),
            total_iterations: attempts.len(),
            success: last.is_some_and(AttemptRecord::success),
            speedup_status: last.and_then(AttemptRecord::speedup_status),
            final_performance_data: last.and_then(|a| a.outcome.performance),
            final_state,
            attempts,
        }
    }

    /// `error_type` of the last attempt.
    pub fn final_error_type(&self) -> Option<&'static str> {
        self.attempts.last().and_then(AttemptRecord::error_type)
    }

    pub fn speedup(&self) -> Option<f64> {
        self.final_performance_data.and_then(|p| p.speedup)
    }
}

/// Receives progress from the loop.
pub trait RepairObserver: Send + Sync {
    fn on_transition(&self, function: &str, state: &RepairState);
    fn on_attempt(&self, function: &str, record: &AttemptRecord);
}

pub struct NoOpObserver;

impl RepairObserver for NoOpObserver {
    fn on_transition(&self, _function: &str, _state: &RepairState) {}
    fn on_attempt(&self, _function: &str, _record: &AttemptRecord) {}
}

#[derive(Debug, Clone, Copy)]
pub struct RepairSettings {
    pub max_iterations: u32,
    pub run_timeout: Duration,
}

pub struct RepairLoop {
    agent: GenerationAgent,
    synthesizer: HarnessSynthesizer,
    verifier: Arc<dyn Verify>,
    classifier: OutcomeClassifier,
    workspace: WorkspaceContext,
    observer: Arc<dyn RepairObserver>,
    translation_validator: Option<Alive2Verifier>,
    settings: RepairSettings,
}

fn prompt_artifact(iteration: u32, generation: &GenerationOutput) -> String {
    let rule = "=".repeat(50);
    let thin = "-".repeat(50);
    format!(
        "Iteration {iteration} Prompt\n{rule}\n\nSYSTEM PROMPT:\n{thin}\n{}\n\nUSER PROMPT:\n{thin}\n{}\n",
        generation.system_prompt, generation.user_prompt
    )
}

impl RepairLoop {
    pub fn new(
        agent: GenerationAgent,
        synthesizer: HarnessSynthesizer,
        verifier: Arc<dyn Verify>,
        classifier: OutcomeClassifier,
        workspace: WorkspaceContext,
        settings: RepairSettings,
    ) -> Self {
        Self {
            agent,
            synthesizer,
            verifier,
            classifier,
            workspace,
            observer: Arc::new(NoOpObserver),
            translation_validator: None,
            settings,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RepairObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Run Alive2 on every candidate that compiles. The verdict never changes the outcome.
    pub fn with_translation_validation(mut self, validator: Alive2Verifier) -> Self {
        self.translation_validator = Some(validator);
        self
    }

    pub fn agent(&self) -> &GenerationAgent {
        &self.agent
    }

    pub fn verifier(&self) -> &Arc<dyn Verify> {
        &self.verifier
    }

    pub fn workspace(&self) -> &WorkspaceContext {
        &self.workspace
    }

    fn transition(&self, function: &str, state: RepairState) -> RepairState {
        self.observer.on_transition(function, &state);
        state
    }

    /// Run the loop for one extracted function.
    pub async fn run(&self, target: &TargetFunction) -> Result<FunctionResult, VecsmithError> {
        let name = target.name.as_str();
        let dir = self.workspace.attempts_dir(name);
        let started = Instant::now();
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut feedback: Option<Feedback> = None;
        let mut state = None;

        for iteration in 1..=self.settings.max_iterations {
            self.transition(name, RepairState::Generating { iteration });
            let Some(generation) = self.agent.generate(target, feedback.as_ref()).await else {
                warn!(function = name, iteration, "Generation failed, stopping");
                state = Some(self.transition(
                    name,
                    RepairState::Aborted {
                        iteration,
                        reason: AbortReason::GenerationFailed,
                    },
                ));
                break;
            };

            write_text(
                &dir.join(format!("prompt_{}.txt", iteration)),
                &prompt_artifact(iteration, &generation),
            )?;
            write_text(&dir.join(format!("attempt_{}.txt", iteration)), &generation.raw)?;

            let candidate = CandidateTransformation::new(name, iteration, generation.raw);
            let cleaned = candidate.clean();
            write_text(
                &dir.join(format!("extracted_function_{}.c", iteration)),
                &cleaned.code,
            )?;

            self.transition(name, RepairState::Verifying { iteration });
            let (outcome, translation_validation) =
                self.verify(target, &cleaned, iteration, &dir).await?;
            info!(
                function = name,
                iteration,
                kind = %outcome.kind,
                "Attempt classified"
            );

            let record = AttemptRecord {
                iteration,
                candidate,
                outcome,
                translation_validation,
            };
            write_json(&dir.join(format!("attempt_{}.json", iteration)), &record)?;
            self.observer.on_attempt(name, &record);

            let outcome = &record.outcome;
            let next = if outcome.success() {
                RepairState::Succeeded { iteration }
            } else if outcome.kind.is_configuration_error() {
                RepairState::Aborted {
                    iteration,
                    reason: AbortReason::Configuration,
                }
            } else if iteration >= self.settings.max_iterations {
                RepairState::Exhausted {
                    iterations: iteration,
                }
            } else {
                feedback = Some(Feedback::from_outcome(outcome, cleaned.code.as_str()));
                RepairState::Retrying { iteration }
            };
            attempts.push(record);
            let next = self.transition(name, next);
            if next.is_terminal() {
                state = Some(next);
                break;
            }
        }

        let result = FunctionResult::from_attempts(name, &target.category, attempts, state);
        info!(
            function = name,
            success = result.success,
            iterations = result.total_iterations,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Repair loop finished"
        );
        Ok(result)
    }

    async fn verify(
        &self,
        target: &TargetFunction,
        cleaned: &CleanedFunction,
        iteration: u32,
        dir: &Path,
    ) -> Result<(VerificationOutcome, Option<Alive2Report>), VecsmithError> {
        let function = target.name.as_str();
        if let Some(reason) = cleaned.missing_vectorization_reason() {
            return Ok((VerificationOutcome::not_vectorized(reason), None));
        }

        let harness = match self
            .synthesizer
            .synthesize(function, cleaned, &arg_setup_for(function))
        {
            Ok(harness) => harness,
            Err(e) => {
                warn!(function, iteration, error = %e, "Harness synthesis failed");
                return Ok((VerificationOutcome::harness_failed(&e), None));
            }
        };
        write_text(&dir.join(format!("harness_{}.c", iteration)), &harness.program)?;

        let output = self
            .verifier
            .compile_and_run(&harness, self.settings.run_timeout)
            .await?;
        write_text(
            &dir.join(format!("compiler_output_{}.txt", iteration)),
            &output.compile.diagnostics,
        )?;
        if let Some(run) = &output.run {
            write_text(&dir.join(format!("test_output_{}.txt", iteration)), &run.stdout)?;
        }

        let translation_validation = match &self.translation_validator {
            Some(validator) if output.compile.succeeded() => {
                let report = validator
                    .validate(function, &target.source, &cleaned.code)
                    .await;
                write_text(
                    &dir.join(format!("alive2_verification_{}.txt", iteration)),
                    &report.render(function),
                )?;
                Some(report)
            }
            _ => None,
        };

        Ok((
            self.classifier.classify(function, &output),
            translation_validation,
        ))
    }
}
