//! Compile-and-run verification of synthesized harnesses.
//!
//! Every verification owns a fresh temporary directory under the workspace
//! scratch area. The compiler and the harness binary both run under a hard
//! wall-clock limit and are killed when it expires.

pub mod alive2;
pub mod vectorization;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::{BenchmarkConfig, CompilerConfig};
use crate::error::{EnvironmentError, VerifierError};
use crate::harness::SynthesizedHarness;

pub use alive2::{Alive2Report, Alive2Stage, Alive2Verdict, Alive2Verifier};
pub use vectorization::{VectorizationReport, VectorizationVerdict, parse_vectorization_remarks};

const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of invoking the compiler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileOutput {
    pub exit_code: Option<i32>,
    /// Compiler stderr followed by stdout.
    pub diagnostics: String,
    pub timed_out: bool,
}

impl CompileOutput {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Result of running the harness binary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutput {
    pub exit_code: Option<i32>,
    /// Terminating signal, when the process did not exit normally.
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl RunOutput {
    /// The process was killed by a memory access violation.
    pub fn crashed_on_memory_access(&self) -> bool {
        // SIGSEGV and SIGBUS
        matches!(self.signal, Some(11) | Some(7))
            || self.stderr.contains("Segmentation fault")
    }
}

/// Everything observed while verifying one harness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierOutput {
    pub compile: CompileOutput,
    /// `None` when compilation did not succeed.
    pub run: Option<RunOutput>,
    pub vectorization: Option<VectorizationReport>,
}

/// Compiles and runs a harness.
#[async_trait]
pub trait Verify: Send + Sync {
    async fn compile_and_run(
        &self,
        harness: &SynthesizedHarness,
        run_timeout: Duration,
    ) -> Result<VerifierOutput, VerifierError>;

    /// Check the host environment before any function is processed.
    async fn preflight(&self) -> Result<(), EnvironmentError> {
        Ok(())
    }
}

/// Verifier backed by a host C compiler.
#[derive(Debug, Clone)]
pub struct CompilerVerifier {
    compiler: CompilerConfig,
    support_dir: PathBuf,
    support_sources: Vec<PathBuf>,
    required_files: Vec<PathBuf>,
    reference_source: PathBuf,
    scratch_dir: PathBuf,
}

impl CompilerVerifier {
    pub fn new(
        compiler: &CompilerConfig,
        benchmark: &BenchmarkConfig,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            compiler: compiler.clone(),
            support_dir: benchmark.support_dir.clone(),
            support_sources: benchmark.support_source_paths(),
            required_files: benchmark.required_files(),
            reference_source: benchmark.source.clone(),
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Arguments passed to the compiler for `source`, producing `binary`.
    pub fn compile_args(&self, source: &Path, binary: &Path) -> Vec<String> {
        let mut args: Vec<String> = self.compiler.flags.clone();
        args.push(format!("-I{}", self.support_dir.display()));
        args.push("-o".to_string());
        args.push(binary.display().to_string());
        args.push(source.display().to_string());
        args.extend(self.support_sources.iter().map(|p| p.display().to_string()));
        args.extend(self.compiler.link_flags.iter().cloned());
        args
    }

    async fn compile(&self, source: &Path, binary: &Path) -> Result<CompileOutput, VerifierError> {
        let limit = Duration::from_secs(self.compiler.compile_timeout_secs);
        let args = self.compile_args(source, binary);
        debug!(cc = %self.compiler.cc, ?args, "Compiling harness");

        let result = tokio::time::timeout(limit, async {
            Command::new(&self.compiler.cc)
                .args(&args)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output()
                .await
        })
        .await;

        match result {
            Ok(Ok(output)) => {
                let mut diagnostics = String::from_utf8_lossy(&output.stderr).to_string();
                let stdout = String::from_utf8_lossy(&output.stdout);
                if !stdout.trim().is_empty() {
                    diagnostics.push_str(&stdout);
                }
                Ok(CompileOutput {
                    exit_code: output.status.code(),
                    diagnostics,
                    timed_out: false,
                })
            }
            Ok(Err(e)) => Err(VerifierError::Spawn {
                program: self.compiler.cc.clone(),
                message: e.to_string(),
            }),
            Err(_) => {
                warn!(timeout_secs = limit.as_secs(), "Compilation timed out");
                Ok(CompileOutput {
                    exit_code: None,
                    diagnostics: format!(
                        "Compilation timed out after {} seconds",
                        limit.as_secs()
                    ),
                    timed_out: true,
                })
            }
        }
    }

    /// Run `binary` inside `work_dir` so anything it writes stays in the build directory.
    async fn run(
        &self,
        binary: &Path,
        work_dir: &Path,
        limit: Duration,
    ) -> Result<RunOutput, VerifierError> {
        let result = tokio::time::timeout(limit, async {
            Command::new(binary)
                .current_dir(work_dir)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output()
                .await
        })
        .await;

        match result {
            Ok(Ok(output)) => Ok(RunOutput {
                exit_code: output.status.code(),
                signal: exit_signal(&output.status),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                timed_out: false,
            }),
            Ok(Err(e)) => Err(VerifierError::Spawn {
                program: binary.display().to_string(),
                message: e.to_string(),
            }),
            Err(_) => {
                warn!(timeout_secs = limit.as_secs(), "Harness run timed out");
                Ok(RunOutput {
                    timed_out: true,
                    ..Default::default()
                })
            }
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

#[async_trait]
impl Verify for CompilerVerifier {
    async fn compile_and_run(
        &self,
        harness: &SynthesizedHarness,
        run_timeout: Duration,
    ) -> Result<VerifierOutput, VerifierError> {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let build_dir = tempfile::Builder::new()
            .prefix(&format!("{}-", harness.function))
            .tempdir_in(&self.scratch_dir)?;

        let file_name = format!("harness_{}.c", harness.function);
        let source = build_dir.path().join(&file_name);
        let binary = build_dir.path().join(format!("harness_{}", harness.function));
        tokio::fs::write(&source, &harness.program).await?;

        let compile = self.compile(&source, &binary).await?;
        if !compile.succeeded() {
            debug!(
                function = %harness.function,
                exit_code = ?compile.exit_code,
                timed_out = compile.timed_out,
                "Compilation failed"
            );
            return Ok(VerifierOutput {
                compile,
                run: None,
                vectorization: None,
            });
        }

        let vectorization =
            parse_vectorization_remarks(&compile.diagnostics, &file_name, harness);
        let run = self.run(&binary, build_dir.path(), run_timeout).await?;
        debug!(
            function = %harness.function,
            exit_code = ?run.exit_code,
            timed_out = run.timed_out,
            "Harness finished"
        );

        Ok(VerifierOutput {
            compile,
            run: Some(run),
            vectorization: Some(vectorization),
        })
    }

    async fn preflight(&self) -> Result<(), EnvironmentError> {
        if !self.reference_source.is_file() {
            return Err(EnvironmentError::ReferenceSourceMissing {
                path: self.reference_source.clone(),
            });
        }
        if let Some(missing) = self.required_files.iter().find(|p| !p.is_file()) {
            return Err(EnvironmentError::SupportFileMissing {
                path: missing.clone(),
            });
        }

        let unavailable = |message: String| EnvironmentError::CompilerUnavailable {
            compiler: self.compiler.cc.clone(),
            message,
        };
        let result = tokio::time::timeout(PREFLIGHT_TIMEOUT, async {
            Command::new(&self.compiler.cc)
                .arg("--version")
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output()
                .await
        })
        .await;

        match result {
            Ok(Ok(output)) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                debug!(
                    cc = %self.compiler.cc,
                    version = version.lines().next().unwrap_or_default(),
                    "Compiler available"
                );
                Ok(())
            }
            Ok(Ok(output)) => Err(unavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            )),
            Ok(Err(e)) => Err(unavailable(e.to_string())),
            Err(_) => Err(unavailable("version check timed out".to_string())),
        }
    }
}
