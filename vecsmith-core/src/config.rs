//! Configuration system for vecsmith.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> explicit config file -> environment. CLI flags are
//! applied by the binary on top of the extracted value.
//! Configuration is loaded from `~/.config/vecsmith/config.toml` and/or
//! `.vecsmith/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Upper bound on repair iterations per function.
pub const MAX_ITERATIONS_LIMIT: u32 = 10;

/// Top-level configuration for a vecsmith experiment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VecsmithConfig {
    pub llm: LlmConfig,
    pub retry: RetryConfig,
    pub benchmark: BenchmarkConfig,
    pub compiler: CompilerConfig,
    pub thresholds: ThresholdConfig,
    pub experiment: ExperimentSettings,
    #[serde(default)]
    pub alive2: Alive2Config,
}

/// Configuration for the text-generation provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "anthropic" or "openai" (any OpenAI-compatible endpoint).
    pub provider: String,
    /// Model identifier (e.g., "claude-sonnet-4-20250514").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Sampling temperature.
    pub temperature: f32,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,
    /// Sampling seed, forwarded to providers that accept one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: None,
            max_tokens: 4000,
            temperature: 0.7,
            request_timeout_secs: 120,
            seed: None,
        }
    }
}

/// Retry policy for transient provider failures.
///
/// A call is attempted at most `max_retries + 1` times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 1000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 30_000,
            jitter: false,
        }
    }
}

/// Location of the benchmark suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Reference source containing every benchmark function.
    pub source: PathBuf,
    /// Directory holding `common.h`, `array_defs.h` and the support sources.
    pub support_dir: PathBuf,
    /// Support translation units compiled alongside each harness, relative to `support_dir`.
    pub support_sources: Vec<String>,
    /// Headers the harness includes, relative to `support_dir`.
    pub support_headers: Vec<String>,
    /// Functions to process. Empty means the curated default set.
    #[serde(default)]
    pub functions: Vec<String>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("tsvc/tsvc.c"),
            support_dir: PathBuf::from("tsvc"),
            support_sources: vec!["common.c".to_string()],
            support_headers: vec!["common.h".to_string(), "array_defs.h".to_string()],
            functions: Vec::new(),
        }
    }
}

impl BenchmarkConfig {
    /// Absolute-or-relative paths of the support translation units.
    pub fn support_source_paths(&self) -> Vec<PathBuf> {
        self.support_sources
            .iter()
            .map(|s| self.support_dir.join(s))
            .collect()
    }

    /// Every file that must exist before verification can start.
    pub fn required_files(&self) -> Vec<PathBuf> {
        self.support_headers
            .iter()
            .chain(self.support_sources.iter())
            .map(|s| self.support_dir.join(s))
            .collect()
    }
}

/// Host compiler invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Compiler executable.
    pub cc: String,
    /// Flags placed before the sources. Must enable the target ISA and vectorization remarks.
    pub flags: Vec<String>,
    /// Flags placed after the sources.
    pub link_flags: Vec<String>,
    pub compile_timeout_secs: u64,
    /// Hard wall-clock limit for running the harness binary.
    pub run_timeout_secs: u64,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            cc: "gcc".to_string(),
            flags: [
                "-std=c99",
                "-O3",
                "-fstrict-aliasing",
                "-fivopts",
                "-ftree-vectorize",
                "-mavx2",
                "-mfma",
                "-fopt-info-vec-optimized",
                "-fopt-info-vec-missed",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            link_flags: vec!["-lm".to_string()],
            compile_timeout_secs: 60,
            run_timeout_secs: 30,
        }
    }
}

/// Numeric thresholds used when classifying a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Checksums pass when their absolute difference is strictly below this.
    pub checksum_epsilon: f64,
    /// Durations at or below this count as "nothing was measured".
    pub degenerate_floor_secs: f64,
    /// An original faster than this did not do the expected work.
    pub baseline_floor_secs: f64,
    /// A candidate this many times slower than the original invalidates the comparison.
    pub slowdown_ratio_cap: f64,
    /// Checksum differences above this are phrased as logic errors.
    pub large_diff_threshold: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            checksum_epsilon: 1e-5,
            degenerate_floor_secs: 1e-6,
            baseline_floor_secs: 1e-5,
            slowdown_ratio_cap: 50.0,
            large_diff_threshold: 1e-3,
        }
    }
}

/// Optional Alive2 translation validation. Advisory only: it never changes a classified outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Alive2Config {
    pub enabled: bool,
    /// `alive-tv` executable.
    pub alive_tv: String,
    /// Clang used to lower both functions to LLVM IR.
    pub clang: String,
    pub clang_flags: Vec<String>,
    /// SMT solver budget, also the wall-clock limit (plus a grace period) for `alive-tv`.
    pub timeout_secs: u64,
}

impl Default for Alive2Config {
    fn default() -> Self {
        Self {
            enabled: false,
            alive_tv: "alive-tv".to_string(),
            clang: "clang".to_string(),
            clang_flags: [
                "-S",
                "-emit-llvm",
                "-O0",
                "-Xclang",
                "-disable-O0-optnone",
                "-std=c99",
                "-mavx2",
                "-mfma",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            timeout_secs: 30,
        }
    }
}

/// Experiment-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSettings {
    /// Name recorded in the aggregate report.
    pub name: String,
    /// Repair iterations per function.
    pub max_iterations: u32,
    /// Root directory for results, attempt artifacts and scratch builds.
    pub output_dir: PathBuf,
    /// Remove results from a previous run before starting.
    pub clean_output: bool,
    /// Keep the scratch directory after the run.
    pub preserve_scratch: bool,
    /// Pause between functions to stay under provider rate limits.
    pub inter_function_delay_ms: u64,
}

impl Default for ExperimentSettings {
    fn default() -> Self {
        Self {
            name: "TSVC_vectorization".to_string(),
            max_iterations: 3,
            output_dir: PathBuf::from("vecsmith_output"),
            clean_output: true,
            preserve_scratch: false,
            inter_function_delay_ms: 1000,
        }
    }
}

impl VecsmithConfig {
    /// Reject configurations that cannot produce a meaningful run.
    pub fn ensure_valid(&self) -> Result<(), ConfigError> {
        if self.experiment.max_iterations == 0
            || self.experiment.max_iterations > MAX_ITERATIONS_LIMIT
        {
            return Err(ConfigError::Invalid {
                message: format!(
                    "experiment.max_iterations must be between 1 and {}, got {}",
                    MAX_ITERATIONS_LIMIT, self.experiment.max_iterations
                ),
            });
        }
        if self.thresholds.checksum_epsilon <= 0.0 {
            return Err(ConfigError::Invalid {
                message: "thresholds.checksum_epsilon must be positive".to_string(),
            });
        }
        if self.compiler.cc.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "compiler.cc".to_string(),
            });
        }
        if self.alive2.enabled && self.alive2.alive_tv.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "alive2.alive_tv".to_string(),
            });
        }
        if self.compiler.run_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                message: "compiler.run_timeout_secs must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Return human-readable warnings for values that are legal but suspicious.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.thresholds.baseline_floor_secs < self.thresholds.degenerate_floor_secs {
            warnings.push(format!(
                "baseline_floor_secs ({:e}) is below degenerate_floor_secs ({:e}); the baseline check never fires first",
                self.thresholds.baseline_floor_secs, self.thresholds.degenerate_floor_secs
            ));
        }
        if self.thresholds.slowdown_ratio_cap <= 1.0 {
            warnings.push(format!(
                "slowdown_ratio_cap ({}) rejects every candidate slower than the baseline",
                self.thresholds.slowdown_ratio_cap
            ));
        }
        if !self
            .compiler
            .flags
            .iter()
            .any(|f| f.starts_with("-fopt-info") || f.starts_with("-Rpass"))
        {
            warnings.push(
                "compiler.flags request no vectorization remarks; vectorization reports will be empty"
                    .to_string(),
            );
        }
        if self.llm.temperature > 1.0 && self.llm.provider == "anthropic" {
            warnings.push(format!(
                "temperature {} exceeds the Anthropic maximum of 1.0",
                self.llm.temperature
            ));
        }
        warnings
    }
}

/// Load configuration by merging defaults, config files and environment variables.
pub fn load_config(
    workspace: Option<&Path>,
    config_file: Option<&Path>,
) -> Result<VecsmithConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(VecsmithConfig::default()));

    // User-level config
    if let Some(dirs) = directories::ProjectDirs::from("dev", "vecsmith", "vecsmith") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = ws.join(".vecsmith").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = config_file {
        figment = figment.merge(Toml::file(path));
    }

    // Environment variables (VECSMITH_LLM__MODEL, VECSMITH_EXPERIMENT__MAX_ITERATIONS, etc.)
    figment = figment.merge(Env::prefixed("VECSMITH_").split("__"));

    figment.extract().map_err(Box::new)
}

/// Check whether a vecsmith configuration file exists (user-level or workspace-level).
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(dirs) = directories::ProjectDirs::from("dev", "vecsmith", "vecsmith") {
        if dirs.config_dir().join("config.toml").exists() {
            return true;
        }
    }
    workspace
        .map(|ws| ws.join(".vecsmith").join("config.toml").exists())
        .unwrap_or(false)
}
