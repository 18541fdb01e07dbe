//! CLI subcommand handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use vecsmith_core::config::{VecsmithConfig, load_config};
use vecsmith_core::extractor::{UNCATEGORIZED, category_for, curated_function_names};
use vecsmith_core::providers::create_provider;
use vecsmith_core::{
    CompilerVerifier, ExperimentDriver, FunctionExtractor, FunctionSelection, Verify,
    WorkspaceContext,
};

use crate::console::ConsoleObserver;
use crate::{Commands, ConfigAction, RunArgs};

/// Options shared by every subcommand.
#[derive(Debug, Clone)]
pub struct CliContext {
    pub workspace: PathBuf,
    pub config_file: Option<PathBuf>,
    pub quiet: bool,
}

impl CliContext {
    /// Effective configuration with relative paths resolved against the workspace.
    pub fn load(&self) -> anyhow::Result<VecsmithConfig> {
        let mut config = load_config(Some(&self.workspace), self.config_file.as_deref())
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
        resolve_paths(&mut config, &self.workspace);
        Ok(config)
    }
}

fn resolve(path: &Path, workspace: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}

pub fn resolve_paths(config: &mut VecsmithConfig, workspace: &Path) {
    config.benchmark.source = resolve(&config.benchmark.source, workspace);
    config.benchmark.support_dir = resolve(&config.benchmark.support_dir, workspace);
    config.experiment.output_dir = resolve(&config.experiment.output_dir, workspace);
}

/// Apply `run` flags on top of the loaded configuration.
pub fn apply_overrides(config: &mut VecsmithConfig, args: &RunArgs, workspace: &Path) {
    if let Some(max_iterations) = args.max_iterations {
        config.experiment.max_iterations = max_iterations;
    }
    if let Some(model) = &args.model {
        config.llm.model = model.clone();
    }
    if let Some(provider) = &args.provider {
        config.llm.provider = provider.clone();
    }
    if let Some(temperature) = args.temperature {
        config.llm.temperature = temperature;
    }
    if let Some(seed) = args.seed {
        config.llm.seed = Some(seed);
    }
    if let Some(output) = &args.output {
        config.experiment.output_dir = resolve(output, workspace);
    }
    if let Some(source) = &args.source {
        config.benchmark.source = resolve(source, workspace);
    }
}

pub fn selection(config: &VecsmithConfig, args: &RunArgs) -> FunctionSelection {
    if args.all {
        FunctionSelection::All
    } else if !args.functions.is_empty() {
        FunctionSelection::Named(args.functions.clone())
    } else {
        FunctionSelection::from_names(config.benchmark.functions.clone())
    }
}

fn verifier_for(config: &VecsmithConfig) -> CompilerVerifier {
    let workspace = WorkspaceContext::new(&config.experiment.output_dir);
    CompilerVerifier::new(&config.compiler, &config.benchmark, workspace.scratch_dir())
}

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, ctx: &CliContext) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => handle_run(args, ctx).await,
        Commands::List { curated } => handle_list(curated, ctx).await,
        Commands::Extract { name } => handle_extract(&name, ctx).await,
        Commands::Check => handle_check(ctx).await,
        Commands::Multi(args) => crate::multi::run_multi(args, ctx).await,
        Commands::Config { action } => handle_config(action, ctx).await,
    }
}

async fn handle_run(args: RunArgs, ctx: &CliContext) -> anyhow::Result<()> {
    let mut config = ctx.load()?;
    apply_overrides(&mut config, &args, &ctx.workspace);
    config
        .ensure_valid()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let verifier = Arc::new(verifier_for(&config));
    verifier
        .preflight()
        .await
        .map_err(|e| anyhow::anyhow!("Environment check failed: {}", e))?;

    let provider = create_provider(&config.llm)
        .map_err(|e| anyhow::anyhow!("Failed to create LLM provider: {}", e))?;
    let selection = selection(&config, &args);
    let workspace = WorkspaceContext::new(&config.experiment.output_dir);

    if !ctx.quiet {
        println!(
            "Running {} with {} ({}), max {} iterations",
            config.experiment.name,
            config.llm.model,
            config.llm.provider,
            config.experiment.max_iterations
        );
    }

    let driver = ExperimentDriver::new(config, provider, verifier, workspace.clone())
        .with_observer(Arc::new(ConsoleObserver::new(ctx.quiet)));
    let report = driver.run(&selection).await?;

    println!("{}", report.render_summary());
    println!("Results written to {}", workspace.aggregate_path().display());
    Ok(())
}

async fn handle_list(curated_only: bool, ctx: &CliContext) -> anyhow::Result<()> {
    let names = if curated_only {
        curated_function_names()
    } else {
        let config = ctx.load()?;
        let source = tokio::fs::read_to_string(&config.benchmark.source)
            .await
            .with_context(|| {
                format!(
                    "Failed to read benchmark source {}",
                    config.benchmark.source.display()
                )
            })?;
        FunctionExtractor::new().list_functions(&source)
    };

    let curated = curated_function_names();
    println!("Benchmark functions ({}):", names.len());
    for name in &names {
        let category = category_for(name);
        let marker = if curated.contains(name) { "*" } else { " " };
        if category == UNCATEGORIZED {
            println!("  {} {}", marker, name);
        } else {
            println!("  {} {:8} {}", marker, name, category);
        }
    }
    println!("\n(* = in the default run set)");
    Ok(())
}

async fn handle_extract(name: &str, ctx: &CliContext) -> anyhow::Result<()> {
    let config = ctx.load()?;
    let source = tokio::fs::read_to_string(&config.benchmark.source)
        .await
        .with_context(|| {
            format!(
                "Failed to read benchmark source {}",
                config.benchmark.source.display()
            )
        })?;
    let target = FunctionExtractor::new().extract(&source, name)?;

    println!("Function:    {}", target.name);
    println!("Category:    {}", target.category);
    println!("Core origin: {:?}", target.core_origin);
    println!("Arrays:      {}", target.array_names().join(", "));
    println!(
        "Returns:     {}",
        target.return_expression.as_deref().unwrap_or("None")
    );
    if !target.declarations.is_empty() {
        println!("\nSynthesized declarations:");
        for decl in &target.declarations {
            let note = if decl.is_placeholder() { "  (placeholder)" } else { "" };
            println!("{}{}", decl.render(), note);
        }
    }
    println!("\nCore:\n{}", target.core_with_declarations);
    Ok(())
}

async fn handle_check(ctx: &CliContext) -> anyhow::Result<()> {
    let config = ctx.load()?;
    config
        .ensure_valid()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    let warnings = config.validate();
    for warning in &warnings {
        println!("warning: {}", warning);
    }

    verifier_for(&config)
        .preflight()
        .await
        .map_err(|e| anyhow::anyhow!("Environment check failed: {}", e))?;

    println!("Compiler:  {} ok", config.compiler.cc);
    println!("Source:    {}", config.benchmark.source.display());
    println!("Support:   {}", config.benchmark.support_dir.display());
    println!(
        "Provider:  {} / {}",
        config.llm.provider, config.llm.model
    );
    if std::env::var(&config.llm.api_key_env).is_err() {
        println!("warning: {} is not set", config.llm.api_key_env);
    }
    Ok(())
}

async fn handle_config(action: ConfigAction, ctx: &CliContext) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = ctx.workspace.join(".vecsmith");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&VecsmithConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(Some(&ctx.workspace), ctx.config_file.as_deref())
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
