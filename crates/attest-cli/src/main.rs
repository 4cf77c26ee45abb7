mod cli;

use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value as JsonValue;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use attest_core::{
    DebugTracer, PipelineMode, StrategyRegistry, ValidationContext, ValidationPipeline,
    ValidationStrategy,
};
use attest_runtime::RuntimeConfig;

use cli::{Cli, Commands, OutputFormat};

/// Exit code when the response fails validation.
const EXIT_INVALID: u8 = 1;
/// Exit code for usage, I/O and configuration errors.
const EXIT_ERROR: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_INVALID),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Returns whether the command succeeded.
fn run(cli: Cli) -> Result<bool> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Strategies { plugins, strict } => {
            let registry = build_registry(&config, plugins.as_deref(), strict)?;
            cmd_strategies(&registry, cli.output)?;
            Ok(true)
        }
        Commands::Check {
            response,
            references,
            strategies,
            plugins,
            short_circuit,
            trace_out,
        } => {
            let registry = build_registry(&config, plugins.as_deref(), false)?;
            let mode = if short_circuit {
                PipelineMode::ShortCircuit
            } else {
                config.pipeline_mode
            };
            cmd_check(
                &registry,
                CheckArgs {
                    response: &response,
                    references: references.as_deref(),
                    strategies: &strategies,
                    mode,
                    trace_out: trace_out.as_deref(),
                },
                cli.output,
            )
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(RuntimeConfig::default()),
    }
}

/// Built-in strategies plus any discovered plugins. A `--plugins` flag
/// overrides the config's `plugin_dir`.
fn build_registry(
    config: &RuntimeConfig,
    plugins: Option<&Path>,
    strict: bool,
) -> Result<StrategyRegistry> {
    let registry = StrategyRegistry::with_builtins().with_strict(strict || config.strict_registry);

    if let Some(dir) = plugins.or(config.plugin_dir.as_deref()) {
        let report = registry
            .discover(dir)
            .with_context(|| format!("discovering plugins in {}", dir.display()))?;
        tracing::info!(
            registered = report.registered.len(),
            skipped = report.skipped.len(),
            errors = report.errors.len(),
            "plugin discovery finished"
        );
    }

    Ok(registry)
}

fn cmd_strategies(registry: &StrategyRegistry, output: OutputFormat) -> Result<()> {
    let strategies = registry.describe();

    match output {
        OutputFormat::Text => {
            let width = strategies.iter().map(|s| s.name.len()).max().unwrap_or(0);
            for info in &strategies {
                let kind = info.kind.as_deref().unwrap_or("instance");
                println!("{:width$}  {:14}  {}", info.name, kind, info.description);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&strategies)?);
        }
    }
    Ok(())
}

struct CheckArgs<'a> {
    response: &'a Path,
    references: Option<&'a Path>,
    strategies: &'a [String],
    mode: PipelineMode,
    trace_out: Option<&'a Path>,
}

fn cmd_check(registry: &StrategyRegistry, args: CheckArgs<'_>, output: OutputFormat) -> Result<bool> {
    let content = fs::read_to_string(args.response)
        .with_context(|| format!("reading response {}", args.response.display()))?;
    let response: JsonValue = serde_json::from_str(&content)
        .with_context(|| format!("parsing response {}", args.response.display()))?;

    let mut context = ValidationContext::new();
    if let Some(path) = args.references {
        context = context.with_reference_texts(read_references(path)?);
    }

    let strategies = select_strategies(registry, args.strategies)?;
    let pipeline = ValidationPipeline::new(args.mode);

    let mut tracer = DebugTracer::new();
    let root = tracer.start_trace("check", Default::default());
    let result = pipeline.run_traced(&response, &context, &strategies, &mut tracer);
    tracer.end_trace(root, result.summary_result())?;

    if let Some(path) = args.trace_out {
        fs::write(path, tracer.to_json()?)
            .with_context(|| format!("writing trace {}", path.display()))?;
    }

    match output {
        OutputFormat::Text => {
            print!("{}", tracer.render_summary());
            if result.all_valid {
                println!("\nall {} strategies passed", result.results.len());
            } else {
                println!();
                for outcome in result.failures() {
                    println!(
                        "[{}] {}",
                        outcome.strategy_name,
                        outcome.result.error().unwrap_or("validation failed")
                    );
                }
            }
        }
        OutputFormat::Json => {
            let report = serde_json::json!({
                "all_valid": result.all_valid,
                "results": result.results,
                "trace": tracer.export(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(result.all_valid)
}

/// A JSON array of strings, or the whole file as one reference text.
fn read_references(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading references {}", path.display()))?;
    Ok(serde_json::from_str(&content).unwrap_or_else(|_| vec![content]))
}

/// Strategy run by `check` when none are named.
const DEFAULT_STRATEGIES: &[&str] = &["citation"];

/// Named strategies in order, or [`DEFAULT_STRATEGIES`] when none are named.
fn select_strategies(
    registry: &StrategyRegistry,
    names: &[String],
) -> Result<Vec<Arc<dyn ValidationStrategy>>> {
    if names.is_empty() {
        tracing::debug!(strategies = ?DEFAULT_STRATEGIES, "no strategy named, using defaults");
        return DEFAULT_STRATEGIES.iter().map(|name| resolve(registry, name)).collect();
    }
    names.iter().map(|name| resolve(registry, name)).collect()
}

fn resolve(registry: &StrategyRegistry, name: &str) -> Result<Arc<dyn ValidationStrategy>> {
    registry
        .get(name)
        .with_context(|| format!("resolving strategy '{name}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_check_args() {
        let cli = Cli::try_parse_from([
            "attest",
            "check",
            "--response",
            "out.json",
            "--strategy",
            "citation",
            "--strategy",
            "required_fields",
            "--short-circuit",
            "-vv",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Check {
                strategies,
                short_circuit,
                references,
                ..
            } => {
                assert_eq!(strategies, vec!["citation", "required_fields"]);
                assert!(short_circuit);
                assert!(references.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_check_requires_response() {
        assert!(Cli::try_parse_from(["attest", "check"]).is_err());
    }

    #[test]
    fn test_parse_strategies_json_output() {
        let cli = Cli::try_parse_from(["attest", "strategies", "--strict", "-o", "json"]).unwrap();
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::Strategies { strict: true, .. }));
    }

    #[test]
    fn test_read_references_json_or_text() {
        let dir = TempDir::new().unwrap();
        let json = dir.path().join("refs.json");
        fs::write(&json, r#"["Paris is the capital of France."]"#).unwrap();
        assert_eq!(
            read_references(&json).unwrap(),
            vec!["Paris is the capital of France."]
        );

        let text = dir.path().join("refs.txt");
        fs::write(&text, "Plain reference document.").unwrap();
        assert_eq!(read_references(&text).unwrap(), vec!["Plain reference document."]);
    }

    #[test]
    fn test_default_selection_is_citation_only() {
        let registry = StrategyRegistry::with_builtins();
        let names: Vec<String> = select_strategies(&registry, &[])
            .unwrap()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["citation"]);
    }

    #[test]
    fn test_check_defaults_pass_citation_only_response() {
        let dir = TempDir::new().unwrap();
        let response = dir.path().join("response.json");
        let references = dir.path().join("refs.json");
        fs::write(&response, r#"{"citations": ["Paris is the capital of France"]}"#).unwrap();
        fs::write(&references, r#"["Paris is the capital of France."]"#).unwrap();

        let registry = StrategyRegistry::with_builtins();
        let passed = cmd_check(
            &registry,
            CheckArgs {
                response: &response,
                references: Some(&references),
                strategies: &[],
                mode: PipelineMode::RunAll,
                trace_out: None,
            },
            OutputFormat::Json,
        )
        .unwrap();

        assert!(passed);
    }

    #[test]
    fn test_unknown_strategy_is_error() {
        let registry = StrategyRegistry::with_builtins();
        assert!(select_strategies(&registry, &["nope".to_string()]).is_err());
    }

    #[test]
    fn test_check_end_to_end() {
        let dir = TempDir::new().unwrap();
        let response = dir.path().join("response.json");
        let references = dir.path().join("refs.json");
        let trace = dir.path().join("trace.json");
        fs::write(&response, r#"{"citations": ["Paris is the capital of France"]}"#).unwrap();
        fs::write(&references, r#"["Paris is the capital of France."]"#).unwrap();

        let registry = StrategyRegistry::with_builtins();
        let strategies = vec!["citation".to_string()];
        let passed = cmd_check(
            &registry,
            CheckArgs {
                response: &response,
                references: Some(&references),
                strategies: &strategies,
                mode: PipelineMode::RunAll,
                trace_out: Some(&trace),
            },
            OutputFormat::Json,
        )
        .unwrap();

        assert!(passed);
        let exported: JsonValue = serde_json::from_str(&fs::read_to_string(&trace).unwrap()).unwrap();
        assert_eq!(exported[0]["strategy_name"], "check");
        assert_eq!(exported[0]["children"][0]["strategy_name"], "citation");
    }
}
