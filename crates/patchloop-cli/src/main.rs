//! # patchloop-cli
//!
//! Binary entry point for patchloop.
//!
//! This crate provides:
//! - CLI argument parsing using `clap`
//! - Configuration loading (file, environment, flags)
//! - The batch repair run via `patchloop run`
//! - Project listing via `patchloop projects`
//! - Token usage summaries via `patchloop usage`

mod completions;
mod display;

use std::io::{IsTerminal, stdout};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use completions::CompletionsArgs;
use patchloop_adapters::{CommandHarness, oracle_from_config};
use patchloop_core::{Controller, PatchloopConfig, UsageLog, registry, summarize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "patchloop.yml";

/// Color output mode for terminal display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorMode {
    /// Automatically detect if stdout is a TTY
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl ColorMode {
    fn should_use_colors(self) -> bool {
        match self {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => stdout().is_terminal(),
        }
    }
}

/// patchloop - iterative test-driven program repair
#[derive(Parser, Debug)]
#[command(name = "patchloop", version, about, disable_help_subcommand = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (defaults to ./patchloop.yml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Color output mode (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorMode::Auto, global = true)]
    color: ColorMode,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Repair every discovered project (default if no subcommand given)
    Run(RunArgs),

    /// List the projects a run would process
    Projects(ProjectsArgs),

    /// Summarize recorded token usage
    Usage(UsageArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Parser, Debug, Default)]
struct RunArgs {
    /// Only process the named project (repeatable)
    #[arg(short, long = "project", value_name = "NAME")]
    projects: Vec<String>,

    /// Directory containing the projects
    #[arg(long, value_name = "DIR")]
    projects_root: Option<PathBuf>,

    /// Failed validations allowed per project
    #[arg(long, value_name = "N")]
    max_iterations: Option<u32>,

    /// Test command timeout in seconds
    #[arg(long, value_name = "SECS")]
    test_timeout: Option<u64>,

    /// Do not write usage telemetry
    #[arg(long)]
    no_telemetry: bool,
}

#[derive(Parser, Debug)]
struct ProjectsArgs {
    /// Directory containing the projects
    #[arg(long, value_name = "DIR")]
    projects_root: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct UsageArgs {
    /// Only include records from this run
    #[arg(long)]
    run_id: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    colored::control::set_override(cli.color.should_use_colors());

    match cli.command {
        Some(Commands::Run(args)) => run_command(cli.config.as_deref(), args).await,
        None => run_command(cli.config.as_deref(), RunArgs::default()).await,
        Some(Commands::Projects(args)) => projects_command(cli.config.as_deref(), &args),
        Some(Commands::Usage(args)) => usage_command(cli.config.as_deref(), &args),
        Some(Commands::Completions(args)) => {
            completions::generate_completions(&args);
            Ok(())
        }
    }
}

/// Loads configuration: file, then environment, then validation.
///
/// Without `--config`, `patchloop.yml` is used if it exists; otherwise the
/// built-in defaults apply.
fn load_config(path: Option<&Path>) -> Result<PatchloopConfig> {
    let mut config = match path {
        Some(path) => PatchloopConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG).exists() => PatchloopConfig::from_file(DEFAULT_CONFIG)
            .with_context(|| format!("Failed to load config from {DEFAULT_CONFIG}"))?,
        None => {
            info!("No {DEFAULT_CONFIG} found, using defaults");
            PatchloopConfig::default()
        }
    };
    config
        .apply_env()
        .context("Failed to apply environment overrides")?;
    Ok(config)
}

/// Applies `run` flags on top of the loaded configuration.
fn apply_run_args(config: &mut PatchloopConfig, args: &RunArgs) {
    if let Some(root) = &args.projects_root {
        config.projects.root = root.clone();
    }
    if let Some(max) = args.max_iterations {
        config.repair_loop.max_iterations = max;
    }
    if let Some(secs) = args.test_timeout {
        config.harness.timeout_secs = secs;
    }
    if args.no_telemetry {
        config.telemetry.enabled = false;
    }
}

async fn run_command(config_path: Option<&Path>, args: RunArgs) -> Result<()> {
    let mut config = load_config(config_path)?;
    apply_run_args(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    let projects = registry::select(&config.projects, &args.projects)
        .context("Failed to discover projects")?;
    if projects.is_empty() {
        warn!(root = %config.projects.root.display(), "No projects found");
        print!("{}", display::format_projects(&projects));
        return Ok(());
    }

    let oracle = oracle_from_config(&config.oracle).context("Failed to initialize oracle")?;
    let harness = Arc::new(CommandHarness::new(config.harness.clone()));

    let usage_log = if config.telemetry.enabled {
        match UsageLog::open(&config.telemetry.run_dir) {
            Ok(log) => Some(log),
            Err(e) => {
                warn!(error = %e, "Usage telemetry disabled");
                None
            }
        }
    } else {
        None
    };

    let mut controller = Controller::new(config, oracle, harness);
    if let Some(log) = usage_log {
        controller = controller.with_usage_log(log);
    }

    let report = controller.run(projects).await;
    print!("{}", display::format_report(&report));

    if !report.all_completed() {
        std::process::exit(1);
    }
    Ok(())
}

fn projects_command(config_path: Option<&Path>, args: &ProjectsArgs) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(root) = &args.projects_root {
        config.projects.root = root.clone();
    }
    let projects = registry::discover(&config.projects).context("Failed to discover projects")?;
    print!("{}", display::format_projects(&projects));
    Ok(())
}

fn usage_command(config_path: Option<&Path>, args: &UsageArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let log = UsageLog::new(&config.telemetry.run_dir);
    let records = log
        .read_all()
        .with_context(|| format!("Failed to read {}", log.path().display()))?;

    match args.format {
        OutputFormat::Json => {
            let filtered: Vec<_> = records
                .iter()
                .filter(|r| args.run_id.as_deref().is_none_or(|id| r.run_id == id))
                .collect();
            println!("{}", serde_json::to_string_pretty(&filtered)?);
        }
        OutputFormat::Table => {
            let totals = summarize(&records, args.run_id.as_deref());
            print!("{}", display::format_usage(&totals));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "patchloop",
            "-v",
            "run",
            "--project",
            "calc",
            "-p",
            "todo",
            "--max-iterations",
            "2",
            "--test-timeout",
            "30",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Some(Commands::Run(args)) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.projects, vec!["calc", "todo"]);
        assert_eq!(args.max_iterations, Some(2));
        assert_eq!(args.test_timeout, Some(30));
    }

    #[test]
    fn test_run_args_override_config() {
        let mut config = PatchloopConfig::default();
        let args = RunArgs {
            projects_root: Some(PathBuf::from("fixtures")),
            max_iterations: Some(1),
            test_timeout: Some(5),
            no_telemetry: true,
            ..RunArgs::default()
        };
        apply_run_args(&mut config, &args);
        assert_eq!(config.projects.root, PathBuf::from("fixtures"));
        assert_eq!(config.repair_loop.max_iterations, 1);
        assert_eq!(config.harness.timeout_secs, 5);
        assert!(!config.telemetry.enabled);
    }

    #[test]
    fn test_zero_iterations_flag_fails_validation() {
        let mut config = PatchloopConfig::default();
        apply_run_args(
            &mut config,
            &RunArgs {
                max_iterations: Some(0),
                ..RunArgs::default()
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("custom.yml");
        std::fs::write(&path, "harness:\n  command: \"make test\"\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.harness.command, "make test");
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(load_config(Some(&dir.path().join("absent.yml"))).is_err());
    }
}
