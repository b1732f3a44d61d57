//! promote-compare CLI entrypoint.
//!
//! This is the main entrypoint for the promote-compare command-line tool.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use promotion_compare::cli::{Cli, Commands, OutputFormatter};
use promotion_compare::config::{find_config_file, ConfigParser, ConfigValidator, EngineConfig};
use promotion_compare::error::{CompareError, Result};
use promotion_compare::graph::WorkflowGraph;
use promotion_compare::orchestrator::{CompareOrchestrator, CompareRequest};
use promotion_compare::planner::WorkflowComparer;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli, &formatter)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", formatter.format_error(&e.to_string()));
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. Logs go to stderr.
fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli, formatter: &OutputFormatter) -> Result<ExitCode> {
    match cli.command {
        Commands::Compare {
            pipeline,
            stage,
            workflows,
        } => {
            let mut request = CompareRequest::new(pipeline, stage);
            if !workflows.is_empty() {
                request = request.with_workflows(workflows);
            }
            cmd_compare(cli.config.as_ref(), &request, formatter).await
        }
        Commands::Details {
            pipeline,
            stage,
            workflow,
        } => {
            let request = CompareRequest::new(pipeline, stage);
            cmd_details(cli.config.as_ref(), &request, &workflow, formatter).await
        }
        Commands::Validate { warnings } => cmd_validate(cli.config.as_ref(), warnings, formatter),
        Commands::Normalize { file } => cmd_normalize(cli.config.as_ref(), &file, formatter),
        Commands::DiffFiles { source, target } => {
            cmd_diff_files(cli.config.as_ref(), &source, &target, formatter)
        }
    }
}

/// Compare a pipeline stage.
async fn cmd_compare(
    config_path: Option<&PathBuf>,
    request: &CompareRequest,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let orchestrator = CompareOrchestrator::for_request(config, request)?;
    let cancel = cancel_on_ctrl_c();

    let plan = orchestrator.compare(request, &cancel).await?;
    println!("{}", formatter.format_plan(&plan));

    // Incomplete plans must not read as success to scripts
    if plan.has_unknown() {
        warn!("{} workflows could not be evaluated", plan.summary.unknown);
        return Ok(ExitCode::from(2));
    }

    Ok(ExitCode::SUCCESS)
}

/// Show details for one workflow.
async fn cmd_details(
    config_path: Option<&PathBuf>,
    request: &CompareRequest,
    workflow_id: &str,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let orchestrator = CompareOrchestrator::for_request(config, request)?;
    let cancel = cancel_on_ctrl_c();

    let workflow = orchestrator
        .workflow_details(request, workflow_id, &cancel)
        .await?;
    println!("{}", formatter.format_details(&workflow));

    Ok(ExitCode::SUCCESS)
}

/// Validate configuration.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating configuration: {}", config_file.display());

    let parser = parser_for(&config_file);
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let result = ConfigValidator::new().check(&config);
    println!("{}", formatter.format_validation(&config, &result, show_warnings));

    Ok(if result.is_valid() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Print the canonical form of a workflow file.
fn cmd_normalize(
    config_path: Option<&PathBuf>,
    file: &Path,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let comparer = WorkflowComparer::new(&optional_config(config_path)?);
    let prepared = comparer.prepare(&read_workflow(file)?)?;

    println!("{}", formatter.format_normalized(&prepared.normalized, &prepared.hash));
    Ok(ExitCode::SUCCESS)
}

/// Compare two workflow files offline.
fn cmd_diff_files(
    config_path: Option<&PathBuf>,
    source: &Path,
    target: &Path,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let comparer = WorkflowComparer::new(&optional_config(config_path)?);
    let source = comparer.prepare(&read_workflow(source)?)?;
    let target = comparer.prepare(&read_workflow(target)?)?;

    let workflow_id = source.normalized.id.clone();
    let result = comparer.compare(&workflow_id, Some(&source), Some(&target));
    println!("{}", formatter.format_details(&result));

    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Creates a parser rooted at the configuration file's directory.
fn parser_for(config_file: &Path) -> ConfigParser {
    ConfigParser::new().with_base_path(config_file.parent().unwrap_or_else(|| Path::new(".")))
}

/// Loads and validates the configuration.
fn load_config(config_path: Option<&PathBuf>) -> Result<EngineConfig> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let parser = parser_for(&config_file);
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let result = ConfigValidator::new().validate(&config)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }

    Ok(config)
}

/// Loads the configuration if one is given or found, else defaults.
fn optional_config(config_path: Option<&PathBuf>) -> Result<EngineConfig> {
    if config_path.is_some() || find_config_file(".").is_ok() {
        load_config(config_path)
    } else {
        debug!("No configuration found, using defaults");
        Ok(EngineConfig::default())
    }
}

/// Reads an exported workflow file; a missing id defaults to the file stem.
fn read_workflow(path: &Path) -> Result<WorkflowGraph> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        CompareError::internal(format!("Failed to read {}: {e}", path.display()))
    })?;
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("workflow");
    Ok(WorkflowGraph::from_document(serde_json::from_str(&content)?, stem)?)
}

/// Returns a token cancelled on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling compare");
            trigger.cancel();
        }
    });

    cancel
}
