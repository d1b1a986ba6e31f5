//! infragraph CLI entrypoint.
//!
//! This is the main entrypoint for the infragraph command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use infragraph::cli::{Cli, Commands, OutputFormatter, StateCommands};
use infragraph::config::{
    ConfigParser, ConfigValidator, InfraConfig, StateBackend, find_config_file,
};
use infragraph::driver::{Driver, SimulatedDriver};
use infragraph::engine::CancelSignal;
use infragraph::error::{ConfigError, InfraError, Result};
use infragraph::graph::{GraphBuilder, ProviderContext, ResourceGraph};
use infragraph::planner::{PlanMode, Planner};
use infragraph::reconciler::Reconciler;
use infragraph::resource::ResourceSet;
use infragraph::state::{
    LocalStateStore, S3StateStore, STATE_DIR, StateStore, generate_holder_id,
};

use clap::Parser;
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

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` takes precedence over the verbosity flag.
fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

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
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_ref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, &formatter),
        Commands::Graph => cmd_graph(config_path, &formatter),
        Commands::Plan { destroy } => cmd_plan(config_path, destroy, &formatter).await,
        Commands::Apply {
            yes,
            max_parallel,
            no_prune,
        } => cmd_apply(config_path, yes, max_parallel, no_prune, &formatter).await,
        Commands::Destroy { yes } => cmd_destroy(config_path, yes, &formatter).await,
        Commands::Status => cmd_status(config_path, &formatter).await,
        Commands::Drift => cmd_drift(config_path, &formatter).await,
        Commands::State { command } => cmd_state(config_path, command, &formatter).await,
    }
}

/// Initialize a new stack directory.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing new infragraph stack in: {}", path.display());

    let config_path = path.join("infragraph.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Configuration file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/infragraph.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    let state_entry = format!("{STATE_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let has_env = existing.lines().any(|l| l.trim() == ".env");
        let has_state = existing.contains(STATE_DIR);
        if !has_env || !has_state {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# infragraph")?;
            if !has_env {
                writeln!(file, ".env")?;
            }
            if !has_state {
                writeln!(file, "{state_entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{state_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nStack initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and set your account and region");
    eprintln!("  2. Edit infragraph.yaml with your resources");
    eprintln!("  3. Run 'infragraph validate' to check your configuration");
    eprintln!("  4. Run 'infragraph plan' to see the apply order");
    eprintln!("  5. Run 'infragraph apply' to provision the stack");

    Ok(())
}

/// Validate configuration, then build and plan the graph.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, config_file) = load_config(config_path)?;
    info!("Validating configuration: {}", config_file.display());

    let result = ConfigValidator::new().validate(&config)?;

    // Dangling references and cycles only show up once the graph exists.
    let graph = build_graph(&config)?;
    let plan = Planner::new().plan(&graph, PlanMode::Apply)?;
    debug!(
        "Graph has {} resources in {} levels",
        plan.resource_count(),
        plan.level_count()
    );

    emit(&formatter.format_validation(&result, &config, show_warnings));
    Ok(())
}

/// Show the dependency edges.
fn cmd_graph(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (config, _) = load_config(config_path)?;
    ConfigValidator::new().validate(&config)?;

    let graph = build_graph(&config)?;
    emit(&formatter.format_graph(&graph));
    Ok(())
}

/// Show the level plan and the changes against recorded state.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    destroy: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, state_store) = load_config_and_state(config_path).await?;
    let reconciler = Reconciler::new(&config, &state_store, create_driver(&config));

    let mode = if destroy {
        PlanMode::Destroy
    } else {
        PlanMode::Apply
    };
    let preview = reconciler.preview(mode).await?;

    emit(&formatter.format_plan(&preview));
    Ok(())
}

/// Apply the stack.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    max_parallel: Option<usize>,
    no_prune: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, state_store) = load_config_and_state(config_path).await?;

    let mut reconciler = Reconciler::new(&config, &state_store, create_driver(&config))
        .with_prune(!no_prune)
        .with_cancel_signal(cancel_on_ctrl_c());
    if let Some(max_parallel) = max_parallel {
        if max_parallel == 0 {
            return Err(ConfigError::validation(
                "--max-parallel must be at least 1",
                "engine.max_parallel",
            )
            .into());
        }
        reconciler = reconciler.with_max_parallel(max_parallel);
    }

    let preview = reconciler.preview(PlanMode::Apply).await?;
    let ignored = if no_prune {
        preview.changes.orphans().len()
    } else {
        0
    };
    if preview.changes.total_changes() == ignored {
        eprintln!("No changes to apply.");
        return Ok(());
    }

    emit(&formatter.format_plan(&preview));

    if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
        eprintln!("Apply cancelled.");
        return Ok(());
    }

    let result = reconciler.apply().await?;
    emit(&formatter.format_reconciliation(&result));
    Ok(())
}

/// Destroy every recorded resource.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, state_store) = load_config_and_state(config_path).await?;

    let recorded = state_store
        .load()
        .await?
        .map(|state| state.resource_names().len())
        .unwrap_or_default();
    if recorded == 0 {
        eprintln!("No resources to destroy.");
        return Ok(());
    }

    let reconciler = Reconciler::new(&config, &state_store, create_driver(&config))
        .with_cancel_signal(cancel_on_ctrl_c());

    let preview = reconciler.preview(PlanMode::Destroy).await?;
    emit(&formatter.format_plan(&preview));

    if !auto_approve
        && !confirm(
            &format!("\n{recorded} resource(s) will be destroyed. Type 'destroy' to confirm: "),
            "destroy",
        )?
    {
        eprintln!("Destruction cancelled.");
        return Ok(());
    }

    let result = reconciler.destroy().await?;
    emit(&formatter.format_reconciliation(&result));
    Ok(())
}

/// Show recorded resources and exports.
async fn cmd_status(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (_config, state_store) = load_config_and_state(config_path).await?;

    match state_store.load().await? {
        Some(state) => emit(&formatter.format_state(&state)),
        None => eprintln!("No state found. Run 'infragraph apply' first."),
    }

    if let Some(lock) = state_store.get_lock_info().await? {
        eprintln!("\n{}", formatter.format_lock(&lock));
    }

    Ok(())
}

/// Check for drift.
async fn cmd_drift(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (config, state_store) = load_config_and_state(config_path).await?;

    let reconciler = Reconciler::new(&config, &state_store, create_driver(&config));
    let report = reconciler.check_drift().await?;

    emit(&formatter.format_drift(&report));
    Ok(())
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (_config, state_store) = load_config_and_state(config_path).await?;

    match command {
        StateCommands::Show => {
            if let Some(state) = state_store.load().await? {
                emit(&formatter.format_state(&state));
            } else {
                eprintln!("No state found.");
            }
        }
        StateCommands::Lock { holder } => {
            let holder = holder.unwrap_or_else(generate_holder_id);
            let lock = state_store.acquire_lock(&holder, "manual").await?;
            emit(&formatter.format_lock(&lock));
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                if state_store.is_locked().await? {
                    state_store.force_unlock().await?;
                    eprintln!("State forcefully unlocked.");
                } else {
                    eprintln!("State is not locked.");
                }
            } else if let Some(id) = lock_id {
                state_store.release_lock(&id).await?;
                eprintln!("State unlocked.");
            } else {
                eprintln!("Please provide --lock-id or use --force");
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Writes command output to stdout.
#[allow(clippy::print_stdout)]
fn emit(output: &str) {
    println!("{output}");
}

/// Prompts on stderr and returns true if the answer matches `expected`.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case(expected))
}

/// Returns a signal that is cancelled on the first Ctrl-C.
///
/// Work already dispatched runs to completion before the run stops.
fn cancel_on_ctrl_c() -> CancelSignal {
    let signal = CancelSignal::new();
    let handle = signal.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight resources");
            handle.cancel();
        }
    });
    signal
}

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Loads `.env` and the configuration with environment overrides.
fn load_config(config_path: Option<&PathBuf>) -> Result<(InfraConfig, PathBuf)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(config_dir(&config_file));
    parser.load_dotenv()?;

    let config = parser.load_with_env(&config_file)?;
    Ok((config, config_file))
}

fn config_dir(config_file: &Path) -> &Path {
    config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Builds the resource graph for `config`.
fn build_graph(config: &InfraConfig) -> Result<ResourceGraph> {
    let specs = ResourceSet::from_config(config)?.into_specs();
    let graph = GraphBuilder::new(ProviderContext::from_config(config))
        .with_exports(config.exports.clone())
        .build(specs)?;
    Ok(graph)
}

/// Loads and validates configuration and creates the configured state store.
async fn load_config_and_state(
    config_path: Option<&PathBuf>,
) -> Result<(InfraConfig, Box<dyn StateStore>)> {
    let (config, config_file) = load_config(config_path)?;
    ConfigValidator::new().validate(&config)?;

    let state_store: Box<dyn StateStore> = match config.state.backend {
        StateBackend::Local => {
            let path = config.state.path.as_ref().map_or_else(
                || config_dir(&config_file).join(STATE_DIR),
                PathBuf::from,
            );
            Box::new(LocalStateStore::with_base_dir(path))
        }
        StateBackend::S3 => {
            let bucket = config
                .state
                .bucket
                .as_deref()
                .ok_or_else(|| InfraError::internal("S3 bucket not configured"))?;
            let region = config
                .state
                .region
                .as_deref()
                .or(Some(config.provider.region.as_str()).filter(|r| !r.is_empty()));
            Box::new(
                S3StateStore::new(
                    bucket,
                    config.state.prefix.as_deref(),
                    region,
                    &config.qualified_name(),
                )
                .await,
            )
        }
    };

    debug!("Using {} state backend", state_store.backend_type());
    Ok((config, state_store))
}

/// Creates the provider driver.
fn create_driver(config: &InfraConfig) -> Arc<dyn Driver> {
    Arc::new(SimulatedDriver::new(ProviderContext::from_config(config)))
}
