//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use lakeflow_core::{PipelineRunner, PlanCompiler, ProgressReporter, RunConfig, RunSummary};
use lakeflow_ingest::{ApiClient, HttpConfig, PluginRegistry};
use lakeflow_plugins::gitextractor::GitCliWalker;
use lakeflow_plugins::{registry, resolver_for};
use lakeflow_shared::{AppConfig, Blueprint, PipelinePlan, init_config, load_config, load_config_from};
use lakeflow_storage::Storage;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Lakeflow: collect engineering data into a normalized store.
#[derive(Parser)]
#[command(
    name = "lakeflow",
    version,
    about = "Compile blueprints into pipeline plans and run them against configured connections.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.lakeflow/lakeflow.toml.
    #[arg(long, global = true, env = "LAKEFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Compile a blueprint and print the resulting plan as JSON.
    Plan {
        /// Blueprint JSON file.
        #[arg(short, long)]
        blueprint: PathBuf,

        /// Id of the configured connection the scopes belong to.
        #[arg(short, long)]
        connection: u64,

        /// Write the plan here instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Compile a blueprint and execute the plan.
    Run {
        /// Blueprint JSON file.
        #[arg(short, long)]
        blueprint: PathBuf,

        /// Id of the configured connection the scopes belong to.
        #[arg(short, long)]
        connection: u64,
    },

    /// List registered plugins and their subtasks.
    Plugins,

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "lakeflow=info",
        1 => "lakeflow=debug",
        _ => "lakeflow=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Plan {
            blueprint,
            connection,
            out,
        } => {
            let config = app_config(config_path.as_deref())?;
            cmd_plan(&config, &blueprint, connection, out.as_deref()).await
        }
        Command::Run {
            blueprint,
            connection,
        } => {
            let config = app_config(config_path.as_deref())?;
            cmd_run(&config, &blueprint, connection).await
        }
        Command::Plugins => cmd_plugins(),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path.as_deref()),
        },
    }
}

fn app_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

fn plugin_registry() -> PluginRegistry {
    registry(Arc::new(GitCliWalker::new()))
}

fn read_blueprint(path: &Path) -> Result<Blueprint> {
    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("cannot read blueprint {}", path.display()))?;
    serde_json::from_str(&content)
        .wrap_err_with(|| format!("invalid blueprint {}", path.display()))
}

/// Compile the blueprint at `path` for the configured connection `connection_id`.
async fn compile(
    config: &AppConfig,
    registry: &PluginRegistry,
    path: &Path,
    connection_id: u64,
) -> Result<PipelinePlan> {
    let blueprint = read_blueprint(path)?;
    let connection = config.connection(connection_id)?;
    let plugin = registry
        .get(&connection.plugin)
        .ok_or_else(|| eyre!("no plugin named '{}' is registered", connection.plugin))?;

    let client = Arc::new(ApiClient::new(&connection, &HttpConfig::from(&config.http))?);
    let resolver = resolver_for(connection, client)?;

    info!(
        connection = connection_id,
        plugin = plugin.name(),
        scopes = blueprint.scopes.len(),
        "compiling blueprint"
    );
    let plan = PlanCompiler::new()
        .compile(&blueprint, resolver.as_ref(), &plugin.subtask_metas())
        .await?;
    Ok(plan)
}

async fn cmd_plan(
    config: &AppConfig,
    blueprint: &Path,
    connection_id: u64,
    out: Option<&Path>,
) -> Result<()> {
    let plan = compile(config, &plugin_registry(), blueprint, connection_id).await?;
    let json = serde_json::to_string_pretty(&plan)?;
    match out {
        Some(path) => {
            std::fs::write(path, json)
                .wrap_err_with(|| format!("cannot write plan to {}", path.display()))?;
            println!(
                "Plan with {} stage(s), {} task(s) written to {}",
                plan.len(),
                plan.task_count(),
                path.display()
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn cmd_run(config: &AppConfig, blueprint: &Path, connection_id: u64) -> Result<()> {
    let registry = plugin_registry();
    let plan = compile(config, &registry, blueprint, connection_id).await?;

    let storage = Arc::new(Storage::open(&config.database_path()?).await?);
    let runner = PipelineRunner::new(registry, storage, RunConfig::from_app(config))
        .with_connection(config.connection(connection_id)?)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            on_interrupt.cancel();
        }
    });

    let progress = CliProgress::new();
    let summary = runner.run(&plan, cancel, &progress).await;
    progress.spinner.finish_and_clear();
    let summary = summary?;

    println!();
    println!("  Pipeline run finished.");
    println!("  Run:    {}", summary.run_id);
    println!("  Stages: {}", summary.stages);
    println!("  Tasks:  {}", summary.tasks);
    println!("  Time:   {:.1}s", summary.elapsed.as_secs_f64());
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn stage_started(&self, stage: usize, tasks: usize) {
        self.spinner
            .set_message(format!("Stage {stage}: running {tasks} task(s)"));
    }

    fn task_finished(&self, stage: usize, plugin: &str) {
        self.spinner.println(format!("  ✓ stage {stage} · {plugin}"));
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Plugins and config
// ---------------------------------------------------------------------------

fn cmd_plugins() -> Result<()> {
    let registry = plugin_registry();
    for plugin in registry.plugins() {
        println!("{}  {}", plugin.name(), plugin.description());
        for meta in plugin.subtask_metas() {
            let flag = match (meta.required, meta.enabled_by_default) {
                (true, _) => "required",
                (false, true) => "default",
                (false, false) => "optional",
            };
            let domains: Vec<&str> = meta.domain_types.iter().map(|d| d.as_str()).collect();
            println!(
                "    {:<34} {:<9} [{}]",
                meta.name,
                flag,
                domains.join(", ")
            );
        }
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = app_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
