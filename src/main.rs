mod cli;
mod core;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::core::config::AppConfig;
use crate::core::models::ledger::Usage;
use crate::core::pipeline::{self, PipelineOutput};

#[derive(Parser)]
#[command(
    name = "ci-budget",
    about = "Month-scoped cost ledger and budget gate for CI pipelines",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (default: $CI_BUDGET_CONFIG, then ~/.config/ci-budget/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Ledger file, overrides the config and $CI_BUDGET_FILE
    #[arg(long, global = true)]
    ledger: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true)]
    format: Option<String>,

    /// Shorthand for --format json
    #[arg(short = 'j', long = "json", global = true)]
    json: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    /// Disable ANSI colors
    #[arg(long, global = true)]
    no_color: bool,

    /// Verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Record one pipeline run and print the summary
    Update {
        /// Input tokens consumed
        #[arg(default_value_t = 0)]
        input_tokens: u64,

        /// Output tokens produced
        #[arg(default_value_t = 0)]
        output_tokens: u64,

        /// Pipeline minutes used
        #[arg(default_value_t = 0.0)]
        minutes: f64,

        /// Model the tokens were billed against (default: pricing.default_model)
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Print the ledger summary (default)
    Summary,
    /// Write a Markdown cost report and print the summary
    Report {
        /// Report path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Budget gate for pipeline steps
    Guard {
        #[command(subcommand)]
        phase: GuardPhase,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum GuardPhase {
    /// Decide whether heavy steps should be skipped
    Pre,
    /// Record this run's compute minutes and check the budget
    Post {
        /// Minutes used by the run
        #[arg(long, conflicts_with = "started_at")]
        minutes: Option<f64>,

        /// Unix timestamp (seconds) when the run started
        #[arg(long)]
        started_at: Option<i64>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Generate a config file with template pricing
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Validate config file
    Check,
    /// Print the effective config
    Show,
}

/// Initializes the tracing subscriber; `RUST_LOG` overrides the default level.
fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ci_budget={level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output_opts = cli::output::OutputOptions {
        format: if cli.json {
            cli::output::OutputFormat::Json
        } else {
            match cli.format.as_deref() {
                Some("json") => cli::output::OutputFormat::Json,
                _ => cli::output::OutputFormat::Text,
            }
        },
        pretty: cli.pretty,
        use_color: cli::output::detect_color(!cli.no_color),
    };

    let config_path = AppConfig::resolve_path(cli.config.as_deref());
    let mut config = AppConfig::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    config.apply_env(|k| std::env::var(k).ok())?;
    if let Some(ledger) = cli.ledger {
        config.ledger.path = ledger;
    }
    tracing::debug!(
        config = %config_path.display(),
        ledger = %config.ledger.path.display(),
        "configuration resolved"
    );

    let now = chrono::Utc::now();
    let env = |k: &str| std::env::var(k).ok();

    match cli.command {
        None | Some(Commands::Summary) => {
            cli::ledger_cmd::summary(&config, &now, &output_opts)?
        }
        Some(Commands::Update {
            input_tokens,
            output_tokens,
            minutes,
            model,
        }) => {
            let usage = Usage {
                input_tokens,
                output_tokens,
                minutes,
                model,
            };
            config.ensure_valid()?;
            let meta = pipeline::run_meta(env);
            cli::ledger_cmd::update(&config, usage, now, &meta, &output_opts)?
        }
        Some(Commands::Report { output }) => {
            cli::ledger_cmd::report(&config, output.as_deref(), &now, &output_opts)?
        }
        Some(Commands::Guard { phase }) => {
            config.ensure_valid()?;
            let out = PipelineOutput::from_env();
            match phase {
                GuardPhase::Pre => cli::guard_cmd::pre(&config, &now, &out, &output_opts)?,
                GuardPhase::Post {
                    minutes,
                    started_at,
                } => {
                    let meta = pipeline::run_meta(env);
                    let elapsed = cli::guard_cmd::elapsed_minutes(minutes, started_at, &now);
                    cli::guard_cmd::post(&config, elapsed, now, &meta, &out, &output_opts)?
                }
            }
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { force } => {
                cli::config_cmd::init(&config_path, force, &output_opts)?
            }
            ConfigAction::Check => cli::config_cmd::check(&config_path, &config, &output_opts)?,
            ConfigAction::Show => cli::config_cmd::show(&config, &output_opts)?,
        },
    }

    Ok(())
}
