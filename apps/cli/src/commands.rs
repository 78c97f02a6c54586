//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use facetharvest_core::{
    HarvestSummary, ProgressReporter, RunState, ShardLedger, ShardPhase, plan, run_harvest,
};
use facetharvest_shared::{
    AppConfig, BatchWindow, HarvestConfig, RecordStats, ShardDescriptor, ShardResult, TimeWindow,
    expand_home, init_config, load_config, load_config_from,
};
use facetharvest_storage::CheckpointStore;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// facetharvest: sharded, resumable job posting harvester.
#[derive(Parser)]
#[command(
    name = "facetharvest",
    version,
    about = "Harvest job postings through facet shards with checkpoint/resume.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.facetharvest/facetharvest.toml).
    #[arg(long, global = true, env = "FACETHARVEST_CONFIG")]
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

/// Posting-age window accepted on the command line.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum WindowArg {
    Hourly,
    Daily,
    Weekly,
}

impl From<WindowArg> for TimeWindow {
    fn from(arg: WindowArg) -> Self {
        match arg {
            WindowArg::Hourly => TimeWindow::Hourly,
            WindowArg::Daily => TimeWindow::Daily,
            WindowArg::Weekly => TimeWindow::Weekly,
        }
    }
}

/// Overrides shared by `run` and `plan`.
#[derive(Args, Debug, Default)]
pub(crate) struct PlanArgs {
    /// One-based batch of the ranked plan to run.
    #[arg(long, requires = "batch_size")]
    pub batch_number: Option<usize>,

    /// Shards per batch.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// State directory (checkpoint, history, exports).
    #[arg(long)]
    pub state_dir: Option<String>,

    /// Ignore the previous run's shard yields when ordering.
    #[arg(long)]
    pub no_history: bool,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run a harvest.
    Run {
        #[command(flatten)]
        plan: PlanArgs,

        /// Continue from the last checkpoint, skipping completed shards.
        #[arg(long)]
        resume: bool,

        /// With --resume, run previously failed shards again.
        #[arg(long, requires = "resume")]
        retry_failed: bool,

        /// Stop after processing this many shards.
        #[arg(long)]
        max_shards: Option<usize>,

        /// Keyword query (overrides the config).
        #[arg(long)]
        keywords: Option<String>,

        /// Posting-age window.
        #[arg(long)]
        time_window: Option<WindowArg>,

        /// Exported cookie JSON file.
        #[arg(long)]
        cookies: Option<String>,

        /// Merge into an existing records.json instead of replacing it.
        #[arg(long)]
        append: bool,

        /// Do not fall back to the rendered search page.
        #[arg(long)]
        no_fallback: bool,
    },

    /// Print the ranked shard plan without fetching anything.
    Plan {
        #[command(flatten)]
        plan: PlanArgs,

        /// Print the plan as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Summarize the last checkpoint.
    Status {
        /// State directory (defaults to the configured one).
        #[arg(long)]
        state_dir: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
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
        0 => "facetharvest=info",
        1 => "facetharvest=debug",
        _ => "facetharvest=trace",
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

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run {
            plan,
            resume,
            retry_failed,
            max_shards,
            keywords,
            time_window,
            cookies,
            append,
            no_fallback,
        } => {
            let mut config = harvest_config(config_path, &plan)?;
            config.resume = resume;
            config.retry_failed = retry_failed;
            config.append = append;
            if max_shards.is_some() {
                config.shard_cap = max_shards;
            }
            if let Some(keywords) = keywords {
                config.query.keywords = keywords;
            }
            if let Some(window) = time_window {
                config.query.time_window = window.into();
            }
            if let Some(cookies) = cookies {
                config.cookie_file = expand_home(&cookies);
            }
            if no_fallback {
                config.fallback.enabled = false;
            }
            cmd_run(&config).await
        }
        Command::Plan { plan, json } => cmd_plan(&harvest_config(config_path, &plan)?, json).await,
        Command::Status { state_dir } => {
            let mut config = HarvestConfig::from(&app_config(config_path)?);
            if let Some(dir) = state_dir {
                config.state_dir = expand_home(&dir);
            }
            cmd_status(&config.state_dir).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn app_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

/// Config file values overridden by the shared plan flags.
fn harvest_config(path: Option<&Path>, args: &PlanArgs) -> Result<HarvestConfig> {
    let mut config = HarvestConfig::from(&app_config(path)?);
    if let Some(dir) = &args.state_dir {
        config.state_dir = expand_home(dir);
    }
    if args.no_history {
        config.use_history = false;
    }
    if let Some(number) = args.batch_number {
        let size = args
            .batch_size
            .ok_or_else(|| eyre!("--batch-number requires --batch-size"))?;
        config.window = Some(BatchWindow::from_batch_number(number, size)?);
    }
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config: &HarvestConfig) -> Result<()> {
    info!(
        resume = config.resume,
        shard_cap = ?config.shard_cap,
        window = ?config.window,
        state_dir = %config.state_dir.display(),
        "starting harvest"
    );

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, checkpointing and stopping");
            interrupt.cancel();
        }
    });

    let reporter = CliProgress::new();
    let summary = run_harvest(config, &reporter, cancel).await?;
    print_summary(&summary);

    if summary.state == RunState::Aborted {
        println!("  Run interrupted. Continue with: facetharvest run --resume");
        println!();
    }
    Ok(())
}

async fn cmd_plan(config: &HarvestConfig, json: bool) -> Result<()> {
    let shards = plan(config).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&shards)?);
        return Ok(());
    }

    println!();
    println!("  {:>4}  {:<16}  {:<10}  Facets", "Rank", "Key", "Codes");
    for shard in &shards {
        println!(
            "  {:>4}  {:<16}  {:<10}  {}",
            shard.rank,
            shard.key,
            shard.codes(),
            shard.labels()
        );
    }
    println!();
    println!("  {} shards", shards.len());
    println!();
    Ok(())
}

async fn cmd_status(state_dir: &Path) -> Result<()> {
    let store = CheckpointStore::open(state_dir).await?;
    let Some(checkpoint) = store.load().await? else {
        println!("No checkpoint in {}", state_dir.display());
        return Ok(());
    };

    let ledger = ShardLedger::from_state(checkpoint.state);
    let state = ledger.state();
    let failed = state
        .shard_results
        .values()
        .filter(|r| r.outcome.is_failure())
        .count();

    println!();
    println!("  Checkpoint: {}", store.checkpoint_path().display());
    println!("  Run:        {}", checkpoint.run_id);
    println!("  Saved:      {}", checkpoint.saved_at.to_rfc3339());
    println!(
        "  Completed:  {} shards ({failed} failed)",
        state.completed.len()
    );
    print_stats(&ledger.stats());
    print_top_shards(&ledger.top_shards(3));
    println!();
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = app_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_summary(summary: &HarvestSummary) {
    println!();
    println!("  Harvest {}", summary.state);
    println!("  Run:        {}", summary.run_id);
    println!(
        "  Shards:     {} processed, {} skipped, {} empty, {} failed (of {})",
        summary.shards_processed,
        summary.shards_skipped,
        summary.empty_shards,
        summary.failed_shards,
        summary.shards_planned
    );
    println!(
        "  New:        {} of {} unique records",
        summary.new_records, summary.total_records
    );
    print_stats(&summary.stats);
    print_top_shards(&summary.top_shards);
    if let Some(latency) = summary.average_latency {
        println!("  Latency:    {:.1}s avg per shard", latency.as_secs_f64());
    }
    if let Some(export) = &summary.export {
        println!("  Records:    {}", export.records_path.display());
    }
    println!("  Time:       {:.1}s", summary.elapsed.as_secs_f64());
    println!();
}

fn print_stats(stats: &RecordStats) {
    println!(
        "  Records:    {} total ({} primary, {} fallback)",
        stats.total, stats.primary, stats.fallback
    );
    println!(
        "  Coverage:   {} with dates, {} with titles, {} reposts",
        stats.with_dates, stats.with_titles, stats.reposts
    );
}

fn print_top_shards(top: &[ShardResult]) {
    if top.is_empty() {
        return;
    }
    println!("  Top shards:");
    for result in top {
        println!("    {:>4}  {}", result.yielded, result.shard.labels());
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif bar over shards.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> ")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }
}

impl ProgressReporter for CliProgress {
    fn planned(&self, _total: usize, pending: usize) {
        self.bar.set_length(pending as u64);
    }

    fn shard_phase(&self, shard: &ShardDescriptor, phase: ShardPhase) {
        match phase {
            ShardPhase::Fetching => self.bar.set_message(format!("Fetching {}", shard.labels())),
            ShardPhase::Merging => self.bar.set_message(format!("Merging {}", shard.labels())),
            ShardPhase::Pending | ShardPhase::Completed => {}
        }
    }

    fn shard_finished(&self, result: &ShardResult, _processed: usize) {
        self.bar.inc(1);
        self.bar.println(format!(
            "  {:<8} {:>4} records ({} new)  {}",
            result.outcome.as_str(),
            result.yielded,
            result.new_records,
            result.shard.labels()
        ));
    }

    fn waiting(&self, delay: Duration, strategic: bool) {
        let kind = if strategic { "Break" } else { "Waiting" };
        self.bar
            .set_message(format!("{kind} {:.1}s", delay.as_secs_f64()));
    }

    fn done(&self, _summary: &HarvestSummary) {
        self.bar.finish_and_clear();
    }
}
