//! Harvest orchestration: the shard loop.
//!
//! A single control task walks the ranked plan, skipping shards already
//! completed, and for each remaining shard:
//!
//! 1. runs the extractor (raced against cancellation)
//! 2. signals the rate governor
//! 3. merges into the ledger
//! 4. checkpoints on the configured cadence
//! 5. sleeps for the governor's delay (again raced against cancellation)
//!
//! Cancellation abandons the in-flight shard, writes a final checkpoint, and
//! returns a summary in the `Aborted` state.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use facetharvest_extractor::{
    HttpCatalogSource, HttpPageRenderer, RecordExtractor, Session, ShardExtractor,
};
use facetharvest_shared::{
    HarvestConfig, RecordStats, Result, RunId, ShardDescriptor, ShardKey, ShardOutcome, ShardResult,
};
use facetharvest_storage::{CheckpointStore, ExportSummary};

use crate::facets::{generate_shards, select_window};
use crate::governor::RateGovernor;
use crate::ledger::ShardLedger;

/// Number of shards listed as most productive in the summary.
const TOP_SHARDS: usize = 3;

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Lifecycle of a harvest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Finished,
    Aborted,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Lifecycle of one shard within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardPhase {
    Pending,
    Fetching,
    Merging,
    Completed,
}

/// Outcome of a harvest run.
#[derive(Debug, Clone)]
pub struct HarvestSummary {
    pub run_id: RunId,
    pub state: RunState,
    /// Shards in the (windowed) plan.
    pub shards_planned: usize,
    pub shards_processed: usize,
    /// Shards skipped because an earlier run completed them.
    pub shards_skipped: usize,
    pub empty_shards: usize,
    pub failed_shards: usize,
    /// Unique records in the merged set.
    pub total_records: usize,
    /// Records this run added to the merged set.
    pub new_records: usize,
    pub stats: RecordStats,
    /// Result rows of the shards processed by this run, in processing order.
    pub yields: Vec<ShardResult>,
    /// Most productive shards across the merged state.
    pub top_shards: Vec<ShardResult>,
    /// Governor delay at the end of the run.
    pub final_delay: Duration,
    pub average_latency: Option<Duration>,
    pub export: Option<ExportSummary>,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting harvest status.
pub trait ProgressReporter: Send + Sync {
    /// Called once the plan is known: total shards and shards still to run.
    fn planned(&self, total: usize, pending: usize);
    /// Called on every shard phase transition.
    fn shard_phase(&self, shard: &ShardDescriptor, phase: ShardPhase);
    /// Called after a shard has been merged.
    fn shard_finished(&self, result: &ShardResult, processed: usize);
    /// Called before a pacing sleep.
    fn waiting(&self, delay: Duration, strategic: bool);
    /// Called when the run ends (finished or aborted).
    fn done(&self, summary: &HarvestSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn planned(&self, _total: usize, _pending: usize) {}
    fn shard_phase(&self, _shard: &ShardDescriptor, _phase: ShardPhase) {}
    fn shard_finished(&self, _result: &ShardResult, _processed: usize) {}
    fn waiting(&self, _delay: Duration, _strategic: bool) {}
    fn done(&self, _summary: &HarvestSummary) {}
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// The ranked, windowed shard plan for `config`.
pub fn plan_shards(
    config: &HarvestConfig,
    history: &BTreeMap<ShardKey, usize>,
) -> Vec<ShardDescriptor> {
    let history = config.use_history.then_some(history);
    select_window(generate_shards(&config.facets, history), config.window)
}

async fn load_history(store: &CheckpointStore) -> BTreeMap<ShardKey, usize> {
    match store.load_history().await {
        Ok(history) => history,
        Err(e) => {
            warn!(error = %e, "ignoring unreadable shard history");
            BTreeMap::new()
        }
    }
}

/// Load the plan the way a run would, without contacting the provider.
pub async fn plan(config: &HarvestConfig) -> Result<Vec<ShardDescriptor>> {
    config.validate()?;
    let store = CheckpointStore::open(&config.state_dir).await?;
    let history = load_history(&store).await;
    Ok(plan_shards(config, &history))
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Run a harvest against the live provider.
pub async fn run_harvest(
    config: &HarvestConfig,
    progress: &dyn ProgressReporter,
    cancel: CancellationToken,
) -> Result<HarvestSummary> {
    config.validate()?;
    let session = Session::from_cookie_file(&config.cookie_file)?;
    let source = HttpCatalogSource::new(&config.provider, &config.query, &session)?;
    let store = CheckpointStore::open(&config.state_dir).await?;

    if config.fallback.enabled {
        let renderer = HttpPageRenderer::new(&config.provider, &session)?;
        let extractor = RecordExtractor::new(source, config)?.with_fallback(renderer);
        run_harvest_with(config, &extractor, &store, progress, cancel).await
    } else {
        let extractor = RecordExtractor::new(source, config)?;
        run_harvest_with(config, &extractor, &store, progress, cancel).await
    }
}

/// Run a harvest with injected collaborators.
///
/// Returns `Err` only for setup failures (invalid config, unreadable
/// checkpoint, rejected session) and for a failed final checkpoint or export.
#[instrument(skip_all, fields(resume = config.resume, shard_cap = ?config.shard_cap))]
pub async fn run_harvest_with(
    config: &HarvestConfig,
    extractor: &dyn ShardExtractor,
    store: &CheckpointStore,
    progress: &dyn ProgressReporter,
    cancel: CancellationToken,
) -> Result<HarvestSummary> {
    let start = Instant::now();
    config.validate()?;

    let run_id = RunId::new();
    let mut ledger = if config.resume {
        match store.load().await? {
            Some(checkpoint) => {
                info!(
                    previous_run = %checkpoint.run_id,
                    saved_at = %checkpoint.saved_at,
                    completed = checkpoint.state.completed.len(),
                    records = checkpoint.state.records.len(),
                    "resuming from checkpoint"
                );
                ShardLedger::from_state(checkpoint.state)
            }
            None => {
                info!("no checkpoint found, starting fresh");
                ShardLedger::new()
            }
        }
    } else {
        ShardLedger::new()
    };

    if config.resume && config.retry_failed {
        let reset = ledger.reset_failed();
        if reset > 0 {
            info!(shards = reset, "retrying previously failed shards");
        }
    }

    let history = load_history(store).await;
    let plan = plan_shards(config, &history);

    extractor.prepare().await?;

    let mut run_state = RunState::Running;
    info!(%run_id, planned = plan.len(), %run_state, "harvest started");

    let (pending, skipped): (Vec<&ShardDescriptor>, Vec<&ShardDescriptor>) =
        plan.iter().partition(|s| !ledger.is_completed(&s.key));
    let to_run = config
        .shard_cap
        .map_or(pending.len(), |cap| cap.min(pending.len()));

    progress.planned(plan.len(), to_run);
    for shard in pending.iter().take(to_run) {
        progress.shard_phase(shard, ShardPhase::Pending);
    }

    let mut governor = RateGovernor::new(config.governor);
    let mut yields: Vec<ShardResult> = Vec::new();
    let mut new_records = 0;

    for (index, shard) in pending.iter().take(to_run).enumerate() {
        if cancel.is_cancelled() {
            run_state = RunState::Aborted;
            break;
        }

        progress.shard_phase(shard, ShardPhase::Fetching);
        let started = Instant::now();
        let extraction = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(shard = %shard.key, "cancelled, discarding in-flight shard");
                run_state = RunState::Aborted;
                break;
            }
            extraction = extractor.extract(shard) => extraction,
        };
        let elapsed = started.elapsed();

        if extraction.outcome.is_failure() {
            governor.record_error();
        } else {
            governor.record_success(Some(elapsed));
        }

        progress.shard_phase(shard, ShardPhase::Merging);
        let yielded = extraction.records.len();
        let added = ledger.merge(
            shard,
            extraction.records,
            extraction.outcome,
            extraction.path,
            elapsed,
        );
        new_records += added;
        let processed = index + 1;
        progress.shard_phase(shard, ShardPhase::Completed);

        if let Some(result) = ledger.result(&shard.key) {
            info!(
                shard = %shard.key,
                facets = %shard.labels(),
                yielded,
                new = added,
                outcome = result.outcome.as_str(),
                path = ?result.path,
                elapsed_ms = result.elapsed_ms,
                "shard completed"
            );
            progress.shard_finished(result, processed);
            yields.push(result.clone());
        }

        if processed % config.checkpoint_interval == 0 {
            if let Err(e) = store.save(&run_id, ledger.state()).await {
                warn!(error = %e, "checkpoint failed, continuing");
            }
        }

        if processed == to_run {
            break;
        }

        let strategic = processed % config.break_interval == 0;
        let delay = if strategic {
            governor.break_delay()
        } else {
            governor.next_delay()
        };
        debug!(delay_ms = delay.as_millis() as u64, strategic, "pacing");
        progress.waiting(delay, strategic);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("cancelled during pacing");
                run_state = RunState::Aborted;
                break;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }

    if run_state == RunState::Running {
        run_state = RunState::Finished;
    }

    store.save(&run_id, ledger.state()).await?;

    // History only changes once every shard of the unwindowed plan is
    // completed, so batch windows over one cycle see a fixed ordering.
    let cycle_complete = generate_shards(&config.facets, None)
        .iter()
        .all(|s| ledger.is_completed(&s.key));
    if run_state == RunState::Finished && cycle_complete {
        let mut history = history;
        history.extend(ledger.yields());
        if let Err(e) = store.save_history(&history).await {
            warn!(error = %e, "failed to write shard history");
        }
    } else if run_state == RunState::Finished {
        debug!("cycle incomplete, shard history left unchanged");
    }

    let export = store.export(ledger.state(), config.append).await?;

    let summary = HarvestSummary {
        run_id,
        state: run_state,
        shards_planned: plan.len(),
        shards_processed: yields.len(),
        shards_skipped: skipped.len(),
        empty_shards: yields
            .iter()
            .filter(|r| r.outcome == ShardOutcome::Empty)
            .count(),
        failed_shards: yields.iter().filter(|r| r.outcome.is_failure()).count(),
        total_records: ledger.state().records.len(),
        new_records,
        stats: ledger.stats(),
        yields,
        top_shards: ledger.top_shards(TOP_SHARDS),
        final_delay: governor.current_delay(),
        average_latency: governor.average_latency(),
        export: Some(export),
        elapsed: start.elapsed(),
    };

    info!(
        run_id = %summary.run_id,
        state = %summary.state,
        processed = summary.shards_processed,
        skipped = summary.shards_skipped,
        failed = summary.failed_shards,
        total_records = summary.total_records,
        new_records = summary.new_records,
        governor_errors = governor.errors(),
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "harvest ended"
    );
    progress.done(&summary);

    Ok(summary)
}
