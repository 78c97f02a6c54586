//! Harvest engine for facetharvest.
//!
//! This crate ties the facet generator, rate governor, and shard ledger
//! together into the resumable shard loop ([`run_harvest`]).

pub mod facets;
pub mod governor;
pub mod ledger;
pub mod orchestrator;

pub use facets::{generate_shards, select_window};
pub use governor::RateGovernor;
pub use ledger::ShardLedger;
pub use orchestrator::{
    HarvestSummary, ProgressReporter, RunState, ShardPhase, SilentProgress, plan, plan_shards,
    run_harvest, run_harvest_with,
};
