//! Shared types, error model, and configuration for facetharvest.
//!
//! This crate is the foundation depended on by all other facetharvest crates.
//! It provides:
//! - [`FacetHarvestError`]: the unified error type
//! - Domain types ([`ShardDescriptor`], [`Record`], [`ShardResult`], [`HarvestState`])
//! - Configuration ([`AppConfig`], [`HarvestConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BatchWindow, FallbackConfig, FiltersConfig, GovernorConfig, HarvestConfig,
    HarvestSection, ProviderConfig, QueryConfig, SessionConfig, TimeWindow, config_dir,
    config_file_path, default_facets, expand_home, init_config, load_config, load_config_from,
};
pub use error::{FacetHarvestError, Result};
pub use types::{
    CHECKPOINT_SCHEMA_VERSION, ExtractionPath, FacetDimension, FacetValue, HarvestState,
    RawCandidate, Record, RecordId, RecordPayload, RecordStats, RunId, ShardDescriptor,
    ShardFacet, ShardKey, ShardOutcome, ShardResult,
};
