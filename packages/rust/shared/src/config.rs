//! Application configuration for facetharvest.
//!
//! User config lives at `~/.facetharvest/facetharvest.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FacetHarvestError, Result};
use crate::types::{FacetDimension, FacetValue};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "facetharvest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".facetharvest";

// ---------------------------------------------------------------------------
// Config structs (matching facetharvest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Provider endpoint settings.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Search query shared by every shard.
    #[serde(default)]
    pub query: QueryConfig,

    /// Shard loop settings.
    #[serde(default)]
    pub harvest: HarvestSection,

    /// Rate governor bounds.
    #[serde(default)]
    pub governor: GovernorConfig,

    /// Rendered-page fallback settings.
    #[serde(default)]
    pub fallback: FallbackConfig,

    /// Session credential location.
    #[serde(default)]
    pub session: SessionConfig,

    /// Output filters.
    #[serde(default)]
    pub filters: FiltersConfig,

    /// Facet dimensions whose cross product forms the shard space.
    #[serde(default = "default_facets")]
    pub facets: Vec<FacetDimension>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            query: QueryConfig::default(),
            harvest: HarvestSection::default(),
            governor: GovernorConfig::default(),
            fallback: FallbackConfig::default(),
            session: SessionConfig::default(),
            filters: FiltersConfig::default(),
            facets: default_facets(),
        }
    }
}

/// `[provider]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Origin of the provider (API and search pages share it).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// User-Agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Timeout for listing requests, in seconds.
    #[serde(default = "default_listing_timeout")]
    pub listing_timeout_secs: u64,

    /// Timeout for detail requests, in seconds.
    #[serde(default = "default_detail_timeout")]
    pub detail_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            listing_timeout_secs: default_listing_timeout(),
            detail_timeout_secs: default_detail_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "https://www.linkedin.com".into()
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/140.0.0.0 Safari/537.36"
        .into()
}
fn default_listing_timeout() -> u64 {
    15
}
fn default_detail_timeout() -> u64 {
    10
}

/// Posting-age window applied to every query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    Hourly,
    Daily,
    Weekly,
}

impl TimeWindow {
    /// Provider filter value for this window.
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Hourly => "r3600",
            Self::Daily => "r86400",
            Self::Weekly => "r604800",
        }
    }
}

/// `[query]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Boolean keyword query (plain text, encoded when the URL is built).
    #[serde(default = "default_keywords")]
    pub keywords: String,

    /// Provider geo identifier for the search location.
    #[serde(default = "default_geo_id")]
    pub geo_id: String,

    /// Location name used on rendered search pages.
    #[serde(default = "default_location")]
    pub location: String,

    /// Posting-age window.
    #[serde(default = "default_time_window")]
    pub time_window: TimeWindow,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            keywords: default_keywords(),
            geo_id: default_geo_id(),
            location: default_location(),
            time_window: default_time_window(),
        }
    }
}

fn default_keywords() -> String {
    r#""AI" OR "Generative AI" OR "LLM" OR "Large Language Model" OR "Prompt Engineering" OR "Foundation Model" OR "RAG" OR "RLHF""#.into()
}
fn default_geo_id() -> String {
    "103644278".into()
}
fn default_location() -> String {
    "United States".into()
}
fn default_time_window() -> TimeWindow {
    TimeWindow::Weekly
}

/// `[harvest]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestSection {
    /// Listing page size; a full page signals that more pages exist.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Safety cap on listing pages per shard.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Concurrent detail fetches within one shard.
    #[serde(default = "default_detail_workers")]
    pub detail_workers: usize,

    /// Maximum shards to process per run (unset = no cap).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_cap: Option<usize>,

    /// Checkpoint after every N processed shards.
    #[serde(default = "default_interval")]
    pub checkpoint_interval: usize,

    /// Take a longer break after every N processed shards.
    #[serde(default = "default_interval")]
    pub break_interval: usize,

    /// Pause between listing pages of the same shard, in ms.
    #[serde(default = "default_page_delay")]
    pub page_delay_ms: u64,

    /// Directory holding the checkpoint, history, and exports.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Reorder shards by the previous run's yields.
    #[serde(default = "default_true")]
    pub use_history: bool,
}

impl Default for HarvestSection {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            detail_workers: default_detail_workers(),
            shard_cap: None,
            checkpoint_interval: default_interval(),
            break_interval: default_interval(),
            page_delay_ms: default_page_delay(),
            state_dir: default_state_dir(),
            use_history: true,
        }
    }
}

fn default_page_size() -> usize {
    100
}
fn default_max_pages() -> usize {
    5
}
fn default_detail_workers() -> usize {
    10
}
fn default_interval() -> usize {
    10
}
fn default_page_delay() -> u64 {
    1000
}
fn default_state_dir() -> String {
    "~/.facetharvest/state".into()
}
fn default_true() -> bool {
    true
}

/// `[governor]` section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GovernorConfig {
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_min_delay")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            min_delay_ms: default_min_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

fn default_base_delay() -> u64 {
    1000
}
fn default_min_delay() -> u64 {
    300
}
fn default_max_delay() -> u64 {
    5000
}

/// `[fallback]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Whether to try the rendered page when the listing API fails.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum cards taken from one rendered page.
    #[serde(default = "default_max_cards")]
    pub max_cards: usize,

    /// Time to let the page settle before extracting, in ms.
    #[serde(default = "default_settle")]
    pub settle_ms: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_cards: default_max_cards(),
            settle_ms: default_settle(),
        }
    }
}

fn default_max_cards() -> usize {
    25
}
fn default_settle() -> u64 {
    2000
}

/// `[session]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Exported cookie JSON (`[{"name", "value", "domain"}]`).
    #[serde(default = "default_cookie_file")]
    pub cookie_file: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_file: default_cookie_file(),
        }
    }
}

fn default_cookie_file() -> String {
    "~/.facetharvest/cookies.json".into()
}

/// `[filters]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiltersConfig {
    /// Case-insensitive patterns matched against the company name.
    #[serde(default = "default_denylist")]
    pub denylist: Vec<String>,
}

impl Default for FiltersConfig {
    fn default() -> Self {
        Self {
            denylist: default_denylist(),
        }
    }
}

fn default_denylist() -> Vec<String> {
    [
        "jobright",
        "jooble",
        r"talent\.com",
        "ziprecruiter",
        "lensa",
        "adzuna",
        "simplyhired",
        "neuvoo",
        "jora",
        "glassdoor",
        "jobs2careers",
        "myjobhelper",
        "careerbuilder",
        "monster",
        "snagajob",
        "insight global",
        "teksystems",
        "kforce",
        "aerotek",
        "randstad",
        "robert half",
        "apex systems",
        "experis",
        "actalent",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn dimension(name: &str, api_filter: &str, page_param: &str, values: &[(&str, &str)]) -> FacetDimension {
    FacetDimension {
        name: name.into(),
        api_filter: api_filter.into(),
        page_param: page_param.into(),
        values: values
            .iter()
            .map(|(code, label)| FacetValue::new(*code, *label))
            .collect(),
    }
}

/// The provider's three filter dimensions (6 × 7 × 3 = 126 shards).
pub fn default_facets() -> Vec<FacetDimension> {
    vec![
        dimension(
            "experience",
            "experience",
            "f_E",
            &[
                ("1", "intern"),
                ("2", "entry"),
                ("3", "associate"),
                ("4", "mid-senior"),
                ("5", "director"),
                ("6", "executive"),
            ],
        ),
        dimension(
            "job_type",
            "jobType",
            "f_JT",
            &[
                ("I", "internship"),
                ("F", "full_time"),
                ("C", "contract"),
                ("T", "temporary"),
                ("P", "part_time"),
                ("V", "volunteer"),
                ("O", "other"),
            ],
        ),
        dimension(
            "workplace",
            "workplaceType",
            "f_WT",
            &[("2", "remote"), ("1", "on_site"), ("3", "hybrid")],
        ),
    ]
}

// ---------------------------------------------------------------------------
// Harvest config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// A contiguous slice of the ranked shard plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchWindow {
    /// Zero-based index of the first shard in the window.
    pub start: usize,
    /// Number of shards in the window.
    pub size: usize,
}

impl BatchWindow {
    /// Window for a one-based batch number, e.g. batch 2 of size 18 → shards 18..36.
    pub fn from_batch_number(batch_number: usize, batch_size: usize) -> Result<Self> {
        if batch_number == 0 || batch_size == 0 {
            return Err(FacetHarvestError::validation(
                "batch number and batch size must both be >= 1",
            ));
        }
        Ok(Self {
            start: (batch_number - 1) * batch_size,
            size: batch_size,
        })
    }
}

/// Runtime harvest configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub provider: ProviderConfig,
    pub query: QueryConfig,
    pub facets: Vec<FacetDimension>,
    pub page_size: usize,
    pub max_pages: usize,
    pub detail_workers: usize,
    /// Maximum shards to process (skipped shards do not count).
    pub shard_cap: Option<usize>,
    /// Restrict the run to a slice of the ranked plan.
    pub window: Option<BatchWindow>,
    /// Load the previous checkpoint and skip its completed shards.
    pub resume: bool,
    /// On resume, re-run shards whose last outcome was a failure.
    pub retry_failed: bool,
    /// Merge exported records into an existing `records.json`.
    pub append: bool,
    pub checkpoint_interval: usize,
    pub break_interval: usize,
    pub page_delay_ms: u64,
    pub governor: GovernorConfig,
    pub denylist: Vec<String>,
    pub fallback: FallbackConfig,
    pub cookie_file: PathBuf,
    pub state_dir: PathBuf,
    pub use_history: bool,
}

impl From<&AppConfig> for HarvestConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            provider: config.provider.clone(),
            query: config.query.clone(),
            facets: config.facets.clone(),
            page_size: config.harvest.page_size,
            max_pages: config.harvest.max_pages,
            detail_workers: config.harvest.detail_workers,
            shard_cap: config.harvest.shard_cap,
            window: None,
            resume: false,
            retry_failed: false,
            append: false,
            checkpoint_interval: config.harvest.checkpoint_interval,
            break_interval: config.harvest.break_interval,
            page_delay_ms: config.harvest.page_delay_ms,
            governor: config.governor,
            denylist: config.filters.denylist.clone(),
            fallback: config.fallback,
            cookie_file: expand_home(&config.session.cookie_file),
            state_dir: expand_home(&config.harvest.state_dir),
            use_history: config.harvest.use_history,
        }
    }
}

impl HarvestConfig {
    /// Reject settings the shard loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(FacetHarvestError::config("harvest.page_size must be > 0"));
        }
        if self.max_pages == 0 {
            return Err(FacetHarvestError::config("harvest.max_pages must be > 0"));
        }
        if self.detail_workers == 0 {
            return Err(FacetHarvestError::config(
                "harvest.detail_workers must be > 0",
            ));
        }
        if self.checkpoint_interval == 0 || self.break_interval == 0 {
            return Err(FacetHarvestError::config(
                "checkpoint_interval and break_interval must be > 0",
            ));
        }
        if self.governor.min_delay_ms > self.governor.max_delay_ms {
            return Err(FacetHarvestError::config(format!(
                "governor.min_delay_ms ({}) exceeds governor.max_delay_ms ({})",
                self.governor.min_delay_ms, self.governor.max_delay_ms
            )));
        }
        if self.facets.is_empty() {
            return Err(FacetHarvestError::config("at least one facet is required"));
        }
        if let Some(empty) = self.facets.iter().find(|f| f.values.is_empty()) {
            return Err(FacetHarvestError::config(format!(
                "facet '{}' has no values",
                empty.name
            )));
        }
        for pattern in &self.denylist {
            regex::Regex::new(pattern).map_err(|e| {
                FacetHarvestError::config(format!("invalid denylist pattern '{pattern}': {e}"))
            })?;
        }
        Ok(())
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.facetharvest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| FacetHarvestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.facetharvest/facetharvest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| FacetHarvestError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        FacetHarvestError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| FacetHarvestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| FacetHarvestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| FacetHarvestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
