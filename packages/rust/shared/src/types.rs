//! Core domain types for facetharvest shards, records, and harvest state.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Current schema version for the checkpoint file format.
pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for harvest run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Facets
// ---------------------------------------------------------------------------

/// One allowed value of a facet dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetValue {
    /// Provider filter code (e.g. `"2"`, `"F"`).
    pub code: String,
    /// Human-readable label (e.g. `"entry"`, `"full_time"`).
    pub label: String,
}

impl FacetValue {
    pub fn new(code: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            label: label.into(),
        }
    }
}

/// One dimension of the provider's filter grammar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetDimension {
    /// Dimension name used in shard keys (e.g. `"experience"`).
    pub name: String,
    /// Filter name inside the structured listing query (e.g. `"jobType"`).
    pub api_filter: String,
    /// Query parameter on the rendered search page (e.g. `"f_JT"`).
    pub page_param: String,
    /// Allowed values, in iteration order.
    pub values: Vec<FacetValue>,
}

/// A facet dimension pinned to a single value, as carried by a shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardFacet {
    pub dimension: String,
    pub api_filter: String,
    pub page_param: String,
    pub code: String,
    pub label: String,
}

// ---------------------------------------------------------------------------
// Shards
// ---------------------------------------------------------------------------

/// Stable shard identity: hex SHA-256 prefix of the canonical facet tuple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardKey(pub String);

impl ShardKey {
    /// Derive the key from an ordered facet tuple.
    ///
    /// The canonical form is `dimension=code` pairs joined by `|`, so the key
    /// depends on dimension names and codes but never on labels.
    pub fn from_facets(facets: &[ShardFacet]) -> Self {
        let canonical = facets
            .iter()
            .map(|f| format!("{}={}", f.dimension, f.code))
            .collect::<Vec<_>>()
            .join("|");
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        Self(digest[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ShardKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

/// An immutable, bounded sub-query over one combination of facet values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardDescriptor {
    /// Derived stable key.
    pub key: ShardKey,
    /// Zero-based position in the processing order.
    pub rank: usize,
    /// One value per facet dimension, in dimension order.
    pub facets: Vec<ShardFacet>,
}

impl ShardDescriptor {
    /// Build a descriptor; the key is derived from `facets`.
    pub fn new(rank: usize, facets: Vec<ShardFacet>) -> Self {
        Self {
            key: ShardKey::from_facets(&facets),
            rank,
            facets,
        }
    }

    /// Readable label such as `intern+internship+remote`.
    pub fn labels(&self) -> String {
        self.facets
            .iter()
            .map(|f| f.label.as_str())
            .collect::<Vec<_>>()
            .join("+")
    }

    /// Provider codes such as `1_I_2`.
    pub fn codes(&self) -> String {
        self.facets
            .iter()
            .map(|f| f.code.as_str())
            .collect::<Vec<_>>()
            .join("_")
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Provider-assigned record identity, unique within a harvest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier plus locator returned by a listing call; consumed by detail resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCandidate {
    pub id: RecordId,
    /// The listing URN the identifier was parsed from.
    pub urn: String,
}

/// Which extraction channel produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionPath {
    /// Structured listing + detail API.
    Primary,
    /// Rendered search page markup.
    Fallback,
}

impl std::fmt::Display for ExtractionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Fallback => f.write_str("fallback"),
        }
    }
}

/// Provider-specific fields of a record. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Group name the denylist is matched against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    /// Apply URL (company site when known, provider job page otherwise).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub education: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employment_status: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workplace_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub industries: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub job_functions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub benefits: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_allowed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sponsored: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applies: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub views: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// The canonical harvested entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Identity key, unique in the merged record set.
    pub id: RecordId,
    pub payload: RecordPayload,
    /// Channel that produced this copy.
    pub source: ExtractionPath,
    /// Whether the posting is a repost of an earlier listing.
    pub is_repost: bool,
    /// Normalized posting time, when the provider exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Shard results
// ---------------------------------------------------------------------------

/// Terminal classification of one shard's extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ShardOutcome {
    /// At least one record survived extraction and filtering.
    Success,
    /// The provider had nothing for this shard (or everything was filtered).
    Empty,
    /// Both extraction paths failed; the shard yielded nothing.
    Failed { reason: String },
}

impl ShardOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Empty => "empty",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Per-shard outcome row, written once per processed shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardResult {
    pub shard: ShardDescriptor,
    /// Records the extractor returned for this shard.
    pub yielded: usize,
    /// Records that were not already in the canonical set.
    pub new_records: usize,
    pub elapsed_ms: u64,
    pub outcome: ShardOutcome,
    /// Channel that produced the records, if extraction got that far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<ExtractionPath>,
    pub finished_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// HarvestState
// ---------------------------------------------------------------------------

/// Process-wide harvest state; the unit of checkpointing.
///
/// Ordered maps keep the serialized form stable regardless of the order in
/// which concurrent detail fetches completed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarvestState {
    /// Canonical record set keyed by identity.
    #[serde(default)]
    pub records: BTreeMap<RecordId, Record>,
    /// Latest result row per shard.
    #[serde(default)]
    pub shard_results: BTreeMap<ShardKey, ShardResult>,
    /// Identity key to every shard key that yielded it, in merge order.
    #[serde(default)]
    pub provenance: BTreeMap<RecordId, Vec<ShardKey>>,
    /// Shards whose results have been merged.
    #[serde(default)]
    pub completed: BTreeSet<ShardKey>,
}

/// Aggregate statistics over a record set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordStats {
    pub total: usize,
    pub primary: usize,
    pub fallback: usize,
    pub with_dates: usize,
    pub with_titles: usize,
    pub reposts: usize,
}

impl RecordStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a Record>) -> Self {
        let mut stats = Self::default();
        for record in records {
            stats.total += 1;
            match record.source {
                ExtractionPath::Primary => stats.primary += 1,
                ExtractionPath::Fallback => stats.fallback += 1,
            }
            if record.posted_at.is_some() {
                stats.with_dates += 1;
            }
            if record.payload.title.is_some() {
                stats.with_titles += 1;
            }
            if record.is_repost {
                stats.reposts += 1;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facet(dimension: &str, code: &str, label: &str) -> ShardFacet {
        ShardFacet {
            dimension: dimension.into(),
            api_filter: dimension.into(),
            page_param: format!("f_{dimension}"),
            code: code.into(),
            label: label.into(),
        }
    }

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::new();
        let parsed: RunId = id.to_string().parse().expect("parse RunId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn shard_key_ignores_labels() {
        let a = vec![facet("experience", "1", "intern"), facet("type", "F", "full_time")];
        let b = vec![facet("experience", "1", "INTERN"), facet("type", "F", "FT")];
        assert_eq!(ShardKey::from_facets(&a), ShardKey::from_facets(&b));
        assert_eq!(ShardKey::from_facets(&a).as_str().len(), 16);
    }

    #[test]
    fn shard_key_depends_on_order_and_codes() {
        let a = vec![facet("experience", "1", "x"), facet("type", "F", "y")];
        let b = vec![facet("type", "F", "y"), facet("experience", "1", "x")];
        let c = vec![facet("experience", "2", "x"), facet("type", "F", "y")];
        assert_ne!(ShardKey::from_facets(&a), ShardKey::from_facets(&b));
        assert_ne!(ShardKey::from_facets(&a), ShardKey::from_facets(&c));
    }

    #[test]
    fn descriptor_labels_and_codes() {
        let shard = ShardDescriptor::new(
            0,
            vec![
                facet("experience", "1", "intern"),
                facet("type", "I", "internship"),
                facet("workplace", "2", "remote"),
            ],
        );
        assert_eq!(shard.labels(), "intern+internship+remote");
        assert_eq!(shard.codes(), "1_I_2");
    }

    #[test]
    fn shard_outcome_serialization() {
        let failed = ShardOutcome::Failed {
            reason: "HTTP 500".into(),
        };
        let json = serde_json::to_string(&failed).expect("serialize");
        assert!(json.contains("\"status\":\"failed\""));
        let parsed: ShardOutcome = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, failed);
        assert!(parsed.is_failure());
    }

    #[test]
    fn record_tolerates_missing_fields() {
        let json = r#"{"id":"42","payload":{},"source":"fallback","is_repost":false}"#;
        let record: Record = serde_json::from_str(json).expect("deserialize");
        assert_eq!(record.id.as_str(), "42");
        assert!(record.posted_at.is_none());
        assert!(record.payload.title.is_none());
        assert_eq!(record.source, ExtractionPath::Fallback);
    }

    #[test]
    fn record_stats_counts() {
        let mut repost = Record {
            id: RecordId::new("1"),
            payload: RecordPayload {
                title: Some("Engineer".into()),
                ..Default::default()
            },
            source: ExtractionPath::Primary,
            is_repost: true,
            posted_at: Some(Utc::now()),
        };
        let plain = Record {
            id: RecordId::new("2"),
            payload: RecordPayload::default(),
            source: ExtractionPath::Fallback,
            is_repost: false,
            posted_at: None,
        };
        let stats = RecordStats::from_records([&repost, &plain]);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.primary, 1);
        assert_eq!(stats.fallback, 1);
        assert_eq!(stats.with_dates, 1);
        assert_eq!(stats.with_titles, 1);
        assert_eq!(stats.reposts, 1);

        repost.is_repost = false;
        assert_eq!(RecordStats::from_records([&repost]).reposts, 0);
    }
}
