//! Flat-file persistence for harvest state.
//!
//! Everything lives under one state directory:
//!
//! | File | Contents |
//! |---|---|
//! | `checkpoint.json` | [`Checkpoint`]: the full [`HarvestState`] of the latest run |
//! | `shard_history.json` | shard key → yield, used to prioritize the next run |
//! | `records.json` | exported records with provenance, sorted by id |
//! | `shard_results.json` | exported per-shard result rows, in rank order |
//!
//! Every file is written to a sibling temp file and renamed into place, so a
//! crash mid-write leaves the previous version intact.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use facetharvest_shared::{
    CHECKPOINT_SCHEMA_VERSION, FacetHarvestError, HarvestState, Record, RecordId, Result, RunId,
    ShardKey, ShardResult,
};

pub const CHECKPOINT_FILE: &str = "checkpoint.json";
pub const HISTORY_FILE: &str = "shard_history.json";
pub const RECORDS_FILE: &str = "records.json";
pub const SHARD_RESULTS_FILE: &str = "shard_results.json";

// ---------------------------------------------------------------------------
// File formats
// ---------------------------------------------------------------------------

/// On-disk checkpoint envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub run_id: RunId,
    pub saved_at: DateTime<Utc>,
    pub state: HarvestState,
}

/// One row of `records.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedRecord {
    #[serde(flatten)]
    pub record: Record,
    /// Every shard that yielded this record.
    #[serde(default)]
    pub shards: Vec<ShardKey>,
}

/// Result of an export pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub records_path: PathBuf,
    pub shard_results_path: PathBuf,
    /// Records in the file after the export.
    pub total: usize,
    /// Records that were not in the file before (all of them without `append`).
    pub added: usize,
}

// ---------------------------------------------------------------------------
// CheckpointStore
// ---------------------------------------------------------------------------

/// Handle on a state directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Open (creating if needed) the state directory at `dir`.
    pub async fn open(dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| FacetHarvestError::io(dir, e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE)
    }

    /// Write the checkpoint atomically.
    pub async fn save(&self, run_id: &RunId, state: &HarvestState) -> Result<()> {
        let checkpoint = Checkpoint {
            version: CHECKPOINT_SCHEMA_VERSION,
            run_id: run_id.clone(),
            saved_at: Utc::now(),
            state: state.clone(),
        };
        let path = self.checkpoint_path();
        write_json_atomic(&path, &checkpoint).await?;
        debug!(
            ?path,
            records = state.records.len(),
            completed = state.completed.len(),
            "checkpoint saved"
        );
        Ok(())
    }

    /// Load the checkpoint, or `None` when no checkpoint exists.
    pub async fn load(&self) -> Result<Option<Checkpoint>> {
        let Some(checkpoint) = read_json::<Checkpoint>(&self.checkpoint_path()).await? else {
            return Ok(None);
        };
        if checkpoint.version != CHECKPOINT_SCHEMA_VERSION {
            return Err(FacetHarvestError::Storage(format!(
                "unsupported checkpoint version {} (expected {CHECKPOINT_SCHEMA_VERSION})",
                checkpoint.version
            )));
        }
        Ok(Some(checkpoint))
    }

    // -----------------------------------------------------------------------
    // Shard history
    // -----------------------------------------------------------------------

    pub async fn save_history(&self, history: &BTreeMap<ShardKey, usize>) -> Result<()> {
        write_json_atomic(&self.dir.join(HISTORY_FILE), history).await
    }

    /// Previous shard yields; empty when no history was written yet.
    pub async fn load_history(&self) -> Result<BTreeMap<ShardKey, usize>> {
        Ok(read_json(&self.dir.join(HISTORY_FILE))
            .await?
            .unwrap_or_default())
    }

    // -----------------------------------------------------------------------
    // Export
    // -----------------------------------------------------------------------

    /// Write `records.json` and `shard_results.json`.
    ///
    /// With `append`, records already in `records.json` are kept and only
    /// new ids are added; shard provenance of existing ids is extended.
    pub async fn export(&self, state: &HarvestState, append: bool) -> Result<ExportSummary> {
        let records_path = self.dir.join(RECORDS_FILE);

        let mut merged: BTreeMap<RecordId, ExportedRecord> = BTreeMap::new();
        if append {
            let existing: Vec<ExportedRecord> = read_json(&records_path).await?.unwrap_or_default();
            for row in existing {
                merged.insert(row.record.id.clone(), row);
            }
        }
        let before = merged.len();

        for (id, record) in &state.records {
            let shards = state.provenance.get(id).cloned().unwrap_or_default();
            match merged.get_mut(id) {
                Some(row) => {
                    for key in shards {
                        if !row.shards.contains(&key) {
                            row.shards.push(key);
                        }
                    }
                }
                None => {
                    merged.insert(
                        id.clone(),
                        ExportedRecord {
                            record: record.clone(),
                            shards,
                        },
                    );
                }
            }
        }

        let total = merged.len();
        let rows: Vec<ExportedRecord> = merged.into_values().collect();
        write_json_atomic(&records_path, &rows).await?;

        let shard_results_path = self.dir.join(SHARD_RESULTS_FILE);
        write_json_atomic(&shard_results_path, &ranked_results(state)).await?;

        info!(?records_path, total, added = total - before, append, "records exported");
        Ok(ExportSummary {
            records_path,
            shard_results_path,
            total,
            added: total - before,
        })
    }
}

/// Shard result rows ordered by plan rank.
fn ranked_results(state: &HarvestState) -> Vec<&ShardResult> {
    let mut rows: Vec<&ShardResult> = state.shard_results.values().collect();
    rows.sort_by_key(|r| r.shard.rank);
    rows
}

// ---------------------------------------------------------------------------
// JSON file helpers
// ---------------------------------------------------------------------------

async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| FacetHarvestError::Storage(format!("serialize {}: {e}", path.display())))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, &bytes)
        .await
        .map_err(|e| FacetHarvestError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| FacetHarvestError::io(path, e))
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(FacetHarvestError::io(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| FacetHarvestError::Storage(format!("corrupt {}: {e}", path.display())))
}
