//! Dedup & shard ledger: the only writer of [`HarvestState`].

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;

use facetharvest_shared::{
    ExtractionPath, HarvestState, Record, RecordStats, ShardDescriptor, ShardKey, ShardOutcome,
    ShardResult,
};

/// Canonical record set plus per-shard bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct ShardLedger {
    state: HarvestState,
}

impl ShardLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue from a checkpointed state.
    pub fn from_state(state: HarvestState) -> Self {
        Self { state }
    }

    /// Merge one shard's output and return how many records were new.
    ///
    /// Known identities are not stored again; the shard is appended to their
    /// provenance instead. The shard is marked completed and its result row
    /// replaces any earlier row for the same key.
    pub fn merge(
        &mut self,
        shard: &ShardDescriptor,
        records: Vec<Record>,
        outcome: ShardOutcome,
        path: Option<ExtractionPath>,
        elapsed: Duration,
    ) -> usize {
        let yielded = records.len();
        let mut new_records = 0;

        for record in records {
            let provenance = self.state.provenance.entry(record.id.clone()).or_default();
            if !provenance.contains(&shard.key) {
                provenance.push(shard.key.clone());
            }
            if !self.state.records.contains_key(&record.id) {
                self.state.records.insert(record.id.clone(), record);
                new_records += 1;
            }
        }

        self.state.completed.insert(shard.key.clone());
        self.state.shard_results.insert(
            shard.key.clone(),
            ShardResult {
                shard: shard.clone(),
                yielded,
                new_records,
                elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                outcome,
                path,
                finished_at: Utc::now(),
            },
        );

        new_records
    }

    pub fn is_completed(&self, key: &ShardKey) -> bool {
        self.state.completed.contains(key)
    }

    /// Un-complete every shard whose latest outcome failed; returns the count.
    pub fn reset_failed(&mut self) -> usize {
        let failed: Vec<ShardKey> = self
            .state
            .shard_results
            .iter()
            .filter(|(_, r)| r.outcome.is_failure())
            .map(|(key, _)| key.clone())
            .collect();
        for key in &failed {
            self.state.completed.remove(key);
        }
        failed.len()
    }

    pub fn result(&self, key: &ShardKey) -> Option<&ShardResult> {
        self.state.shard_results.get(key)
    }

    pub fn stats(&self) -> RecordStats {
        RecordStats::from_records(self.state.records.values())
    }

    /// Yield per shard, for next run's priority ordering.
    pub fn yields(&self) -> BTreeMap<ShardKey, usize> {
        self.state
            .shard_results
            .iter()
            .map(|(key, r)| (key.clone(), r.yielded))
            .collect()
    }

    /// The `n` most productive shards, by yield then rank.
    pub fn top_shards(&self, n: usize) -> Vec<ShardResult> {
        let mut rows: Vec<&ShardResult> = self
            .state
            .shard_results
            .values()
            .filter(|r| r.yielded > 0)
            .collect();
        rows.sort_by(|a, b| {
            b.yielded
                .cmp(&a.yielded)
                .then(a.shard.rank.cmp(&b.shard.rank))
        });
        rows.into_iter().take(n).cloned().collect()
    }

    pub fn state(&self) -> &HarvestState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facetharvest_shared::{RecordId, RecordPayload, ShardFacet};

    fn shard(rank: usize, code: &str) -> ShardDescriptor {
        ShardDescriptor::new(
            rank,
            vec![ShardFacet {
                dimension: "job_type".into(),
                api_filter: "jobType".into(),
                page_param: "f_JT".into(),
                code: code.into(),
                label: code.to_lowercase(),
            }],
        )
    }

    fn record(id: &str, title: &str) -> Record {
        Record {
            id: RecordId::new(id),
            payload: RecordPayload {
                title: Some(title.into()),
                ..Default::default()
            },
            source: ExtractionPath::Primary,
            is_repost: false,
            posted_at: None,
        }
    }

    fn merge(ledger: &mut ShardLedger, shard: &ShardDescriptor, records: Vec<Record>) -> usize {
        let outcome = if records.is_empty() {
            ShardOutcome::Empty
        } else {
            ShardOutcome::Success
        };
        ledger.merge(
            shard,
            records,
            outcome,
            Some(ExtractionPath::Primary),
            Duration::from_millis(5),
        )
    }

    #[test]
    fn duplicate_across_shards_keeps_one_copy_and_both_provenances() {
        let mut ledger = ShardLedger::new();
        let a = shard(0, "F");
        let b = shard(1, "C");

        assert_eq!(merge(&mut ledger, &a, vec![record("1", "first")]), 1);
        assert_eq!(merge(&mut ledger, &b, vec![record("1", "second")]), 0);

        let state = ledger.state();
        assert_eq!(state.records.len(), 1);
        // First copy wins.
        assert_eq!(
            state.records[&RecordId::new("1")].payload.title.as_deref(),
            Some("first")
        );
        assert_eq!(
            state.provenance[&RecordId::new("1")],
            vec![a.key.clone(), b.key.clone()]
        );
    }

    #[test]
    fn merge_marks_completed_and_writes_result() {
        let mut ledger = ShardLedger::new();
        let a = shard(0, "F");
        assert!(!ledger.is_completed(&a.key));

        merge(&mut ledger, &a, vec![record("1", "x"), record("2", "y")]);

        assert!(ledger.is_completed(&a.key));
        let result = ledger.result(&a.key).unwrap();
        assert_eq!(result.yielded, 2);
        assert_eq!(result.new_records, 2);
        assert_eq!(result.outcome, ShardOutcome::Success);
        assert_eq!(result.elapsed_ms, 5);
    }

    #[test]
    fn rerun_replaces_result_without_duplicating_provenance() {
        let mut ledger = ShardLedger::new();
        let a = shard(0, "F");
        merge(&mut ledger, &a, vec![record("1", "x")]);
        let new = merge(&mut ledger, &a, vec![record("1", "x"), record("2", "y")]);

        assert_eq!(new, 1);
        assert_eq!(ledger.result(&a.key).unwrap().yielded, 2);
        assert_eq!(ledger.state().provenance[&RecordId::new("1")], vec![a.key.clone()]);
        assert_eq!(ledger.state().shard_results.len(), 1);
    }

    #[test]
    fn reset_failed_uncompletes_only_failures() {
        let mut ledger = ShardLedger::new();
        let ok = shard(0, "F");
        let bad = shard(1, "C");
        merge(&mut ledger, &ok, vec![record("1", "x")]);
        ledger.merge(
            &bad,
            Vec::new(),
            ShardOutcome::Failed {
                reason: "HTTP 429".into(),
            },
            None,
            Duration::ZERO,
        );

        assert_eq!(ledger.reset_failed(), 1);
        assert!(ledger.is_completed(&ok.key));
        assert!(!ledger.is_completed(&bad.key));
    }

    #[test]
    fn top_shards_and_yields() {
        let mut ledger = ShardLedger::new();
        let a = shard(0, "F");
        let b = shard(1, "C");
        let c = shard(2, "T");
        merge(&mut ledger, &a, vec![record("1", "x")]);
        merge(&mut ledger, &b, vec![record("2", "x"), record("3", "y")]);
        merge(&mut ledger, &c, Vec::new());

        let top = ledger.top_shards(3);
        let keys: Vec<_> = top.iter().map(|r| r.shard.key.clone()).collect();
        assert_eq!(keys, vec![b.key.clone(), a.key.clone()]);

        let yields = ledger.yields();
        assert_eq!(yields[&c.key], 0);
        assert_eq!(yields[&b.key], 2);
        assert_eq!(ledger.stats().total, 3);
    }

    #[test]
    fn from_state_roundtrip() {
        let mut ledger = ShardLedger::new();
        merge(&mut ledger, &shard(0, "F"), vec![record("1", "x")]);
        let state = ledger.state().clone();
        assert_eq!(ShardLedger::from_state(state.clone()).state(), &state);
    }
}
