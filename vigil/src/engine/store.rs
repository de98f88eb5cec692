// vigil/src/engine/store.rs
//
// Sharded FusedRecord store — the timeline's single owner.
//
// DashMap keyed by subject_id, one RwLock'd shard per subject: writers
// are exclusive within a shard, readers proceed in parallel across
// shards. Within a subject, fusion is strictly sequential under the
// shard write lock, so timelines are always in non-decreasing
// canonical_timestamp order. A record is never mutated in place after
// insertion — the one exception is the retention field, which
// transitions Hot → Cold under the shard write lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;

use crate::error::{Result, VigilError};
use crate::events::{FusedRecord, RetentionTier, VerificationTier};

#[derive(Debug, Default)]
pub struct SubjectShard {
    pub records: Vec<FusedRecord>,
}

pub struct RecordStore {
    shards:       DashMap<String, Arc<RwLock<SubjectShard>>>,
    record_index: DashMap<String, String>, // record_id → subject_id
    pub fusion_events: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total:            usize,
    pub hot:              usize,
    pub cold:             usize,
    /// Mean verification-tier score over Hot records only — Cold records
    /// are excluded from default aggregates.
    pub avg_verification: f64,
    pub fusion_events:    u64,
}

impl RecordStore {
    pub fn new() -> Self {
        Self {
            shards:        DashMap::new(),
            record_index:  DashMap::new(),
            fusion_events: AtomicU64::new(0),
        }
    }

    /// Insert a new record. Duplicate record ids violate a store
    /// invariant and fail with `Integrity`; prior state is untouched.
    pub fn insert(&self, record: FusedRecord) -> Result<()> {
        if self.record_index.contains_key(&record.record_id) {
            return Err(VigilError::Integrity(format!(
                "duplicate record_id {}",
                record.record_id
            )));
        }
        self.record_index
            .insert(record.record_id.clone(), record.subject_id.clone());

        let shard = self
            .shards
            .entry(record.subject_id.clone())
            .or_insert_with(|| Arc::new(RwLock::new(SubjectShard::default())))
            .clone();

        let mut shard = shard.write();
        // Insert keeping canonical_timestamp order; equal timestamps keep
        // arrival order.
        let pos = shard
            .records
            .partition_point(|r| r.canonical_timestamp <= record.canonical_timestamp);
        shard.records.insert(pos, record);
        Ok(())
    }

    /// Full timeline for one subject, ascending canonical_timestamp.
    /// Returns clones — callers never observe later mutations.
    pub fn timeline(&self, subject_id: &str) -> Vec<FusedRecord> {
        self.shards
            .get(subject_id)
            .map(|s| s.read().records.clone())
            .unwrap_or_default()
    }

    pub fn get(&self, record_id: &str) -> Option<FusedRecord> {
        let subject = self.record_index.get(record_id)?.clone();
        let shard = self.shards.get(&subject)?;
        let shard = shard.read();
        shard
            .records
            .iter()
            .find(|r| r.record_id == record_id)
            .cloned()
    }

    pub fn statistics(&self) -> StoreStats {
        let mut total = 0usize;
        let mut hot = 0usize;
        let mut cold = 0usize;
        let mut hot_score_sum = 0.0f64;

        for shard in self.shards.iter() {
            let shard = shard.read();
            for rec in &shard.records {
                total += 1;
                match rec.retention {
                    RetentionTier::Hot => {
                        hot += 1;
                        hot_score_sum += rec.verification.score();
                    }
                    RetentionTier::Cold => cold += 1,
                }
            }
        }

        StoreStats {
            total,
            hot,
            cold,
            avg_verification: if hot == 0 { 0.0 } else { hot_score_sum / hot as f64 },
            fusion_events: self.fusion_events.load(Ordering::Relaxed),
        }
    }

    /// Transition every over-age Hot record to Cold. Returns the ids that
    /// transitioned, sorted. Idempotent — a second sweep at the same
    /// instant transitions nothing.
    pub fn sweep_retention(&self, now: DateTime<Utc>, retention_days: i64) -> Vec<String> {
        let threshold = Duration::days(retention_days);
        let mut transitioned = Vec::new();

        for shard in self.shards.iter() {
            let mut shard = shard.write();
            for rec in shard.records.iter_mut() {
                if rec.retention == RetentionTier::Hot
                    && now - rec.canonical_timestamp > threshold
                {
                    rec.retention = RetentionTier::Cold;
                    transitioned.push(rec.record_id.clone());
                }
            }
        }

        transitioned.sort();
        transitioned
    }

    /// Ids of Hot records already past the retention threshold — the
    /// audit agent's retention-conformance probe.
    pub fn over_age_hot(&self, now: DateTime<Utc>, retention_days: i64) -> Vec<String> {
        let threshold = Duration::days(retention_days);
        let mut ids = Vec::new();
        for shard in self.shards.iter() {
            let shard = shard.read();
            for rec in &shard.records {
                if rec.retention == RetentionTier::Hot
                    && now - rec.canonical_timestamp > threshold
                {
                    ids.push(rec.record_id.clone());
                }
            }
        }
        ids.sort();
        ids
    }

    /// Share of Hot records sitting in the Conflict tier.
    pub fn conflict_share(&self) -> f64 {
        let mut hot = 0usize;
        let mut conflicts = 0usize;
        for shard in self.shards.iter() {
            let shard = shard.read();
            for rec in &shard.records {
                if rec.retention == RetentionTier::Hot {
                    hot += 1;
                    if rec.verification == VerificationTier::Conflict {
                        conflicts += 1;
                    }
                }
            }
        }
        if hot == 0 { 0.0 } else { conflicts as f64 / hot as f64 }
    }

    pub fn n_subjects(&self) -> usize {
        self.shards.len()
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}
