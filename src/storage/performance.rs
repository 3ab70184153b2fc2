//! Learned per-provider performance, persisted as a JSON file.
//!
//! Records are kept in a [`DashMap`] so each provider key is updated under
//! its own shard lock; concurrent EMA writes to the same provider never lose
//! an update. The on-disk file is replaced atomically (write temp, rename).
//!
//! Updates never touch the disk themselves. They mark a flush as pending and
//! async callers write it with [`PerformanceStore::flush_pending`], which runs
//! the file I/O on the blocking pool.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::FlushPolicy;
use crate::error::{Error, Result};

/// Score given to providers with no history.
pub const DEFAULT_SCORE: f64 = 0.5;

/// EMA learning rate for ensemble outcomes.
pub const ENSEMBLE_ALPHA: f64 = 0.1;

/// EMA learning rate for explicit user feedback.
pub const FEEDBACK_ALPHA: f64 = 0.3;

fn default_score() -> f64 {
    DEFAULT_SCORE
}

/// Learned score for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    /// Exponential moving average, always in [0, 1]
    #[serde(default = "default_score")]
    pub score: f64,
    #[serde(rename = "count", default)]
    pub sample_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for PerformanceRecord {
    fn default() -> Self {
        Self {
            score: DEFAULT_SCORE,
            sample_count: 0,
            last_updated: None,
        }
    }
}

impl PerformanceRecord {
    /// Fold `observation` into the score with learning rate `alpha`.
    fn apply(&mut self, observation: f64, alpha: f64) {
        let observation = clamp_unit(observation);
        self.score = clamp_unit((1.0 - alpha) * self.score + alpha * observation);
        self.sample_count += 1;
        self.last_updated = Some(Utc::now());
    }

    fn sanitized(mut self) -> Self {
        self.score = clamp_unit(self.score);
        self
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        DEFAULT_SCORE
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Durable provider -> [`PerformanceRecord`] mapping.
pub struct PerformanceStore {
    records: DashMap<String, PerformanceRecord>,
    /// Sum of every record's `sample_count`
    total_samples: AtomicU64,
    /// `None` keeps the store in memory only
    path: Option<PathBuf>,
    flush_policy: FlushPolicy,
    /// Set by updates that should reach the disk
    pending_flush: AtomicBool,
    /// Serializes writers of the on-disk file
    save_lock: Mutex<()>,
}

impl std::fmt::Debug for PerformanceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceStore")
            .field("providers", &self.records.len())
            .field("total_samples", &self.total_samples())
            .field("path", &self.path)
            .field("flush_policy", &self.flush_policy)
            .finish()
    }
}

impl PerformanceStore {
    /// An in-memory store seeded with defaults for `known_providers`.
    pub fn ephemeral(known_providers: &[String]) -> Self {
        Self::from_records(BTreeMap::new(), known_providers, None, FlushPolicy::Never)
    }

    /// Load the store from `path`.
    ///
    /// A missing file is a normal first run. An unreadable or corrupt file is
    /// logged and replaced by defaults; the process keeps serving from memory.
    pub fn load(
        path: impl AsRef<Path>,
        known_providers: &[String],
        flush_policy: FlushPolicy,
    ) -> Self {
        let path = path.as_ref().to_path_buf();
        let records = match read_records(&path) {
            Ok(Some(records)) => {
                tracing::info!(
                    path = %path.display(),
                    providers = records.len(),
                    "Loaded performance data"
                );
                records
            }
            Ok(None) => {
                tracing::info!(path = %path.display(), "No performance data yet, starting fresh");
                BTreeMap::new()
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Could not load performance data, starting fresh"
                );
                BTreeMap::new()
            }
        };

        Self::from_records(records, known_providers, Some(path), flush_policy)
    }

    fn from_records(
        loaded: BTreeMap<String, PerformanceRecord>,
        known_providers: &[String],
        path: Option<PathBuf>,
        flush_policy: FlushPolicy,
    ) -> Self {
        let records = DashMap::with_capacity(loaded.len().max(known_providers.len()));
        let mut total = 0u64;
        for (id, record) in loaded {
            total += record.sample_count;
            records.insert(id, record.sanitized());
        }
        for id in known_providers {
            records.entry(id.clone()).or_default();
        }

        Self {
            records,
            total_samples: AtomicU64::new(total),
            path,
            flush_policy,
            pending_flush: AtomicBool::new(false),
            save_lock: Mutex::new(()),
        }
    }

    /// Learned score for `provider`, or [`DEFAULT_SCORE`] when unknown.
    pub fn score(&self, provider: &str) -> f64 {
        self.records
            .get(provider)
            .map(|r| r.score)
            .unwrap_or(DEFAULT_SCORE)
    }

    pub fn get(&self, provider: &str) -> Option<PerformanceRecord> {
        self.records.get(provider).map(|r| r.value().clone())
    }

    pub fn total_samples(&self) -> u64 {
        self.total_samples.load(Ordering::SeqCst)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// All records, ordered by provider id.
    pub fn snapshot(&self) -> BTreeMap<String, PerformanceRecord> {
        self.records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Fold an observation into `provider`'s record, creating it if needed.
    ///
    /// Returns the updated record and the new total sample count.
    pub fn update(&self, provider: &str, observation: f64, alpha: f64) -> (PerformanceRecord, u64) {
        let updated = {
            let mut record = self.records.entry(provider.to_string()).or_default();
            record.apply(observation, alpha);
            record.clone()
        };
        let total = self.total_samples.fetch_add(1, Ordering::SeqCst) + 1;
        (updated, total)
    }

    /// Record an ensemble win; a flush is marked pending when the policy says so.
    pub fn record_ensemble_win(&self, provider: &str, ensemble_score: f64) -> PerformanceRecord {
        let (record, total) = self.update(provider, ensemble_score, ENSEMBLE_ALPHA);
        tracing::debug!(
            provider = %provider,
            score = record.score,
            count = record.sample_count,
            total_samples = total,
            "Updated performance from ensemble outcome"
        );
        if self.flush_policy.should_flush(total) {
            self.pending_flush.store(true, Ordering::SeqCst);
        }
        record
    }

    /// Record normalized user feedback (in [0, 1]); always marks a flush pending.
    pub fn record_feedback(&self, provider: &str, normalized: f64) -> PerformanceRecord {
        let (record, _) = self.update(provider, normalized, FEEDBACK_ALPHA);
        tracing::info!(
            provider = %provider,
            score = record.score,
            count = record.sample_count,
            "Updated performance from feedback"
        );
        self.pending_flush.store(true, Ordering::SeqCst);
        record
    }

    /// Clear and return the pending-flush flag.
    pub fn take_pending_flush(&self) -> bool {
        self.pending_flush.swap(false, Ordering::SeqCst)
    }

    /// Write the file if an update asked for it.
    pub async fn flush_pending(self: &Arc<Self>) {
        if self.take_pending_flush() {
            self.persist_blocking().await;
        }
    }

    /// [`persist`](Self::persist) on the blocking pool.
    pub async fn persist_blocking(self: &Arc<Self>) {
        let store = Arc::clone(self);
        if let Err(e) = tokio::task::spawn_blocking(move || store.persist()).await {
            tracing::warn!(error = %e, "Performance save task failed");
        }
    }

    /// Save, logging instead of propagating failures.
    pub fn persist(&self) {
        if let Err(e) = self.save() {
            tracing::warn!(error = %e, "Could not save performance data");
        }
    }

    /// Write every record to disk, replacing the file atomically.
    ///
    /// No-op for in-memory stores.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _guard = self
            .save_lock
            .lock()
            .map_err(|_| Error::Persistence("save lock poisoned".to_string()))?;

        let content = serde_json::to_string_pretty(&self.snapshot())
            .map_err(|e| Error::Persistence(format!("serialize: {}", e)))?;

        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).map_err(|e| {
            Error::Persistence(format!("write {}: {}", temp_path.display(), e))
        })?;
        std::fs::rename(&temp_path, path).map_err(|e| {
            Error::Persistence(format!(
                "rename {} -> {}: {}",
                temp_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::debug!(path = %path.display(), "Saved performance data");
        Ok(())
    }
}

fn read_records(path: &Path) -> Result<Option<BTreeMap<String, PerformanceRecord>>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Persistence(format!("read {}: {}", path.display(), e))),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| Error::Persistence(format!("parse {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_known_providers_start_at_default() {
        let store = PerformanceStore::ephemeral(&ids(&["a", "b"]));
        let record = store.get("a").unwrap();
        assert_eq!(record.score, DEFAULT_SCORE);
        assert_eq!(record.sample_count, 0);
        assert!(record.last_updated.is_none());
        assert_eq!(store.total_samples(), 0);
    }

    #[test]
    fn test_unknown_provider_reads_default_without_creating() {
        let store = PerformanceStore::ephemeral(&[]);
        assert_eq!(store.score("ghost"), DEFAULT_SCORE);
        assert!(store.get("ghost").is_none());
    }

    #[test]
    fn test_feedback_update_matches_ema() {
        let store = PerformanceStore::ephemeral(&ids(&["claude"]));
        let record = store.record_feedback("claude", 1.0);
        assert!((record.score - 0.65).abs() < 1e-12);
        assert_eq!(record.sample_count, 1);
        assert!(record.last_updated.is_some());
    }

    #[test]
    fn test_ensemble_update_matches_ema() {
        let store = PerformanceStore::ephemeral(&ids(&["gpt"]));
        let record = store.record_ensemble_win("gpt", 0.9);
        assert!((record.score - (0.9 * 0.5 + 0.1 * 0.9)).abs() < 1e-12);
        assert_eq!(store.total_samples(), 1);
    }

    #[test]
    fn test_update_creates_record_lazily() {
        let store = PerformanceStore::ephemeral(&[]);
        store.update("late", 1.0, 0.5);
        assert_eq!(store.get("late").unwrap().sample_count, 1);
    }

    #[test]
    fn test_scores_stay_in_unit_interval() {
        let store = PerformanceStore::ephemeral(&ids(&["p"]));
        for i in 0..200 {
            let observation = if i % 2 == 0 { 5.0 } else { -3.0 };
            let (record, _) = store.update("p", observation, 0.9);
            assert!((0.0..=1.0).contains(&record.score));
        }
        store.update("p", f64::NAN, 0.3);
        assert!((0.0..=1.0).contains(&store.score("p")));
    }

    #[test]
    fn test_concurrent_updates_lose_nothing() {
        let store = Arc::new(PerformanceStore::ephemeral(&ids(&["shared"])));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        store.update("shared", 0.7, 0.1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.get("shared").unwrap().sample_count, 2000);
        assert_eq!(store.total_samples(), 2000);
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perf.json");
        let store = PerformanceStore::load(&path, &ids(&["a", "b"]), FlushPolicy::Never);
        store.update("a", 0.9, 0.1);
        store.update("b", 0.1, 0.3);
        store.update("b", 0.2, 0.3);
        store.save().unwrap();

        let reloaded = PerformanceStore::load(&path, &ids(&["a", "b"]), FlushPolicy::Never);
        for id in ["a", "b"] {
            let before = store.get(id).unwrap();
            let after = reloaded.get(id).unwrap();
            assert_eq!(before.score, after.score);
            assert_eq!(before.sample_count, after.sample_count);
        }
        assert_eq!(reloaded.total_samples(), 3);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_flush_every_n_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perf.json");
        let store = Arc::new(PerformanceStore::load(
            &path,
            &ids(&["a"]),
            FlushPolicy::EverySamples { n: 3 },
        ));

        store.record_ensemble_win("a", 0.8);
        store.flush_pending().await;
        store.record_ensemble_win("a", 0.8);
        store.flush_pending().await;
        assert!(!path.exists());

        store.record_ensemble_win("a", 0.8);
        store.flush_pending().await;
        assert!(path.exists());
        assert!(!store.take_pending_flush());
    }

    #[test]
    fn test_updates_only_mark_flush_pending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perf.json");
        let store = PerformanceStore::load(&path, &ids(&["a"]), FlushPolicy::Always);

        store.record_ensemble_win("a", 0.8);
        assert!(!path.exists());
        assert!(store.take_pending_flush());
        assert!(!store.take_pending_flush());

        store.record_feedback("a", 0.4);
        assert!(!path.exists());
        assert!(store.take_pending_flush());
    }

    #[tokio::test]
    async fn test_feedback_flush_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perf.json");
        let store = Arc::new(PerformanceStore::load(&path, &ids(&["a"]), FlushPolicy::Never));

        store.record_feedback("a", 1.0);
        store.flush_pending().await;

        let reloaded = PerformanceStore::load(&path, &[], FlushPolicy::Never);
        assert_eq!(reloaded.get("a"), store.get("a"));
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perf.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = PerformanceStore::load(&path, &ids(&["a"]), FlushPolicy::Never);
        assert_eq!(store.score("a"), DEFAULT_SCORE);
        assert_eq!(store.total_samples(), 0);
    }

    #[test]
    fn test_loads_legacy_records_without_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perf.json");
        std::fs::write(
            &path,
            r#"{"gemini": {"score": 0.72, "count": 4}, "gpt": {"score": 1.7, "count": 1}}"#,
        )
        .unwrap();

        let store = PerformanceStore::load(&path, &ids(&["gemini", "claude"]), FlushPolicy::Never);
        assert_eq!(store.score("gemini"), 0.72);
        assert_eq!(store.score("gpt"), 1.0);
        assert_eq!(store.get("claude").unwrap().sample_count, 0);
        assert_eq!(store.total_samples(), 5);
    }
}
