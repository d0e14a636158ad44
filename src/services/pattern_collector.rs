//! Best-effort pattern collection.
//!
//! Records task/error/usage observations as JSON files under a date-sharded
//! tree (`<root>/YYYY/MM/DD/<type>_<ts>.json`). Files are written atomically
//! (temp file + rename) and never edited in place.
//!
//! Failure mode: collection never propagates errors. A failed write logs a
//! warning and returns `None`, and the caller's work continues untouched.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::models::pattern::{PatternKind, PatternRecord};

/// Aggregate view over the collected pattern tree.
#[derive(Debug, Clone, Default)]
pub struct PatternStatistics {
    pub total_patterns: u64,
    pub by_type: HashMap<String, u64>,
    /// Keyed by `YYYY-MM-DD`
    pub by_day: BTreeMap<String, u64>,
    /// Highest pattern id observed (ids sort chronologically)
    pub latest_pattern_id: Option<String>,
}

/// Append-only observation recorder.
pub struct PatternCollector {
    root: PathBuf,
    /// `(second key, counter)` making ids monotonic within a second
    sequence: Mutex<(String, u32)>,
}

impl PatternCollector {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            sequence: Mutex::new((String::new(), 0)),
        }
    }

    /// Record a completed task. Returns the pattern id, or `None` when the
    /// observation could not be written.
    #[allow(clippy::too_many_arguments)]
    pub fn collect_task_completion(
        &self,
        task_type: &str,
        agent: &str,
        duration_ms: u64,
        success: bool,
        files_created: u32,
        tests_passed: u32,
        context: serde_json::Value,
    ) -> Option<String> {
        self.collect(
            PatternKind::TaskCompletion,
            json!({
                "task_type": task_type,
                "agent": agent,
                "duration_ms": duration_ms,
                "success": success,
                "files_created": files_created,
                "tests_passed": tests_passed,
            }),
            context,
        )
    }

    /// Record an error occurrence with an optional resolution note.
    pub fn collect_error_occurrence(
        &self,
        error_type: &str,
        error_message: &str,
        context: serde_json::Value,
        resolution: Option<&str>,
    ) -> Option<String> {
        self.collect(
            PatternKind::ErrorOccurrence,
            json!({
                "error_type": error_type,
                "error_message": error_message,
                "resolution": resolution,
            }),
            context,
        )
    }

    /// Record an agent usage observation.
    pub fn collect_agent_usage(
        &self,
        agent_id: &str,
        action: &str,
        tokens_used: u64,
        context: serde_json::Value,
    ) -> Option<String> {
        self.collect(
            PatternKind::AgentUsage,
            json!({
                "agent_id": agent_id,
                "action": action,
                "tokens_used": tokens_used,
            }),
            context,
        )
    }

    /// Record a user correction of produced output.
    pub fn collect_user_correction(
        &self,
        original: &str,
        corrected: &str,
        context: serde_json::Value,
    ) -> Option<String> {
        self.collect(
            PatternKind::UserCorrection,
            json!({
                "original": original,
                "corrected": corrected,
            }),
            context,
        )
    }

    /// Write one observation; the shared entry point for all kinds.
    pub fn collect(
        &self,
        kind: PatternKind,
        data: serde_json::Value,
        context: serde_json::Value,
    ) -> Option<String> {
        let now = Utc::now();
        let pattern_id = self.next_pattern_id(now);
        let record = PatternRecord {
            pattern_id: pattern_id.clone(),
            kind,
            ts: now,
            data,
            context,
        };
        match self.write_record(&record, now) {
            Ok(()) => Some(pattern_id),
            Err(e) => {
                warn!(error = %e, kind = kind.as_str(), "pattern not collected");
                None
            }
        }
    }

    /// Shard directory for a timestamp: `<root>/YYYY/MM/DD`.
    fn shard_dir(&self, ts: DateTime<Utc>) -> PathBuf {
        self.root
            .join(ts.format("%Y").to_string())
            .join(ts.format("%m").to_string())
            .join(ts.format("%d").to_string())
    }

    fn write_record(&self, record: &PatternRecord, ts: DateTime<Utc>) -> std::io::Result<()> {
        let dir = self.shard_dir(ts);
        std::fs::create_dir_all(&dir)?;

        let file_name = format!(
            "{}_{}.json",
            record.kind.as_str(),
            record.pattern_id.trim_start_matches("pat-")
        );
        let final_path = dir.join(&file_name);
        let tmp_path = dir.join(format!(".{file_name}.tmp"));

        let body = serde_json::to_vec_pretty(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&tmp_path, body)?;
        std::fs::rename(&tmp_path, &final_path)?;
        debug!(path = %final_path.display(), "pattern written");
        Ok(())
    }

    /// Build `pat-YYYYMMDD-HHMMSS-NNN`, monotonic within each second.
    fn next_pattern_id(&self, now: DateTime<Utc>) -> String {
        let second_key = now.format("%Y%m%d-%H%M%S").to_string();
        let mut sequence = self.sequence.lock().unwrap_or_else(|e| e.into_inner());
        if sequence.0 == second_key {
            sequence.1 += 1;
        } else {
            sequence.0 = second_key.clone();
            sequence.1 = 1;
        }
        format!("pat-{second_key}-{:03}", sequence.1)
    }

    /// Walk the shard tree and aggregate counts. Unreadable entries are
    /// skipped rather than reported.
    pub fn get_statistics(&self) -> PatternStatistics {
        let mut stats = PatternStatistics::default();
        for (date, files) in self.walk_shards() {
            let day_key = date.format("%Y-%m-%d").to_string();
            for file in files {
                let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if !name.ends_with(".json") {
                    continue;
                }
                let kind = Self::kind_from_name(name)
                    .map_or_else(|| "unknown".to_string(), |k| k.as_str().to_string());
                stats.total_patterns += 1;
                *stats.by_type.entry(kind).or_insert(0) += 1;
                *stats.by_day.entry(day_key.clone()).or_insert(0) += 1;

                if let Some(id) = Self::pattern_id_from_name(name) {
                    if stats.latest_pattern_id.as_deref() < Some(id.as_str()) {
                        stats.latest_pattern_id = Some(id);
                    }
                }
            }
        }
        stats
    }

    /// Delete whole day shards older than `days`. Returns directories removed.
    pub fn prune_older_than(&self, days: u32) -> u64 {
        let cutoff = (Utc::now() - chrono::Duration::days(i64::from(days))).date_naive();
        let mut removed = 0;
        for (date, _) in self.walk_shards() {
            if date < cutoff {
                let dir = self
                    .root
                    .join(date.format("%Y").to_string())
                    .join(date.format("%m").to_string())
                    .join(date.format("%d").to_string());
                if std::fs::remove_dir_all(&dir).is_ok() {
                    removed += 1;
                } else {
                    warn!(dir = %dir.display(), "failed to prune pattern shard");
                }
            }
        }
        removed
    }

    /// All `(date, files)` shards currently on disk.
    fn walk_shards(&self) -> Vec<(NaiveDate, Vec<PathBuf>)> {
        let mut shards = Vec::new();
        let years = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(_) => return shards,
        };
        for year in years.filter_map(Result::ok) {
            let Ok(months) = std::fs::read_dir(year.path()) else {
                continue;
            };
            for month in months.filter_map(Result::ok) {
                let Ok(days) = std::fs::read_dir(month.path()) else {
                    continue;
                };
                for day in days.filter_map(Result::ok) {
                    let date = Self::date_from_components(
                        year.file_name().to_str(),
                        month.file_name().to_str(),
                        day.file_name().to_str(),
                    );
                    let Some(date) = date else { continue };
                    let files = std::fs::read_dir(day.path())
                        .map(|entries| {
                            entries.filter_map(Result::ok).map(|e| e.path()).collect()
                        })
                        .unwrap_or_default();
                    shards.push((date, files));
                }
            }
        }
        shards
    }

    fn date_from_components(
        year: Option<&str>,
        month: Option<&str>,
        day: Option<&str>,
    ) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(
            year?.parse().ok()?,
            month?.parse().ok()?,
            day?.parse().ok()?,
        )
    }

    /// Kind encoded in a shard file name (`<type>_<stamp>.json`).
    fn kind_from_name(name: &str) -> Option<PatternKind> {
        [
            PatternKind::TaskCompletion,
            PatternKind::ErrorOccurrence,
            PatternKind::AgentUsage,
            PatternKind::UserCorrection,
        ]
        .into_iter()
        .find(|kind| name.starts_with(&format!("{}_", kind.as_str())))
    }

    /// Recover `pat-<stamp>` from `<type>_<stamp>.json`; the stamp itself
    /// carries no underscores.
    fn pattern_id_from_name(name: &str) -> Option<String> {
        let stem = name.strip_suffix(".json")?;
        let (_, stamp) = stem.rsplit_once('_')?;
        Some(format!("pat-{stamp}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> (tempfile::TempDir, PatternCollector) {
        let dir = tempfile::tempdir().expect("tempdir");
        let collector = PatternCollector::new(dir.path().join("patterns"));
        (dir, collector)
    }

    #[test]
    fn test_collect_writes_date_sharded_file() {
        let (_dir, collector) = collector();
        let id = collector
            .collect_task_completion("build", "a1", 1200, true, 3, 17, json!({}))
            .expect("collected");
        assert!(id.starts_with("pat-"));

        let now = Utc::now();
        let shard = collector.shard_dir(now);
        let files: Vec<_> = std::fs::read_dir(shard)
            .expect("shard exists")
            .filter_map(Result::ok)
            .collect();
        assert_eq!(files.len(), 1);
        let name = files[0].file_name();
        assert!(name.to_str().unwrap().starts_with("task_completion_"));
    }

    #[test]
    fn test_pattern_ids_monotonic_within_second() {
        let (_dir, collector) = collector();
        let a = collector
            .collect_error_occurrence("io", "disk full", json!({}), None)
            .unwrap();
        let b = collector
            .collect_error_occurrence("io", "disk full", json!({}), Some("freed space"))
            .unwrap();
        assert!(b > a, "ids must sort monotonically: {a} then {b}");
    }

    #[test]
    fn test_collect_failure_returns_none() {
        // Point the collector at a path that cannot be a directory.
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not dir").unwrap();
        let collector = PatternCollector::new(blocker);

        let result = collector.collect_agent_usage("a1", "search", 500, json!({}));
        assert!(result.is_none());
    }

    #[test]
    fn test_statistics_aggregate_by_type_and_day() {
        let (_dir, collector) = collector();
        collector
            .collect_task_completion("build", "a1", 10, true, 0, 0, json!({}))
            .unwrap();
        collector
            .collect_task_completion("test", "a2", 20, false, 0, 0, json!({}))
            .unwrap();
        collector
            .collect_user_correction("foo", "bar", json!({}))
            .unwrap();

        let stats = collector.get_statistics();
        assert_eq!(stats.total_patterns, 3);
        assert_eq!(stats.by_type.get("task_completion"), Some(&2));
        assert_eq!(stats.by_type.get("user_correction"), Some(&1));
        assert_eq!(stats.by_day.len(), 1);
        assert!(stats.latest_pattern_id.is_some());
    }

    #[test]
    fn test_prune_removes_only_old_shards() {
        let (_dir, collector) = collector();
        collector
            .collect_task_completion("build", "a1", 10, true, 0, 0, json!({}))
            .unwrap();

        // Fabricate a stale shard well past retention.
        let old_dir = collector.root.join("2020").join("01").join("15");
        std::fs::create_dir_all(&old_dir).unwrap();
        std::fs::write(old_dir.join("task_completion_old.json"), b"{}").unwrap();

        let removed = collector.prune_older_than(90);
        assert_eq!(removed, 1);
        assert!(!old_dir.exists());
        assert_eq!(collector.get_statistics().total_patterns, 1);
    }
}
