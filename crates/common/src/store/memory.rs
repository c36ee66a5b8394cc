//! In-process report store for tests and single-node runs

use super::{
    plan_retention, ArchiveOutcome, GenerationMeta, PendingOutcome, ReportRecord, ReportStatus,
    ReportStore, RetentionPolicy, StatusCount, Transition,
};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Report store backed by a vector under a single lock
///
/// Every mutation holds the write lock for its whole read-modify-write,
/// so version assignment and the pending insert are atomic.
#[derive(Default)]
pub struct InMemoryReportStore {
    records: RwLock<Vec<ReportRecord>>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

fn matches(record: &ReportRecord, subject: &str, kind: &str) -> bool {
    record.subject == subject && record.kind == kind
}

fn next_version(records: &[ReportRecord], subject: &str, kind: &str) -> i32 {
    records
        .iter()
        .filter(|r| matches(r, subject, kind))
        .map(|r| r.version)
        .max()
        .unwrap_or(0)
        + 1
}

fn newest_first(records: &mut [ReportRecord]) {
    records.sort_by(|a, b| {
        a.kind
            .cmp(&b.kind)
            .then_with(|| b.version.cmp(&a.version))
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn load_current(&self, subject: &str, kind: &str) -> Result<Option<ReportRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| matches(r, subject, kind) && r.status == ReportStatus::Published)
            .max_by_key(|r| r.version)
            .cloned())
    }

    async fn load_in_flight(&self, subject: &str, kind: &str) -> Result<Option<ReportRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .find(|r| matches(r, subject, kind) && r.status.is_in_flight())
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ReportRecord>> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn save_new_version(
        &self,
        subject: &str,
        kind: &str,
        payload: Value,
        meta: GenerationMeta,
    ) -> Result<ReportRecord> {
        let mut records = self.records.write().await;
        let version = next_version(&records, subject, kind);
        let record = ReportRecord::published(subject, kind, version, payload, meta);
        records.push(record.clone());
        Ok(record)
    }

    async fn archive_older_than(
        &self,
        subject: &str,
        kind: &str,
        policy: &RetentionPolicy,
    ) -> Result<ArchiveOutcome> {
        let mut records = self.records.write().await;
        let scoped: Vec<ReportRecord> = records
            .iter()
            .filter(|r| matches(r, subject, kind))
            .cloned()
            .collect();
        let outcome = plan_retention(&scoped, policy);

        for record in records.iter_mut() {
            if outcome.archived.contains(&record.id) {
                record.status = ReportStatus::Archived;
            }
        }
        records.retain(|r| !outcome.pruned.contains(&r.id));

        Ok(outcome)
    }

    async fn create_pending(
        &self,
        subject: &str,
        kind: &str,
        source_hash: &str,
        source_input_ids: &[String],
    ) -> Result<PendingOutcome> {
        let mut records = self.records.write().await;
        if let Some(existing) = records
            .iter()
            .find(|r| matches(r, subject, kind) && r.status.is_in_flight())
        {
            return Ok(PendingOutcome::Existing(existing.clone()));
        }

        let record = ReportRecord::pending(subject, kind, source_hash, source_input_ids);
        records.push(record.clone());
        Ok(PendingOutcome::Created(record))
    }

    async fn transition(&self, id: Uuid, transition: Transition) -> Result<ReportRecord> {
        let mut records = self.records.write().await;
        let index = records
            .iter()
            .position(|r| r.id == id)
            .ok_or(AppError::RecordNotFound { id })?;

        let current = records[index].status;
        if !current.is_in_flight() {
            return Err(AppError::InvalidTransition {
                id,
                from: current.to_string(),
                to: transition.target().to_string(),
            });
        }

        let version = match &transition {
            Transition::Published { .. } => {
                let (subject, kind) = (records[index].subject.clone(), records[index].kind.clone());
                next_version(&records, &subject, &kind)
            }
            _ => records[index].version,
        };

        let record = &mut records[index];
        match transition {
            Transition::Processing => {
                record.status = ReportStatus::Processing;
            }
            Transition::Published { payload, meta } => {
                record.status = ReportStatus::Published;
                record.version = version;
                record.payload = Some(payload);
                record.generated_at = Some(Utc::now());
                record.generation_duration_seconds = Some(meta.generation_duration_seconds);
                record.model_identifier = Some(meta.model_identifier);
                record.source_hash = meta.source_hash;
                record.source_input_ids = meta.source_input_ids;
                record.error_message = None;
            }
            Transition::Failed { reason } => {
                record.status = ReportStatus::Failed;
                record.error_message = Some(reason);
            }
        }

        Ok(record.clone())
    }

    async fn mark_viewed(&self, id: Uuid) -> Result<Option<DateTime<Utc>>> {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id == id) {
            Some(record) if record.viewed_at.is_none() => {
                let now = Utc::now();
                record.viewed_at = Some(now);
                Ok(Some(now))
            }
            Some(_) => Ok(None),
            None => Err(AppError::RecordNotFound { id }),
        }
    }

    async fn list_current(&self, subject: &str) -> Result<Vec<ReportRecord>> {
        let records = self.records.read().await;
        let mut current: BTreeMap<&str, &ReportRecord> = BTreeMap::new();
        for record in records
            .iter()
            .filter(|r| r.subject == subject && r.status == ReportStatus::Published)
        {
            let entry = current.entry(record.kind.as_str()).or_insert(record);
            if record.version > entry.version {
                *entry = record;
            }
        }
        Ok(current.into_values().cloned().collect())
    }

    async fn list_for_subject(&self, subject: &str, kind: Option<&str>) -> Result<Vec<ReportRecord>> {
        let records = self.records.read().await;
        let mut found: Vec<ReportRecord> = records
            .iter()
            .filter(|r| r.subject == subject && kind.map_or(true, |k| r.kind == k))
            .cloned()
            .collect();
        newest_first(&mut found);
        Ok(found)
    }

    async fn stats_for_subject(&self, subject: &str) -> Result<Vec<StatusCount>> {
        let records = self.records.read().await;
        let mut counts: BTreeMap<(String, &'static str), (ReportStatus, u64)> = BTreeMap::new();
        for record in records.iter().filter(|r| r.subject == subject) {
            let entry = counts
                .entry((record.kind.clone(), record.status.as_str()))
                .or_insert((record.status, 0));
            entry.1 += 1;
        }
        Ok(counts
            .into_iter()
            .map(|((kind, _), (status, count))| StatusCount { kind, status, count })
            .collect())
    }

    async fn delete_record(&self, id: Uuid) -> Result<bool> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() < before)
    }

    async fn delete_for_subject(&self, subject: &str, kinds: &[String]) -> Result<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| !(r.subject == subject && kinds.iter().any(|k| *k == r.kind)));
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn meta(hash: &str) -> GenerationMeta {
        GenerationMeta {
            model_identifier: "mock".into(),
            generation_duration_seconds: 0.5,
            source_hash: hash.into(),
            source_input_ids: vec!["s1".into()],
        }
    }

    #[tokio::test]
    async fn test_versions_are_consecutive_under_concurrency() {
        let store = Arc::new(InMemoryReportStore::new());
        let mut handles = Vec::new();
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .save_new_version("u1", "k", json!({ "i": i }), meta("h"))
                    .await
                    .unwrap()
                    .version
            }));
        }

        let mut versions = Vec::new();
        for handle in handles {
            versions.push(handle.await.unwrap());
        }
        versions.sort();
        assert_eq!(versions, (1..=10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_load_current_is_highest_published() {
        let store = InMemoryReportStore::new();
        store.save_new_version("u1", "k", json!({"v": 1}), meta("a")).await.unwrap();
        store.save_new_version("u1", "k", json!({"v": 2}), meta("b")).await.unwrap();
        store.save_new_version("u1", "other", json!({"v": 9}), meta("c")).await.unwrap();

        let current = store.load_current("u1", "k").await.unwrap().unwrap();
        assert_eq!(current.version, 2);
        assert_eq!(current.payload, Some(json!({"v": 2})));
        assert!(store.load_current("u2", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retention_keeps_one_published_and_caps_archive() {
        let store = InMemoryReportStore::new();
        let policy = RetentionPolicy::default();
        for i in 0..8 {
            store.save_new_version("u1", "k", json!({ "i": i }), meta("h")).await.unwrap();
            store.archive_older_than("u1", "k", &policy).await.unwrap();
        }

        let all = store.list_for_subject("u1", Some("k")).await.unwrap();
        let published: Vec<_> = all.iter().filter(|r| r.status == ReportStatus::Published).collect();
        let archived = all.iter().filter(|r| r.status == ReportStatus::Archived).count();

        assert_eq!(published.len(), 1);
        assert_eq!(published[0].version, 8);
        assert_eq!(archived, 5);
    }

    #[tokio::test]
    async fn test_single_pending_per_subject_kind() {
        let store = Arc::new(InMemoryReportStore::new());
        let mut handles = Vec::new();
        for _ in 0..5 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.create_pending("u1", "k", "h", &[]).await.unwrap()
            }));
        }

        let mut created = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), PendingOutcome::Created(_)) {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_publish_in_place_assigns_next_version() {
        let store = InMemoryReportStore::new();
        store.save_new_version("u1", "k", json!({}), meta("a")).await.unwrap();
        let pending = store.create_pending("u1", "k", "b", &[]).await.unwrap().into_record();
        assert_eq!(pending.version, 0);

        store.transition(pending.id, Transition::Processing).await.unwrap();
        let published = store
            .transition(
                pending.id,
                Transition::Published {
                    payload: json!({"done": true}),
                    meta: meta("b"),
                },
            )
            .await
            .unwrap();

        assert_eq!(published.version, 2);
        assert_eq!(published.status, ReportStatus::Published);
        assert!(published.generated_at.is_some());
        assert_eq!(store.load_current("u1", "k").await.unwrap().unwrap().id, pending.id);
    }

    #[tokio::test]
    async fn test_transition_from_terminal_status_is_rejected() {
        let store = InMemoryReportStore::new();
        let pending = store.create_pending("u1", "k", "h", &[]).await.unwrap().into_record();
        let failed = store
            .transition(pending.id, Transition::Failed { reason: "boom".into() })
            .await
            .unwrap();
        assert_eq!(failed.error_message.as_deref(), Some("boom"));

        let err = store.transition(pending.id, Transition::Processing).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));

        let missing = store.transition(Uuid::new_v4(), Transition::Processing).await;
        assert!(matches!(missing, Err(AppError::RecordNotFound { .. })));
    }

    #[tokio::test]
    async fn test_mark_viewed_only_once() {
        let store = InMemoryReportStore::new();
        let record = store.save_new_version("u1", "k", json!({}), meta("h")).await.unwrap();

        assert!(store.mark_viewed(record.id).await.unwrap().is_some());
        assert!(store.mark_viewed(record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_stats_and_delete() {
        let store = InMemoryReportStore::new();
        store.save_new_version("u1", "a", json!({}), meta("h")).await.unwrap();
        store.save_new_version("u1", "a", json!({}), meta("h")).await.unwrap();
        store.save_new_version("u1", "b", json!({}), meta("h")).await.unwrap();
        store.create_pending("u1", "b", "h", &[]).await.unwrap();

        let current = store.list_current("u1").await.unwrap();
        assert_eq!(current.len(), 2);
        assert_eq!(current[0].kind, "a");
        assert_eq!(current[0].version, 2);

        let stats = store.stats_for_subject("u1").await.unwrap();
        let pending = stats
            .iter()
            .find(|s| s.kind == "b" && s.status == ReportStatus::Pending)
            .unwrap();
        assert_eq!(pending.count, 1);

        let deleted = store.delete_for_subject("u1", &["b".to_string()]).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.len().await, 2);
    }
}
