//! Versioned report storage
//!
//! One record per (subject, kind, version). Published versions are
//! immutable apart from `viewed_at`; in-flight records (pending or
//! processing) carry version 0 until they are published in place.

mod memory;

pub use memory::InMemoryReportStore;

use crate::config::GenerationConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle status of a report record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Processing,
    Published,
    Archived,
    Failed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Processing => "processing",
            ReportStatus::Published => "published",
            ReportStatus::Archived => "archived",
            ReportStatus::Failed => "failed",
        }
    }

    /// Pending or processing
    pub fn is_in_flight(&self) -> bool {
        matches!(self, ReportStatus::Pending | ReportStatus::Processing)
    }

    /// Published or archived records hold a payload
    pub fn has_payload(&self) -> bool {
        matches!(self, ReportStatus::Published | ReportStatus::Archived)
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ReportStatus::Pending),
            "processing" => Ok(ReportStatus::Processing),
            "published" => Ok(ReportStatus::Published),
            "archived" => Ok(ReportStatus::Archived),
            "failed" => Ok(ReportStatus::Failed),
            other => Err(AppError::Validation {
                message: format!("unknown report status '{}'", other),
            }),
        }
    }
}

/// A stored report version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub id: Uuid,
    pub subject: String,
    pub kind: String,
    pub version: i32,
    pub status: ReportStatus,
    pub generated_at: Option<DateTime<Utc>>,
    pub generation_duration_seconds: Option<f64>,
    pub model_identifier: Option<String>,
    pub source_hash: String,
    pub source_input_ids: Vec<String>,
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ReportRecord {
    /// New in-flight record with no version assigned yet
    pub fn pending(subject: &str, kind: &str, source_hash: &str, source_input_ids: &[String]) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject: subject.to_string(),
            kind: kind.to_string(),
            version: 0,
            status: ReportStatus::Pending,
            generated_at: None,
            generation_duration_seconds: None,
            model_identifier: None,
            source_hash: source_hash.to_string(),
            source_input_ids: source_input_ids.to_vec(),
            payload: None,
            error_message: None,
            viewed_at: None,
            created_at: Utc::now(),
        }
    }

    /// New published record at the given version
    pub fn published(subject: &str, kind: &str, version: i32, payload: Value, meta: GenerationMeta) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            subject: subject.to_string(),
            kind: kind.to_string(),
            version,
            status: ReportStatus::Published,
            generated_at: Some(now),
            generation_duration_seconds: Some(meta.generation_duration_seconds),
            model_identifier: Some(meta.model_identifier),
            source_hash: meta.source_hash,
            source_input_ids: meta.source_input_ids,
            payload: Some(payload),
            error_message: None,
            viewed_at: None,
            created_at: now,
        }
    }
}

/// Metadata captured by a successful generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationMeta {
    pub model_identifier: String,
    pub generation_duration_seconds: f64,
    pub source_hash: String,
    pub source_input_ids: Vec<String>,
}

/// How many versions survive per (subject, kind)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_published: usize,
    pub keep_archived: usize,
    pub prune: bool,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_published: 1,
            keep_archived: 5,
            prune: true,
        }
    }
}

impl From<&GenerationConfig> for RetentionPolicy {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            keep_published: config.keep_published,
            keep_archived: config.keep_archived,
            prune: config.prune,
        }
    }
}

/// Records affected by a retention pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveOutcome {
    pub archived: Vec<Uuid>,
    pub pruned: Vec<Uuid>,
}

/// Decide which versions to demote and which to delete
///
/// Only published and archived records take part. Ranked by version
/// descending: the first `keep_published` stay as they are, the next
/// `keep_archived` are demoted to archived, and the rest are pruned (or
/// just archived when pruning is off).
pub fn plan_retention(records: &[ReportRecord], policy: &RetentionPolicy) -> ArchiveOutcome {
    let mut versions: Vec<&ReportRecord> = records
        .iter()
        .filter(|r| r.status.has_payload())
        .collect();
    versions.sort_by(|a, b| b.version.cmp(&a.version));

    let keep_published = policy.keep_published.max(1);
    let archive_limit = keep_published + policy.keep_archived;
    let mut outcome = ArchiveOutcome::default();

    for (rank, record) in versions.into_iter().enumerate() {
        if rank < keep_published {
            continue;
        }
        if rank >= archive_limit && policy.prune {
            outcome.pruned.push(record.id);
        } else if record.status == ReportStatus::Published {
            outcome.archived.push(record.id);
        }
    }

    outcome
}

/// Requested status change for an in-flight record
#[derive(Debug, Clone)]
pub enum Transition {
    Processing,
    Published { payload: Value, meta: GenerationMeta },
    Failed { reason: String },
}

impl Transition {
    pub fn target(&self) -> ReportStatus {
        match self {
            Transition::Processing => ReportStatus::Processing,
            Transition::Published { .. } => ReportStatus::Published,
            Transition::Failed { .. } => ReportStatus::Failed,
        }
    }
}

/// Result of a conditional pending insert
#[derive(Debug, Clone, PartialEq)]
pub enum PendingOutcome {
    Created(ReportRecord),
    /// An in-flight record already existed and was left unchanged
    Existing(ReportRecord),
}

impl PendingOutcome {
    pub fn into_record(self) -> ReportRecord {
        match self {
            PendingOutcome::Created(r) | PendingOutcome::Existing(r) => r,
        }
    }
}

/// Record count for one (kind, status) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCount {
    pub kind: String,
    pub status: ReportStatus,
    pub count: u64,
}

/// Durable, versioned report storage
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Highest-version published record
    async fn load_current(&self, subject: &str, kind: &str) -> Result<Option<ReportRecord>>;

    /// The pending or processing record, if any
    async fn load_in_flight(&self, subject: &str, kind: &str) -> Result<Option<ReportRecord>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ReportRecord>>;

    /// Insert a published record at `max(version) + 1`, atomically
    async fn save_new_version(
        &self,
        subject: &str,
        kind: &str,
        payload: Value,
        meta: GenerationMeta,
    ) -> Result<ReportRecord>;

    /// Apply [`plan_retention`] for one (subject, kind)
    async fn archive_older_than(
        &self,
        subject: &str,
        kind: &str,
        policy: &RetentionPolicy,
    ) -> Result<ArchiveOutcome>;

    /// Insert a pending record unless one is already in flight
    async fn create_pending(
        &self,
        subject: &str,
        kind: &str,
        source_hash: &str,
        source_input_ids: &[String],
    ) -> Result<PendingOutcome>;

    /// Move an in-flight record to a new status in place
    ///
    /// Publishing assigns a fresh version. Fails with `InvalidTransition`
    /// when the record is no longer in flight.
    async fn transition(&self, id: Uuid, transition: Transition) -> Result<ReportRecord>;

    /// Set `viewed_at` if unset; returns the new timestamp when it was set
    async fn mark_viewed(&self, id: Uuid) -> Result<Option<DateTime<Utc>>>;

    /// Current published record of every kind for a subject
    async fn list_current(&self, subject: &str) -> Result<Vec<ReportRecord>>;

    /// Every record for a subject, optionally one kind, by kind then newest first
    async fn list_for_subject(&self, subject: &str, kind: Option<&str>) -> Result<Vec<ReportRecord>>;

    async fn stats_for_subject(&self, subject: &str) -> Result<Vec<StatusCount>>;

    async fn delete_record(&self, id: Uuid) -> Result<bool>;

    /// Hard-delete every record of the given kinds for a subject
    async fn delete_for_subject(&self, subject: &str, kinds: &[String]) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta() -> GenerationMeta {
        GenerationMeta {
            model_identifier: "m".into(),
            generation_duration_seconds: 1.0,
            source_hash: "h".into(),
            source_input_ids: vec![],
        }
    }

    fn version(v: i32, status: ReportStatus) -> ReportRecord {
        let mut record = ReportRecord::published("u1", "k", v, json!({}), meta());
        record.status = status;
        record
    }

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            ReportStatus::Pending,
            ReportStatus::Processing,
            ReportStatus::Published,
            ReportStatus::Archived,
            ReportStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ReportStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<ReportStatus>().is_err());
    }

    #[test]
    fn test_plan_retention_demotes_and_prunes() {
        let mut records: Vec<ReportRecord> = (1..=8)
            .map(|v| version(v, ReportStatus::Published))
            .collect();
        records.push(ReportRecord::pending("u1", "k", "h", &[]));

        let plan = plan_retention(&records, &RetentionPolicy::default());

        let id_of = |v: i32| records.iter().find(|r| r.version == v && r.status.has_payload()).unwrap().id;
        assert_eq!(plan.archived, (3..=7).rev().map(id_of).collect::<Vec<_>>());
        assert_eq!(plan.pruned, vec![id_of(2), id_of(1)]);
    }

    #[test]
    fn test_plan_retention_without_prune_only_archives() {
        let records: Vec<ReportRecord> = (1..=8)
            .map(|v| version(v, ReportStatus::Published))
            .collect();
        let policy = RetentionPolicy {
            prune: false,
            ..RetentionPolicy::default()
        };

        let plan = plan_retention(&records, &policy);
        assert_eq!(plan.archived.len(), 7);
        assert!(plan.pruned.is_empty());
    }

    #[test]
    fn test_already_archived_records_are_not_rearchived() {
        let records = vec![
            version(3, ReportStatus::Published),
            version(2, ReportStatus::Archived),
            version(1, ReportStatus::Archived),
        ];
        let plan = plan_retention(&records, &RetentionPolicy::default());
        assert!(plan.archived.is_empty());
        assert!(plan.pruned.is_empty());
    }
}
