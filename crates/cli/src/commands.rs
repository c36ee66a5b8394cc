//! Command implementations, independent of argument parsing

use reportforge_common::{
    generation::GenerationError,
    store::{ReportStatus, StatusCount},
    worker::{DrainSummary, QueueWorker},
    AppError, ReportGenerator, ReportRecord,
};
use serde::Serialize;
use uuid::Uuid;

/// The record a regeneration produced or queued
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RecordRef {
    pub record_id: Uuid,
    /// Zero while the record is still queued
    pub version: i32,
}

/// One kind's result within a regeneration
#[derive(Debug, Serialize)]
pub struct RegenerateItem {
    pub kind: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ReportStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<RecordRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegenerateSummary {
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<u64>,
    pub items: Vec<RegenerateItem>,
}

impl RegenerateSummary {
    pub fn all_failed(&self) -> bool {
        !self.items.is_empty() && self.items.iter().all(|item| !item.ok)
    }
}

/// Options for `regenerate`
#[derive(Debug, Clone, Default)]
pub struct RegenerateOptions {
    pub kinds: Option<Vec<String>>,
    pub sync: bool,
    pub delete: bool,
}

pub async fn process_queue(
    worker: &QueueWorker,
    limit: Option<usize>,
) -> reportforge_common::Result<DrainSummary> {
    worker.drain(limit).await
}

pub async fn queue_status(generator: &ReportGenerator) -> Result<usize, GenerationError> {
    generator.queue_depth().await
}

/// Force fresh versions of the selected kinds
///
/// Per-kind failures are collected rather than returned; only an invalid
/// kind list or a failed delete aborts the whole run.
pub async fn regenerate(
    generator: &ReportGenerator,
    subject: &str,
    options: RegenerateOptions,
) -> Result<RegenerateSummary, GenerationError> {
    let kinds = match options.kinds {
        Some(kinds) => {
            for kind in &kinds {
                if !generator.supports(kind) {
                    return Err(AppError::UnknownKind { kind: kind.clone() }.into());
                }
            }
            kinds
        }
        None => generator.kinds(),
    };

    let deleted = if options.delete {
        Some(generator.delete_reports(subject, Some(kinds.as_slice())).await?)
    } else {
        None
    };

    let mut items = Vec::with_capacity(kinds.len());
    for kind in kinds {
        let item = if options.sync {
            match generator.generate_or_fetch(subject, &kind, true).await {
                Ok(record) => RegenerateItem {
                    kind,
                    ok: true,
                    status: Some(record.status),
                    record: Some(RecordRef {
                        record_id: record.id,
                        version: record.version,
                    }),
                    error: None,
                },
                Err(e) => failed_item(kind, &e),
            }
        } else {
            match generator.enqueue_generation(subject, &kind).await {
                Ok(outcome) => RegenerateItem {
                    kind,
                    ok: true,
                    status: Some(outcome.status),
                    record: Some(RecordRef {
                        record_id: outcome.record_id,
                        version: 0,
                    }),
                    error: None,
                },
                Err(e) => failed_item(kind, &e),
            }
        };
        items.push(item);
    }

    Ok(RegenerateSummary {
        subject: subject.to_string(),
        deleted,
        items,
    })
}

fn failed_item(kind: String, err: &GenerationError) -> RegenerateItem {
    tracing::warn!(kind = %kind, error = %err, "Regeneration failed");
    RegenerateItem {
        kind,
        ok: false,
        status: None,
        record: None,
        error: Some(err.to_string()),
    }
}

pub async fn flush_cache(generator: &ReportGenerator) -> Result<u64, GenerationError> {
    generator.flush_cache().await
}

pub async fn user_stats(
    generator: &ReportGenerator,
    subject: &str,
) -> Result<Vec<StatusCount>, GenerationError> {
    generator.stats(subject).await
}

pub async fn export(
    generator: &ReportGenerator,
    subject: &str,
    kind: Option<&str>,
) -> Result<Vec<ReportRecord>, GenerationError> {
    generator.export(subject, kind).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use reportforge_common::{
        ai::{AiClient, ClientOptions, MockProvider},
        cache::InMemoryCache,
        generation::GenerationSettings,
        inputs::{InMemoryInputCollector, Submission},
        queue::InMemoryQueue,
        store::InMemoryReportStore,
        strategy::{builtin, StrategyRegistry},
    };
    use serde_json::json;
    use std::sync::Arc;

    async fn generator_with_inputs(forms: &[&str]) -> Arc<ReportGenerator> {
        let inputs = Arc::new(InMemoryInputCollector::new());
        for form in forms {
            inputs
                .submit("u1", Submission::new(format!("s-{form}"), *form, json!({"a": 1})))
                .await;
        }

        Arc::new(ReportGenerator::new(
            Arc::new(InMemoryReportStore::new()),
            Arc::new(InMemoryCache::new()),
            Arc::new(InMemoryQueue::new()),
            inputs,
            AiClient::new(Arc::new(MockProvider::canned()), ClientOptions::default()),
            Arc::new(StrategyRegistry::builtin()),
            GenerationSettings::default(),
        ))
    }

    #[tokio::test]
    async fn test_sync_regenerate_partial_failure() {
        let generator = generator_with_inputs(&[builtin::WORK_STYLE]).await;

        let summary = regenerate(
            &generator,
            "u1",
            RegenerateOptions {
                sync: true,
                ..RegenerateOptions::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(summary.items.len(), 3);
        assert!(!summary.all_failed());
        let style = summary.items.iter().find(|i| i.kind == "work_style").unwrap();
        assert!(style.ok);
        assert_eq!(style.record.as_ref().unwrap().version, 1);
        assert_eq!(summary.items.iter().filter(|i| !i.ok).count(), 2);
    }

    #[tokio::test]
    async fn test_async_regenerate_then_process_queue() {
        let generator = generator_with_inputs(&[builtin::WORK_STYLE]).await;
        let kinds = Some(vec!["work_style".to_string()]);

        let summary = regenerate(
            &generator,
            "u1",
            RegenerateOptions {
                kinds,
                ..RegenerateOptions::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(summary.items[0].status, Some(ReportStatus::Pending));
        assert_eq!(queue_status(&generator).await.unwrap(), 1);

        let worker = QueueWorker::new(generator.clone());
        let drained = process_queue(&worker, None).await.unwrap();
        assert_eq!(drained.published, 1);
        assert_eq!(queue_status(&generator).await.unwrap(), 0);

        let stats = user_stats(&generator, "u1").await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].status, ReportStatus::Published);
    }

    #[tokio::test]
    async fn test_regenerate_with_delete_and_all_failed() {
        let generator = generator_with_inputs(&[builtin::WORK_STYLE]).await;
        generator.generate_or_fetch("u1", "work_style", false).await.unwrap();

        let summary = regenerate(
            &generator,
            "u1",
            RegenerateOptions {
                kinds: Some(vec!["career_transitions".to_string(), "work_style".to_string()]),
                sync: true,
                delete: true,
            },
        )
        .await
        .unwrap();
        assert_eq!(summary.deleted, Some(1));

        let exported = export(&generator, "u1", Some("work_style")).await.unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].version, 1);

        let failing = regenerate(
            &generator,
            "u1",
            RegenerateOptions {
                kinds: Some(vec!["career_transitions".to_string()]),
                sync: true,
                delete: false,
            },
        )
        .await
        .unwrap();
        assert!(failing.all_failed());
    }

    #[tokio::test]
    async fn test_unknown_kind_aborts() {
        let generator = generator_with_inputs(&[]).await;
        let result = regenerate(
            &generator,
            "u1",
            RegenerateOptions {
                kinds: Some(vec!["horoscope".to_string()]),
                ..RegenerateOptions::default()
            },
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_flush_cache_counts_cached_reports() {
        let generator = generator_with_inputs(&[builtin::WORK_STYLE]).await;
        generator.generate_or_fetch("u1", "work_style", false).await.unwrap();

        assert_eq!(flush_cache(&generator).await.unwrap(), 1);
        assert_eq!(flush_cache(&generator).await.unwrap(), 0);

        let stats = user_stats(&generator, "u1").await.unwrap();
        assert_eq!(stats.len(), 1);
    }
}
