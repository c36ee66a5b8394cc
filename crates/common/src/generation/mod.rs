//! Report generation orchestrator
//!
//! Composes input collection, fingerprinting, the completion client, the
//! versioned store, the cache and the job queue into:
//! - `generate_or_fetch`: synchronous generation with staleness checks
//! - `enqueue_generation`: idempotent async request
//! - `process_queued`: the worker side of the async path
//! - read paths (`fetch_existing`, `fetch_record`, `list_reports`, `export`)
//!
//! No lock is held across the model call. Freshness is checked before the
//! call and again after it, and the store's conditional writes keep the
//! version and in-flight invariants.

mod error;

pub use error::GenerationError;

use crate::ai::{extract_json, AiClient};
use crate::cache::{get_json, keys, set_json, ReportCache};
use crate::config::AppConfig;
use crate::errors::AppError;
use crate::fingerprint::compute_hash;
use crate::inputs::{collect_inputs, missing_forms, InputCollector, InputSet};
use crate::metrics::{self, GenerationTimer};
use crate::queue::{JobQueue, QueueJob};
use crate::store::{
    GenerationMeta, PendingOutcome, ReportRecord, ReportStatus, ReportStore, RetentionPolicy,
    StatusCount, Transition,
};
use crate::strategy::{ReportStrategy, StrategyRegistry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

type GenResult<T> = std::result::Result<T, GenerationError>;

/// Longest failure reason stored on a failed record
const MAX_FAILURE_REASON: usize = 500;

/// Per-generation knobs
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    /// Deadline for each completion attempt
    pub timeout: Duration,
    pub allow_retry: bool,
    pub retention: RetentionPolicy,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            allow_retry: true,
            retention: RetentionPolicy::default(),
        }
    }
}

impl From<&AppConfig> for GenerationSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            timeout: config.ai.timeout(),
            allow_retry: config.ai.allow_retry,
            retention: RetentionPolicy::from(&config.generation),
        }
    }
}

/// Result of an async generation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueOutcome {
    pub record_id: Uuid,
    pub status: ReportStatus,
    /// False when an in-flight record already existed
    pub created: bool,
}

/// What processing one queued job amounted to
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Published(ReportRecord),
    /// A newer report was published after the job was queued; the pending
    /// record was deleted
    Superseded { record_id: Uuid },
    /// Nothing to do: the record is gone or no longer in flight
    Skipped { record_id: Uuid, reason: String },
}

impl ProcessOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ProcessOutcome::Published(_) => "published",
            ProcessOutcome::Superseded { .. } => "superseded",
            ProcessOutcome::Skipped { .. } => "skipped",
        }
    }
}

/// The generation engine
pub struct ReportGenerator {
    store: Arc<dyn ReportStore>,
    cache: Arc<dyn ReportCache>,
    queue: Arc<dyn JobQueue>,
    inputs: Arc<dyn InputCollector>,
    ai: AiClient,
    strategies: Arc<StrategyRegistry>,
    settings: GenerationSettings,
}

impl ReportGenerator {
    pub fn new(
        store: Arc<dyn ReportStore>,
        cache: Arc<dyn ReportCache>,
        queue: Arc<dyn JobQueue>,
        inputs: Arc<dyn InputCollector>,
        ai: AiClient,
        strategies: Arc<StrategyRegistry>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            store,
            cache,
            queue,
            inputs,
            ai,
            strategies,
            settings,
        }
    }

    /// Registered report kinds, sorted
    pub fn kinds(&self) -> Vec<String> {
        self.strategies.kinds()
    }

    pub fn supports(&self, kind: &str) -> bool {
        self.strategies.get(kind).is_ok()
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    /// Return the current report, generating one if inputs changed
    ///
    /// With `force`, the cache and the hash comparison are both skipped and
    /// a new version is always produced.
    #[instrument(skip_all, fields(subject = %subject, kind = %kind, force = force))]
    pub async fn generate_or_fetch(
        &self,
        subject: &str,
        kind: &str,
        force: bool,
    ) -> GenResult<ReportRecord> {
        let strategy = self.strategies.get(kind)?;

        if !force {
            if let Some(report) = self.cached_report(kind, subject).await {
                debug!(version = report.version, "Serving cached report");
                return Ok(report);
            }
        }

        let missing = missing_forms(self.inputs.as_ref(), subject, strategy.required_forms()).await?;
        if !missing.is_empty() {
            info!(missing = ?missing, "Required inputs missing");
            return Err(GenerationError::InsufficientData {
                kind: kind.to_string(),
                missing,
            });
        }

        let inputs = self.collect(strategy.as_ref(), subject).await?;
        let source_hash = compute_hash(&inputs);

        if !force {
            if let Some(current) = self.fresh_current(subject, kind, &source_hash).await? {
                debug!(version = current.version, "Stored report is fresh");
                self.cache_report(&current).await;
                return Ok(current);
            }
        }

        let (payload, meta) = self
            .run_cycle(strategy.as_ref(), &inputs, source_hash)
            .await?;

        if !force {
            // Another caller may have finished the same work meanwhile.
            if let Some(current) = self.fresh_current(subject, kind, &meta.source_hash).await? {
                info!(version = current.version, "Concurrent generation won, discarding result");
                self.cache_report(&current).await;
                return Ok(current);
            }
        }

        let record = self
            .store
            .save_new_version(subject, kind, payload, meta)
            .await?;
        info!(
            version = record.version,
            record_id = %record.id,
            "Report version published"
        );

        self.apply_retention(subject, kind).await;
        self.cache_report(&record).await;
        self.invalidate_list(subject).await;

        Ok(record)
    }

    /// Create a pending record and queue it, unless one is already in flight
    #[instrument(skip_all, fields(subject = %subject, kind = %kind))]
    pub async fn enqueue_generation(&self, subject: &str, kind: &str) -> GenResult<EnqueueOutcome> {
        let strategy = self.strategies.get(kind)?;

        if let Some(existing) = self.store.load_in_flight(subject, kind).await? {
            debug!(record_id = %existing.id, "Generation already in flight");
            return Ok(EnqueueOutcome {
                record_id: existing.id,
                status: existing.status,
                created: false,
            });
        }

        let inputs = self.collect(strategy.as_ref(), subject).await?;
        let source_hash = compute_hash(&inputs);

        let pending = match self
            .store
            .create_pending(subject, kind, &source_hash, &inputs.submission_ids())
            .await?
        {
            PendingOutcome::Created(record) => record,
            PendingOutcome::Existing(existing) => {
                debug!(record_id = %existing.id, "Lost enqueue race to an in-flight record");
                return Ok(EnqueueOutcome {
                    record_id: existing.id,
                    status: existing.status,
                    created: false,
                });
            }
        };

        if let Err(e) = self.queue.enqueue(&QueueJob::new(kind, subject, pending.id)).await {
            error!(error = %e, record_id = %pending.id, "Failed to queue generation job");
            let reason = Transition::Failed {
                reason: "could not queue generation job".to_string(),
            };
            if let Err(mark) = self.store.transition(pending.id, reason).await {
                warn!(error = %mark, record_id = %pending.id, "Could not mark unqueued record failed");
            }
            return Err(e.into());
        }

        info!(record_id = %pending.id, "Generation queued");
        Ok(EnqueueOutcome {
            record_id: pending.id,
            status: pending.status,
            created: true,
        })
    }

    /// Look up the current report without ever generating
    ///
    /// The first read of a published record stamps `viewed_at` and drops
    /// the subject's cached report list.
    #[instrument(skip_all, fields(subject = %subject, kind = %kind))]
    pub async fn fetch_existing(&self, subject: &str, kind: &str) -> GenResult<Option<ReportRecord>> {
        self.strategies.get(kind)?;

        let mut record = match self.cached_report(kind, subject).await {
            Some(record) => record,
            None => match self.store.load_current(subject, kind).await? {
                Some(record) => {
                    self.cache_report(&record).await;
                    record
                }
                None => return Ok(None),
            },
        };

        if record.viewed_at.is_none() {
            match self.store.mark_viewed(record.id).await {
                Ok(Some(viewed_at)) => {
                    record.viewed_at = Some(viewed_at);
                    self.cache_report(&record).await;
                    self.invalidate_list(subject).await;
                }
                Ok(None) => {}
                Err(AppError::RecordNotFound { .. }) => {
                    // Cached entry outlived its record.
                    self.drop_cached_report(kind, subject).await;
                    return Ok(self.store.load_current(subject, kind).await?);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Some(record))
    }

    /// Status lookup for polling the async path
    pub async fn fetch_record(&self, record_id: Uuid) -> GenResult<Option<ReportRecord>> {
        Ok(self.store.find_by_id(record_id).await?)
    }

    /// Current report of every kind for a subject
    #[instrument(skip_all, fields(subject = %subject))]
    pub async fn list_reports(&self, subject: &str) -> GenResult<Vec<ReportRecord>> {
        let key = keys::report_list(subject);

        match get_json::<Vec<ReportRecord>>(self.cache.as_ref(), &key).await {
            Ok(Some(reports)) => {
                metrics::record_cache(true, "report_list");
                return Ok(reports);
            }
            Ok(None) => metrics::record_cache(false, "report_list"),
            Err(e) => warn!(error = %e, "Report list cache read failed"),
        }

        let reports = self.store.list_current(subject).await?;
        if let Err(e) =
            set_json(self.cache.as_ref(), &key, &reports, &keys::report_list_tags(subject)).await
        {
            warn!(error = %e, "Failed to cache report list");
        }

        Ok(reports)
    }

    /// Run one queued job against its pending record
    #[instrument(skip_all, fields(subject = %job.subject, kind = %job.kind, record_id = %job.record_id))]
    pub async fn process_queued(&self, job: &QueueJob) -> GenResult<ProcessOutcome> {
        let Some(record) = self.store.find_by_id(job.record_id).await? else {
            info!("Queued record no longer exists, skipping");
            return Ok(ProcessOutcome::Skipped {
                record_id: job.record_id,
                reason: "record no longer exists".to_string(),
            });
        };

        if !record.status.is_in_flight() {
            info!(status = %record.status, "Queued record already settled, skipping");
            return Ok(ProcessOutcome::Skipped {
                record_id: record.id,
                reason: format!("record is {}", record.status),
            });
        }

        let (subject, kind) = (record.subject.as_str(), record.kind.as_str());

        if let Some(current) = self.store.load_current(subject, kind).await? {
            if current.generated_at.is_some_and(|at| at > record.created_at) {
                info!(current_version = current.version, "Superseded by a newer report");
                self.store.delete_record(record.id).await?;
                return Ok(ProcessOutcome::Superseded {
                    record_id: record.id,
                });
            }
        }

        match self.store.transition(record.id, Transition::Processing).await {
            Ok(_) => {}
            Err(e @ AppError::InvalidTransition { .. }) | Err(e @ AppError::RecordNotFound { .. }) => {
                info!(reason = %e, "Record claimed elsewhere, skipping");
                return Ok(ProcessOutcome::Skipped {
                    record_id: record.id,
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        let published = match self.generate_for(subject, kind).await {
            Ok((payload, meta)) => self
                .store
                .transition(record.id, Transition::Published { payload, meta })
                .await
                .map_err(GenerationError::from),
            Err(err) => Err(err),
        };

        match published {
            Ok(published) => {
                info!(version = published.version, "Queued report published");

                self.apply_retention(subject, kind).await;
                self.cache_report(&published).await;
                self.invalidate_list(subject).await;

                Ok(ProcessOutcome::Published(published))
            }
            Err(err) => {
                let reason = failure_reason(&err);
                if let Err(e) = self
                    .store
                    .transition(record.id, Transition::Failed { reason })
                    .await
                {
                    error!(error = %e, "Could not mark record failed");
                }
                self.invalidate_list(subject).await;
                Err(err)
            }
        }
    }

    /// Drop every cached entry for a subject so the next read re-hashes
    #[instrument(skip_all, fields(subject = %subject))]
    pub async fn invalidate_subject(&self, subject: &str) -> GenResult<u64> {
        let removed = self
            .cache
            .invalidate_tag(&keys::subject_tag(subject))
            .await?;
        debug!(removed, "Subject cache invalidated");
        Ok(removed)
    }

    /// Drop every cached report and report list, across all subjects
    #[instrument(skip_all)]
    pub async fn flush_cache(&self) -> GenResult<u64> {
        let removed = self.cache.invalidate_tag(keys::REPORT_LIST_TAG).await?;
        info!(removed, "Report cache flushed");
        Ok(removed)
    }

    /// Hard-delete records of the given kinds, or of every kind
    #[instrument(skip_all, fields(subject = %subject))]
    pub async fn delete_reports(&self, subject: &str, kinds: Option<&[String]>) -> GenResult<u64> {
        let kinds = match kinds {
            Some(kinds) => {
                for kind in kinds {
                    self.strategies.get(kind)?;
                }
                kinds.to_vec()
            }
            None => self.kinds(),
        };

        let deleted = self.store.delete_for_subject(subject, &kinds).await?;
        self.invalidate_subject(subject).await?;
        info!(deleted, kinds = ?kinds, "Reports deleted");
        Ok(deleted)
    }

    /// Record counts by kind and status
    pub async fn stats(&self, subject: &str) -> GenResult<Vec<StatusCount>> {
        Ok(self.store.stats_for_subject(subject).await?)
    }

    /// Every stored record for a subject in persisted form
    pub async fn export(&self, subject: &str, kind: Option<&str>) -> GenResult<Vec<ReportRecord>> {
        if let Some(kind) = kind {
            self.strategies.get(kind)?;
        }
        Ok(self.store.list_for_subject(subject, kind).await?)
    }

    /// Waiting jobs on the queue
    pub async fn queue_depth(&self) -> GenResult<usize> {
        let depth = self.queue.count().await?;
        metrics::record_queue_depth(depth);
        Ok(depth)
    }

    async fn collect(&self, strategy: &dyn ReportStrategy, subject: &str) -> GenResult<InputSet> {
        Ok(collect_inputs(
            self.inputs.as_ref(),
            strategy.kind(),
            subject,
            strategy.required_forms(),
            strategy.optional_forms(),
        )
        .await?)
    }

    /// Re-collect inputs and generate for the async path
    async fn generate_for(&self, subject: &str, kind: &str) -> GenResult<(Value, GenerationMeta)> {
        let strategy = self.strategies.get(kind)?;
        let inputs = self.collect(strategy.as_ref(), subject).await?;
        let source_hash = compute_hash(&inputs);
        self.run_cycle(strategy.as_ref(), &inputs, source_hash).await
    }

    /// Prompt, call, extract, validate
    async fn run_cycle(
        &self,
        strategy: &dyn ReportStrategy,
        inputs: &InputSet,
        source_hash: String,
    ) -> GenResult<(Value, GenerationMeta)> {
        let timer = GenerationTimer::start(strategy.kind());
        let prompt = strategy.build_prompt(inputs);

        let result: std::result::Result<Value, AppError> = async {
            let text = self
                .ai
                .complete(
                    strategy.system_prompt(),
                    &prompt,
                    self.settings.timeout,
                    self.settings.allow_retry,
                )
                .await?;

            let payload = extract_json(&text)?;
            if !strategy.validate(&payload) {
                return Err(AppError::ParseError {
                    message: format!(
                        "payload for '{}' is missing required keys",
                        strategy.kind()
                    ),
                });
            }
            Ok(payload)
        }
        .await;

        match result {
            Ok(payload) => {
                let duration = timer.finish("published");
                Ok((
                    payload,
                    GenerationMeta {
                        model_identifier: self.ai.model_name().to_string(),
                        generation_duration_seconds: duration,
                        source_hash,
                        source_input_ids: inputs.submission_ids(),
                    },
                ))
            }
            Err(e) => {
                let err = GenerationError::from(e);
                timer.finish(err.kind_name());
                match &err {
                    GenerationError::Unexpected(source) => {
                        error!(error = %source, "Generation cycle failed")
                    }
                    other => warn!(error = %other, "Generation cycle failed"),
                }
                Err(err)
            }
        }
    }

    async fn fresh_current(
        &self,
        subject: &str,
        kind: &str,
        source_hash: &str,
    ) -> GenResult<Option<ReportRecord>> {
        Ok(self
            .store
            .load_current(subject, kind)
            .await?
            .filter(|current| current.source_hash == source_hash))
    }

    /// Archive and prune older versions; failures only log
    async fn apply_retention(&self, subject: &str, kind: &str) {
        match self
            .store
            .archive_older_than(subject, kind, &self.settings.retention)
            .await
        {
            Ok(outcome) if !outcome.archived.is_empty() || !outcome.pruned.is_empty() => {
                debug!(
                    archived = outcome.archived.len(),
                    pruned = outcome.pruned.len(),
                    "Retention applied"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Retention failed, older versions kept"),
        }
    }

    async fn cached_report(&self, kind: &str, subject: &str) -> Option<ReportRecord> {
        match get_json::<ReportRecord>(self.cache.as_ref(), &keys::report(kind, subject)).await {
            Ok(found) => {
                metrics::record_cache(found.is_some(), "report");
                found
            }
            Err(e) => {
                warn!(error = %e, "Report cache read failed");
                None
            }
        }
    }

    async fn cache_report(&self, record: &ReportRecord) {
        let key = keys::report(&record.kind, &record.subject);
        let tags = keys::report_tags(&record.kind, &record.subject);
        if let Err(e) = set_json(self.cache.as_ref(), &key, record, &tags).await {
            warn!(error = %e, key = %key, "Failed to cache report");
        }
    }

    async fn drop_cached_report(&self, kind: &str, subject: &str) {
        if let Err(e) = self.cache.delete(&keys::report(kind, subject)).await {
            warn!(error = %e, "Failed to drop cached report");
        }
    }

    async fn invalidate_list(&self, subject: &str) {
        if let Err(e) = self
            .cache
            .invalidate_tag(&keys::report_list_tag(subject))
            .await
        {
            warn!(error = %e, "Failed to invalidate report list");
        }
    }
}

fn failure_reason(err: &GenerationError) -> String {
    let mut reason = err.to_string();
    if reason.len() > MAX_FAILURE_REASON {
        let mut cut = MAX_FAILURE_REASON;
        while !reason.is_char_boundary(cut) {
            cut -= 1;
        }
        reason.truncate(cut);
    }
    reason
}
