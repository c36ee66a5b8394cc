//! Report handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ApiResult;
use crate::AppState;
use reportforge_common::{
    errors::AppError,
    generation::EnqueueOutcome,
    store::{ReportStatus, StatusCount},
    ReportRecord,
};

/// A report as shown to callers; failure detail and fingerprints stay internal
#[derive(Debug, Serialize, Deserialize)]
pub struct ReportResponse {
    pub id: Uuid,
    pub kind: String,
    pub version: i32,
    pub status: ReportStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl From<ReportRecord> for ReportResponse {
    fn from(record: ReportRecord) -> Self {
        Self {
            id: record.id,
            kind: record.kind,
            version: record.version,
            status: record.status,
            generated_at: record.generated_at,
            viewed_at: record.viewed_at,
            model_identifier: record.model_identifier,
            payload: record.payload,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    /// Comma-separated kinds; every kind when absent
    pub kinds: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReportListResponse {
    pub subject: String,
    pub reports: Vec<ReportResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub record_id: Uuid,
    pub status: ReportStatus,
    pub created: bool,
    pub poll_url: String,
}

impl From<EnqueueOutcome> for EnqueueResponse {
    fn from(outcome: EnqueueOutcome) -> Self {
        Self {
            poll_url: format!("/v1/records/{}", outcome.record_id),
            record_id: outcome.record_id,
            status: outcome.status,
            created: outcome.created,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub deleted: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvalidateResponse {
    pub invalidated: u64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub subject: String,
    pub counts: Vec<StatusCount>,
}

/// Current report of every kind
pub async fn list_reports(
    State(state): State<AppState>,
    Path(subject): Path<String>,
) -> ApiResult<Json<ReportListResponse>> {
    let reports = state.generator.list_reports(&subject).await?;
    Ok(Json(ReportListResponse {
        subject,
        reports: reports.into_iter().map(ReportResponse::from).collect(),
    }))
}

/// Return the current report, generating it when inputs changed
pub async fn generate_report(
    State(state): State<AppState>,
    Path((subject, kind)): Path<(String, String)>,
    Query(query): Query<GenerateQuery>,
) -> ApiResult<Json<ReportResponse>> {
    let record = state
        .generator
        .generate_or_fetch(&subject, &kind, query.force)
        .await?;
    Ok(Json(record.into()))
}

/// Current report without generating
pub async fn current_report(
    State(state): State<AppState>,
    Path((subject, kind)): Path<(String, String)>,
) -> ApiResult<Json<ReportResponse>> {
    let record = state
        .generator
        .fetch_existing(&subject, &kind)
        .await?
        .ok_or_else(|| AppError::NotFound {
            resource_type: "report".to_string(),
            id: format!("{}/{}", subject, kind),
        })?;
    Ok(Json(record.into()))
}

/// Queue a generation; repeats while one is in flight return the same record
pub async fn enqueue_report(
    State(state): State<AppState>,
    Path((subject, kind)): Path<(String, String)>,
) -> ApiResult<(StatusCode, Json<EnqueueResponse>)> {
    let outcome = state.generator.enqueue_generation(&subject, &kind).await?;
    Ok((StatusCode::ACCEPTED, Json(outcome.into())))
}

pub async fn delete_reports(
    State(state): State<AppState>,
    Path(subject): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<Json<DeleteResponse>> {
    let kinds: Option<Vec<String>> = query.kinds.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect()
    });

    let deleted = state
        .generator
        .delete_reports(&subject, kinds.as_deref())
        .await?;
    Ok(Json(DeleteResponse { deleted }))
}

/// Called by the form system after a submission changes
pub async fn invalidate_subject(
    State(state): State<AppState>,
    Path(subject): Path<String>,
) -> ApiResult<Json<InvalidateResponse>> {
    let invalidated = state.generator.invalidate_subject(&subject).await?;
    Ok(Json(InvalidateResponse { invalidated }))
}

pub async fn subject_stats(
    State(state): State<AppState>,
    Path(subject): Path<String>,
) -> ApiResult<Json<StatsResponse>> {
    let counts = state.generator.stats(&subject).await?;
    Ok(Json(StatsResponse { subject, counts }))
}
