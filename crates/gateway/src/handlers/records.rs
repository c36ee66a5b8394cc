//! Record status handlers for polling the async path

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ApiResult;
use crate::AppState;
use reportforge_common::{errors::AppError, store::ReportStatus};

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordStatusResponse {
    pub record_id: Uuid,
    pub subject: String,
    pub kind: String,
    pub status: ReportStatus,
    /// Zero until the record is published
    pub version: i32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
    /// Set once the record failed; internal detail is never included
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

pub async fn get_record(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
) -> ApiResult<Json<RecordStatusResponse>> {
    let record = state
        .generator
        .fetch_record(record_id)
        .await?
        .ok_or(AppError::RecordNotFound { id: record_id })?;

    Ok(Json(RecordStatusResponse {
        record_id: record.id,
        subject: record.subject,
        kind: record.kind,
        status: record.status,
        version: record.version,
        created_at: record.created_at,
        generated_at: record.generated_at,
        action: (record.status == ReportStatus::Failed).then(|| "retry".to_string()),
    }))
}
