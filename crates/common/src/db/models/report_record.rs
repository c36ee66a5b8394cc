//! Report record entity

use crate::errors::AppError;
use crate::store::{ReportRecord, ReportStatus};
use chrono::Utc;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "report_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub subject: String,

    #[sea_orm(column_type = "Text")]
    pub kind: String,

    /// 0 while pending or processing
    pub version: i32,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    pub generated_at: Option<DateTimeWithTimeZone>,

    pub generation_duration_seconds: Option<f64>,

    #[sea_orm(column_type = "Text", nullable)]
    pub model_identifier: Option<String>,

    #[sea_orm(column_type = "Text")]
    pub source_hash: String,

    /// JSON array of submission ids
    #[sea_orm(column_type = "JsonBinary")]
    pub source_input_ids: Json,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub payload: Option<Json>,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    pub viewed_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn report_status(&self) -> crate::errors::Result<ReportStatus> {
        self.status.parse()
    }
}

impl TryFrom<Model> for ReportRecord {
    type Error = AppError;

    fn try_from(model: Model) -> crate::errors::Result<Self> {
        let status = model.report_status()?;
        let source_input_ids: Vec<String> = serde_json::from_value(model.source_input_ids)?;

        Ok(ReportRecord {
            id: model.id,
            subject: model.subject,
            kind: model.kind,
            version: model.version,
            status,
            generated_at: model.generated_at.map(|t| t.with_timezone(&Utc)),
            generation_duration_seconds: model.generation_duration_seconds,
            model_identifier: model.model_identifier,
            source_hash: model.source_hash,
            source_input_ids,
            payload: model.payload,
            error_message: model.error_message,
            viewed_at: model.viewed_at.map(|t| t.with_timezone(&Utc)),
            created_at: model.created_at.with_timezone(&Utc),
        })
    }
}
