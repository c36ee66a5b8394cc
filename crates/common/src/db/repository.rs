//! SeaORM-backed report store
//!
//! Version assignment and the single-in-flight rule are enforced by the
//! database: versions are computed inside the INSERT and guarded by a
//! partial unique index, pending inserts use `ON CONFLICT DO NOTHING`.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::store::{
    plan_retention, ArchiveOutcome, GenerationMeta, PendingOutcome, ReportRecord, ReportStatus,
    ReportStore, RetentionPolicy, StatusCount, Transition,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, DbErr, EntityTrait, QueryFilter,
    QueryOrder, SqlErr, Statement,
};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// Attempts at a version-assigning write before giving up
const MAX_VERSION_RETRIES: usize = 5;

const IN_FLIGHT: [&str; 2] = ["pending", "processing"];

/// Conditional pending insert; `created_at` comes from the database clock,
/// the same clock that stamps `generated_at` on publish.
const INSERT_PENDING_SQL: &str = r#"
    INSERT INTO report_records (
        id, subject, kind, version, status, source_hash,
        source_input_ids, created_at
    )
    VALUES ($1, $2, $3, 0, 'pending', $4, $5, NOW())
    ON CONFLICT DO NOTHING
    RETURNING *
"#;

/// Report store on Postgres
#[derive(Clone)]
pub struct ReportRepository {
    pool: DbPool,
}

impl ReportRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    /// Every record of a subject, filtered in memory
    ///
    /// Used when an indexed lookup fails, e.g. against a table whose
    /// secondary indexes are missing or mid-rebuild.
    async fn scan_subject(&self, subject: &str) -> Result<Vec<ReportRecord>> {
        let models = ReportRecordEntity::find()
            .filter(ReportRecordColumn::Subject.eq(subject))
            .all(self.write_conn())
            .await?;
        to_records(models)
    }

    async fn insert_versioned(
        &self,
        subject: &str,
        kind: &str,
        payload: &Value,
        meta: &GenerationMeta,
    ) -> std::result::Result<Option<ReportRecordModel>, DbErr> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            INSERT INTO report_records (
                id, subject, kind, version, status, generated_at,
                generation_duration_seconds, model_identifier, source_hash,
                source_input_ids, payload, created_at
            )
            SELECT $1, $2, $3, COALESCE(MAX(version), 0) + 1, 'published', NOW(),
                   $4, $5, $6, $7, $8, NOW()
            FROM report_records
            WHERE subject = $2 AND kind = $3
            RETURNING *
            "#,
            vec![
                Uuid::new_v4().into(),
                subject.into(),
                kind.into(),
                meta.generation_duration_seconds.into(),
                meta.model_identifier.clone().into(),
                meta.source_hash.clone().into(),
                serde_json::json!(meta.source_input_ids).into(),
                payload.clone().into(),
            ],
        );

        ReportRecordEntity::find()
            .from_raw_sql(stmt)
            .one(self.write_conn())
            .await
    }

    async fn publish_in_place(
        &self,
        id: Uuid,
        payload: &Value,
        meta: &GenerationMeta,
    ) -> std::result::Result<Option<ReportRecordModel>, DbErr> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE report_records AS r
            SET status = 'published',
                version = (
                    SELECT COALESCE(MAX(v.version), 0) + 1
                    FROM report_records v
                    WHERE v.subject = r.subject AND v.kind = r.kind
                ),
                payload = $2,
                generated_at = NOW(),
                generation_duration_seconds = $3,
                model_identifier = $4,
                source_hash = $5,
                source_input_ids = $6,
                error_message = NULL
            WHERE r.id = $1 AND r.status IN ('pending', 'processing')
            RETURNING *
            "#,
            vec![
                id.into(),
                payload.clone().into(),
                meta.generation_duration_seconds.into(),
                meta.model_identifier.clone().into(),
                meta.source_hash.clone().into(),
                serde_json::json!(meta.source_input_ids).into(),
            ],
        );

        ReportRecordEntity::find()
            .from_raw_sql(stmt)
            .one(self.write_conn())
            .await
    }

    async fn conditional_update(
        &self,
        sql: &str,
        values: Vec<sea_orm::Value>,
    ) -> Result<Option<ReportRecordModel>> {
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, values);
        ReportRecordEntity::find()
            .from_raw_sql(stmt)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    /// Explain why a conditional transition matched no row
    async fn rejected_transition(&self, id: Uuid, target: ReportStatus) -> AppError {
        match self.find_by_id(id).await {
            Ok(Some(record)) => AppError::InvalidTransition {
                id,
                from: record.status.to_string(),
                to: target.to_string(),
            },
            Ok(None) => AppError::RecordNotFound { id },
            Err(e) => e,
        }
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn to_records(models: Vec<ReportRecordModel>) -> Result<Vec<ReportRecord>> {
    models.into_iter().map(ReportRecord::try_from).collect()
}

fn highest_published<'a>(
    records: impl Iterator<Item = &'a ReportRecord>,
) -> Option<&'a ReportRecord> {
    records
        .filter(|r| r.status == ReportStatus::Published)
        .max_by_key(|r| r.version)
}

#[async_trait]
impl ReportStore for ReportRepository {
    async fn load_current(&self, subject: &str, kind: &str) -> Result<Option<ReportRecord>> {
        let indexed = ReportRecordEntity::find()
            .filter(ReportRecordColumn::Subject.eq(subject))
            .filter(ReportRecordColumn::Kind.eq(kind))
            .filter(ReportRecordColumn::Status.eq(ReportStatus::Published.as_str()))
            .order_by_desc(ReportRecordColumn::Version)
            .one(self.read_conn())
            .await;

        match indexed {
            Ok(model) => model.map(ReportRecord::try_from).transpose(),
            Err(e) => {
                warn!(error = %e, subject, kind, "Indexed lookup failed, scanning subject");
                let records = self.scan_subject(subject).await?;
                Ok(highest_published(records.iter().filter(|r| r.kind == kind)).cloned())
            }
        }
    }

    async fn load_in_flight(&self, subject: &str, kind: &str) -> Result<Option<ReportRecord>> {
        let indexed = ReportRecordEntity::find()
            .filter(ReportRecordColumn::Subject.eq(subject))
            .filter(ReportRecordColumn::Kind.eq(kind))
            .filter(ReportRecordColumn::Status.is_in(IN_FLIGHT))
            .one(self.write_conn())
            .await;

        match indexed {
            Ok(model) => model.map(ReportRecord::try_from).transpose(),
            Err(e) => {
                warn!(error = %e, subject, kind, "Indexed lookup failed, scanning subject");
                let records = self.scan_subject(subject).await?;
                Ok(records
                    .into_iter()
                    .find(|r| r.kind == kind && r.status.is_in_flight()))
            }
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ReportRecord>> {
        ReportRecordEntity::find_by_id(id)
            .one(self.write_conn())
            .await?
            .map(ReportRecord::try_from)
            .transpose()
    }

    async fn save_new_version(
        &self,
        subject: &str,
        kind: &str,
        payload: Value,
        meta: GenerationMeta,
    ) -> Result<ReportRecord> {
        for attempt in 1..=MAX_VERSION_RETRIES {
            match self.insert_versioned(subject, kind, &payload, &meta).await {
                Ok(Some(model)) => return ReportRecord::try_from(model),
                Ok(None) => {
                    return Err(AppError::Internal {
                        message: "versioned insert returned no row".to_string(),
                    })
                }
                Err(e) if is_unique_violation(&e) => {
                    debug!(attempt, subject, kind, "Version collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::Conflict {
            message: format!(
                "could not assign a version for {}/{} after {} attempts",
                subject, kind, MAX_VERSION_RETRIES
            ),
        })
    }

    async fn archive_older_than(
        &self,
        subject: &str,
        kind: &str,
        policy: &RetentionPolicy,
    ) -> Result<ArchiveOutcome> {
        let models = ReportRecordEntity::find()
            .filter(ReportRecordColumn::Subject.eq(subject))
            .filter(ReportRecordColumn::Kind.eq(kind))
            .filter(ReportRecordColumn::Status.is_in([
                ReportStatus::Published.as_str(),
                ReportStatus::Archived.as_str(),
            ]))
            .all(self.write_conn())
            .await?;
        let outcome = plan_retention(&to_records(models)?, policy);

        if !outcome.archived.is_empty() {
            ReportRecordEntity::update_many()
                .col_expr(
                    ReportRecordColumn::Status,
                    Expr::value(ReportStatus::Archived.as_str()),
                )
                .filter(ReportRecordColumn::Id.is_in(outcome.archived.clone()))
                .exec(self.write_conn())
                .await?;
        }

        if !outcome.pruned.is_empty() {
            ReportRecordEntity::delete_many()
                .filter(ReportRecordColumn::Id.is_in(outcome.pruned.clone()))
                .exec(self.write_conn())
                .await?;
        }

        Ok(outcome)
    }

    async fn create_pending(
        &self,
        subject: &str,
        kind: &str,
        source_hash: &str,
        source_input_ids: &[String],
    ) -> Result<PendingOutcome> {
        let id = Uuid::new_v4();

        // The in-flight record we collide with can finish between the two
        // statements, so try twice before reporting a conflict.
        for _ in 0..2 {
            let inserted = self
                .conditional_update(
                    INSERT_PENDING_SQL,
                    vec![
                        id.into(),
                        subject.into(),
                        kind.into(),
                        source_hash.into(),
                        serde_json::json!(source_input_ids).into(),
                    ],
                )
                .await?;

            if let Some(model) = inserted {
                return Ok(PendingOutcome::Created(ReportRecord::try_from(model)?));
            }
            if let Some(existing) = self.load_in_flight(subject, kind).await? {
                return Ok(PendingOutcome::Existing(existing));
            }
        }

        Err(AppError::Conflict {
            message: format!("could not create pending record for {}/{}", subject, kind),
        })
    }

    async fn transition(&self, id: Uuid, transition: Transition) -> Result<ReportRecord> {
        let target = transition.target();

        let updated = match transition {
            Transition::Processing => {
                self.conditional_update(
                    "UPDATE report_records SET status = 'processing' \
                     WHERE id = $1 AND status IN ('pending', 'processing') RETURNING *",
                    vec![id.into()],
                )
                .await?
            }
            Transition::Failed { reason } => {
                self.conditional_update(
                    "UPDATE report_records SET status = 'failed', error_message = $2 \
                     WHERE id = $1 AND status IN ('pending', 'processing') RETURNING *",
                    vec![id.into(), reason.into()],
                )
                .await?
            }
            Transition::Published { payload, meta } => {
                let mut published = None;
                for attempt in 1..=MAX_VERSION_RETRIES {
                    match self.publish_in_place(id, &payload, &meta).await {
                        Ok(model) => {
                            published = model;
                            break;
                        }
                        Err(e) if is_unique_violation(&e) && attempt < MAX_VERSION_RETRIES => {
                            debug!(attempt, %id, "Version collision on publish, retrying");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                published
            }
        };

        match updated {
            Some(model) => ReportRecord::try_from(model),
            None => Err(self.rejected_transition(id, target).await),
        }
    }

    async fn mark_viewed(&self, id: Uuid) -> Result<Option<DateTime<Utc>>> {
        let updated = self
            .conditional_update(
                "UPDATE report_records SET viewed_at = NOW() \
                 WHERE id = $1 AND viewed_at IS NULL RETURNING *",
                vec![id.into()],
            )
            .await?;

        if let Some(model) = updated {
            return Ok(model.viewed_at.map(|t| t.with_timezone(&Utc)));
        }

        match self.find_by_id(id).await? {
            Some(_) => Ok(None),
            None => Err(AppError::RecordNotFound { id }),
        }
    }

    async fn list_current(&self, subject: &str) -> Result<Vec<ReportRecord>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT DISTINCT ON (kind) *
            FROM report_records
            WHERE subject = $1 AND status = 'published'
            ORDER BY kind, version DESC
            "#,
            vec![subject.into()],
        );

        match ReportRecordEntity::find()
            .from_raw_sql(stmt)
            .all(self.read_conn())
            .await
        {
            Ok(models) => to_records(models),
            Err(e) => {
                warn!(error = %e, subject, "Current-report query failed, scanning subject");
                let records = self.scan_subject(subject).await?;
                let mut kinds: BTreeMap<&str, &ReportRecord> = BTreeMap::new();
                for record in records.iter().filter(|r| r.status == ReportStatus::Published) {
                    let entry = kinds.entry(record.kind.as_str()).or_insert(record);
                    if record.version > entry.version {
                        *entry = record;
                    }
                }
                Ok(kinds.into_values().cloned().collect())
            }
        }
    }

    async fn list_for_subject(&self, subject: &str, kind: Option<&str>) -> Result<Vec<ReportRecord>> {
        let mut query = ReportRecordEntity::find().filter(ReportRecordColumn::Subject.eq(subject));
        if let Some(kind) = kind {
            query = query.filter(ReportRecordColumn::Kind.eq(kind));
        }

        let models = query
            .order_by_asc(ReportRecordColumn::Kind)
            .order_by_desc(ReportRecordColumn::Version)
            .order_by_desc(ReportRecordColumn::CreatedAt)
            .all(self.read_conn())
            .await?;
        to_records(models)
    }

    async fn stats_for_subject(&self, subject: &str) -> Result<Vec<StatusCount>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT kind, status, COUNT(*) AS count
            FROM report_records
            WHERE subject = $1
            GROUP BY kind, status
            ORDER BY kind, status
            "#,
            vec![subject.into()],
        );

        let rows = self.read_conn().query_all(stmt).await?;
        let mut counts = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: String = row.try_get_by_index(0)?;
            let status: String = row.try_get_by_index(1)?;
            let count: i64 = row.try_get_by_index(2)?;
            counts.push(StatusCount {
                kind,
                status: status.parse()?,
                count: count.max(0) as u64,
            });
        }

        Ok(counts)
    }

    async fn delete_record(&self, id: Uuid) -> Result<bool> {
        let result = ReportRecordEntity::delete_by_id(id)
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn delete_for_subject(&self, subject: &str, kinds: &[String]) -> Result<u64> {
        let result = ReportRecordEntity::delete_many()
            .filter(ReportRecordColumn::Subject.eq(subject))
            .filter(ReportRecordColumn::Kind.is_in(kinds.iter().cloned()))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_insert_uses_database_clock() {
        assert!(INSERT_PENDING_SQL.contains("'pending', $4, $5, NOW())"));
        assert!(!INSERT_PENDING_SQL.contains("$6"));
        assert!(INSERT_PENDING_SQL.contains("ON CONFLICT DO NOTHING"));
    }
}
