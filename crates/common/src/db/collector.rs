//! Input collector over the form submission table

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::Result;
use crate::inputs::{InputCollector, Submission};
use async_trait::async_trait;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};

/// Reads the latest completed submission per (form, subject)
#[derive(Clone)]
pub struct SeaOrmInputCollector {
    pool: DbPool,
}

impl SeaOrmInputCollector {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InputCollector for SeaOrmInputCollector {
    async fn latest_submission(&self, form_id: &str, subject: &str) -> Result<Option<Submission>> {
        let latest = FormSubmissionEntity::find()
            .filter(FormSubmissionColumn::FormId.eq(form_id))
            .filter(FormSubmissionColumn::Subject.eq(subject))
            .filter(FormSubmissionColumn::Completed.eq(true))
            .order_by_desc(FormSubmissionColumn::UpdatedAt)
            .one(self.pool.read())
            .await?;

        Ok(latest.map(Submission::from))
    }
}
