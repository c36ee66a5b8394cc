//! Schema bootstrap for the report tables
//!
//! Creates what is missing and nothing else. Repairing a half-migrated
//! schema is left to external migration tooling.

use crate::errors::Result;
use sea_orm::{ConnectionTrait, DatabaseConnection};
use tracing::info;

const CREATE_REPORT_RECORDS: &str = r#"
CREATE TABLE IF NOT EXISTS report_records (
    id UUID PRIMARY KEY,
    subject TEXT NOT NULL,
    kind TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    generated_at TIMESTAMPTZ,
    generation_duration_seconds DOUBLE PRECISION,
    model_identifier TEXT,
    source_hash TEXT NOT NULL,
    source_input_ids JSONB NOT NULL DEFAULT '[]'::jsonb,
    payload JSONB,
    error_message TEXT,
    viewed_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// Index statements, in creation order
pub const REPORT_INDEXES: &[(&str, &str)] = &[
    (
        "report_records_version_uniq",
        "CREATE UNIQUE INDEX IF NOT EXISTS report_records_version_uniq \
         ON report_records (subject, kind, version) WHERE version > 0",
    ),
    (
        "report_records_in_flight_uniq",
        "CREATE UNIQUE INDEX IF NOT EXISTS report_records_in_flight_uniq \
         ON report_records (subject, kind) WHERE status IN ('pending', 'processing')",
    ),
    (
        "report_records_lookup_idx",
        "CREATE INDEX IF NOT EXISTS report_records_lookup_idx \
         ON report_records (subject, kind, status)",
    ),
];

/// Create `report_records` and its indexes if absent
pub async fn ensure_schema(conn: &DatabaseConnection) -> Result<()> {
    conn.execute_unprepared(CREATE_REPORT_RECORDS).await?;

    for (name, sql) in REPORT_INDEXES {
        conn.execute_unprepared(sql).await?;
        info!(index = %name, "Index ensured");
    }

    info!("Report schema ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_statements_are_idempotent() {
        assert!(CREATE_REPORT_RECORDS.contains("IF NOT EXISTS"));
        for (name, sql) in REPORT_INDEXES {
            assert!(sql.contains("IF NOT EXISTS"));
            assert!(sql.contains(name));
        }
    }

    #[test]
    fn test_version_index_ignores_unassigned_versions() {
        let (_, sql) = REPORT_INDEXES[0];
        assert!(sql.contains("WHERE version > 0"));
    }
}
