//! Input collection from externally-owned form submissions
//!
//! The form system owns its own storage. The engine only ever asks for the
//! most recent completed submission of a form for a subject.

mod memory;

pub use memory::InMemoryInputCollector;

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A completed form submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// Submission identifier in the form system
    pub id: String,
    /// Logical form identifier
    pub form_id: String,
    /// Answer data keyed by field name
    pub data: Map<String, Value>,
    /// Last modification time
    pub updated_at: Option<DateTime<Utc>>,
}

impl Submission {
    /// Build a submission; non-object data is wrapped under `value`
    pub fn new(id: impl Into<String>, form_id: impl Into<String>, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };

        Self {
            id: id.into(),
            form_id: form_id.into(),
            data,
            updated_at: None,
        }
    }

    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }
}

/// Inputs gathered for one generation, ordered by form id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputSet {
    submissions: BTreeMap<String, Submission>,
}

impl InputSet {
    pub fn insert(&mut self, submission: Submission) {
        self.submissions.insert(submission.form_id.clone(), submission);
    }

    pub fn get(&self, form_id: &str) -> Option<&Submission> {
        self.submissions.get(form_id)
    }

    pub fn contains(&self, form_id: &str) -> bool {
        self.submissions.contains_key(form_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Submission)> {
        self.submissions.iter()
    }

    pub fn len(&self) -> usize {
        self.submissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.submissions.is_empty()
    }

    /// Submission identifiers in form-id order
    pub fn submission_ids(&self) -> Vec<String> {
        self.submissions.values().map(|s| s.id.clone()).collect()
    }
}

/// Read-only access to the form system
#[async_trait]
pub trait InputCollector: Send + Sync {
    /// Most recently modified completed submission, if any
    async fn latest_submission(&self, form_id: &str, subject: &str) -> Result<Option<Submission>>;
}

/// Forms from `required` that have no completed submission for the subject
pub async fn missing_forms(
    collector: &dyn InputCollector,
    subject: &str,
    required: &[&str],
) -> Result<Vec<String>> {
    let mut missing = Vec::new();
    for form_id in required {
        if collector.latest_submission(form_id, subject).await?.is_none() {
            missing.push(form_id.to_string());
        }
    }
    Ok(missing)
}

/// Collect every required form plus whichever optional forms exist
pub async fn collect_inputs(
    collector: &dyn InputCollector,
    kind: &str,
    subject: &str,
    required: &[&str],
    optional: &[&str],
) -> Result<InputSet> {
    let mut inputs = InputSet::default();
    let mut missing = Vec::new();

    for form_id in required {
        match collector.latest_submission(form_id, subject).await? {
            Some(submission) => inputs.insert(submission),
            None => missing.push(form_id.to_string()),
        }
    }

    if !missing.is_empty() {
        return Err(AppError::InsufficientData {
            kind: kind.to_string(),
            missing,
        });
    }

    for form_id in optional {
        if let Some(submission) = collector.latest_submission(form_id, subject).await? {
            inputs.insert(submission);
        }
    }

    tracing::debug!(
        kind,
        subject,
        collected = inputs.len(),
        "Collected report inputs"
    );

    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_collect_required_and_optional() {
        let collector = InMemoryInputCollector::new();
        collector
            .submit("u1", Submission::new("s1", "task_analysis", json!({"role": "engineer"})))
            .await;
        collector
            .submit("u1", Submission::new("s2", "skills_gap", json!({"current": ["python"]})))
            .await;

        let inputs = collect_inputs(
            &collector,
            "career_transitions",
            "u1",
            &["task_analysis"],
            &["skills_gap", "work_values"],
        )
        .await
        .unwrap();

        assert_eq!(inputs.len(), 2);
        assert!(inputs.contains("skills_gap"));
        assert!(!inputs.contains("work_values"));
        assert_eq!(inputs.submission_ids(), vec!["s2".to_string(), "s1".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_required_is_insufficient_data() {
        let collector = InMemoryInputCollector::new();
        collector
            .submit("u1", Submission::new("s2", "skills_gap", json!({"current": []})))
            .await;

        let err = collect_inputs(
            &collector,
            "career_transitions",
            "u1",
            &["task_analysis", "skills_gap"],
            &[],
        )
        .await
        .unwrap_err();

        match err {
            AppError::InsufficientData { kind, missing } => {
                assert_eq!(kind, "career_transitions");
                assert_eq!(missing, vec!["task_analysis".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_forms_reports_all_gaps() {
        let collector = InMemoryInputCollector::new();
        let missing = missing_forms(&collector, "u1", &["a", "b"]).await.unwrap();
        assert_eq!(missing, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_scalar_submission_is_wrapped() {
        let submission = Submission::new("s1", "notes", json!("free text"));
        assert_eq!(submission.data.get("value"), Some(&json!("free text")));
    }
}
