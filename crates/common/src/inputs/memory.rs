//! In-memory input collector for tests and local runs

use super::{InputCollector, Submission};
use crate::errors::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Keeps every completed submission per (form, subject)
#[derive(Default)]
pub struct InMemoryInputCollector {
    submissions: RwLock<HashMap<(String, String), Vec<Submission>>>,
}

impl InMemoryInputCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed submission for a subject
    pub async fn submit(&self, subject: &str, submission: Submission) {
        let key = (submission.form_id.clone(), subject.to_string());
        self.submissions
            .write()
            .await
            .entry(key)
            .or_default()
            .push(submission);
    }

    /// Drop every submission of a form for a subject
    pub async fn withdraw(&self, subject: &str, form_id: &str) {
        self.submissions
            .write()
            .await
            .remove(&(form_id.to_string(), subject.to_string()));
    }
}

#[async_trait]
impl InputCollector for InMemoryInputCollector {
    async fn latest_submission(&self, form_id: &str, subject: &str) -> Result<Option<Submission>> {
        let guard = self.submissions.read().await;
        let Some(list) = guard.get(&(form_id.to_string(), subject.to_string())) else {
            return Ok(None);
        };

        // Later insertions win ties and undated submissions
        let latest = list
            .iter()
            .enumerate()
            .max_by_key(|(index, s)| (s.updated_at, *index))
            .map(|(_, s)| s.clone());

        Ok(latest)
    }
}
