//! Per-kind prompt building and response validation
//!
//! Each report kind is one [`ReportStrategy`] registered under its kind id.
//! Most kinds are plain [`PromptStrategy`] values; anything needing custom
//! prompt logic can implement the trait directly.

pub mod builtin;

pub use builtin::builtin_strategies;

use crate::errors::{AppError, Result};
use crate::inputs::InputSet;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Default system prompt for report generation
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a career development analyst. \
Write practical, specific guidance grounded only in the answers provided. \
Always answer with a single valid JSON object and nothing else.";

/// Prompt and validation behavior for one report kind
pub trait ReportStrategy: Send + Sync {
    /// Report kind identifier
    fn kind(&self) -> &str;

    /// Forms that must exist before generation
    fn required_forms(&self) -> &[&str];

    /// Forms that enrich the prompt when present
    fn optional_forms(&self) -> &[&str] {
        &[]
    }

    fn system_prompt(&self) -> &str {
        DEFAULT_SYSTEM_PROMPT
    }

    /// Build the user prompt; must be deterministic for a given input set
    fn build_prompt(&self, inputs: &InputSet) -> String;

    /// Check that a parsed response has the expected shape
    fn validate(&self, parsed: &Value) -> bool;
}

/// Table-driven strategy: instructions plus required response keys
#[derive(Debug, Clone)]
pub struct PromptStrategy {
    pub kind: &'static str,
    pub title: &'static str,
    pub required_forms: Vec<&'static str>,
    pub optional_forms: Vec<&'static str>,
    pub instructions: &'static str,
    /// Dotted paths that must be present and non-null, e.g. `plan.steps`
    pub required_keys: Vec<&'static str>,
}

impl ReportStrategy for PromptStrategy {
    fn kind(&self) -> &str {
        self.kind
    }

    fn required_forms(&self) -> &[&str] {
        &self.required_forms
    }

    fn optional_forms(&self) -> &[&str] {
        &self.optional_forms
    }

    fn build_prompt(&self, inputs: &InputSet) -> String {
        let mut prompt = format!("# {}\n\n{}\n\n", self.title, self.instructions);

        prompt.push_str("Respond with one JSON object containing these keys: ");
        prompt.push_str(&self.required_keys.join(", "));
        prompt.push_str(".\n");

        for form_id in self.required_forms.iter().chain(self.optional_forms.iter()) {
            if let Some(submission) = inputs.get(form_id) {
                let body = serde_json::to_string_pretty(&submission.data).unwrap_or_default();
                prompt.push_str(&format!("\n## Answers: {}\n{}\n", form_id, body));
            }
        }

        prompt
    }

    fn validate(&self, parsed: &Value) -> bool {
        has_required_keys(parsed, &self.required_keys)
    }
}

/// True when every dotted path resolves to a non-null value
pub fn has_required_keys(value: &Value, paths: &[&str]) -> bool {
    if !value.is_object() {
        return false;
    }

    paths.iter().all(|path| {
        let mut current = value;
        for segment in path.split('.') {
            match current.get(segment) {
                Some(next) => current = next,
                None => return false,
            }
        }
        !current.is_null()
    })
}

/// Kind id -> strategy lookup
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn ReportStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the built-in report kinds
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for strategy in builtin_strategies() {
            registry.register(Arc::new(strategy));
        }
        registry
    }

    /// Register a strategy, replacing any previous one for the same kind
    pub fn register(&mut self, strategy: Arc<dyn ReportStrategy>) {
        self.strategies.insert(strategy.kind().to_string(), strategy);
    }

    pub fn get(&self, kind: &str) -> Result<Arc<dyn ReportStrategy>> {
        self.strategies
            .get(kind)
            .cloned()
            .ok_or_else(|| AppError::UnknownKind {
                kind: kind.to_string(),
            })
    }

    /// Registered kinds in sorted order
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.strategies.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inputs::Submission;
    use serde_json::json;

    fn strategy() -> PromptStrategy {
        PromptStrategy {
            kind: "test_kind",
            title: "Test",
            required_forms: vec!["task_analysis"],
            optional_forms: vec!["skills_gap"],
            instructions: "Summarize.",
            required_keys: vec!["summary", "plan.steps"],
        }
    }

    #[test]
    fn test_validate_nested_keys() {
        let s = strategy();
        assert!(s.validate(&json!({"summary": "ok", "plan": {"steps": []}})));
        assert!(!s.validate(&json!({"summary": "ok"})));
        assert!(!s.validate(&json!({"summary": "ok", "plan": {"steps": null}})));
        assert!(!s.validate(&json!(["summary"])));
    }

    #[test]
    fn test_prompt_is_deterministic_and_includes_optional() {
        let s = strategy();
        let mut inputs = InputSet::default();
        inputs.insert(Submission::new("1", "task_analysis", json!({"role": "engineer", "a": 1})));

        let without_optional = s.build_prompt(&inputs);
        assert_eq!(without_optional, s.build_prompt(&inputs));
        assert!(without_optional.contains("## Answers: task_analysis"));
        assert!(!without_optional.contains("skills_gap"));

        inputs.insert(Submission::new("2", "skills_gap", json!({"current": ["python"]})));
        let with_optional = s.build_prompt(&inputs);
        assert!(with_optional.contains("## Answers: skills_gap"));
        assert!(with_optional.contains("summary, plan.steps"));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = StrategyRegistry::builtin();
        assert!(registry.get("career_transitions").is_ok());
        assert!(matches!(
            registry.get("nope"),
            Err(AppError::UnknownKind { .. })
        ));

        let kinds = registry.kinds();
        let mut sorted = kinds.clone();
        sorted.sort();
        assert_eq!(kinds, sorted);
    }
}
