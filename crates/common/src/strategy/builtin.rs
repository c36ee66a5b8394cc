//! Built-in report kinds

use super::PromptStrategy;

pub const TASK_ANALYSIS: &str = "task_analysis";
pub const SKILLS_GAP: &str = "skills_gap";
pub const WORK_VALUES: &str = "work_values";
pub const WORK_STYLE: &str = "work_style";

pub fn builtin_strategies() -> Vec<PromptStrategy> {
    vec![
        PromptStrategy {
            kind: "career_transitions",
            title: "Career Transitions",
            required_forms: vec![TASK_ANALYSIS],
            optional_forms: vec![SKILLS_GAP, WORK_VALUES],
            instructions: "Identify three to five realistic career transitions for this person. \
                For each, explain why it fits their current tasks and what would have to change.",
            required_keys: vec!["summary", "transitions"],
        },
        PromptStrategy {
            kind: "skills_development",
            title: "Skills Development Plan",
            required_forms: vec![SKILLS_GAP],
            optional_forms: vec![TASK_ANALYSIS],
            instructions: "Build a staged development plan that closes the most valuable skill gaps first. \
                Put the ordered steps under `plan.steps` and the expected timeline under `plan.timeline`.",
            required_keys: vec!["summary", "plan.steps", "plan.timeline"],
        },
        PromptStrategy {
            kind: "work_style",
            title: "Work Style Profile",
            required_forms: vec![WORK_STYLE],
            optional_forms: vec![WORK_VALUES, TASK_ANALYSIS],
            instructions: "Describe how this person works best, where friction is likely, \
                and concrete adjustments for collaboration.",
            required_keys: vec!["summary", "strengths", "watch_outs"],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::ReportStrategy;
    use serde_json::json;

    #[test]
    fn test_builtin_kinds_are_unique() {
        let strategies = builtin_strategies();
        let mut kinds: Vec<&str> = strategies.iter().map(|s| s.kind).collect();
        kinds.sort();
        kinds.dedup();
        assert_eq!(kinds.len(), strategies.len());
    }

    #[test]
    fn test_skills_development_requires_nested_plan() {
        let strategy = builtin_strategies()
            .into_iter()
            .find(|s| s.kind == "skills_development")
            .unwrap();

        assert!(!strategy.validate(&json!({"summary": "x", "plan": {"steps": []}})));
        assert!(strategy.validate(&json!({
            "summary": "x",
            "plan": {"steps": ["learn rust"], "timeline": "6 months"}
        })));
    }
}
