//! Structured-output parsing for grader responses.
//!
//! Models are told to answer with strict JSON, but in practice answers
//! arrive wrapped in code fences or prose. The parser extracts the first
//! balanced JSON object or array and works from that; anything less
//! salvageable becomes a failed grade upstream, never an error.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use practicum_core::{TaskDefinition, TaskResult};

/// Outcome of a rubric-grading call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradeResult {
    /// Whether the submission met the rubric.
    pub passed: bool,

    /// Feedback for the learner. Sanitized by the grading engine
    /// before it reaches a verdict.
    pub feedback: String,
}

#[derive(Debug, Deserialize)]
struct GradeJson {
    passed: bool,
    #[serde(default)]
    feedback: String,
}

#[derive(Debug, Deserialize)]
struct TaskJudgment {
    task: String,
    #[serde(default)]
    passed: bool,
    #[serde(default)]
    feedback: String,
}

/// Slice out the first balanced JSON object or array in `text`.
///
/// Tracks string literals and escapes so braces inside feedback strings
/// do not unbalance the scan.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find(|c| c == '{' || c == '[')?;
    let bytes = text.as_bytes();

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' | b'[' if !in_string => depth += 1,
            b'}' | b']' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a rubric-grading response. `None` means unsalvageable output.
pub fn parse_grade(text: &str) -> Option<GradeResult> {
    let json = extract_json(text)?;
    let parsed: GradeJson = serde_json::from_str(json).ok()?;
    Some(GradeResult {
        passed: parsed.passed,
        feedback: parsed.feedback,
    })
}

/// Parse an analysis response into exactly one result per defined task.
///
/// Judgments for unknown task ids are discarded; tasks the model skipped
/// come back as not evaluated. The output length always equals
/// `tasks.len()`, whatever the model produced.
pub fn parse_task_results(text: &str, tasks: &[TaskDefinition]) -> Vec<TaskResult> {
    let judgments = extract_judgments(text);

    tasks
        .iter()
        .map(|task| {
            match judgments.iter().find(|j| j.task == task.id) {
                Some(judgment) => TaskResult {
                    task: task.id.clone(),
                    passed: judgment.passed,
                    feedback: judgment.feedback.clone(),
                },
                None => TaskResult::not_evaluated(&task.id),
            }
        })
        .collect()
}

fn extract_judgments(text: &str) -> Vec<TaskJudgment> {
    let Some(json) = extract_json(text) else {
        debug!("no JSON found in analysis response");
        return Vec::new();
    };
    let Ok(value) = serde_json::from_str::<Value>(json) else {
        debug!("analysis response is not valid JSON");
        return Vec::new();
    };

    // Accept a bare array, or an object wrapping one under "results".
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("results") {
            Some(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<TaskJudgment>(item).ok())
        .collect()
}
