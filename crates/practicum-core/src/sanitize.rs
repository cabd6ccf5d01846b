//! Sanitization of untrusted text crossing the grading boundary.
//!
//! Two directions. Inbound: learner-submitted text goes into an LLM prompt,
//! so code-fence delimiters are stripped (they could close our own
//! delimiters) and the text is scanned against known injection phrases —
//! a hit is logged for observability but never blocks grading, since the
//! technical evaluation itself is expected to fail unsubstantive answers.
//! Outbound: model-produced feedback is shown to learners, so markup, code
//! blocks, and URLs are removed and the length is capped.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;

/// Maximum feedback length, in characters, after sanitization.
pub const MAX_FEEDBACK_CHARS: usize = 500;

/// Placeholder substituted for code blocks in outbound feedback.
const CODE_PLACEHOLDER: &str = "[code omitted]";

/// Placeholder substituted for URLs in outbound feedback.
const LINK_PLACEHOLDER: &str = "[link removed]";

/// Phrases that indicate an attempt to steer the grader. Matched
/// case-insensitively against inbound text.
const INJECTION_SIGNATURES: &[&str] = &[
    "ignore previous instructions",
    "ignore all previous instructions",
    "disregard previous instructions",
    "ignore the above",
    "forget your instructions",
    "new instructions:",
    "system prompt",
    "you are now",
    "mark as passed",
    "mark this as passed",
    "grade this as passed",
    "give a passing grade",
    "<|im_start|>",
    "<|im_end|>",
    "<|endoftext|>",
    "[inst]",
    "### instruction",
];

lazy_static! {
    static ref FENCED_BLOCK_RE: Regex = Regex::new(r"(?s)```.*?```").unwrap();
    static ref MARKUP_TAG_RE: Regex = Regex::new(r"<[^<>]+>").unwrap();
    static ref URL_RE: Regex = Regex::new(r#"https?://[^\s<>()\[\]"']+"#).unwrap();
}

/// Return every injection signature present in `text`.
pub fn detect_injection(text: &str) -> Vec<&'static str> {
    let lowered = text.to_lowercase();
    INJECTION_SIGNATURES
        .iter()
        .copied()
        .filter(|sig| lowered.contains(sig))
        .collect()
}

/// Remove code-fence delimiters, keeping the fenced content.
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```", "")
}

/// Prepare learner-submitted text for inclusion in a prompt.
///
/// Logs any injection signatures found, then strips fence delimiters.
/// `context` names the call site (e.g. the requirement id) for the log.
pub fn sanitize_untrusted_input(text: &str, context: &str) -> String {
    let hits = detect_injection(text);
    if !hits.is_empty() {
        warn!(
            context,
            signatures = ?hits,
            "injection signatures in untrusted input"
        );
    }
    strip_code_fences(text)
}

/// Sanitize model-produced feedback before it reaches a user.
///
/// Code blocks and URLs become neutral placeholders, markup tags are
/// stripped, and the result is capped at [`MAX_FEEDBACK_CHARS`].
pub fn sanitize_feedback(text: &str) -> String {
    let mut out = FENCED_BLOCK_RE
        .replace_all(text, CODE_PLACEHOLDER)
        .into_owned();
    // An unpaired fence swallows everything after it.
    if let Some(idx) = out.find("```") {
        out.truncate(idx);
        out.push_str(CODE_PLACEHOLDER);
    }
    let out = MARKUP_TAG_RE.replace_all(&out, "");
    let out = URL_RE.replace_all(&out, LINK_PLACEHOLDER);
    truncate_chars(out.trim(), MAX_FEEDBACK_CHARS)
}

/// Truncate to at most `max` characters, marking the cut.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max).collect();
        cut.push_str("...");
        cut
    }
}
