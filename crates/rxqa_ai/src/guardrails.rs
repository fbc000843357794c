use std::sync::OnceLock;

use regex::Regex;

/// Draft used when retrieval produced nothing to ground an answer on.
pub const NO_CONTEXT_ANSWER: &str = "Not in the label context provided.";

/// Replacement for an ungrounded, low-confidence draft.
pub const FALLBACK_ANSWER: &str =
    "Not in the label context provided. Please refine your query or specify a drug name.";

pub const DISCLAIMER: &str = "Not medical advice. Verify via linked label.";

pub const DISCLAIMER_SUFFIX: &str = "\n\n⚠️ Not medical advice. Verify via linked label.";

pub const CONFIDENCE_CITED: f32 = 0.9;
pub const CONFIDENCE_UNCITED: f32 = 0.6;
pub const CONFIDENCE_NO_CONTEXT: f32 = 0.2;

fn citation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[Section:.*?\]\s*\(.*?#section=.*?\)").expect("citation pattern compiles")
    })
}

/// Citation-shaped spans: `[Section: <name>] (<url>#section=<id>)`.
pub fn find_citations(text: &str) -> Vec<&str> {
    citation_regex().find_iter(text).map(|m| m.as_str()).collect()
}

pub fn has_citation(text: &str) -> bool {
    citation_regex().is_match(text)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub confidence: f32,
    pub cited: bool,
    pub answer: String,
}

/// Score a draft and decide whether it may be shown.
///
/// Cited drafts score 0.9, uncited drafts with contexts 0.6, anything else
/// 0.2. An uncited draft under `threshold` is replaced by
/// [`FALLBACK_ANSWER`].
pub fn verify_draft(draft: &str, has_contexts: bool, threshold: f32) -> Verdict {
    let cited = has_citation(draft);
    let confidence = if cited {
        CONFIDENCE_CITED
    } else if has_contexts {
        CONFIDENCE_UNCITED
    } else {
        CONFIDENCE_NO_CONTEXT
    };

    let answer = if confidence < threshold && !cited {
        FALLBACK_ANSWER.to_string()
    } else {
        draft.to_string()
    };

    Verdict {
        confidence,
        cited,
        answer,
    }
}

/// True only when the whole answer is one of the two fallback sentences.
/// A grounded answer that quotes either phrase is still substantive.
pub fn is_not_in_context(answer: &str) -> bool {
    let a = answer.trim();
    a == NO_CONTEXT_ANSWER || a == FALLBACK_ANSWER
}

/// Append the disclaimer to a substantive answer, once.
pub fn with_disclaimer(answer: String) -> String {
    if answer.trim().is_empty() || is_not_in_context(&answer) || answer.ends_with(DISCLAIMER_SUFFIX) {
        return answer;
    }
    answer + DISCLAIMER_SUFFIX
}
