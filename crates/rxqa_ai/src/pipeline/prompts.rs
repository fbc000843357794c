use rxqa_core::domain::{RetrievedContext, Section};

pub const ANSWER_SYSTEM: &str = r#"You answer only from the CONTEXT, which comes from FDA drug labels (SPL).
Every factual statement must include a citation: [Section: <name>] (<url>#section=<id>).
If the answer is not in CONTEXT, say: "Not in the label context provided."
Keep answers concise; list key numbers (dose, interval, adjustments) first."#;

pub fn intent_system_prompt() -> String {
    let sections = Section::VOCABULARY
        .iter()
        .map(|s| format!("- {s}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"Extract the drug name (if any) and map the question to relevant FDA label sections.

Valid sections:
{sections}

Return JSON: {{"drug": "<name or null>", "sections": ["<section>"]}}.
If unclear, return all sections."#
    )
}

pub fn intent_user_prompt(query: &str) -> String {
    format!("Question: {query}")
}

/// Question plus the numbered context block, one entry per context with
/// its section, text and the citation the model must reproduce.
pub fn answer_user_prompt(query: &str, contexts: &[RetrievedContext]) -> String {
    let blocks = contexts
        .iter()
        .enumerate()
        .map(|(i, c)| {
            format!(
                "[{}] Section: {}\n{}\nCitation: {}",
                i + 1,
                c.section,
                c.text,
                c.citation()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");
    let context = if blocks.is_empty() {
        "(No context provided)".to_string()
    } else {
        blocks
    };
    format!(
        "Question: {query}\n\nCONTEXT (≤{count} chunks):\n{context}\n\nAnswer:",
        count = contexts.len()
    )
}
