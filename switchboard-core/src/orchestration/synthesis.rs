//! Merging fan-out answers

/// One responder's contribution to a merged answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub responder_key: String,
    pub title: String,
    pub content: String,
}

/// Labeled concatenation of every section, in order
pub fn labeled_sections(sections: &[Section]) -> String {
    sections
        .iter()
        .map(|s| format!("## {}\n\n{}", s.title, s.content.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Message handed to the synthesis responder
pub fn synthesis_prompt(message: &str, sections: &[Section]) -> String {
    format!(
        "Combine the specialist answers below into a single, coherent answer to the user's \
         request. Keep concrete recommendations, resolve contradictions, and do not mention \
         that several specialists were consulted.\n\n\
         User request: {}\n\n{}",
        message.trim(),
        labeled_sections(sections)
    )
}
