//! Whole-word keyword matching

use regex::Regex;

use crate::error::{Result, SwitchboardError};

/// Compiled whole-word, case-insensitive matcher for one keyword.
///
/// Multi-word keywords ("cycle time") tolerate any run of whitespace between
/// their words. A keyword only matches when bordered by a non-word character
/// or the ends of the message, so "stress" does not match "stressful".
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    keyword: String,
    pattern: Regex,
}

impl KeywordMatcher {
    /// Compile a matcher for `keyword`
    pub fn new(keyword: impl Into<String>) -> Result<Self> {
        let keyword = keyword.into();
        let body = keyword
            .split_whitespace()
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(r"\s+");

        let pattern = Regex::new(&format!(r"(?i)(?:^|[^\w]){}(?:[^\w]|$)", body)).map_err(
            |e| {
                SwitchboardError::Configuration(format!(
                    "Invalid keyword '{}': {}",
                    keyword, e
                ))
            },
        )?;

        Ok(Self { keyword, pattern })
    }

    /// The keyword this matcher was built from
    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// Whether the keyword occurs as a whole word in `text`
    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}
