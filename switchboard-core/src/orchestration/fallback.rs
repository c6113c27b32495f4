//! Degraded answers produced without any network call

use std::collections::HashMap;

use crate::conversation::truncate_chars;
use crate::registry::ResponderRegistry;

const GENERIC_GUIDANCE: &str = "The specialist could not be reached right now. \
Try again in a moment, or rephrase the request so another specialist can pick it up.";

#[derive(Debug, Clone)]
struct FallbackTemplate {
    title: String,
    guidance: String,
}

/// Pure template engine for fallback text. Never fails, never performs I/O.
#[derive(Debug, Clone)]
pub struct FallbackTemplateEngine {
    templates: HashMap<String, FallbackTemplate>,
    message_chars: usize,
}

impl FallbackTemplateEngine {
    /// Engine with no responder-specific templates
    pub fn new(message_chars: usize) -> Self {
        Self {
            templates: HashMap::new(),
            message_chars,
        }
    }

    /// Engine with one template per registered responder, using its display
    /// name and description
    pub fn from_registry(registry: &ResponderRegistry, message_chars: usize) -> Self {
        let mut engine = Self::new(message_chars);
        for descriptor in registry.iter() {
            let guidance = match &descriptor.description {
                Some(description) => format!(
                    "{} is temporarily unavailable. It normally helps with: {}",
                    descriptor.display_name, description
                ),
                None => GENERIC_GUIDANCE.to_string(),
            };
            engine = engine.with_template(&descriptor.key, &descriptor.display_name, guidance);
        }
        engine
    }

    /// Builder: template for one responder
    pub fn with_template(
        mut self,
        responder_key: impl Into<String>,
        title: impl Into<String>,
        guidance: impl Into<String>,
    ) -> Self {
        self.templates.insert(
            responder_key.into(),
            FallbackTemplate {
                title: title.into(),
                guidance: guidance.into(),
            },
        );
        self
    }

    /// Fallback for a single responder
    pub fn render(&self, responder_key: &str, message: &str) -> String {
        let quoted = truncate_chars(message.trim(), self.message_chars);
        let (title, guidance) = match self.templates.get(responder_key) {
            Some(template) => (template.title.as_str(), template.guidance.as_str()),
            None => (responder_key, GENERIC_GUIDANCE),
        };

        format!(
            "**{} (fallback)**\n\nBased on your request: \"{}\"\n\n{}\n\n\
             *This is a fallback response; the specialist's full answer was not available.*",
            title, quoted, guidance
        )
    }

    /// Fallback when every responder in a fan-out failed
    pub fn render_total_failure(&self, responder_keys: &[String], message: &str) -> String {
        let quoted = truncate_chars(message.trim(), self.message_chars);
        let names: Vec<&str> = responder_keys
            .iter()
            .map(|key| {
                self.templates
                    .get(key)
                    .map(|t| t.title.as_str())
                    .unwrap_or(key.as_str())
            })
            .collect();
        let consulted = if names.is_empty() {
            "No specialists".to_string()
        } else {
            names.join(", ")
        };

        format!(
            "**Combined answer unavailable (fallback)**\n\nBased on your request: \"{}\"\n\n\
             {} could not be reached, so no combined answer could be produced. \
             Try again shortly, or ask a single specialist directly.\n\n\
             *This is a fallback response.*",
            quoted, consulted
        )
    }
}
