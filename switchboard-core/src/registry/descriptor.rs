//! Responder descriptors and their configuration form

use serde::{Deserialize, Serialize};

use crate::error::SwitchboardError;

/// Responder entry as written in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderConfig {
    /// Unique routing key
    pub key: String,

    /// Human-readable name
    pub display_name: String,

    /// Capability keywords matched as whole words
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Tie-break order, lower wins; must be unique
    pub priority: i32,

    /// Receives messages that match no keyword
    #[serde(default)]
    pub is_default_catchall: bool,

    /// What the responder specializes in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Full invoke URL, overriding the client's base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Validated, immutable description of one responder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponderDescriptor {
    pub key: String,
    pub display_name: String,
    /// Lowercased, deduplicated, in declaration order
    pub capability_keywords: Vec<String>,
    pub priority: i32,
    pub is_default_catchall: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl TryFrom<ResponderConfig> for ResponderDescriptor {
    type Error = SwitchboardError;

    fn try_from(config: ResponderConfig) -> Result<Self, Self::Error> {
        let key = config.key.trim().to_string();
        if key.is_empty() {
            return Err(SwitchboardError::Configuration(
                "Responder key must not be blank".to_string(),
            ));
        }

        let mut capability_keywords: Vec<String> = Vec::with_capacity(config.keywords.len());
        for keyword in config.keywords {
            let normalized = keyword.trim().to_lowercase();
            if normalized.is_empty() {
                continue;
            }
            if !capability_keywords.contains(&normalized) {
                capability_keywords.push(normalized);
            }
        }

        let display_name = if config.display_name.trim().is_empty() {
            key.clone()
        } else {
            config.display_name
        };

        Ok(Self {
            key,
            display_name,
            capability_keywords,
            priority: config.priority,
            is_default_catchall: config.is_default_catchall,
            description: config.description,
            endpoint: config.endpoint,
        })
    }
}
