//! Responder Registry
//!
//! Static catalog of the specialist responders a message can be routed to.
//! The registry is built once from configuration, validated, and then shared
//! read-only (usually behind an `Arc`) by the router, the gateway and the
//! orchestrator.
//!
//! Validation rules:
//!
//! - at least one responder
//! - keys are unique and non-blank
//! - priorities are unique, so `priority` is a total order for tie-breaking
//! - exactly one responder is the default catch-all

mod descriptor;

pub use descriptor::{ResponderConfig, ResponderDescriptor};

use std::collections::HashMap;

use crate::error::{Result, SwitchboardError};

/// Read-only catalog of responders, ordered by priority
#[derive(Debug, Clone)]
pub struct ResponderRegistry {
    /// Descriptors sorted by ascending priority
    descriptors: Vec<ResponderDescriptor>,
    /// Key to position in `descriptors`
    index: HashMap<String, usize>,
    /// Position of the default catch-all
    default_index: usize,
}

impl ResponderRegistry {
    /// Build and validate a registry from configuration entries
    pub fn from_configs(configs: Vec<ResponderConfig>) -> Result<Self> {
        let descriptors = configs
            .into_iter()
            .map(ResponderDescriptor::try_from)
            .collect::<Result<Vec<_>>>()?;
        Self::new(descriptors)
    }

    /// Build and validate a registry from descriptors
    pub fn new(mut descriptors: Vec<ResponderDescriptor>) -> Result<Self> {
        if descriptors.is_empty() {
            return Err(SwitchboardError::Configuration(
                "Responder registry must contain at least one responder".to_string(),
            ));
        }

        let defaults: Vec<&str> = descriptors
            .iter()
            .filter(|d| d.is_default_catchall)
            .map(|d| d.key.as_str())
            .collect();
        if defaults.len() != 1 {
            return Err(SwitchboardError::Configuration(format!(
                "Exactly one responder must be the default catch-all, found {}: {:?}",
                defaults.len(),
                defaults
            )));
        }

        descriptors.sort_by_key(|d| d.priority);

        for pair in descriptors.windows(2) {
            if pair[0].priority == pair[1].priority {
                return Err(SwitchboardError::Configuration(format!(
                    "Responders '{}' and '{}' share priority {}",
                    pair[0].key, pair[1].key, pair[0].priority
                )));
            }
        }

        let mut index = HashMap::with_capacity(descriptors.len());
        for (position, descriptor) in descriptors.iter().enumerate() {
            if index.insert(descriptor.key.clone(), position).is_some() {
                return Err(SwitchboardError::Configuration(format!(
                    "Duplicate responder key: {}",
                    descriptor.key
                )));
            }
        }

        let default_index = descriptors
            .iter()
            .position(|d| d.is_default_catchall)
            .ok_or_else(|| {
                SwitchboardError::Configuration("Default responder missing".to_string())
            })?;

        Ok(Self {
            descriptors,
            index,
            default_index,
        })
    }

    /// Look up a responder by key
    pub fn get(&self, key: &str) -> Option<&ResponderDescriptor> {
        self.index.get(key).map(|&i| &self.descriptors[i])
    }

    /// Check whether a key is registered
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Look up a responder, failing with a caller-visible error when unknown
    pub fn require(&self, key: &str) -> Result<&ResponderDescriptor> {
        self.get(key)
            .ok_or_else(|| SwitchboardError::UnknownResponder(key.to_string()))
    }

    /// The default catch-all responder
    pub fn default_responder(&self) -> &ResponderDescriptor {
        &self.descriptors[self.default_index]
    }

    /// All responders in priority order
    pub fn iter(&self) -> impl Iterator<Item = &ResponderDescriptor> {
        self.descriptors.iter()
    }

    /// All keys in priority order
    pub fn keys(&self) -> Vec<String> {
        self.descriptors.iter().map(|d| d.key.clone()).collect()
    }

    /// Number of registered responders
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the registry is empty (never true for a validated registry)
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Human-readable name for a key, falling back to the key itself
    pub fn display_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.get(key).map(|d| d.display_name.as_str()).unwrap_or(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(key: &str, priority: i32, keywords: &[&str], default: bool) -> ResponderConfig {
        ResponderConfig {
            key: key.to_string(),
            display_name: key.to_uppercase(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            priority,
            is_default_catchall: default,
            description: None,
            endpoint: None,
        }
    }

    #[test]
    fn test_registry_sorted_by_priority() {
        let registry = ResponderRegistry::from_configs(vec![
            config("wellness", 2, &["stress"], false),
            config("coaching", 9, &[], true),
            config("flow", 1, &["velocity"], false),
        ])
        .unwrap();

        assert_eq!(registry.keys(), vec!["flow", "wellness", "coaching"]);
        assert_eq!(registry.default_responder().key, "coaching");
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.display_name("flow"), "FLOW");
        assert_eq!(registry.display_name("ghost"), "ghost");
    }

    #[test]
    fn test_registry_requires_single_default() {
        let none = ResponderRegistry::from_configs(vec![config("flow", 1, &[], false)]);
        assert!(matches!(none, Err(SwitchboardError::Configuration(_))));

        let two = ResponderRegistry::from_configs(vec![
            config("flow", 1, &[], true),
            config("coaching", 2, &[], true),
        ]);
        assert!(matches!(two, Err(SwitchboardError::Configuration(_))));
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let dup_key = ResponderRegistry::from_configs(vec![
            config("flow", 1, &[], false),
            config("flow", 2, &[], true),
        ]);
        assert!(dup_key.is_err());

        let dup_priority = ResponderRegistry::from_configs(vec![
            config("flow", 1, &[], false),
            config("coaching", 1, &[], true),
        ]);
        assert!(dup_priority.is_err());
    }

    #[test]
    fn test_registry_rejects_empty() {
        assert!(ResponderRegistry::from_configs(Vec::new()).is_err());
    }

    #[test]
    fn test_require_unknown_is_validation_error() {
        let registry =
            ResponderRegistry::from_configs(vec![config("coaching", 1, &[], true)]).unwrap();
        let err = registry.require("ghost").unwrap_err();
        assert!(err.is_validation());
        assert!(registry.require("coaching").is_ok());
    }
}
