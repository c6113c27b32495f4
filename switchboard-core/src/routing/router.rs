//! Router: message → responder decision

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::registry::ResponderRegistry;

use super::matcher::KeywordMatcher;

/// How a route was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteMethod {
    /// Caller named the responder
    Explicit,
    /// Keyword scoring picked the responder
    Keyword,
    /// Nothing matched; catch-all responder
    Default,
}

impl std::fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteMethod::Explicit => write!(f, "explicit"),
            RouteMethod::Keyword => write!(f, "keyword"),
            RouteMethod::Default => write!(f, "default"),
        }
    }
}

/// Routing result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    /// Selected responder
    pub responder_key: String,
    /// How it was selected
    pub method: RouteMethod,
    /// Confidence score (0.0 to 1.0)
    pub confidence: f32,
    /// Keywords of the selected responder found in the message
    pub matched_keywords: Vec<String>,
}

impl RouteDecision {
    fn new(
        responder_key: impl Into<String>,
        method: RouteMethod,
        confidence: f32,
        matched_keywords: Vec<String>,
    ) -> Self {
        Self {
            responder_key: responder_key.into(),
            method,
            confidence: confidence.clamp(0.0, 1.0),
            matched_keywords,
        }
    }
}

/// Compiled keyword set of one responder
#[derive(Debug, Clone)]
struct ResponderMatchers {
    key: String,
    matchers: Vec<KeywordMatcher>,
}

impl ResponderMatchers {
    fn matched<'a>(&'a self, message: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.matchers
            .iter()
            .filter(move |m| m.is_match(message))
            .map(|m| m.keyword())
    }
}

/// Deterministic keyword router over a responder registry
pub struct Router {
    registry: Arc<ResponderRegistry>,
    /// In registry (priority) order
    responders: Vec<ResponderMatchers>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("responder_count", &self.responders.len())
            .field("default", &self.registry.default_responder().key)
            .finish()
    }
}

impl Router {
    /// Compile keyword matchers for every registered responder
    pub fn new(registry: Arc<ResponderRegistry>) -> Result<Self> {
        let responders = registry
            .iter()
            .map(|descriptor| {
                let matchers = descriptor
                    .capability_keywords
                    .iter()
                    .map(KeywordMatcher::new)
                    .collect::<Result<Vec<_>>>()?;
                Ok(ResponderMatchers {
                    key: descriptor.key.clone(),
                    matchers,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            registry,
            responders,
        })
    }

    /// The registry this router was built from
    pub fn registry(&self) -> &Arc<ResponderRegistry> {
        &self.registry
    }

    /// Route a message.
    ///
    /// An explicit key that is not registered is ignored here and keyword
    /// scoring applies; callers that must reject unknown keys validate them
    /// against the registry first.
    pub fn route(&self, message: &str, explicit_responder_key: Option<&str>) -> RouteDecision {
        if let Some(key) = explicit_responder_key {
            if self.registry.contains(key) {
                return RouteDecision::new(key, RouteMethod::Explicit, 1.0, Vec::new());
            }
            tracing::warn!(responder = key, "Ignoring unknown explicit responder key");
        }

        // Strictly greater keeps the earlier (lower priority value) responder on ties.
        let mut best: Option<(&ResponderMatchers, Vec<String>)> = None;
        for responder in &self.responders {
            let matched: Vec<String> = responder.matched(message).map(str::to_string).collect();
            if matched.is_empty() {
                continue;
            }
            let better = match &best {
                Some((_, best_matched)) => matched.len() > best_matched.len(),
                None => true,
            };
            if better {
                best = Some((responder, matched));
            }
        }

        match best {
            Some((responder, matched)) => {
                let total = responder.matchers.len().max(1);
                let confidence = matched.len() as f32 / total as f32;
                tracing::debug!(
                    responder = %responder.key,
                    score = matched.len(),
                    "Keyword route selected"
                );
                RouteDecision::new(
                    responder.key.clone(),
                    RouteMethod::Keyword,
                    confidence,
                    matched,
                )
            }
            None => {
                let default = self.registry.default_responder();
                tracing::info!(
                    responder = %default.key,
                    "No capability keyword matched, routing to default responder"
                );
                RouteDecision::new(default.key.clone(), RouteMethod::Default, 0.0, Vec::new())
            }
        }
    }

    /// Per-responder scores, in priority order; useful for intent inspection
    pub fn scores(&self, message: &str) -> Vec<(String, usize)> {
        self.responders
            .iter()
            .map(|r| (r.key.clone(), r.matched(message).count()))
            .collect()
    }
}
