//! Request orchestration
//!
//! Validates a request, routes it, dispatches it through the gateway (one
//! responder, or several in parallel followed by synthesis), falls back to
//! template text when nothing answered, and records the exchange in the
//! session store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{OrchestrationConfig, SwitchboardConfig};
use crate::conversation::{SessionContext, SessionStore};
use crate::error::{Incident, Result, SwitchboardError};
use crate::gateway::{CircuitState, ResponderCallOutcome, ResponderClient, ResponderGateway};
use crate::registry::{ResponderDescriptor, ResponderRegistry};
use crate::routing::{RouteDecision, RouteMethod, Router};

use super::fallback::FallbackTemplateEngine;
use super::request::{
    ClearRequest, ClearResponse, ContributorRole, ContributorSummary, HealthReport,
    IntentAnalysis, KeywordScore, Mode, OrchestrationRequest, OrchestrationResponse, Outcome,
};
use super::state::{RequestState, RequestTrace};
use super::synthesis::{Section, labeled_sections, synthesis_prompt};

/// `responder_used` for an answer merged by labeled concatenation
pub const LABELED_MERGE: &str = "synthesis";

/// Result of the dispatch phase, before persistence
struct Dispatched {
    responder_used: String,
    content: String,
    degraded: bool,
    outcome: Outcome,
    contributors: Vec<ContributorSummary>,
    incidents: Vec<Incident>,
}

/// Entry point for serving requests
pub struct Orchestrator {
    registry: Arc<ResponderRegistry>,
    router: Router,
    gateway: Arc<ResponderGateway>,
    sessions: Arc<SessionStore>,
    fallback: FallbackTemplateEngine,
    config: OrchestrationConfig,
    deadline: Duration,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("responders", &self.registry.len())
            .field("config", &self.config)
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl Orchestrator {
    /// Wire an orchestrator from its parts.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the synthesis responder or a default
    /// subset key is not registered.
    pub fn new(
        registry: Arc<ResponderRegistry>,
        gateway: Arc<ResponderGateway>,
        sessions: Arc<SessionStore>,
        config: OrchestrationConfig,
    ) -> Result<Self> {
        let unknown = |key: &str| {
            SwitchboardError::Configuration(format!(
                "orchestration references unknown responder '{}'",
                key
            ))
        };
        if let Some(key) = &config.synthesis_responder {
            if !registry.contains(key) {
                return Err(unknown(key));
            }
        }
        if let Some(key) = config.default_subset.iter().find(|k| !registry.contains(k)) {
            return Err(unknown(key));
        }

        let router = Router::new(Arc::clone(&registry))?;
        let fallback =
            FallbackTemplateEngine::from_registry(&registry, config.fallback_message_chars);
        let deadline = config.effective_deadline(gateway.config().call_timeout);

        Ok(Self {
            registry,
            router,
            gateway,
            sessions,
            fallback,
            config,
            deadline,
        })
    }

    /// Build the full stack from configuration and a responder client
    pub fn from_config(
        config: &SwitchboardConfig,
        client: Arc<dyn ResponderClient>,
    ) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(ResponderRegistry::from_configs(config.responders.clone())?);
        let gateway = Arc::new(ResponderGateway::new(client, config.gateway.clone()));
        let sessions = Arc::new(SessionStore::new(config.session.clone()));
        Self::new(registry, gateway, sessions, config.orchestration.clone())
    }

    pub fn registry(&self) -> &Arc<ResponderRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn gateway(&self) -> &Arc<ResponderGateway> {
        &self.gateway
    }

    /// Synthesis deadline actually applied
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Start the idle-session sweeper
    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        self.sessions.spawn_sweeper(cancel)
    }

    /// Serve one request.
    ///
    /// Only malformed requests fail; responder failures are absorbed into
    /// fallback content and reported as incidents.
    pub async fn handle(&self, request: OrchestrationRequest) -> Result<OrchestrationResponse> {
        self.validate(&request)?;

        let request_id = Uuid::new_v4();
        let mut trace = RequestTrace::new(request_id);
        tracing::info!(
            %request_id,
            session_id = %request.session_id,
            mode = ?request.mode,
            "Handling request"
        );

        let session = self.sessions.get_or_create(&request.session_id).await;
        let epoch = session.epoch();
        let context = session.context(
            self.sessions.config().context_exchanges,
            self.sessions.config().context_snippet_chars,
        );

        let decision = self
            .router
            .route(&request.message, request.explicit_responder_key.as_deref());
        trace.advance(RequestState::Routed);

        let mut incidents = Vec::new();
        if request.mode == Mode::Single && decision.method == RouteMethod::Default {
            incidents.push(Incident::RoutingDefaulted {
                responder_key: decision.responder_key.clone(),
            });
        }

        trace.advance(RequestState::Dispatched);
        let dispatched = match request.mode {
            Mode::Single => {
                self.dispatch_single(&decision, &context, &request.message, &mut trace)
                    .await
            }
            Mode::Synthesize => {
                let subset = self.resolve_subset(request.responder_subset.as_deref());
                self.dispatch_synthesize(&subset, &context, &request.message, &mut trace)
                    .await
            }
        };
        incidents.extend(dispatched.incidents);
        trace.advance(RequestState::Responded);

        for incident in &incidents {
            tracing::warn!(%request_id, %incident, "Incident");
        }

        self.sessions
            .append_exchange(
                &request.session_id,
                epoch,
                request.message.as_str(),
                dispatched.responder_used.as_str(),
                dispatched.content.as_str(),
            )
            .await;
        trace.advance(RequestState::Persisted);

        tracing::info!(
            %request_id,
            responder = %dispatched.responder_used,
            outcome = ?dispatched.outcome,
            degraded = dispatched.degraded,
            "Request completed"
        );

        Ok(OrchestrationResponse {
            request_id,
            session_id: request.session_id,
            responder_used: dispatched.responder_used,
            method: decision.method,
            matched_keywords: decision.matched_keywords,
            content: dispatched.content,
            degraded: dispatched.degraded,
            outcome: dispatched.outcome,
            contributors: dispatched.contributors,
            incidents,
            timestamp: Utc::now(),
            trace: Some(trace),
        })
    }

    fn validate(&self, request: &OrchestrationRequest) -> Result<()> {
        request.validate()?;
        if let Some(key) = &request.explicit_responder_key {
            self.registry.require(key)?;
        }
        if let Some(subset) = &request.responder_subset {
            for key in subset {
                self.registry.require(key)?;
            }
        }
        Ok(())
    }

    /// Caller subset, else configured default subset, else every responder
    /// except the synthesis responder
    fn resolve_subset(&self, requested: Option<&[String]>) -> Vec<String> {
        let mut subset: Vec<String> = match requested {
            Some(keys) => keys.to_vec(),
            None if !self.config.default_subset.is_empty() => self.config.default_subset.clone(),
            None => self
                .registry
                .iter()
                .filter(|d| Some(&d.key) != self.config.synthesis_responder.as_ref())
                .map(|d| d.key.clone())
                .collect(),
        };
        let mut seen = std::collections::HashSet::new();
        subset.retain(|key| seen.insert(key.clone()));
        if subset.is_empty() {
            // Only the synthesis responder is registered
            subset = self.registry.keys();
        }
        subset
    }

    async fn dispatch_single(
        &self,
        decision: &RouteDecision,
        context: &SessionContext,
        message: &str,
        trace: &mut RequestTrace,
    ) -> Dispatched {
        let key = decision.responder_key.as_str();
        let outcome = self.gateway.call(key, context, message).await;
        trace.advance(RequestState::from_outcomes([&outcome]));

        let contributors = vec![ContributorSummary::from_outcome(
            &outcome,
            self.registry.display_name(key),
            ContributorRole::Responder,
        )];
        let incidents: Vec<Incident> = outcome.incident().into_iter().collect();

        match outcome.content {
            Some(content) => Dispatched {
                responder_used: key.to_string(),
                content,
                degraded: false,
                outcome: Outcome::Complete,
                contributors,
                incidents,
            },
            None => Dispatched {
                responder_used: key.to_string(),
                content: self.fallback.render(key, message),
                degraded: true,
                outcome: Outcome::TotalFailure,
                contributors,
                incidents,
            },
        }
    }

    async fn dispatch_synthesize(
        &self,
        subset: &[String],
        context: &SessionContext,
        message: &str,
        trace: &mut RequestTrace,
    ) -> Dispatched {
        let outcomes = self.fan_out(subset, context, message).await;
        trace.advance(RequestState::from_outcomes(&outcomes));

        let mut contributors: Vec<ContributorSummary> = outcomes
            .iter()
            .map(|o| {
                ContributorSummary::from_outcome(
                    o,
                    self.registry.display_name(&o.responder_key),
                    ContributorRole::Responder,
                )
            })
            .collect();
        let mut incidents: Vec<Incident> = outcomes.iter().filter_map(|o| o.incident()).collect();

        let failed: Vec<String> = outcomes
            .iter()
            .filter(|o| !o.is_success())
            .map(|o| o.responder_key.clone())
            .collect();
        let sections: Vec<Section> = outcomes
            .into_iter()
            .filter_map(|o| {
                let title = self.registry.display_name(&o.responder_key).to_string();
                o.content.map(|content| Section {
                    responder_key: o.responder_key,
                    title,
                    content,
                })
            })
            .collect();

        if sections.is_empty() {
            incidents.push(Incident::OrchestrationTotalFailure {
                attempted: subset.to_vec(),
            });
            return Dispatched {
                responder_used: LABELED_MERGE.to_string(),
                content: self.fallback.render_total_failure(subset, message),
                degraded: true,
                outcome: Outcome::TotalFailure,
                contributors,
                incidents,
            };
        }

        let outcome = if failed.is_empty() {
            Outcome::Complete
        } else {
            incidents.push(Incident::OrchestrationPartialFailure { failed });
            Outcome::PartialFailure
        };

        let (responder_used, content) = match &self.config.synthesis_responder {
            Some(synthesizer) => {
                let prompt = synthesis_prompt(message, &sections);
                let merged = self.gateway.call(synthesizer, context, &prompt).await;
                contributors.push(ContributorSummary::from_outcome(
                    &merged,
                    self.registry.display_name(synthesizer),
                    ContributorRole::Synthesizer,
                ));
                match merged.content {
                    Some(content) => (synthesizer.clone(), content),
                    None => {
                        incidents.extend(merged.incident());
                        tracing::warn!(
                            responder = %synthesizer,
                            "Synthesis responder failed, merging by labeled concatenation"
                        );
                        (LABELED_MERGE.to_string(), labeled_sections(&sections))
                    }
                }
            }
            None => (LABELED_MERGE.to_string(), labeled_sections(&sections)),
        };

        Dispatched {
            responder_used,
            content,
            degraded: false,
            outcome,
            contributors,
            incidents,
        }
    }

    /// Call every responder in `subset` concurrently under the overall
    /// deadline; responders still running at the deadline are cancelled and
    /// reported as timeouts. Outcomes follow `subset` order.
    async fn fan_out(
        &self,
        subset: &[String],
        context: &SessionContext,
        message: &str,
    ) -> Vec<ResponderCallOutcome> {
        let started = Instant::now();
        let mut in_flight: FuturesUnordered<_> = subset
            .iter()
            .map(|key| self.gateway.call(key, context, message))
            .collect();
        let mut finished: HashMap<String, ResponderCallOutcome> = HashMap::new();

        let deadline = tokio::time::sleep(self.deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                next = in_flight.next() => match next {
                    Some(outcome) => {
                        finished.insert(outcome.responder_key.clone(), outcome);
                    }
                    None => break,
                },
                _ = &mut deadline => {
                    tracing::warn!(
                        pending = subset.len() - finished.len(),
                        deadline = ?self.deadline,
                        "Fan-out deadline reached, cancelling remaining responders"
                    );
                    break;
                }
            }
        }
        drop(in_flight);

        subset
            .iter()
            .map(|key| {
                finished.remove(key).unwrap_or_else(|| {
                    ResponderCallOutcome::deadline_exceeded(key, started.elapsed())
                })
            })
            .collect()
    }

    /// Empty a session's history
    pub async fn clear(&self, request: ClearRequest) -> Result<ClearResponse> {
        if request.session_id.trim().is_empty() {
            return Err(SwitchboardError::Validation(
                "session_id must not be blank".to_string(),
            ));
        }
        let cleared = self.sessions.clear(&request.session_id).await;
        Ok(ClearResponse {
            session_id: request.session_id,
            cleared,
        })
    }

    /// Routing decision without dispatch
    pub fn route(&self, message: &str, explicit_responder_key: Option<&str>) -> RouteDecision {
        self.router.route(message, explicit_responder_key)
    }

    /// Routing decision with the keyword score of every responder, without
    /// dispatch
    pub fn analyze(&self, message: &str, explicit_responder_key: Option<&str>) -> IntentAnalysis {
        IntentAnalysis {
            decision: self.route(message, explicit_responder_key),
            scores: self
                .router
                .scores(message)
                .into_iter()
                .map(|(responder_key, score)| KeywordScore {
                    responder_key,
                    score,
                })
                .collect(),
        }
    }

    /// Registered responders in priority order
    pub fn responders(&self) -> Vec<ResponderDescriptor> {
        self.registry.iter().cloned().collect()
    }

    /// Current health
    pub async fn health(&self) -> HealthReport {
        let circuits: std::collections::BTreeMap<String, CircuitState> = self
            .registry
            .iter()
            .map(|d| (d.key.clone(), self.gateway.circuit_state(&d.key)))
            .collect();
        let status = if circuits.values().all(|s| *s == CircuitState::Closed) {
            "ok"
        } else {
            "degraded"
        };

        HealthReport {
            status: status.to_string(),
            responders: self.registry.len(),
            active_sessions: self.sessions.len().await,
            available_call_slots: self.gateway.available_permits(),
            circuits,
        }
    }
}
