//! Resilient responder calls
//!
//! [`ResponderGateway::call`] wraps one [`ResponderClient`] invocation with,
//! from the outside in:
//!
//! 1. the per-responder circuit breaker (rejects without a network attempt),
//! 2. the per-call timeout, which covers queueing, every attempt and backoff,
//! 3. retries with exponential backoff for transient failures,
//! 4. the global in-flight semaphore, held for one attempt at a time.
//!
//! Every path produces a [`ResponderCallOutcome`]; nothing is raised.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::config::GatewayConfig;
use crate::conversation::SessionContext;
use crate::error::Incident;

use super::circuit_breaker::{CircuitBreakerRegistry, CircuitState};
use super::client::{ResponderClient, ResponderError};

/// Final status of one gateway call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Completed,
    Timeout,
    TransportError,
    RateLimited,
    CircuitOpen,
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallStatus::Completed => write!(f, "completed"),
            CallStatus::Timeout => write!(f, "timeout"),
            CallStatus::TransportError => write!(f, "transport_error"),
            CallStatus::RateLimited => write!(f, "rate_limited"),
            CallStatus::CircuitOpen => write!(f, "circuit_open"),
        }
    }
}

/// Result of one gateway call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponderCallOutcome {
    pub responder_key: String,
    pub status: CallStatus,
    /// Present only when `status` is `completed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(with = "humantime_serde")]
    pub latency: Duration,
    /// Network attempts made, zero when rejected by the circuit or never admitted
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponderCallOutcome {
    fn completed(key: &str, content: String, latency: Duration, attempts: u32) -> Self {
        Self {
            responder_key: key.to_string(),
            status: CallStatus::Completed,
            content: Some(content),
            latency,
            attempts,
            error: None,
        }
    }

    fn failed(
        key: &str,
        status: CallStatus,
        error: impl Into<String>,
        latency: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            responder_key: key.to_string(),
            status,
            content: None,
            latency,
            attempts,
            error: Some(error.into()),
        }
    }

    /// Outcome for a responder that missed the fan-out deadline
    pub fn deadline_exceeded(key: &str, latency: Duration) -> Self {
        Self::failed(key, CallStatus::Timeout, "Fan-out deadline exceeded", latency, 0)
    }

    pub fn is_success(&self) -> bool {
        self.status == CallStatus::Completed
    }

    /// Incident describing a failed call, `None` on success
    pub fn incident(&self) -> Option<Incident> {
        let responder_key = self.responder_key.clone();
        match self.status {
            CallStatus::Completed => None,
            CallStatus::Timeout => Some(Incident::ResponderTimeout { responder_key }),
            CallStatus::TransportError => Some(Incident::ResponderTransportError {
                responder_key,
                detail: self.error.clone().unwrap_or_default(),
            }),
            CallStatus::RateLimited => Some(Incident::ResponderRateLimited { responder_key }),
            CallStatus::CircuitOpen => Some(Incident::CircuitOpen { responder_key }),
        }
    }
}

enum AttemptFailure {
    Responder(ResponderError),
    Panicked(String),
    Closed,
}

/// Timeout, retry, circuit breaking and a global concurrency cap around a
/// [`ResponderClient`]
pub struct ResponderGateway {
    client: Arc<dyn ResponderClient>,
    config: GatewayConfig,
    breakers: CircuitBreakerRegistry,
    in_flight: Arc<Semaphore>,
}

impl std::fmt::Debug for ResponderGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponderGateway")
            .field("config", &self.config)
            .field("breakers", &self.breakers)
            .field("available_permits", &self.in_flight.available_permits())
            .finish()
    }
}

impl ResponderGateway {
    pub fn new(client: Arc<dyn ResponderClient>, config: GatewayConfig) -> Self {
        let in_flight = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        let breakers = CircuitBreakerRegistry::new(config.circuit_breaker.clone());
        Self {
            client,
            config,
            breakers,
            in_flight,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Circuit state per responder called so far
    pub fn circuit_states(&self) -> std::collections::BTreeMap<String, CircuitState> {
        self.breakers.states()
    }

    /// Circuit state of one responder
    pub fn circuit_state(&self, responder_key: &str) -> CircuitState {
        self.breakers.get(responder_key).state()
    }

    /// Free slots under the global in-flight cap
    pub fn available_permits(&self) -> usize {
        self.in_flight.available_permits()
    }

    /// Call a responder once, with timeout, retry and circuit breaking
    pub async fn call(
        &self,
        responder_key: &str,
        context: &SessionContext,
        message: &str,
    ) -> ResponderCallOutcome {
        let started = Instant::now();
        let breaker = self.breakers.get(responder_key);

        let Some(permit) = breaker.try_acquire() else {
            tracing::warn!(responder = responder_key, "Circuit open, call rejected");
            return ResponderCallOutcome::failed(
                responder_key,
                CallStatus::CircuitOpen,
                "Circuit open",
                started.elapsed(),
                0,
            );
        };

        let mut attempts = 0u32;
        let deadline = started + self.config.call_timeout;
        let result = tokio::time::timeout_at(
            deadline,
            self.attempt_with_retry(responder_key, context, message, deadline, &mut attempts),
        )
        .await;
        let latency = started.elapsed();

        let outcome = match result {
            Ok(Ok(content)) => {
                permit.record_success();
                tracing::debug!(
                    responder = responder_key,
                    attempts,
                    ?latency,
                    "Responder call completed"
                );
                return ResponderCallOutcome::completed(responder_key, content, latency, attempts);
            }
            Err(_elapsed) => ResponderCallOutcome::failed(
                responder_key,
                CallStatus::Timeout,
                format!("No answer within {:?}", self.config.call_timeout),
                latency,
                attempts,
            ),
            Ok(Err(AttemptFailure::Responder(err))) => {
                let status = match &err {
                    ResponderError::Timeout => CallStatus::Timeout,
                    ResponderError::RateLimited { .. } => CallStatus::RateLimited,
                    ResponderError::Transport(_) | ResponderError::Rejected(_) => {
                        CallStatus::TransportError
                    }
                };
                ResponderCallOutcome::failed(
                    responder_key,
                    status,
                    err.to_string(),
                    latency,
                    attempts,
                )
            }
            Ok(Err(AttemptFailure::Panicked(detail))) => ResponderCallOutcome::failed(
                responder_key,
                CallStatus::TransportError,
                format!("Responder client panicked: {}", detail),
                latency,
                attempts,
            ),
            Ok(Err(AttemptFailure::Closed)) => ResponderCallOutcome::failed(
                responder_key,
                CallStatus::TransportError,
                "Gateway is shutting down",
                latency,
                attempts,
            ),
        };

        if attempts > 0 {
            permit.record_failure();
        } else {
            drop(permit);
        }

        tracing::warn!(
            responder = responder_key,
            status = %outcome.status,
            attempts,
            ?latency,
            error = outcome.error.as_deref().unwrap_or_default(),
            "Responder call failed"
        );
        outcome
    }

    async fn attempt_with_retry(
        &self,
        responder_key: &str,
        context: &SessionContext,
        message: &str,
        deadline: Instant,
        attempts: &mut u32,
    ) -> Result<String, AttemptFailure> {
        let retry = &self.config.retry;
        loop {
            let slot = self
                .in_flight
                .acquire()
                .await
                .map_err(|_| AttemptFailure::Closed)?;
            *attempts += 1;

            let result = AssertUnwindSafe(self.client.invoke(responder_key, context, message))
                .catch_unwind()
                .await;
            drop(slot);

            let err = match result {
                Ok(Ok(content)) => return Ok(content),
                Ok(Err(err)) => err,
                Err(panic) => return Err(AttemptFailure::Panicked(panic_message(panic.as_ref()))),
            };

            let made = *attempts as usize;
            if !err.is_transient() || made >= retry.max_attempts {
                return Err(AttemptFailure::Responder(err));
            }

            let delay = retry.delay_with_floor(made - 1, err.retry_after());
            if Instant::now() + delay >= deadline {
                tracing::debug!(
                    responder = responder_key,
                    attempt = made,
                    error = %err,
                    ?delay,
                    "Retry delay exceeds the call budget, giving up"
                );
                return Err(AttemptFailure::Responder(err));
            }
            tracing::debug!(
                responder = responder_key,
                attempt = made,
                error = %err,
                ?delay,
                "Retrying responder call"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{CircuitBreakerConfig, RetryConfig, ScriptStep, ScriptedResponderClient};

    fn config() -> GatewayConfig {
        GatewayConfig {
            call_timeout: Duration::from_secs(30),
            max_in_flight: 50,
            retry: RetryConfig::default()
                .with_max_attempts(3)
                .with_initial_delay(Duration::from_millis(100))
                .with_jitter(false),
            circuit_breaker: CircuitBreakerConfig::default()
                .with_failure_threshold(3)
                .with_cooldown(Duration::from_secs(60)),
        }
    }

    fn gateway(client: Arc<ScriptedResponderClient>, config: GatewayConfig) -> ResponderGateway {
        ResponderGateway::new(client, config)
    }

    fn ctx() -> SessionContext {
        SessionContext::empty("s1")
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_call() {
        let client = Arc::new(ScriptedResponderClient::new().with_reply("flow", "WIP is high"));
        let outcome = gateway(client, config()).call("flow", &ctx(), "status?").await;

        assert_eq!(outcome.status, CallStatus::Completed);
        assert_eq!(outcome.content.as_deref(), Some("WIP is high"));
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.incident().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let client = Arc::new(ScriptedResponderClient::new().with_reply("flow", "ok"));
        client.push("flow", ScriptStep::Fail(ResponderError::Transport("reset".into())));
        client.push("flow", ScriptStep::Fail(ResponderError::Transport("reset".into())));

        let outcome = gateway(client.clone(), config()).call("flow", &ctx(), "hi").await;
        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(client.calls_to("flow"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_is_not_retried() {
        let client = Arc::new(ScriptedResponderClient::new().with_step(
            "flow",
            ScriptStep::Fail(ResponderError::Rejected("HTTP 400".into())),
        ));

        let outcome = gateway(client.clone(), config()).call("flow", &ctx(), "hi").await;
        assert_eq!(outcome.status, CallStatus::TransportError);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(client.calls_to("flow"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_honors_retry_after() {
        let client = Arc::new(ScriptedResponderClient::new().with_reply("flow", "ok"));
        client.push(
            "flow",
            ScriptStep::Fail(ResponderError::RateLimited {
                retry_after: Some(Duration::from_secs(5)),
            }),
        );

        let started = Instant::now();
        let outcome = gateway(client, config()).call("flow", &ctx(), "hi").await;
        assert!(outcome.is_success());
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_beyond_budget_fails_fast() {
        let client = Arc::new(ScriptedResponderClient::new().with_reply("flow", "ok"));
        client.push(
            "flow",
            ScriptStep::Fail(ResponderError::RateLimited {
                retry_after: Some(Duration::from_secs(3600)),
            }),
        );

        let started = Instant::now();
        let outcome = gateway(client.clone(), config()).call("flow", &ctx(), "hi").await;
        assert_eq!(outcome.status, CallStatus::RateLimited);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(client.calls_to("flow"), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(matches!(
            outcome.incident(),
            Some(Incident::ResponderRateLimited { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_rate_limit_reports_rate_limited() {
        let client = Arc::new(ScriptedResponderClient::new().with_step(
            "flow",
            ScriptStep::Fail(ResponderError::RateLimited { retry_after: None }),
        ));

        let outcome = gateway(client, config()).call("flow", &ctx(), "hi").await;
        assert_eq!(outcome.status, CallStatus::RateLimited);
        assert_eq!(outcome.attempts, 3);
        assert!(matches!(
            outcome.incident(),
            Some(Incident::ResponderRateLimited { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_hanging_call() {
        let client = Arc::new(ScriptedResponderClient::new().with_step("flow", ScriptStep::Hang));
        let mut config = config();
        config.call_timeout = Duration::from_secs(2);
        let gateway = gateway(client, config);

        let started = Instant::now();
        let outcome = gateway.call("flow", &ctx(), "hi").await;
        assert_eq!(outcome.status, CallStatus::Timeout);
        assert_eq!(outcome.attempts, 1);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(gateway.available_permits(), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opens_after_threshold() {
        let client = Arc::new(ScriptedResponderClient::new().with_step(
            "flow",
            ScriptStep::Fail(ResponderError::Rejected("down".into())),
        ));
        let gateway = gateway(client.clone(), config());

        for _ in 0..3 {
            let outcome = gateway.call("flow", &ctx(), "hi").await;
            assert_eq!(outcome.status, CallStatus::TransportError);
        }
        assert_eq!(client.calls_to("flow"), 3);

        let outcome = gateway.call("flow", &ctx(), "hi").await;
        assert_eq!(outcome.status, CallStatus::CircuitOpen);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(client.calls_to("flow"), 3);
        assert_eq!(gateway.circuit_state("flow"), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_after_cooldown_closes_circuit() {
        let client = Arc::new(ScriptedResponderClient::new().with_step(
            "flow",
            ScriptStep::Fail(ResponderError::Rejected("down".into())),
        ));
        let gateway = gateway(client.clone(), config());
        for _ in 0..3 {
            gateway.call("flow", &ctx(), "hi").await;
        }

        tokio::time::advance(Duration::from_secs(60)).await;
        client.set_step("flow", ScriptStep::reply("back"));

        let outcome = gateway.call("flow", &ctx(), "hi").await;
        assert!(outcome.is_success());
        assert_eq!(gateway.circuit_state("flow"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_is_reported_as_transport_error() {
        let client = Arc::new(
            ScriptedResponderClient::new().with_step("flow", ScriptStep::Panic("boom".into())),
        );
        let outcome = gateway(client, config()).call("flow", &ctx(), "hi").await;

        assert_eq!(outcome.status, CallStatus::TransportError);
        assert!(outcome.error.unwrap().contains("boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_cap_queues_calls() {
        let client = Arc::new(
            ScriptedResponderClient::new()
                .with_step(
                    "flow",
                    ScriptStep::delayed(Duration::from_secs(10), ScriptStep::reply("slow")),
                )
                .with_reply("wellness", "fast"),
        );
        let mut config = config();
        config.max_in_flight = 1;
        config.call_timeout = Duration::from_secs(15);
        let gateway = Arc::new(gateway(client, config));

        let first = {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move { gateway.call("flow", &SessionContext::empty("a"), "1").await })
        };
        tokio::task::yield_now().await;
        let second = gateway.call("wellness", &SessionContext::empty("b"), "2").await;

        assert!(second.is_success());
        assert!(second.latency >= Duration::from_secs(10));
        assert!(first.await.unwrap().is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_wait_counts_against_timeout() {
        let client = Arc::new(ScriptedResponderClient::new());
        let mut config = config();
        config.max_in_flight = 1;
        config.call_timeout = Duration::from_secs(2);
        let gateway = gateway(client.clone(), config);

        let _held = Arc::clone(&gateway.in_flight).acquire_owned().await.unwrap();
        let outcome = gateway.call("flow", &ctx(), "hi").await;

        assert_eq!(outcome.status, CallStatus::Timeout);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(client.calls_to("flow"), 0);
        assert_eq!(gateway.breakers.get("flow").failure_count(), 0);
    }
}
