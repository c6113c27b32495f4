//! Circuit Breaker Pattern
//!
//! Stops calling a responder after repeated failures. Once `failure_threshold`
//! consecutive calls fail, the circuit opens and calls are rejected without a
//! network attempt until `cooldown` elapses. Exactly one trial call is then
//! admitted: success closes the circuit, failure re-opens it with a fresh
//! cooldown.
//!
//! Admission hands out a [`CircuitPermit`]. Dropping a trial permit without
//! recording an outcome (the call was cancelled) counts as a failed trial, so
//! the circuit can never get stuck half-open.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Circuit open - requests are rejected
    Open,
    /// Cooldown elapsed - a single trial request is admitted
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failed calls before the circuit opens
    pub failure_threshold: usize,
    /// Time the circuit stays open before a trial call
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Builder: set failure threshold
    pub fn with_failure_threshold(mut self, threshold: usize) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Builder: set cooldown
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Circuit breaker guarding one responder
pub struct CircuitBreaker {
    key: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed circuit breaker
    pub fn new(key: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            key: key.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current state; an open circuit whose cooldown elapsed reports half-open
    pub fn state(&self) -> CircuitState {
        let inner = self.lock();
        match inner.state {
            CircuitState::Open if self.cooldown_elapsed(&inner) => CircuitState::HalfOpen,
            state => state,
        }
    }

    /// Consecutive failures counted while closed
    pub fn failure_count(&self) -> usize {
        self.lock().consecutive_failures
    }

    fn cooldown_elapsed(&self, inner: &BreakerInner) -> bool {
        inner
            .opened_at
            .is_none_or(|opened_at| opened_at.elapsed() >= self.config.cooldown)
    }

    /// Ask to make a call. `None` means the circuit rejects it.
    pub fn try_acquire(self: &Arc<Self>) -> Option<CircuitPermit> {
        let mut inner = self.lock();
        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open if self.cooldown_elapsed(&inner) => {
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                tracing::info!(responder = %self.key, "Circuit half-open, admitting trial call");
                true
            }
            CircuitState::Open => return None,
            CircuitState::HalfOpen if inner.trial_in_flight => return None,
            CircuitState::HalfOpen => {
                inner.trial_in_flight = true;
                true
            }
        };

        Some(CircuitPermit {
            breaker: Arc::clone(self),
            trial,
            settled: false,
        })
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.lock();
        if trial || inner.state == CircuitState::Closed {
            if inner.state != CircuitState::Closed {
                tracing::info!(responder = %self.key, "Circuit closed");
            }
            inner.state = CircuitState::Closed;
            inner.consecutive_failures = 0;
            inner.opened_at = None;
            inner.trial_in_flight = false;
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.lock();
        if trial {
            self.open(&mut inner);
            return;
        }
        if inner.state == CircuitState::Closed {
            inner.consecutive_failures += 1;
            if inner.consecutive_failures >= self.config.failure_threshold {
                self.open(&mut inner);
            }
        }
    }

    fn open(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.trial_in_flight = false;
        tracing::warn!(
            responder = %self.key,
            failures = inner.consecutive_failures,
            cooldown = ?self.config.cooldown,
            "Circuit opened"
        );
    }

    /// Manually reset the circuit breaker
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("key", &self.key)
            .field("state", &self.state())
            .field("failure_count", &self.failure_count())
            .field("config", &self.config)
            .finish()
    }
}

/// Admission to make one call through a [`CircuitBreaker`]
#[derive(Debug)]
pub struct CircuitPermit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    settled: bool,
}

impl CircuitPermit {
    /// Whether this is the single half-open trial call
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    pub fn record_failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.on_failure(true);
        }
    }
}

/// One breaker per responder key
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Breaker for `key`, created closed on first use
    pub fn get(&self, key: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self
            .breakers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
        {
            return Arc::clone(breaker);
        }

        let mut breakers = self
            .breakers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            breakers
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(key, self.config.clone()))),
        )
    }

    /// State of every breaker created so far, keyed by responder
    pub fn states(&self) -> BTreeMap<String, CircuitState> {
        self.breakers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(key, breaker)| (key.clone(), breaker.state()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: usize) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            "flow",
            CircuitBreakerConfig::default()
                .with_failure_threshold(threshold)
                .with_cooldown(Duration::from_secs(30)),
        ))
    }

    fn fail(cb: &Arc<CircuitBreaker>) {
        cb.try_acquire().unwrap().record_failure();
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_state() {
        let cb = breaker(3);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_consecutive_failures() {
        let cb = breaker(3);
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_count() {
        let cb = breaker(3);
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.failure_count(), 2);
        cb.try_acquire().unwrap().record_success();
        assert_eq!(cb.failure_count(), 0);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_trial_after_cooldown() {
        let cb = breaker(1);
        fail(&cb);
        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(cb.try_acquire().is_none());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        let trial = cb.try_acquire().unwrap();
        assert!(trial.is_trial());
        assert!(cb.try_acquire().is_none());

        trial.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens_with_fresh_cooldown() {
        let cb = breaker(1);
        fail(&cb);
        tokio::time::advance(Duration::from_secs(30)).await;
        cb.try_acquire().unwrap().record_failure();

        assert_eq!(cb.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(cb.try_acquire().is_none());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(cb.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_reopens() {
        let cb = breaker(1);
        fail(&cb);
        tokio::time::advance(Duration::from_secs(30)).await;
        drop(cb.try_acquire().unwrap());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_closed_permit_is_neutral() {
        let cb = breaker(1);
        drop(cb.try_acquire().unwrap());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_success_does_not_close_open_circuit() {
        let cb = breaker(1);
        let slow = cb.try_acquire().unwrap();
        fail(&cb);
        slow.record_success();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_isolates_keys() {
        let registry =
            CircuitBreakerRegistry::new(CircuitBreakerConfig::default().with_failure_threshold(1));
        registry.get("flow").try_acquire().unwrap().record_failure();

        assert!(registry.get("flow").try_acquire().is_none());
        assert!(registry.get("wellness").try_acquire().is_some());
        assert!(Arc::ptr_eq(&registry.get("flow"), &registry.get("flow")));

        let states = registry.states();
        assert_eq!(states.get("flow"), Some(&CircuitState::Open));
        assert_eq!(states.get("wellness"), Some(&CircuitState::Closed));
    }

    #[tokio::test]
    async fn test_reset() {
        let cb = Arc::new(CircuitBreaker::new(
            "flow",
            CircuitBreakerConfig::default().with_failure_threshold(1),
        ));
        cb.try_acquire().unwrap().record_failure();
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
