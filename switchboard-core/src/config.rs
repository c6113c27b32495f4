//! Configuration types for Switchboard

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, SwitchboardError};
use crate::gateway::{CircuitBreakerConfig, HttpClientConfig, RetryConfig};
use crate::registry::ResponderConfig;

/// Main configuration for Switchboard
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SwitchboardConfig {
    /// Session store configuration
    pub session: SessionConfig,

    /// Responder gateway configuration
    pub gateway: GatewayConfig,

    /// Orchestration configuration
    pub orchestration: OrchestrationConfig,

    /// HTTP responder client configuration
    pub client: HttpClientConfig,

    /// Responder catalog, in declaration order
    pub responders: Vec<ResponderConfig>,
}

/// Session store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum retained exchanges (W); a session keeps at most 2×W turns
    pub window_exchanges: usize,

    /// Sessions idle for longer than this are evicted by the sweeper
    #[serde(with = "humantime_serde")]
    pub idle_ttl: Duration,

    /// How often the background sweeper runs
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Number of recent exchanges handed to responders as context
    pub context_exchanges: usize,

    /// Responder turns longer than this are truncated in the context preamble
    pub context_snippet_chars: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            window_exchanges: 10,
            idle_ttl: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(10 * 60),
            context_exchanges: 5,
            context_snippet_chars: 500,
        }
    }
}

/// Responder gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Timeout for one gateway call, covering every retry attempt
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,

    /// Global cap on in-flight responder calls across all requests
    pub max_in_flight: usize,

    /// Retry policy for transient failures
    pub retry: RetryConfig,

    /// Per-responder circuit breaker policy
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            max_in_flight: 50,
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Deadline for a synthesize fan-out; never shorter than the gateway call timeout
    #[serde(with = "humantime_serde")]
    pub overall_deadline: Duration,

    /// Responder that merges fan-out results; labeled concatenation when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis_responder: Option<String>,

    /// Responders consulted in synthesize mode when the caller gives no subset
    pub default_subset: Vec<String>,

    /// Maximum characters of the user message quoted in fallback text
    pub fallback_message_chars: usize,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            overall_deadline: Duration::from_secs(35),
            synthesis_responder: None,
            default_subset: Vec::new(),
            fallback_message_chars: 200,
        }
    }
}

impl OrchestrationConfig {
    /// Fan-out deadline actually applied: never shorter than `call_timeout`,
    /// so a responder always gets its full call budget
    pub fn effective_deadline(&self, call_timeout: Duration) -> Duration {
        self.overall_deadline.max(call_timeout)
    }
}

impl SwitchboardConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. Configuration file (switchboard.toml)
    /// 3. File named by `SWITCHBOARD_CONFIG_PATH`
    /// 4. `SWITCHBOARD_` environment overrides, `__` separating nested keys
    ///    (e.g. `SWITCHBOARD_GATEWAY__MAX_IN_FLIGHT=20`)
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is invalid or validation fails.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(SwitchboardConfig::default()))
            .merge(Toml::file("switchboard.toml"));

        if let Ok(path) = std::env::var("SWITCHBOARD_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(
            Env::prefixed("SWITCHBOARD_")
                .ignore(&["CONFIG_PATH"])
                .split("__"),
        );

        let config: SwitchboardConfig = figment.extract().map_err(|e| {
            SwitchboardError::Configuration(format!("Failed to load configuration: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let path = path.as_ref();
        if !path.exists() {
            return Err(SwitchboardError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let config: SwitchboardConfig =
            Figment::from(Serialized::defaults(SwitchboardConfig::default()))
                .merge(Toml::file(path))
                .extract()
                .map_err(|e| {
                    SwitchboardError::Configuration(format!(
                        "Failed to load configuration file: {}",
                        e
                    ))
                })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Registry-level rules (unique keys, one default) are checked when the
    /// registry is built; this covers the numeric knobs.
    pub fn validate(&self) -> Result<()> {
        if self.session.window_exchanges == 0 {
            return Err(SwitchboardError::Configuration(
                "session.window_exchanges must be at least 1".to_string(),
            ));
        }
        if self.session.sweep_interval.is_zero() {
            return Err(SwitchboardError::Configuration(
                "session.sweep_interval must be non-zero".to_string(),
            ));
        }
        if self.gateway.max_in_flight == 0 {
            return Err(SwitchboardError::Configuration(
                "gateway.max_in_flight must be at least 1".to_string(),
            ));
        }
        if self.gateway.call_timeout.is_zero() {
            return Err(SwitchboardError::Configuration(
                "gateway.call_timeout must be non-zero".to_string(),
            ));
        }
        if self.gateway.retry.max_attempts == 0 {
            return Err(SwitchboardError::Configuration(
                "gateway.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.gateway.circuit_breaker.failure_threshold == 0 {
            return Err(SwitchboardError::Configuration(
                "gateway.circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
