use super::diagnostics::InvariantPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest finite timeout accepted at a suspension point: `i32::MAX` milliseconds.
pub const DEFAULT_MAX_WAIT_TIMEOUT: Duration = Duration::from_millis(i32::MAX as u64);

/// Stream replica configuration
///
/// Built with chained setters, or loaded from JSON:
///
/// ```
/// use reliable_stream_core::StreamConfig;
///
/// let config = StreamConfig::from_json_str(
///     r#"{ "trace_type": "partition-7::replica-2", "invariant_policy": "propagate" }"#,
/// ).unwrap();
/// assert_eq!(config.trace_type, "partition-7::replica-2");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Replica tag attached to every tracing span
    pub trace_type: String,

    /// What to do when an invariant breaks
    pub invariant_policy: InvariantPolicy,

    /// Upper bound for a finite timeout passed to any wait
    #[serde(with = "duration_millis")]
    pub max_wait_timeout: Duration,

    /// How long promotion may spend rebuilding streams before recovery is failed
    #[serde(with = "duration_millis")]
    pub recovery_timeout: Duration,
}

impl StreamConfig {
    pub fn new() -> Self {
        Self {
            trace_type: "stream-replica".to_string(),
            invariant_policy: InvariantPolicy::Abort,
            max_wait_timeout: DEFAULT_MAX_WAIT_TIMEOUT,
            recovery_timeout: Duration::from_secs(60),
        }
    }

    /// Set the replica tag
    pub fn trace_type(mut self, trace_type: &str) -> Self {
        self.trace_type = trace_type.to_string();
        self
    }

    /// Set the invariant policy
    pub fn invariant_policy(mut self, policy: InvariantPolicy) -> Self {
        self.invariant_policy = policy;
        self
    }

    /// Set the maximum finite wait
    pub fn max_wait_timeout(mut self, timeout: Duration) -> Self {
        self.max_wait_timeout = timeout;
        self
    }

    /// Set the recovery timeout
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self, String> {
        let config: Self = serde_json::from_str(json).map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.trace_type.trim().is_empty() {
            return Err("trace_type must not be empty".to_string());
        }

        if self.max_wait_timeout.is_zero() {
            return Err("max_wait_timeout must be positive".to_string());
        }

        if self.recovery_timeout > self.max_wait_timeout {
            return Err("recovery_timeout must not exceed max_wait_timeout".to_string());
        }

        Ok(())
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::new()
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
