// Per-channel configuration: endpoints, quotas, timeouts, resilience policy and capabilities

use std::{
    collections::BTreeMap,
    fmt,
    hash::{Hash, Hasher},
    time::Duration,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::{
    error::{ChannelError, Result},
    types::ChannelKind,
};

pub const REDACTED: &str = "[REDACTED]";

// Opaque credential map. Each adapter turns it into its own typed struct.
// Debug and Serialize never expose the values.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials(BTreeMap<String, String>);

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        match self.get(key) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(ChannelError::validation(
                format!("credentials.{key}"),
                format!("Missing credential: {key}"),
            )),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    // Hash of the exact credential set. Keys are already sorted so equal maps
    // hash equally regardless of insert order. Collisions are possible, so
    // callers compare the credentials themselves before treating two sets as one.
    pub fn fingerprint(&self) -> String {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.0.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    pub fn redacted(&self) -> BTreeMap<String, String> {
        self.0
            .keys()
            .map(|k| (k.clone(), REDACTED.to_string()))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Credentials {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.keys().map(|k| (k, REDACTED)))
            .finish()
    }
}

impl Serialize for Credentials {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.redacted().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Credentials {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        BTreeMap::<String, String>::deserialize(deserializer).map(Self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub production: String,
    pub sandbox: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub requests_per_hour: Option<u32>,
    // 0 falls back to requests_per_minute
    pub burst_limit: u32,
    pub burst_window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            requests_per_hour: Some(3000),
            burst_limit: 0,
            burst_window_ms: 10_000,
        }
    }
}

impl RateLimitConfig {
    pub fn effective_burst(&self) -> u32 {
        if self.burst_limit == 0 {
            self.requests_per_minute
        } else {
            self.burst_limit
        }
    }

    pub fn burst_window(&self) -> Duration {
        Duration::from_millis(self.burst_window_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connection_ms: u64,
    pub request_ms: u64,
    // Ceiling on any single backoff delay
    pub retry_ceiling_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connection_ms: 10_000,
            request_ms: 30_000,
            retry_ceiling_ms: 30_000,
        }
    }
}

impl TimeoutConfig {
    pub fn connection(&self) -> Duration {
        Duration::from_millis(self.connection_ms)
    }

    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    // Fraction of failed calls in the window, 0.0..=1.0
    pub failure_rate_threshold: f64,
    pub minimum_calls: u32,
    pub monitoring_window_ms: u64,
    pub reset_timeout_ms: u64,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            minimum_calls: 5,
            monitoring_window_ms: 60_000,
            reset_timeout_ms: 30_000,
            success_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelCapabilities {
    pub supports_inventory_sync: bool,
    pub supports_pricing_sync: bool,
    pub supports_webhooks: bool,
    pub supports_booking_modifications: bool,
    pub supports_cancellations: bool,
}

impl Default for ChannelCapabilities {
    fn default() -> Self {
        Self {
            supports_inventory_sync: true,
            supports_pricing_sync: true,
            supports_webhooks: false,
            supports_booking_modifications: true,
            supports_cancellations: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channel: ChannelKind,
    pub display_name: String,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub endpoints: Endpoints,
    #[serde(default)]
    pub use_sandbox: bool,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    #[serde(default)]
    pub capabilities: ChannelCapabilities,
    #[serde(default)]
    pub settings: serde_json::Map<String, Value>,
}

impl ChannelConfig {
    // Built-in defaults for a supported channel, without credentials
    pub fn defaults_for(channel: ChannelKind) -> Self {
        let (endpoints, api_version, rate_limits, capabilities) = match channel {
            ChannelKind::BookingCom => (
                Endpoints {
                    production: "https://supply-xml.booking.com".into(),
                    sandbox: "https://supply-xml-sandbox.booking.com".into(),
                },
                "1.0",
                RateLimitConfig {
                    requests_per_minute: 60,
                    requests_per_hour: Some(3_000),
                    burst_limit: 10,
                    burst_window_ms: 10_000,
                },
                ChannelCapabilities {
                    supports_inventory_sync: true,
                    supports_pricing_sync: true,
                    supports_webhooks: false,
                    supports_booking_modifications: false,
                    supports_cancellations: true,
                },
            ),
            ChannelKind::MakeMyTrip => (
                Endpoints {
                    production: "https://partners.makemytrip.com/api".into(),
                    sandbox: "https://partners-sandbox.makemytrip.com/api".into(),
                },
                "v1",
                RateLimitConfig {
                    requests_per_minute: 100,
                    requests_per_hour: Some(5_000),
                    burst_limit: 20,
                    burst_window_ms: 10_000,
                },
                ChannelCapabilities {
                    supports_inventory_sync: true,
                    supports_pricing_sync: true,
                    supports_webhooks: true,
                    supports_booking_modifications: true,
                    supports_cancellations: true,
                },
            ),
            ChannelKind::Oyo => (
                Endpoints {
                    production: "https://partners.oyorooms.com".into(),
                    sandbox: "https://partners-sandbox.oyorooms.com".into(),
                },
                "v2",
                RateLimitConfig {
                    requests_per_minute: 120,
                    requests_per_hour: Some(6_000),
                    burst_limit: 20,
                    burst_window_ms: 10_000,
                },
                ChannelCapabilities {
                    supports_inventory_sync: true,
                    supports_pricing_sync: true,
                    supports_webhooks: true,
                    supports_booking_modifications: true,
                    supports_cancellations: true,
                },
            ),
        };

        Self {
            channel,
            display_name: channel.display_name().to_string(),
            credentials: Credentials::default(),
            endpoints,
            use_sandbox: false,
            api_version: api_version.to_string(),
            rate_limits,
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            circuit_breaker: Some(CircuitBreakerConfig::default()),
            capabilities,
            settings: serde_json::Map::new(),
        }
    }

    // Deep-merges each override onto the channel defaults, in order. The
    // caller's credentials always win over anything in the overrides.
    pub fn merged(
        channel: ChannelKind,
        credentials: Credentials,
        overrides: &[&Value],
    ) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::defaults_for(channel))
            .map_err(|e| ChannelError::validation("config", e.to_string()))?;

        for overlay in overrides {
            if !overlay.is_null() && !overlay.is_object() {
                return Err(ChannelError::validation(
                    "config",
                    "Channel config override must be a JSON object",
                ));
            }
            merge_json(&mut merged, overlay);
        }

        if let Value::Object(map) = &mut merged {
            // identity and credentials are not overridable
            map.insert("channel".into(), Value::String(channel.as_str().into()));
            map.remove("credentials");
        }

        let mut config: ChannelConfig = serde_json::from_value(merged)
            .map_err(|e| ChannelError::validation("config", format!("Invalid channel config: {e}")))?;
        config.credentials = credentials;
        config.validate()?;

        Ok(config)
    }

    pub fn base_url(&self) -> &str {
        let url = if self.use_sandbox {
            &self.endpoints.sandbox
        } else {
            &self.endpoints.production
        };
        url.trim_end_matches('/')
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url(), path.trim_start_matches('/'))
    }

    // Backoff never waits longer than the configured retry ceiling
    pub fn effective_retry(&self) -> RetryConfig {
        RetryConfig {
            max_delay_ms: self.retry.max_delay_ms.min(self.timeouts.retry_ceiling_ms),
            ..self.retry.clone()
        }
    }

    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(Value::as_str)
    }

    pub fn validate(&self) -> Result<()> {
        let base = self.base_url();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ChannelError::validation(
                "endpoints",
                format!("Invalid base URL for {}: {base:?}", self.channel),
            ));
        }
        if self.rate_limits.requests_per_minute == 0 {
            return Err(ChannelError::validation(
                "rate_limits.requests_per_minute",
                "Per-minute limit must be positive",
            ));
        }
        if self.rate_limits.requests_per_hour == Some(0) {
            return Err(ChannelError::validation(
                "rate_limits.requests_per_hour",
                "Per-hour limit must be positive when set",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ChannelError::validation(
                "retry.max_attempts",
                "At least one attempt is required",
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ChannelError::validation(
                "retry.multiplier",
                "Backoff multiplier must be at least 1.0",
            ));
        }
        if self.timeouts.request_ms == 0 {
            return Err(ChannelError::validation(
                "timeouts.request_ms",
                "Request timeout must be positive",
            ));
        }
        if let Some(cb) = &self.circuit_breaker {
            if !(cb.failure_rate_threshold > 0.0 && cb.failure_rate_threshold <= 1.0) {
                return Err(ChannelError::validation(
                    "circuit_breaker.failure_rate_threshold",
                    "Failure rate threshold must be within (0, 1]",
                ));
            }
        }
        Ok(())
    }

    // Copy that is safe to hand to logs or API responses
    pub fn redacted(&self) -> Self {
        let credentials = self
            .credentials
            .keys()
            .map(|k| (k.to_string(), REDACTED.to_string()))
            .collect();
        Self {
            credentials,
            ..self.clone()
        }
    }
}

// Objects merge key by key, every other value is replaced
pub fn merge_json(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_json(existing, value)
                    }
                    _ => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (base, overlay) => *base = overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_credentials_never_printed() {
        let creds = Credentials::new()
            .with("username", "hotel-user")
            .with("password", "s3cr3t");

        let debug = format!("{creds:?}");
        assert!(debug.contains("username"));
        assert!(!debug.contains("s3cr3t"));

        let serialized = serde_json::to_string(&creds).unwrap();
        assert!(!serialized.contains("hotel-user"));
        assert!(serialized.contains(REDACTED));
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let a = Credentials::new().with("a", "1").with("b", "2");
        let b = Credentials::new().with("b", "2").with("a", "1");
        let c = Credentials::new().with("a", "1").with("b", "3");

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());

        let padded = Credentials::new().with("a", "1 ").with("b", "2");
        assert_ne!(a.fingerprint(), padded.fingerprint());
        assert_ne!(a, padded);
    }

    #[test]
    fn test_deep_merge_keeps_siblings() {
        let mut base = json!({"rate_limits": {"requests_per_minute": 60, "burst_limit": 10}, "use_sandbox": false});
        merge_json(&mut base, &json!({"rate_limits": {"burst_limit": 5}, "use_sandbox": true}));

        assert_eq!(base["rate_limits"]["requests_per_minute"], 60);
        assert_eq!(base["rate_limits"]["burst_limit"], 5);
        assert_eq!(base["use_sandbox"], true);
    }

    #[test]
    fn test_merged_config_uses_caller_credentials() {
        let creds = Credentials::new().with("username", "u").with("password", "p");
        let overrides = json!({
            "credentials": {"username": "someone-else"},
            "use_sandbox": true,
            "capabilities": {"supports_booking_modifications": true}
        });

        let config = ChannelConfig::merged(ChannelKind::BookingCom, creds.clone(), &[&overrides]).unwrap();

        assert_eq!(config.credentials, creds);
        assert!(config.use_sandbox);
        assert!(config.base_url().contains("sandbox"));
        assert!(config.capabilities.supports_booking_modifications);
        // untouched defaults survive the merge
        assert!(config.capabilities.supports_cancellations);
        assert_eq!(config.rate_limits.requests_per_minute, 60);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let bad = json!({"endpoints": {"production": "ftp://nope"}});
        let err = ChannelConfig::merged(ChannelKind::Oyo, Credentials::new(), &[&bad]).unwrap_err();
        assert!(matches!(err, ChannelError::Validation { .. }));
    }

    #[test]
    fn test_zero_hour_limit_rejected() {
        let zero = json!({"rate_limits": {"requests_per_hour": 0}});
        let err = ChannelConfig::merged(ChannelKind::Oyo, Credentials::new(), &[&zero]).unwrap_err();
        match err {
            ChannelError::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("rate_limits.requests_per_hour"));
            }
            other => panic!("unexpected error {other:?}"),
        }

        let unset = json!({"rate_limits": {"requests_per_hour": null}});
        assert!(ChannelConfig::merged(ChannelKind::Oyo, Credentials::new(), &[&unset]).is_ok());
    }

    #[test]
    fn test_redacted_config() {
        let mut config = ChannelConfig::defaults_for(ChannelKind::MakeMyTrip);
        config.credentials = Credentials::new().with("password", "hunter2");

        let redacted = config.redacted();
        assert_eq!(redacted.credentials.get("password"), Some(REDACTED));
        assert_eq!(config.credentials.get("password"), Some("hunter2"));
    }

    #[test]
    fn test_zero_burst_defaults_to_minute_limit() {
        let limits = RateLimitConfig {
            requests_per_minute: 42,
            burst_limit: 0,
            ..Default::default()
        };
        assert_eq!(limits.effective_burst(), 42);
    }
}
