// Request plumbing shared by every adapter: rate limiting, retry, timeouts,
// response handling, headers and health counters

use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, RETRY_AFTER, USER_AGENT},
    RequestBuilder, Response, StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    circuit_breaker::{CircuitBreaker, CircuitState},
    config::ChannelConfig,
    error::{ChannelError, Result},
    logger::{LogSink, OperationLogger},
    rate_limiter::RateLimiter,
    retry::RetryHandler,
    types::{ChannelKind, ConnectionHealth, ConnectionStatus},
};

pub const CLIENT_USER_AGENT: &str = concat!("ota_channel_sync/", env!("CARGO_PKG_VERSION"));

const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_ERROR_BODY_CHARS: usize = 200;

// Handed to every attempt of an operation
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: String,
    pub operation: String,
    pub attempt: u32,
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    successes: AtomicU64,
    errors: AtomicU64,
    total_response_ms: AtomicU64,
    last_response_ms: AtomicU64,
}

struct HealthState {
    status: ConnectionStatus,
    last_success_at: Option<DateTime<Utc>>,
    last_error_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

pub struct RequestExecutor {
    instance_id: Uuid,
    channel: ChannelKind,
    api_version: String,
    credential_type: &'static str,
    client: reqwest::Client,
    request_timeout: Duration,
    rate_limiter: Arc<RateLimiter>,
    circuit: Option<Arc<CircuitBreaker>>,
    retry: RetryHandler,
    logger: OperationLogger,
    counters: Counters,
    health: Mutex<HealthState>,
}

impl RequestExecutor {
    /// Builds the executor for one adapter instance. `credential_type` names the
    /// auth scheme reported in `Authentication` errors.
    pub fn new(
        config: &ChannelConfig,
        credential_type: &'static str,
        sinks: Vec<Arc<dyn LogSink>>,
    ) -> Result<Self> {
        let instance_id = Uuid::new_v4();
        let logger = OperationLogger::new(config.channel.as_str())
            .with_sinks(sinks)
            .with_context(json!({ "instanceId": instance_id.to_string() }));

        let rate_limiter = Arc::new(RateLimiter::new(config.channel.as_str(), &config.rate_limits));
        let circuit = config
            .circuit_breaker
            .as_ref()
            .map(|cb| Arc::new(CircuitBreaker::new(config.channel.as_str(), cb)));

        let mut retry = RetryHandler::new(config.effective_retry(), logger.clone());
        if let Some(circuit) = &circuit {
            retry = retry.with_circuit_breaker(circuit.clone());
        }

        let client = reqwest::Client::builder()
            .connect_timeout(config.timeouts.connection())
            .user_agent(CLIENT_USER_AGENT)
            .build()?;

        Ok(Self {
            instance_id,
            channel: config.channel,
            api_version: config.api_version.clone(),
            credential_type,
            client,
            request_timeout: config.timeouts.request(),
            rate_limiter,
            circuit,
            retry,
            logger,
            counters: Counters::default(),
            health: Mutex::new(HealthState {
                status: ConnectionStatus::Disconnected,
                last_success_at: None,
                last_error_at: None,
                last_error: None,
            }),
        })
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn channel(&self) -> ChannelKind {
        self.channel
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn logger(&self) -> &OperationLogger {
        &self.logger
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.circuit.as_ref()
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Runs one logical operation, retrying per the channel's policy. Rate
    /// limiting happens per outbound request in [`Self::fetch_with_timeout`].
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut request: F) -> Result<T>
    where
        F: FnMut(RequestContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let correlation_id = Uuid::new_v4().to_string();
        let logger = self.logger.with_context(json!({
            "operation": operation,
            "correlationId": correlation_id,
        }));
        let started = Instant::now();
        logger.operation_started(operation);

        let result = self
            .retry
            .execute_with_logger(operation, &logger, |attempt| {
                logger.attempt_started(operation, attempt);
                request(RequestContext {
                    correlation_id: correlation_id.clone(),
                    operation: operation.to_string(),
                    attempt,
                })
            })
            .await;

        let elapsed = started.elapsed();
        match &result {
            Ok(_) => {
                let mut health = self.health.lock();
                health.status = ConnectionStatus::Connected;
                health.last_success_at = Some(Utc::now());
                drop(health);
                logger.operation_succeeded(operation, elapsed);
            }
            Err(err) => {
                let mut health = self.health.lock();
                health.last_error_at = Some(Utc::now());
                health.last_error = Some(err.to_string());
                match err {
                    ChannelError::RateLimit { .. } => health.status = ConnectionStatus::RateLimited,
                    err if err.is_infrastructure() => health.status = ConnectionStatus::Error,
                    _ => {}
                }
                drop(health);
                logger.operation_failed(operation, elapsed, err);
            }
        }

        result
    }

    /// Sends one request. It takes a rate-limit token first, so a rejected
    /// request never reaches the network, and gives up after the configured
    /// request timeout. Every request that is sent counts toward health.
    pub async fn fetch_with_timeout(&self, request: RequestBuilder, operation: &str) -> Result<Response> {
        if let Err(err) = self.rate_limiter.check_limit() {
            self.set_status(ConnectionStatus::RateLimited);
            return Err(err);
        }
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        let sent = Instant::now();
        let outcome = match tokio::time::timeout(self.request_timeout, request.send()).await {
            Ok(response) => response.map_err(ChannelError::from),
            Err(_) => Err(ChannelError::Timeout {
                operation: operation.to_string(),
                timeout_ms: self.request_timeout.as_millis() as u64,
            }),
        };
        let success = outcome.as_ref().is_ok_and(|r| r.status().is_success());
        self.record_response(sent.elapsed(), success);
        outcome
    }

    // Parses a JSON body; an empty body reads as `null`
    pub async fn handle_json_response<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        let body = self.handle_text_response(response).await?;
        let body = if body.trim().is_empty() { "null" } else { body.as_str() };
        Ok(serde_json::from_str(body)?)
    }

    pub async fn handle_text_response(&self, response: Response) -> Result<String> {
        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await?;

        if status.is_success() {
            return Ok(body);
        }
        Err(self.error_from_response(status, retry_after, &body))
    }

    fn error_from_response(
        &self,
        status: StatusCode,
        retry_after: Option<Duration>,
        body: &str,
    ) -> ChannelError {
        let message = extract_error_message(body).unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            } else {
                trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect()
            }
        });

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                ChannelError::authentication(self.credential_type, message)
            }
            _ => ChannelError::Connection {
                message: format!("{} returned {}: {message}", self.channel.display_name(), status.as_u16()),
                status_code: Some(status.as_u16()),
                code: None,
                retry_after,
            },
        }
    }

    /// Standard headers for an outbound request plus the adapter's auth headers.
    pub fn build_headers(
        &self,
        auth: HeaderMap,
        content_type: &str,
        ctx: &RequestContext,
    ) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));
        headers.insert(ACCEPT, header_value(content_type)?);
        headers.insert(CONTENT_TYPE, header_value(content_type)?);
        headers.insert(
            HeaderName::from_static(REQUEST_ID_HEADER),
            header_value(&ctx.correlation_id)?,
        );
        headers.extend(auth);
        Ok(headers)
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        self.health.lock().status = status;
    }

    pub fn connection_status(&self) -> ConnectionHealth {
        let limits = self.rate_limiter.current_state();
        let circuit = self.circuit.as_ref().map(|c| c.metrics());

        let requests = self.counters.requests.load(Ordering::Relaxed);
        let successes = self.counters.successes.load(Ordering::Relaxed);
        let errors = self.counters.errors.load(Ordering::Relaxed);
        let completed = successes + errors;
        let average_response_time_ms = if completed == 0 {
            0.0
        } else {
            self.counters.total_response_ms.load(Ordering::Relaxed) as f64 / completed as f64
        };
        let last_response_time_ms = match completed {
            0 => None,
            _ => Some(self.counters.last_response_ms.load(Ordering::Relaxed)),
        };

        let health = self.health.lock();
        let status = match &circuit {
            Some(metrics) if metrics.state == CircuitState::Open => ConnectionStatus::Error,
            _ => health.status,
        };

        ConnectionHealth {
            channel: self.channel,
            status,
            last_success_at: health.last_success_at,
            last_error_at: health.last_error_at,
            last_error: health.last_error.clone(),
            average_response_time_ms,
            last_response_time_ms,
            rate_limit_remaining: limits.minute_remaining.min(limits.burst_remaining),
            rate_limit_reset_at: limits.reset_at,
            api_version: self.api_version.clone(),
            request_count: requests,
            success_count: successes,
            error_count: errors,
            circuit,
        }
    }

    // Clears counters and the circuit; connection status is kept
    pub fn reset_metrics(&self) {
        self.counters.requests.store(0, Ordering::Relaxed);
        self.counters.successes.store(0, Ordering::Relaxed);
        self.counters.errors.store(0, Ordering::Relaxed);
        self.counters.total_response_ms.store(0, Ordering::Relaxed);
        self.counters.last_response_ms.store(0, Ordering::Relaxed);
        {
            let mut health = self.health.lock();
            health.last_error = None;
            health.last_error_at = None;
        }
        if let Some(circuit) = &self.circuit {
            circuit.reset();
        }
        self.logger.info("metrics reset", None);
    }

    fn record_response(&self, elapsed: Duration, success: bool) {
        let ms = elapsed.as_millis() as u64;
        self.counters.total_response_ms.fetch_add(ms, Ordering::Relaxed);
        self.counters.last_response_ms.store(ms, Ordering::Relaxed);
        if success {
            self.counters.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

pub fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| ChannelError::validation("headers", format!("Invalid header value: {e}")))
}

// Retry-After is either delta-seconds or an HTTP date
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?;
    (at.with_timezone(&Utc) - Utc::now()).to_std().ok()
}

// Pulls a human readable message out of a structured error body
fn extract_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    for key in ["message", "error_description", "error"] {
        match value.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Object(inner)) => {
                if let Some(Value::String(s)) = inner.get("message") {
                    return Some(s.clone());
                }
            }
            _ => {}
        }
    }
    None
}
