// Bounded retry with exponential backoff, optionally guarded by a circuit breaker

use std::{future::Future, sync::Arc, time::Duration};

use crate::{
    circuit_breaker::CircuitBreaker,
    config::RetryConfig,
    error::{ChannelError, Result},
    logger::OperationLogger,
};

// Upper bound of the random jitter, as a fraction of the delay
pub const JITTER_FACTOR: f64 = 0.1;

pub struct RetryHandler {
    config: RetryConfig,
    circuit: Option<Arc<CircuitBreaker>>,
    logger: OperationLogger,
}

impl RetryHandler {
    pub fn new(config: RetryConfig, logger: OperationLogger) -> Self {
        Self {
            config,
            circuit: None,
            logger,
        }
    }

    pub fn with_circuit_breaker(mut self, circuit: Arc<CircuitBreaker>) -> Self {
        self.circuit = Some(circuit);
        self
    }

    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.circuit.as_ref()
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    // Backoff before attempt `attempt + 1`, where `attempt` is 1-based
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let base_ms = (self.config.base_delay_ms as f64 * self.config.multiplier.powi(exponent))
            .min(self.config.max_delay_ms as f64);

        let backoff_ms = if self.config.jitter {
            base_ms + rand::random::<f64>() * JITTER_FACTOR * base_ms
        } else {
            base_ms
        };

        Duration::from_millis(backoff_ms as u64)
    }

    // Runs `operation` until it succeeds, fails with a non-retryable error or
    // runs out of attempts. The last error is returned unchanged.
    pub async fn execute<T, F, Fut>(&self, operation_name: &str, operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_logger(operation_name, &self.logger, operation)
            .await
    }

    /// Same as [`Self::execute`], but retry and circuit lines go to `logger`,
    /// so they carry the caller's per-operation context.
    pub async fn execute_with_logger<T, F, Fut>(
        &self,
        operation_name: &str,
        logger: &OperationLogger,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            if let Some(circuit) = &self.circuit {
                if !circuit.should_allow_call() {
                    let retry_after = circuit.retry_after();
                    logger.warn(
                        &format!("{operation_name} rejected, circuit open"),
                        Some(serde_json::json!({ "retryAfterMs": retry_after.as_millis() as u64 })),
                    );
                    return Err(ChannelError::CircuitOpen {
                        channel: circuit.name().to_string(),
                        retry_after_ms: retry_after.as_millis() as u64,
                    });
                }
            }

            match operation(attempt).await {
                Ok(value) => {
                    if let Some(circuit) = &self.circuit {
                        circuit.record_success();
                    }
                    if attempt > 1 {
                        logger.info(
                            &format!("{operation_name} succeeded after retry"),
                            Some(serde_json::json!({ "attempts": attempt })),
                        );
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if let Some(circuit) = &self.circuit {
                        if err.counts_toward_circuit() {
                            circuit.record_failure();
                        }
                    }

                    if !err.is_retryable() || attempt >= max_attempts {
                        return Err(err);
                    }

                    let mut delay = self.calculate_backoff(attempt);
                    if let Some(hint) = err.retry_after() {
                        let ceiling = Duration::from_millis(self.config.max_delay_ms);
                        delay = delay.max(hint.min(ceiling));
                    }

                    logger.log_retry(operation_name, attempt, max_attempts, delay, &err);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
