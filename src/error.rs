// Error taxonomy shared by every channel adapter

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::SyncFailure;

pub type Result<T> = std::result::Result<T, ChannelError>;

// HTTP statuses worth another attempt
pub const RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

// Transport level codes worth another attempt
pub const RETRYABLE_TRANSPORT_CODES: [&str; 6] = [
    "ECONNRESET",
    "ECONNREFUSED",
    "ETIMEDOUT",
    "ENOTFOUND",
    "EAI_AGAIN",
    "EPIPE",
];

#[derive(Error, Debug, Clone)]
pub enum ChannelError {
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        status_code: Option<u16>,
        code: Option<String>,
        retry_after: Option<Duration>,
    },

    #[error("Sync error: {message} ({} failed items)", failed_items.len())]
    Sync {
        message: String,
        failed_items: Vec<SyncFailure>,
    },

    #[error("Booking {operation} failed for {booking_id}: {message}")]
    BookingProcessing {
        message: String,
        operation: String,
        booking_id: String,
        external_booking_id: Option<String>,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Authentication failed ({credential_type}): {message}")]
    Authentication {
        message: String,
        credential_type: String,
    },

    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        reset_at: DateTime<Utc>,
        remaining: u32,
        retry_after: Duration,
    },

    #[error("Operation {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Circuit breaker open for {channel}")]
    CircuitOpen { channel: String, retry_after_ms: u64 },
}

impl ChannelError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            status_code: None,
            code: None,
            retry_after: None,
        }
    }

    pub fn http_status(status_code: u16, message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            status_code: Some(status_code),
            code: None,
            retry_after: None,
        }
    }

    pub fn transport(code: &str, message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            status_code: None,
            code: Some(code.to_string()),
            retry_after: None,
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn authentication(credential_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
            credential_type: credential_type.into(),
        }
    }

    pub fn booking(
        operation: impl Into<String>,
        booking_id: impl Into<String>,
        external_booking_id: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self::BookingProcessing {
            message: message.into(),
            operation: operation.into(),
            booking_id: booking_id.into(),
            external_booking_id: external_booking_id.map(str::to_string),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Connection { status_code, .. } => *status_code,
            Self::RateLimit { .. } => Some(429),
            Self::Timeout { .. } => Some(408),
            _ => None,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Connection { retry_after, .. } => *retry_after,
            Self::RateLimit { retry_after, .. } => Some(*retry_after),
            Self::CircuitOpen { retry_after_ms, .. } => Some(Duration::from_millis(*retry_after_ms)),
            _ => None,
        }
    }

    // Whether the retry handler may spend another attempt on this error
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection {
                status_code, code, ..
            } => {
                status_code.is_some_and(|s| RETRYABLE_STATUS_CODES.contains(&s))
                    || code
                        .as_deref()
                        .is_some_and(|c| RETRYABLE_TRANSPORT_CODES.contains(&c))
            }
            Self::Timeout { .. } => true,
            Self::RateLimit { .. } => true,
            _ => false,
        }
    }

    // Failures that say something about the partner's health. A rejected
    // booking or a bad payload must not trip the breaker.
    pub fn counts_toward_circuit(&self) -> bool {
        match self {
            Self::Connection { status_code, .. } => {
                status_code.is_none() || self.is_retryable()
            }
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    // "We could not reach the OTA" as opposed to "the OTA said no"
    pub fn is_infrastructure(&self) -> bool {
        match self {
            Self::Connection { status_code, .. } => match status_code {
                None => true,
                Some(s) => RETRYABLE_STATUS_CODES.contains(s) || *s >= 500,
            },
            Self::Timeout { .. } | Self::RateLimit { .. } | Self::CircuitOpen { .. } => true,
            _ => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::Sync { .. } => "sync",
            Self::BookingProcessing { .. } => "booking_processing",
            Self::Validation { .. } => "validation",
            Self::Authentication { .. } => "authentication",
            Self::RateLimit { .. } => "rate_limit",
            Self::Timeout { .. } => "timeout",
            Self::CircuitOpen { .. } => "circuit_open",
        }
    }
}

impl From<reqwest::Error> for ChannelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::transport("ETIMEDOUT", err.to_string());
        }
        if err.is_connect() {
            return Self::transport("ECONNREFUSED", err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::http_status(status.as_u16(), err.to_string());
        }
        if err.is_request() || err.is_body() {
            return Self::transport("ECONNRESET", err.to_string());
        }
        Self::connection(err.to_string())
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> Self {
        Self::connection(format!("Invalid JSON payload: {err}"))
    }
}

impl From<quick_xml::Error> for ChannelError {
    fn from(err: quick_xml::Error) -> Self {
        Self::connection(format!("Invalid XML payload: {err}"))
    }
}

impl From<quick_xml::events::attributes::AttrError> for ChannelError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Self::connection(format!("Invalid XML attribute: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        for status in RETRYABLE_STATUS_CODES {
            assert!(ChannelError::http_status(status, "x").is_retryable());
        }
        assert!(!ChannelError::http_status(400, "bad").is_retryable());
        assert!(!ChannelError::http_status(401, "auth").is_retryable());
        assert!(!ChannelError::http_status(404, "missing").is_retryable());

        assert!(ChannelError::transport("ECONNRESET", "reset").is_retryable());
        assert!(!ChannelError::transport("EPROTO", "proto").is_retryable());
        assert!(!ChannelError::connection("generic").is_retryable());

        let timeout = ChannelError::Timeout {
            operation: "sync".into(),
            timeout_ms: 10,
        };
        assert!(timeout.is_retryable());
        assert!(!ChannelError::validation("rate", "must be positive").is_retryable());
        assert!(!ChannelError::authentication("basic", "denied").is_retryable());
    }

    #[test]
    fn test_infrastructure_vs_rejection() {
        assert!(ChannelError::connection("down").is_infrastructure());
        assert!(ChannelError::http_status(503, "down").is_infrastructure());
        assert!(!ChannelError::http_status(404, "no such booking").is_infrastructure());
        assert!(!ChannelError::http_status(409, "already cancelled").is_infrastructure());
        assert!(!ChannelError::validation("x", "y").is_infrastructure());
    }

    #[test]
    fn test_circuit_inputs() {
        assert!(ChannelError::connection("reset").counts_toward_circuit());
        assert!(ChannelError::http_status(502, "bad gateway").counts_toward_circuit());
        assert!(!ChannelError::http_status(422, "invalid rate").counts_toward_circuit());
        assert!(!ChannelError::validation("x", "y").counts_toward_circuit());
    }
}
