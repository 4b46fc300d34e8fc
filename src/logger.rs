// Structured operation logging with context propagation and redaction

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{config::REDACTED, error::ChannelError};

// Keys whose values never reach a log line. Matched by substring after
// lowercasing and folding '-' to '_', so "X-Api-Key" hits "api_key".
const SENSITIVE_KEYS: [&str; 9] = [
    "password",
    "secret",
    "token",
    "api_key",
    "apikey",
    "authorization",
    "credential",
    "cvv",
    "card_number",
];

/// Installs a fmt subscriber filtered by `RUST_LOG` (default `info`).
/// Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase().replace('-', "_");
    SENSITIVE_KEYS.iter().any(|s| key.contains(s))
}

pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    if is_sensitive_key(k) {
                        (k.clone(), Value::String(REDACTED.into()))
                    } else {
                        (k.clone(), redact(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub channel: String,
    pub message: String,
    pub operation: Option<String>,
    pub duration_ms: Option<u64>,
    pub success: Option<bool>,
    pub attempt: Option<u32>,
    pub context: Value,
}

/// Destination for log entries besides `tracing`, e.g. an audit store.
/// Entries are already redacted when they arrive here.
pub trait LogSink: Send + Sync {
    fn record(&self, entry: &LogEntry);
}

#[derive(Default)]
pub struct MemoryLogSink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl LogSink for MemoryLogSink {
    fn record(&self, entry: &LogEntry) {
        self.entries.lock().push(entry.clone());
    }
}

#[derive(Default)]
struct EntryMeta<'a> {
    operation: Option<&'a str>,
    duration: Option<Duration>,
    success: Option<bool>,
    attempt: Option<u32>,
}

#[derive(Clone)]
pub struct OperationLogger {
    channel: String,
    context: Map<String, Value>,
    sinks: Vec<Arc<dyn LogSink>>,
}

impl OperationLogger {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            context: Map::new(),
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_sinks(mut self, sinks: impl IntoIterator<Item = Arc<dyn LogSink>>) -> Self {
        self.sinks.extend(sinks);
        self
    }

    // Child logger carrying the parent's context plus `extra`. The parent is untouched.
    pub fn with_context(&self, extra: Value) -> Self {
        let mut child = self.clone();
        if let Value::Object(map) = redact(&extra) {
            child.context.extend(map);
        }
        child
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    pub fn debug(&self, message: &str, extra: Option<Value>) {
        self.emit(LogLevel::Debug, message, EntryMeta::default(), extra);
    }

    pub fn info(&self, message: &str, extra: Option<Value>) {
        self.emit(LogLevel::Info, message, EntryMeta::default(), extra);
    }

    pub fn warn(&self, message: &str, extra: Option<Value>) {
        self.emit(LogLevel::Warn, message, EntryMeta::default(), extra);
    }

    pub fn error(&self, message: &str, extra: Option<Value>) {
        self.emit(LogLevel::Error, message, EntryMeta::default(), extra);
    }

    pub fn operation_started(&self, operation: &str) {
        self.emit(
            LogLevel::Debug,
            &format!("{operation} started"),
            EntryMeta {
                operation: Some(operation),
                ..Default::default()
            },
            None,
        );
    }

    pub fn operation_succeeded(&self, operation: &str, duration: Duration) {
        self.emit(
            LogLevel::Info,
            &format!("{operation} completed"),
            EntryMeta {
                operation: Some(operation),
                duration: Some(duration),
                success: Some(true),
                ..Default::default()
            },
            None,
        );
    }

    pub fn operation_failed(&self, operation: &str, duration: Duration, err: &ChannelError) {
        self.emit(
            LogLevel::Error,
            &format!("{operation} failed: {err}"),
            EntryMeta {
                operation: Some(operation),
                duration: Some(duration),
                success: Some(false),
                ..Default::default()
            },
            Some(serde_json::json!({
                "errorKind": err.kind(),
                "statusCode": err.status_code(),
            })),
        );
    }

    // One line per outbound attempt, so a request can be traced through retries
    pub fn attempt_started(&self, operation: &str, attempt: u32) {
        self.emit(
            LogLevel::Debug,
            &format!("{operation} attempt {attempt}"),
            EntryMeta {
                operation: Some(operation),
                attempt: Some(attempt),
                ..Default::default()
            },
            None,
        );
    }

    pub fn log_retry(
        &self,
        operation: &str,
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
        err: &ChannelError,
    ) {
        self.emit(
            LogLevel::Warn,
            &format!("{operation} attempt {attempt}/{max_attempts} failed, retrying: {err}"),
            EntryMeta {
                operation: Some(operation),
                attempt: Some(attempt),
                ..Default::default()
            },
            Some(serde_json::json!({
                "attempt": attempt,
                "delayMs": delay.as_millis() as u64,
                "errorKind": err.kind(),
            })),
        );
    }

    fn emit(&self, level: LogLevel, message: &str, meta: EntryMeta<'_>, extra: Option<Value>) {
        let mut context = self.context.clone();
        if let Some(Value::Object(map)) = extra.as_ref().map(redact) {
            context.extend(map);
        }
        let context = Value::Object(context);

        let correlation_id = context
            .get("correlationId")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let operation = meta.operation.unwrap_or_default();
        let duration_ms = meta.duration.map(|d| d.as_millis() as u64);
        let attempt = meta.attempt;

        macro_rules! event {
            ($lvl:expr) => {
                tracing::event!(
                    target: "ota_channel_sync",
                    $lvl,
                    channel = %self.channel,
                    operation,
                    correlation_id,
                    duration_ms,
                    attempt,
                    context = %context,
                    "{}",
                    message
                )
            };
        }
        match level {
            LogLevel::Debug => event!(tracing::Level::DEBUG),
            LogLevel::Info => event!(tracing::Level::INFO),
            LogLevel::Warn => event!(tracing::Level::WARN),
            LogLevel::Error => event!(tracing::Level::ERROR),
        }

        if self.sinks.is_empty() {
            return;
        }
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            channel: self.channel.clone(),
            message: message.to_string(),
            operation: meta.operation.map(str::to_string),
            duration_ms,
            success: meta.success,
            attempt,
            context,
        };
        for sink in &self.sinks {
            sink.record(&entry);
        }
    }
}
