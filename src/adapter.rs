// The operation set every OTA integration implements, plus the sync and
// outcome plumbing the concrete adapters share

use std::time::Instant;

use async_trait::async_trait;
use reqwest::{header::HeaderMap, Url};
use serde_json::Value;

use crate::{
    config::{ChannelCapabilities, ChannelConfig},
    error::{ChannelError, Result},
    executor::RequestExecutor,
    types::{
        BookingChanges, BookingData, BookingStatus, BookingStatusResult, CancellationResult,
        ChannelKind, ConfirmationResult, ConnectionHealth, ConnectionTestResult,
        CredentialValidation, IncomingBookingResult, InventoryData, ModificationResult,
        PricingData, SyncFailure, SyncResult, SyncTracker,
    },
};

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel(&self) -> ChannelKind;

    fn config(&self) -> &ChannelConfig;

    fn executor(&self) -> &RequestExecutor;

    /// Establishes the session. `Ok(false)` means the OTA refused the credentials.
    async fn connect(&self) -> Result<bool>;

    async fn disconnect(&self) -> Result<()>;

    async fn validate_credentials(&self) -> Result<CredentialValidation>;

    /// Pushes availability for one property. Item and batch failures are
    /// reported in the result, never as `Err`.
    async fn sync_inventory(&self, property_id: &str, items: &[InventoryData]) -> Result<SyncResult>;

    async fn sync_pricing(&self, property_id: &str, items: &[PricingData]) -> Result<SyncResult>;

    async fn handle_incoming_booking(&self, booking: &BookingData) -> Result<IncomingBookingResult>;

    async fn confirm_booking(
        &self,
        booking_id: &str,
        external_booking_id: Option<&str>,
    ) -> Result<ConfirmationResult>;

    async fn cancel_booking(
        &self,
        booking_id: &str,
        external_booking_id: &str,
        reason: Option<&str>,
    ) -> Result<CancellationResult>;

    async fn update_booking(
        &self,
        booking_id: &str,
        external_booking_id: &str,
        changes: &BookingChanges,
    ) -> Result<ModificationResult>;

    async fn get_booking_status(&self, external_booking_id: &str) -> Result<BookingStatusResult>;

    async fn authentication_headers(&self) -> Result<HeaderMap>;

    fn get_connection_status(&self) -> ConnectionHealth {
        self.executor().connection_status()
    }

    // Times a credential round-trip. Never fails; errors land in the result.
    async fn test_connection(&self) -> ConnectionTestResult {
        let started = Instant::now();
        let outcome = self.validate_credentials().await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(validation) => ConnectionTestResult {
                success: validation.valid,
                latency_ms,
                error: validation.error,
            },
            Err(err) => ConnectionTestResult {
                success: false,
                latency_ms,
                error: Some(err.to_string()),
            },
        }
    }

    fn capabilities(&self) -> ChannelCapabilities {
        self.config().capabilities
    }

    fn redacted_config(&self) -> ChannelConfig {
        self.config().redacted()
    }

    fn reset_metrics(&self) {
        self.executor().reset_metrics();
    }
}

// Sync payload item with a stable id and pre-flight validation
pub trait SyncItem {
    fn item_id(&self) -> String;
    fn context(&self) -> Value;
    fn validate(&self) -> Result<()>;
}

impl SyncItem for InventoryData {
    fn item_id(&self) -> String {
        InventoryData::item_id(self)
    }

    fn context(&self) -> Value {
        InventoryData::context(self)
    }

    fn validate(&self) -> Result<()> {
        InventoryData::validate(self)
    }
}

impl SyncItem for PricingData {
    fn item_id(&self) -> String {
        PricingData::item_id(self)
    }

    fn context(&self) -> Value {
        PricingData::context(self)
    }

    fn validate(&self) -> Result<()> {
        PricingData::validate(self)
    }
}

// An item the OTA refused inside an otherwise accepted batch
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRejection {
    pub reference: String,
    pub message: String,
}

/// One sync call in progress. Invalid items are recorded up front and
/// never offered to a batch.
pub struct SyncRun<'a, I> {
    items: &'a [I],
    valid: Vec<usize>,
    tracker: SyncTracker,
}

impl<'a, I: SyncItem> SyncRun<'a, I> {
    pub fn new(property_id: &str, items: &'a [I]) -> Self {
        let mut tracker = SyncTracker::new(items.len());
        let mut valid = Vec::with_capacity(items.len());

        for (index, item) in items.iter().enumerate() {
            match item.validate() {
                Ok(()) => valid.push(index),
                Err(err) => {
                    tracing::debug!(property_id, item = %item.item_id(), "item failed validation: {err}");
                    tracker.record_failure(index, item.item_id(), message_of(&err), item.context());
                }
            }
        }

        Self {
            items,
            valid,
            tracker,
        }
    }

    pub fn valid_indices(&self) -> &[usize] {
        &self.valid
    }

    pub fn items_of(&self, batch: &[usize]) -> Vec<&'a I> {
        batch.iter().map(|&i| &self.items[i]).collect()
    }

    // Valid items in fixed-size chunks, in input order
    pub fn chunks(&self, size: usize) -> Vec<Vec<usize>> {
        self.valid.chunks(size.max(1)).map(<[usize]>::to_vec).collect()
    }

    // Every item of a batch that failed as a whole
    pub fn fail_batch(&mut self, batch: &[usize], err: &ChannelError) {
        let message = message_of(err);
        for &index in batch {
            let item = &self.items[index];
            self.tracker
                .record_failure(index, item.item_id(), message.clone(), item.context());
        }
    }

    // Maps rejections back to the batch items carrying the same reference
    pub fn apply_rejections(&mut self, batch: &[usize], rejections: Vec<ItemRejection>) {
        for rejection in rejections {
            let matched: Vec<usize> = batch
                .iter()
                .copied()
                .filter(|&i| self.items[i].item_id() == rejection.reference)
                .collect();

            if matched.is_empty() {
                tracing::warn!(reference = %rejection.reference, "rejection for unknown item");
                continue;
            }
            for index in matched {
                let item = &self.items[index];
                self.tracker.record_failure(
                    index,
                    item.item_id(),
                    rejection.message.clone(),
                    item.context(),
                );
            }
        }
    }

    pub fn finish(self) -> SyncResult {
        self.tracker.finish()
    }
}

/// Error for a batch the OTA refused as a whole, listing every member.
pub fn batch_rejected<I: SyncItem>(message: String, items: &[&I]) -> ChannelError {
    let failed_items = items
        .iter()
        .map(|item| SyncFailure {
            item_id: item.item_id(),
            error: message.clone(),
            context: item.context(),
        })
        .collect();
    ChannelError::Sync {
        message,
        failed_items,
    }
}

fn message_of(err: &ChannelError) -> String {
    match err {
        ChannelError::Validation { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

pub fn ensure_capability(enabled: bool, channel: ChannelKind, capability: &str) -> Result<()> {
    if enabled {
        Ok(())
    } else {
        Err(ChannelError::validation(
            "capabilities",
            format!("{} does not support {capability}", channel.display_name()),
        ))
    }
}

// Outcome value for "the OTA said no"
pub trait Rejected {
    fn rejected(error: String) -> Self;
}

impl Rejected for IncomingBookingResult {
    fn rejected(error: String) -> Self {
        Self {
            success: false,
            booking_id: None,
            error: Some(error),
        }
    }
}

impl Rejected for ConfirmationResult {
    fn rejected(error: String) -> Self {
        Self {
            success: false,
            confirmation_number: None,
            error: Some(error),
        }
    }
}

impl Rejected for CancellationResult {
    fn rejected(error: String) -> Self {
        Self {
            success: false,
            cancellation_id: None,
            error: Some(error),
        }
    }
}

impl Rejected for ModificationResult {
    fn rejected(error: String) -> Self {
        Self {
            success: false,
            updated_booking_id: None,
            error: Some(error),
        }
    }
}

impl Rejected for BookingStatusResult {
    fn rejected(error: String) -> Self {
        Self {
            status: BookingStatus::Unknown,
            details: None,
            error: Some(error),
        }
    }
}

/// Booking operations only surface infrastructure failures as `Err`.
/// Anything the OTA rejected becomes a `success: false` value.
pub fn settle<T: Rejected>(result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(err) if err.is_infrastructure() => Err(err),
        Err(err) => Ok(T::rejected(err.to_string())),
    }
}

/// Appends `segments` to `base` as individual path segments. Each one is
/// percent-encoded, `/` included, so an id cannot step into another
/// resource. Empty, `.` and `..` segments are refused.
pub fn resource_url(base: &str, segments: &[&str]) -> Result<Url> {
    if let Some(bad) = segments
        .iter()
        .find(|s| s.trim().is_empty() || matches!(**s, "." | ".."))
    {
        return Err(ChannelError::validation(
            "external_booking_id",
            format!("Invalid identifier {bad:?}"),
        ));
    }

    let mut url = Url::parse(base)
        .map_err(|e| ChannelError::validation("endpoints", format!("Invalid URL {base:?}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| ChannelError::validation("endpoints", format!("URL cannot take a path: {base:?}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

// Reference handed back for a booking taken in from `channel`
pub fn channel_booking_id(channel: ChannelKind, external_booking_id: &str) -> String {
    format!("{}-{}", channel.booking_prefix(), external_booking_id)
}
