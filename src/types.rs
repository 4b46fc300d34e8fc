// Channel data model: sync payloads, bookings and the values handed back to callers

use std::{collections::BTreeMap, fmt, str::FromStr, time::Duration};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    circuit_breaker::CircuitMetrics,
    error::{ChannelError, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelKind {
    #[serde(rename = "booking_com")]
    BookingCom,
    #[serde(rename = "makemytrip")]
    MakeMyTrip,
    #[serde(rename = "oyo")]
    Oyo,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 3] = [Self::BookingCom, Self::MakeMyTrip, Self::Oyo];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BookingCom => "booking_com",
            Self::MakeMyTrip => "makemytrip",
            Self::Oyo => "oyo",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::BookingCom => "Booking.com",
            Self::MakeMyTrip => "MakeMyTrip",
            Self::Oyo => "OYO",
        }
    }

    // Prefix of the booking references this crate hands out for the channel
    pub fn booking_prefix(&self) -> &'static str {
        match self {
            Self::BookingCom => "BDC",
            Self::MakeMyTrip => "MMT",
            Self::Oyo => "OYO",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();

        match normalized.as_str() {
            "bookingcom" | "booking" | "bdc" => Ok(Self::BookingCom),
            "makemytrip" | "mmt" => Ok(Self::MakeMyTrip),
            "oyo" | "oyorooms" => Ok(Self::Oyo),
            _ => Err(ChannelError::validation(
                "channel",
                format!("Unsupported channel: {s}"),
            )),
        }
    }
}

// One room-type-day's availability state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryData {
    pub property_id: String,
    pub room_type_id: String,
    pub date: NaiveDate,
    pub availability: u32,
    #[serde(default)]
    pub min_stay: Option<u32>,
    #[serde(default)]
    pub max_stay: Option<u32>,
    #[serde(default)]
    pub closed_to_arrival: bool,
    #[serde(default)]
    pub closed_to_departure: bool,
}

impl InventoryData {
    pub fn item_id(&self) -> String {
        format!("{}:{}", self.room_type_id, self.date)
    }

    pub fn context(&self) -> Value {
        json!({
            "propertyId": self.property_id,
            "roomTypeId": self.room_type_id,
            "date": self.date.to_string(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.room_type_id.trim().is_empty() {
            return Err(ChannelError::validation("roomTypeId", "Room type is required"));
        }
        if let (Some(min), Some(max)) = (self.min_stay, self.max_stay) {
            if min > max {
                return Err(ChannelError::validation(
                    "minStay",
                    format!("Minimum stay {min} exceeds maximum stay {max}"),
                ));
            }
        }
        if self.min_stay == Some(0) {
            return Err(ChannelError::validation("minStay", "Minimum stay must be at least 1"));
        }
        Ok(())
    }
}

// One rate-plan-day price point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingData {
    pub property_id: String,
    pub room_type_id: String,
    pub rate_plan_id: String,
    pub date: NaiveDate,
    pub rate: f64,
    pub currency: String,
    pub occupancy: u32,
    #[serde(default)]
    pub extra_adult_charge: Option<f64>,
    #[serde(default)]
    pub extra_child_charge: Option<f64>,
    #[serde(default)]
    pub meal_plan: Option<String>,
    #[serde(default)]
    pub cancellation_policy: Option<String>,
}

impl PricingData {
    pub fn item_id(&self) -> String {
        format!("{}:{}:{}", self.room_type_id, self.rate_plan_id, self.date)
    }

    pub fn context(&self) -> Value {
        json!({
            "propertyId": self.property_id,
            "roomTypeId": self.room_type_id,
            "ratePlanId": self.rate_plan_id,
            "date": self.date.to_string(),
            "rate": self.rate,
            "currency": self.currency,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.room_type_id.trim().is_empty() || self.rate_plan_id.trim().is_empty() {
            return Err(ChannelError::validation(
                "ratePlanId",
                "Room type and rate plan are required",
            ));
        }
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err(ChannelError::validation(
                "rate",
                format!("invalid rate {}", self.rate),
            ));
        }
        if !is_currency_code(&self.currency) {
            return Err(ChannelError::validation(
                "currency",
                format!("invalid currency code {:?}", self.currency),
            ));
        }
        if self.occupancy == 0 {
            return Err(ChannelError::validation("occupancy", "Occupancy must be at least 1"));
        }
        for (field, charge) in [
            ("extraAdultCharge", self.extra_adult_charge),
            ("extraChildCharge", self.extra_child_charge),
        ] {
            if charge.is_some_and(|c| !c.is_finite() || c < 0.0) {
                return Err(ChannelError::validation(field, "Charge must be non-negative"));
            }
        }
        Ok(())
    }
}

pub fn is_currency_code(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    Pending,
    Cancelled,
    Modified,
    NoShow,
    Unknown,
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Confirmed => "confirmed",
            Self::Pending => "pending",
            Self::Cancelled => "cancelled",
            Self::Modified => "modified",
            Self::NoShow => "no_show",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    PayAtHotel,
    Prepaid,
    VirtualCard,
    CreditCard,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    PartiallyPaid,
    Refunded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestInfo {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingPricing {
    pub room_amount: f64,
    #[serde(default)]
    pub taxes: f64,
    #[serde(default)]
    pub fees: f64,
    pub total_amount: f64,
    pub currency: String,
    #[serde(default)]
    pub commission: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInfo {
    pub method: PaymentMethod,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingData {
    pub external_booking_id: String,
    pub property_id: String,
    pub room_type_id: String,
    pub rate_plan_id: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub rooms: u32,
    pub adults: u32,
    #[serde(default)]
    pub children: u32,
    pub guest: GuestInfo,
    pub pricing: BookingPricing,
    pub payment: PaymentInfo,
    pub status: BookingStatus,
    pub channel: ChannelKind,
    #[serde(default)]
    pub special_requests: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl BookingData {
    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    pub fn validate(&self) -> Result<()> {
        if self.external_booking_id.trim().is_empty() {
            return Err(ChannelError::validation(
                "externalBookingId",
                "External booking id is required",
            ));
        }
        if self.check_in >= self.check_out {
            return Err(ChannelError::validation(
                "checkOut",
                format!(
                    "Check-out {} must be after check-in {}",
                    self.check_out, self.check_in
                ),
            ));
        }
        if self.rooms == 0 {
            return Err(ChannelError::validation("rooms", "At least one room is required"));
        }
        if self.adults == 0 {
            return Err(ChannelError::validation("adults", "At least one adult is required"));
        }
        if self.guest.first_name.trim().is_empty() && self.guest.last_name.trim().is_empty() {
            return Err(ChannelError::validation("guest", "Guest name is required"));
        }
        if !is_currency_code(&self.pricing.currency) {
            return Err(ChannelError::validation(
                "pricing.currency",
                format!("invalid currency code {:?}", self.pricing.currency),
            ));
        }
        if !self.pricing.total_amount.is_finite() || self.pricing.total_amount < 0.0 {
            return Err(ChannelError::validation(
                "pricing.totalAmount",
                "Total amount must be non-negative",
            ));
        }
        Ok(())
    }
}

// Partial modification of an existing booking
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_in: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_out: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_type_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rooms: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adults: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_requests: Option<String>,
}

impl BookingChanges {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(ChannelError::validation("changes", "No changes supplied"));
        }
        if let (Some(check_in), Some(check_out)) = (self.check_in, self.check_out) {
            if check_in >= check_out {
                return Err(ChannelError::validation(
                    "checkOut",
                    "Check-out must be after check-in",
                ));
            }
        }
        if self.rooms == Some(0) {
            return Err(ChannelError::validation("rooms", "At least one room is required"));
        }
        if self.adults == Some(0) {
            return Err(ChannelError::validation("adults", "At least one adult is required"));
        }
        if self
            .total_amount
            .is_some_and(|amount| !amount.is_finite() || amount < 0.0)
        {
            return Err(ChannelError::validation(
                "totalAmount",
                "Total amount must be non-negative",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Partial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFailure {
    pub item_id: String,
    pub error: String,
    pub context: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    pub status: SyncStatus,
    pub processed_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub failures: Vec<SyncFailure>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl SyncResult {
    // Status derived from the counts alone
    pub fn status_for(processed: usize, failed: usize) -> SyncStatus {
        if failed == 0 {
            SyncStatus::Completed
        } else if failed >= processed {
            SyncStatus::Failed
        } else {
            SyncStatus::Partial
        }
    }

    pub fn failed_item_ids(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.item_id.as_str()).collect()
    }
}

// Accumulates per-item outcomes of a batched sync. Failures are keyed by the
// item's position so an item can never be counted as failed twice.
#[derive(Debug)]
pub struct SyncTracker {
    processed: usize,
    failures: BTreeMap<usize, SyncFailure>,
    started: std::time::Instant,
}

impl SyncTracker {
    pub fn new(processed: usize) -> Self {
        Self {
            processed,
            failures: BTreeMap::new(),
            started: std::time::Instant::now(),
        }
    }

    pub fn record_failure(&mut self, index: usize, item_id: String, error: impl Into<String>, context: Value) {
        if index >= self.processed {
            return;
        }
        self.failures.entry(index).or_insert(SyncFailure {
            item_id,
            error: error.into(),
            context,
        });
    }

    pub fn is_failed(&self, index: usize) -> bool {
        self.failures.contains_key(&index)
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn finish(self) -> SyncResult {
        let failure_count = self.failures.len();
        let status = SyncResult::status_for(self.processed, failure_count);

        SyncResult {
            success: failure_count == 0,
            status,
            processed_count: self.processed,
            success_count: self.processed - failure_count,
            failure_count,
            failures: self.failures.into_values().collect(),
            duration_ms: self.started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Connecting,
    Error,
    RateLimited,
    Maintenance,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionHealth {
    pub channel: ChannelKind,
    pub status: ConnectionStatus,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub average_response_time_ms: f64,
    pub last_response_time_ms: Option<u64>,
    pub rate_limit_remaining: u32,
    pub rate_limit_reset_at: DateTime<Utc>,
    pub api_version: String,
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub circuit: Option<CircuitMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialValidation {
    pub valid: bool,
    pub error: Option<String>,
    pub details: Option<Value>,
}

impl CredentialValidation {
    pub fn valid(details: Option<Value>) -> Self {
        Self {
            valid: true,
            error: None,
            details,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
            details: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingBookingResult {
    pub success: bool,
    pub booking_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationResult {
    pub success: bool,
    pub confirmation_number: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationResult {
    pub success: bool,
    pub cancellation_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModificationResult {
    pub success: bool,
    pub updated_booking_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingStatusResult {
    pub status: BookingStatus,
    pub details: Option<Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestResult {
    pub success: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pricing(rate: f64) -> PricingData {
        PricingData {
            property_id: "P1".into(),
            room_type_id: "DLX".into(),
            rate_plan_id: "BAR".into(),
            date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            rate,
            currency: "EUR".into(),
            occupancy: 2,
            extra_adult_charge: None,
            extra_child_charge: None,
            meal_plan: None,
            cancellation_policy: None,
        }
    }

    #[test]
    fn test_sync_status_rule() {
        for processed in 0..6usize {
            for failed in 0..=processed {
                let mut tracker = SyncTracker::new(processed);
                for i in 0..failed {
                    tracker.record_failure(i, format!("item-{i}"), "boom", Value::Null);
                }
                let result = tracker.finish();

                assert_eq!(result.success_count + result.failure_count, result.processed_count);
                let expected = if failed == 0 {
                    SyncStatus::Completed
                } else if failed == processed {
                    SyncStatus::Failed
                } else {
                    SyncStatus::Partial
                };
                assert_eq!(result.status, expected, "processed={processed} failed={failed}");
                assert_eq!(result.success, failed == 0);
            }
        }
    }

    #[test]
    fn test_tracker_ignores_duplicate_failures() {
        let mut tracker = SyncTracker::new(3);
        tracker.record_failure(1, "a".into(), "first", Value::Null);
        tracker.record_failure(1, "a".into(), "second", Value::Null);
        tracker.record_failure(7, "out-of-range".into(), "ignored", Value::Null);

        let result = tracker.finish();
        assert_eq!(result.failure_count, 1);
        assert_eq!(result.failures[0].error, "first");
        assert_eq!(result.status, SyncStatus::Partial);
    }

    #[test]
    fn test_pricing_validation() {
        assert!(pricing(120.0).validate().is_ok());
        assert!(pricing(0.0).validate().is_err());
        assert!(pricing(-5.0).validate().is_err());
        assert!(pricing(f64::NAN).validate().is_err());

        let mut bad_currency = pricing(100.0);
        bad_currency.currency = "eur".into();
        assert!(bad_currency.validate().is_err());
    }

    #[test]
    fn test_booking_dates_enforced() {
        let booking = BookingData {
            external_booking_id: "EXT-1".into(),
            property_id: "P1".into(),
            room_type_id: "DLX".into(),
            rate_plan_id: "BAR".into(),
            check_in: NaiveDate::from_ymd_opt(2025, 6, 3).unwrap(),
            check_out: NaiveDate::from_ymd_opt(2025, 6, 3).unwrap(),
            rooms: 1,
            adults: 2,
            children: 0,
            guest: GuestInfo {
                first_name: "Ana".into(),
                last_name: "Silva".into(),
                email: None,
                phone: None,
                country: None,
            },
            pricing: BookingPricing {
                room_amount: 100.0,
                taxes: 0.0,
                fees: 0.0,
                total_amount: 100.0,
                currency: "EUR".into(),
                commission: None,
            },
            payment: PaymentInfo {
                method: PaymentMethod::PayAtHotel,
                status: PaymentStatus::Pending,
            },
            status: BookingStatus::Pending,
            channel: ChannelKind::BookingCom,
            special_requests: None,
            created_at: Utc::now(),
            modified_at: None,
            cancelled_at: None,
        };

        let err = booking.validate().unwrap_err();
        assert!(matches!(err, ChannelError::Validation { field: Some(ref f), .. } if f == "checkOut"));
    }

    #[test]
    fn test_channel_kind_parsing() {
        assert_eq!("Booking.com".parse::<ChannelKind>().unwrap(), ChannelKind::BookingCom);
        assert_eq!("booking_com".parse::<ChannelKind>().unwrap(), ChannelKind::BookingCom);
        assert_eq!("MakeMyTrip".parse::<ChannelKind>().unwrap(), ChannelKind::MakeMyTrip);
        assert_eq!("OYO".parse::<ChannelKind>().unwrap(), ChannelKind::Oyo);
        assert!("expedia".parse::<ChannelKind>().is_err());
    }

    #[test]
    fn test_empty_changes_rejected() {
        assert!(BookingChanges::default().validate().is_err());
        let changes = BookingChanges {
            adults: Some(3),
            ..Default::default()
        };
        assert!(changes.validate().is_ok());
    }
}
