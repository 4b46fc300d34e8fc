// MakeMyTrip partner API: JSON over REST with a short-lived bearer token

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Method, Url,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::{
    adapter::{
        batch_rejected, channel_booking_id, ensure_capability, resource_url, settle, ChannelAdapter,
        ItemRejection, Rejected, SyncItem, SyncRun,
    },
    config::{ChannelConfig, Credentials},
    error::{ChannelError, Result},
    executor::{header_value, RequestContext, RequestExecutor},
    logger::LogSink,
    types::{
        BookingChanges, BookingData, BookingStatus, BookingStatusResult, CancellationResult,
        ChannelKind, ConfirmationResult, ConnectionStatus, CredentialValidation,
        IncomingBookingResult, InventoryData, ModificationResult, PricingData, SyncResult,
    },
};

pub const BATCH_SIZE: usize = 100;

const JSON_CONTENT_TYPE: &str = "application/json";
const API_KEY_HEADER: &str = "x-api-key";

const AUTH_PATH: &str = "/v1/auth/token";
const INVENTORY_PATH: &str = "/v1/inventory/update";
const RATES_PATH: &str = "/v1/rates/update";
const BOOKINGS_PATH: &str = "/v1/bookings";

// Refresh a token this long before it actually expires
const TOKEN_REFRESH_SKEW: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;
// Longer lifetimes are taken as a day, which also keeps the expiry instant representable
const MAX_TOKEN_TTL_SECS: u64 = 24 * 3600;

pub struct MakeMyTripCredentials {
    pub username: String,
    pub password: String,
    pub api_key: String,
    pub hotel_code: String,
}

impl MakeMyTripCredentials {
    pub fn from_credentials(credentials: &Credentials) -> Result<Self> {
        Ok(Self {
            username: credentials.require("username")?.to_string(),
            password: credentials.require("password")?.to_string(),
            api_key: credentials.require("api_key")?.to_string(),
            hotel_code: credentials.require("hotel_code")?.to_string(),
        })
    }
}

struct AuthToken {
    access_token: String,
    expires_at: Instant,
}

impl AuthToken {
    fn is_valid(&self) -> bool {
        self.expires_at > Instant::now() + TOKEN_REFRESH_SKEW
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
    hotel_code: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InventoryUpdate<'a> {
    reference: String,
    room_code: &'a str,
    date: NaiveDate,
    available: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_los: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_los: Option<u32>,
    closed_to_arrival: bool,
    closed_to_departure: bool,
}

impl<'a> From<&'a InventoryData> for InventoryUpdate<'a> {
    fn from(item: &'a InventoryData) -> Self {
        Self {
            reference: item.item_id(),
            room_code: &item.room_type_id,
            date: item.date,
            available: item.availability,
            min_los: item.min_stay,
            max_los: item.max_stay,
            closed_to_arrival: item.closed_to_arrival,
            closed_to_departure: item.closed_to_departure,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RateUpdate<'a> {
    reference: String,
    room_code: &'a str,
    rate_plan_code: &'a str,
    date: NaiveDate,
    amount: f64,
    currency: &'a str,
    occupancy: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    extra_adult: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extra_child: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    meal_plan: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cancellation_policy: Option<&'a str>,
}

impl<'a> From<&'a PricingData> for RateUpdate<'a> {
    fn from(item: &'a PricingData) -> Self {
        Self {
            reference: item.item_id(),
            room_code: &item.room_type_id,
            rate_plan_code: &item.rate_plan_id,
            date: item.date,
            amount: item.rate,
            currency: &item.currency,
            occupancy: item.occupancy,
            extra_adult: item.extra_adult_charge,
            extra_child: item.extra_child_charge,
            meal_plan: item.meal_plan.as_deref(),
            cancellation_policy: item.cancellation_policy.as_deref(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkUpdate<'a, T> {
    hotel_code: &'a str,
    property_id: &'a str,
    updates: Vec<T>,
}

#[derive(Deserialize)]
struct ItemError {
    reference: String,
    message: String,
}

#[derive(Deserialize)]
struct BulkUpdateResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<ItemError>,
    message: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct BookingActionResponse {
    success: Option<bool>,
    message: Option<String>,
    confirmation_number: Option<String>,
    cancellation_id: Option<String>,
    booking_id: Option<String>,
}

impl BookingActionResponse {
    // An explicit `success: false` is a refusal even on HTTP 200
    fn refusal(&self) -> Option<String> {
        match self.success {
            Some(false) => Some(
                self.message
                    .clone()
                    .unwrap_or_else(|| "Request refused by MakeMyTrip".to_string()),
            ),
            _ => None,
        }
    }
}

pub struct MakeMyTripAdapter {
    config: ChannelConfig,
    credentials: MakeMyTripCredentials,
    executor: RequestExecutor,
    token: Mutex<Option<AuthToken>>,
}

impl MakeMyTripAdapter {
    pub fn new(config: ChannelConfig, sinks: Vec<Arc<dyn LogSink>>) -> Result<Self> {
        let credentials = MakeMyTripCredentials::from_credentials(&config.credentials)?;
        let executor = RequestExecutor::new(&config, "bearer", sinks)?;
        Ok(Self {
            config,
            credentials,
            executor,
            token: Mutex::new(None),
        })
    }

    /// Returns a usable access token, logging in again when the cached one
    /// is missing or about to expire. Concurrent callers share one login.
    pub async fn ensure_authenticated(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        if let Some(cached) = token.as_ref().filter(|t| t.is_valid()) {
            return Ok(cached.access_token.clone());
        }

        let fresh = self.login().await?;
        let access_token = fresh.access_token.clone();
        *token = Some(fresh);
        Ok(access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    async fn login(&self) -> Result<AuthToken> {
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static(API_KEY_HEADER), header_value(&self.credentials.api_key)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));

        let request = self
            .executor
            .client()
            .post(self.config.endpoint(AUTH_PATH))
            .headers(headers)
            .json(&LoginRequest {
                username: &self.credentials.username,
                password: &self.credentials.password,
                hotel_code: &self.credentials.hotel_code,
            });

        let response = self.executor.fetch_with_timeout(request, "authenticate").await?;
        let body: TokenResponse = self.executor.handle_json_response(response).await?;
        let ttl = body
            .expires_in
            .unwrap_or(DEFAULT_TOKEN_TTL_SECS)
            .min(MAX_TOKEN_TTL_SECS);
        tracing::debug!(channel = "makemytrip", ttl, "access token refreshed");

        Ok(AuthToken {
            access_token: body.access_token,
            expires_at: Instant::now() + Duration::from_secs(ttl),
        })
    }

    async fn send<T, B>(&self, ctx: &RequestContext, method: Method, url: Url, body: Option<&B>) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        let headers = self
            .executor
            .build_headers(self.authentication_headers().await?, JSON_CONTENT_TYPE, ctx)?;
        let mut request = self
            .executor
            .client()
            .request(method, url)
            .headers(headers);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = self.executor.fetch_with_timeout(request, &ctx.operation).await?;
        match self.executor.handle_json_response(response).await {
            Err(err @ ChannelError::Authentication { .. }) => {
                // token revoked server-side, log in afresh next time
                self.invalidate_token().await;
                Err(err)
            }
            other => other,
        }
    }

    async fn send_batch<T: Serialize + Sync, I: SyncItem + Sync>(
        &self,
        ctx: &RequestContext,
        path: &str,
        payload: &BulkUpdate<'_, T>,
        members: &[&I],
    ) -> Result<Vec<ItemRejection>> {
        let url = resource_url(&self.config.endpoint(path), &[])?;
        let response: BulkUpdateResponse = self.send(ctx, Method::POST, url, Some(payload)).await?;
        if !response.success && response.errors.is_empty() {
            let message = response
                .message
                .unwrap_or_else(|| "Batch rejected without details".to_string());
            return Err(batch_rejected(message, members));
        }
        Ok(response
            .errors
            .into_iter()
            .map(|e| ItemRejection {
                reference: e.reference,
                message: e.message,
            })
            .collect())
    }

    async fn booking_action(
        &self,
        ctx: &RequestContext,
        method: Method,
        action: Option<&str>,
        body: Value,
        booking_id: &str,
        external_booking_id: &str,
    ) -> Result<BookingActionResponse> {
        let url = self.booking_url(external_booking_id, action)?;
        let response: Option<BookingActionResponse> =
            self.send(ctx, method, url, Some(&body)).await?;
        let response = response.unwrap_or_default();
        if let Some(message) = response.refusal() {
            return Err(ChannelError::booking(
                &ctx.operation,
                booking_id,
                Some(external_booking_id),
                message,
            ));
        }
        Ok(response)
    }

    // The booking id is partner supplied and travels as one encoded segment
    fn booking_url(&self, external_booking_id: &str, action: Option<&str>) -> Result<Url> {
        let base = self.config.endpoint(BOOKINGS_PATH);
        match action {
            Some(action) => resource_url(&base, &[external_booking_id, action]),
            None => resource_url(&base, &[external_booking_id]),
        }
    }
}

#[async_trait]
impl ChannelAdapter for MakeMyTripAdapter {
    fn channel(&self) -> ChannelKind {
        ChannelKind::MakeMyTrip
    }

    fn config(&self) -> &ChannelConfig {
        &self.config
    }

    fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    async fn connect(&self) -> Result<bool> {
        self.executor.set_status(ConnectionStatus::Connecting);
        let validation = self.validate_credentials().await?;
        self.executor.set_status(if validation.valid {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Error
        });
        Ok(validation.valid)
    }

    async fn disconnect(&self) -> Result<()> {
        self.invalidate_token().await;
        self.executor.set_status(ConnectionStatus::Disconnected);
        Ok(())
    }

    async fn validate_credentials(&self) -> Result<CredentialValidation> {
        self.invalidate_token().await;
        let result = self
            .executor
            .execute("validate_credentials", |_| self.ensure_authenticated())
            .await;

        match result {
            Ok(_) => Ok(CredentialValidation::valid(Some(json!({
                "apiVersion": self.config.api_version,
                "hotelCode": self.credentials.hotel_code,
            })))),
            Err(err @ ChannelError::Authentication { .. }) => {
                Ok(CredentialValidation::invalid(err.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    async fn sync_inventory(&self, property_id: &str, items: &[InventoryData]) -> Result<SyncResult> {
        ensure_capability(
            self.config.capabilities.supports_inventory_sync,
            self.channel(),
            "inventory sync",
        )?;

        let mut run = SyncRun::new(property_id, items);
        for batch in run.chunks(BATCH_SIZE) {
            let members = run.items_of(&batch);
            let payload = BulkUpdate {
                hotel_code: &self.credentials.hotel_code,
                property_id,
                updates: members.iter().copied().map(InventoryUpdate::from).collect(),
            };
            let (payload, members) = (&payload, &members[..]);
            let outcome = self
                .executor
                .execute("sync_inventory", |ctx| async move {
                    self.send_batch(&ctx, INVENTORY_PATH, payload, members).await
                })
                .await;

            match outcome {
                Ok(rejections) => run.apply_rejections(&batch, rejections),
                Err(err) => run.fail_batch(&batch, &err),
            }
        }

        Ok(run.finish())
    }

    async fn sync_pricing(&self, property_id: &str, items: &[PricingData]) -> Result<SyncResult> {
        ensure_capability(
            self.config.capabilities.supports_pricing_sync,
            self.channel(),
            "pricing sync",
        )?;

        let mut run = SyncRun::new(property_id, items);
        for batch in run.chunks(BATCH_SIZE) {
            let members = run.items_of(&batch);
            let payload = BulkUpdate {
                hotel_code: &self.credentials.hotel_code,
                property_id,
                updates: members.iter().copied().map(RateUpdate::from).collect(),
            };
            let (payload, members) = (&payload, &members[..]);
            let outcome = self
                .executor
                .execute("sync_pricing", |ctx| async move {
                    self.send_batch(&ctx, RATES_PATH, payload, members).await
                })
                .await;

            match outcome {
                Ok(rejections) => run.apply_rejections(&batch, rejections),
                Err(err) => run.fail_batch(&batch, &err),
            }
        }

        Ok(run.finish())
    }

    async fn handle_incoming_booking(&self, booking: &BookingData) -> Result<IncomingBookingResult> {
        if let Err(err) = booking.validate() {
            return Ok(IncomingBookingResult::rejected(err.to_string()));
        }
        let external_id = booking.external_booking_id.as_str();
        let body = json!({
            "hotelCode": self.credentials.hotel_code,
            "propertyId": booking.property_id,
            "status": "ACKNOWLEDGED",
        });
        let body = &body;

        let result = self
            .executor
            .execute("handle_incoming_booking", |ctx| async move {
                self.booking_action(
                    &ctx,
                    Method::POST,
                    Some("acknowledge"),
                    body.clone(),
                    external_id,
                    external_id,
                )
                .await
            })
            .await
            .map(|_| IncomingBookingResult {
                success: true,
                booking_id: Some(channel_booking_id(self.channel(), external_id)),
                error: None,
            });

        settle(result)
    }

    async fn confirm_booking(
        &self,
        booking_id: &str,
        external_booking_id: Option<&str>,
    ) -> Result<ConfirmationResult> {
        let external_id = external_booking_id.unwrap_or(booking_id);
        let body = json!({ "hotelConfirmationNumber": booking_id });
        let body = &body;

        let result = self
            .executor
            .execute("confirm_booking", |ctx| async move {
                self.booking_action(
                    &ctx,
                    Method::POST,
                    Some("confirm"),
                    body.clone(),
                    booking_id,
                    external_id,
                )
                .await
            })
            .await
            .map(|response| ConfirmationResult {
                success: true,
                confirmation_number: response
                    .confirmation_number
                    .or_else(|| Some(booking_id.to_string())),
                error: None,
            });

        settle(result)
    }

    async fn cancel_booking(
        &self,
        booking_id: &str,
        external_booking_id: &str,
        reason: Option<&str>,
    ) -> Result<CancellationResult> {
        if !self.config.capabilities.supports_cancellations {
            return Ok(CancellationResult::rejected(format!(
                "{} does not support cancellations",
                self.channel().display_name()
            )));
        }
        let body = json!({
            "reason": reason.unwrap_or("Cancelled by property"),
            "hotelReference": booking_id,
        });
        let body = &body;

        let result = self
            .executor
            .execute("cancel_booking", |ctx| async move {
                self.booking_action(
                    &ctx,
                    Method::POST,
                    Some("cancel"),
                    body.clone(),
                    booking_id,
                    external_booking_id,
                )
                .await
            })
            .await
            .map(|response| CancellationResult {
                success: true,
                cancellation_id: response.cancellation_id,
                error: None,
            });

        settle(result)
    }

    async fn update_booking(
        &self,
        booking_id: &str,
        external_booking_id: &str,
        changes: &BookingChanges,
    ) -> Result<ModificationResult> {
        if !self.config.capabilities.supports_booking_modifications {
            return Ok(ModificationResult::rejected(format!(
                "{} does not support booking modifications",
                self.channel().display_name()
            )));
        }
        if let Err(err) = changes.validate() {
            return Ok(ModificationResult::rejected(err.to_string()));
        }
        let body = serde_json::to_value(changes)?;
        let body = &body;

        let result = self
            .executor
            .execute("update_booking", |ctx| async move {
                self.booking_action(
                    &ctx,
                    Method::PUT,
                    None,
                    body.clone(),
                    booking_id,
                    external_booking_id,
                )
                .await
            })
            .await
            .map(|response| ModificationResult {
                success: true,
                updated_booking_id: response.booking_id.or_else(|| Some(booking_id.to_string())),
                error: None,
            });

        settle(result)
    }

    async fn get_booking_status(&self, external_booking_id: &str) -> Result<BookingStatusResult> {
        let result = self
            .executor
            .execute("get_booking_status", |ctx| async move {
                let url = self.booking_url(external_booking_id, None)?;
                self.send::<Value, Value>(&ctx, Method::GET, url, None).await
            })
            .await
            .map(|details| BookingStatusResult {
                status: map_booking_status(details["status"].as_str().unwrap_or_default()),
                details: Some(details),
                error: None,
            });

        settle(result)
    }

    async fn authentication_headers(&self) -> Result<HeaderMap> {
        let token = self.ensure_authenticated().await?;
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, header_value(&format!("Bearer {token}"))?);
        headers.insert(HeaderName::from_static(API_KEY_HEADER), header_value(&self.credentials.api_key)?);
        Ok(headers)
    }
}

pub fn map_booking_status(raw: &str) -> BookingStatus {
    match raw.trim().to_ascii_uppercase().as_str() {
        "CONFIRMED" | "BOOKED" => BookingStatus::Confirmed,
        "PENDING" | "ON_HOLD" => BookingStatus::Pending,
        "CANCELLED" | "CANCELED" => BookingStatus::Cancelled,
        "MODIFIED" | "AMENDED" => BookingStatus::Modified,
        "NOSHOW" | "NO_SHOW" => BookingStatus::NoShow,
        _ => BookingStatus::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SyncStatus;
    use wiremock::{
        matchers::{body_partial_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn config(base_url: &str) -> ChannelConfig {
        let mut config = ChannelConfig::defaults_for(ChannelKind::MakeMyTrip);
        config.endpoints.production = base_url.to_string();
        config.credentials = Credentials::new()
            .with("username", "mmt-user")
            .with("password", "pw")
            .with("api_key", "key-1")
            .with("hotel_code", "H100");
        config.retry.base_delay_ms = 1;
        config.retry.jitter = false;
        config
    }

    fn adapter(base_url: &str) -> MakeMyTripAdapter {
        MakeMyTripAdapter::new(config(base_url), vec![]).unwrap()
    }

    async fn mount_login(server: &MockServer, expires_in: u64, times: u64) {
        Mock::given(method("POST"))
            .and(path(AUTH_PATH))
            .and(header("x-api-key", "key-1"))
            .and(body_partial_json(json!({"username": "mmt-user", "hotelCode": "H100"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"accessToken": "tok-1", "expiresIn": expires_in})),
            )
            .expect(times)
            .mount(server)
            .await;
    }

    fn inventory(count: usize) -> Vec<InventoryData> {
        (0..count)
            .map(|i| InventoryData {
                property_id: "P1".into(),
                room_type_id: format!("R{i}"),
                date: NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(),
                availability: 3,
                min_stay: None,
                max_stay: None,
                closed_to_arrival: false,
                closed_to_departure: false,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_token_is_cached_across_calls() {
        let server = MockServer::start().await;
        mount_login(&server, 3600, 1).await;
        Mock::given(method("POST"))
            .and(path(INVENTORY_PATH))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(3)
            .mount(&server)
            .await;

        let adapter = adapter(&server.uri());
        // 150 items make two batches of at most 100
        let first = adapter.sync_inventory("P1", &inventory(150)).await.unwrap();
        let second = adapter.sync_inventory("P1", &inventory(3)).await.unwrap();

        assert_eq!(first.status, SyncStatus::Completed);
        assert_eq!(first.success_count, 150);
        assert_eq!(second.success_count, 3);
    }

    #[tokio::test]
    async fn test_expiring_token_is_refreshed_before_each_request() {
        let server = MockServer::start().await;
        // inside the refresh skew, so never reusable
        mount_login(&server, 30, 2).await;
        Mock::given(method("GET"))
            .and(path("/v1/bookings/MMT991"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "CONFIRMED"})))
            .mount(&server)
            .await;

        let adapter = adapter(&server.uri());
        for _ in 0..2 {
            let status = adapter.get_booking_status("MMT991").await.unwrap();
            assert_eq!(status.status, BookingStatus::Confirmed);
        }
    }

    #[tokio::test]
    async fn test_unauthorized_response_drops_token() {
        let server = MockServer::start().await;
        mount_login(&server, 3600, 2).await;
        Mock::given(method("POST"))
            .and(path(RATES_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "token revoked"})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(RATES_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "errors": [{"reference": "DLX:BAR:2025-09-01", "message": "rate parity violation"}]
            })))
            .mount(&server)
            .await;

        let adapter = adapter(&server.uri());
        let items = vec![PricingData {
            property_id: "P1".into(),
            room_type_id: "DLX".into(),
            rate_plan_id: "BAR".into(),
            date: NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(),
            rate: 4500.0,
            currency: "INR".into(),
            occupancy: 2,
            extra_adult_charge: None,
            extra_child_charge: None,
            meal_plan: None,
            cancellation_policy: None,
        }];

        let first = adapter.sync_pricing("P1", &items).await.unwrap();
        assert_eq!(first.status, SyncStatus::Failed);
        assert!(first.failures[0].error.contains("token revoked"));

        let second = adapter.sync_pricing("P1", &items).await.unwrap();
        assert_eq!(second.failures[0].error, "rate parity violation");
    }

    #[tokio::test]
    async fn test_booking_lifecycle() {
        let server = MockServer::start().await;
        mount_login(&server, 3600, 1).await;
        Mock::given(method("POST"))
            .and(path("/v1/bookings/MMT42/acknowledge"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/bookings/MMT42/confirm"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"confirmationNumber": "C-77"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/bookings/MMT42/cancel"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "message": "inside free cancellation lock"
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/bookings/MMT42"))
            .and(body_partial_json(json!({"adults": 3})))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let adapter = adapter(&server.uri());

        let confirmed = adapter.confirm_booking("B42", Some("MMT42")).await.unwrap();
        assert_eq!(confirmed.confirmation_number.as_deref(), Some("C-77"));

        let cancelled = adapter.cancel_booking("B42", "MMT42", None).await.unwrap();
        assert!(!cancelled.success);
        assert!(cancelled.error.unwrap().contains("free cancellation lock"));

        let changes = BookingChanges {
            adults: Some(3),
            ..Default::default()
        };
        let modified = adapter.update_booking("B42", "MMT42", &changes).await.unwrap();
        assert!(modified.success);
        assert_eq!(modified.updated_booking_id.as_deref(), Some("B42"));

        let empty = adapter
            .update_booking("B42", "MMT42", &BookingChanges::default())
            .await
            .unwrap();
        assert!(!empty.success);
    }

    #[tokio::test]
    async fn test_unbounded_token_lifetime_is_capped() {
        let server = MockServer::start().await;
        mount_login(&server, u64::MAX, 1).await;

        let adapter = adapter(&server.uri());
        let validation = adapter.validate_credentials().await.unwrap();
        assert!(validation.valid);
        // cached, so no second login
        assert_eq!(adapter.ensure_authenticated().await.unwrap(), "tok-1");
    }

    #[tokio::test]
    async fn test_login_takes_a_rate_limit_token() {
        let server = MockServer::start().await;
        // too short to reuse, so every sync logs in first
        mount_login(&server, 30, 1).await;
        Mock::given(method("POST"))
            .and(path(INVENTORY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = config(&server.uri());
        config.rate_limits.requests_per_minute = 2;
        config.rate_limits.burst_limit = 2;
        config.retry.max_attempts = 1;
        let adapter = MakeMyTripAdapter::new(config, vec![]).unwrap();

        let first = adapter.sync_inventory("P1", &inventory(3)).await.unwrap();
        assert_eq!(first.status, SyncStatus::Completed);

        let second = adapter.sync_inventory("P1", &inventory(3)).await.unwrap();
        assert_eq!(second.status, SyncStatus::Failed);
        assert!(second.failures[0].error.contains("Rate limit exceeded"));

        assert_eq!(server.received_requests().await.unwrap().len(), 2);
        let health = adapter.get_connection_status();
        assert_eq!(health.request_count, 2);
        assert_eq!(health.status, ConnectionStatus::RateLimited);
    }

    #[tokio::test]
    async fn test_booking_id_cannot_leave_the_bookings_path() {
        let server = MockServer::start().await;
        mount_login(&server, 3600, 1).await;
        Mock::given(method("GET"))
            .and(path("/v1/partners/PX9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "CONFIRMED"})))
            .expect(0)
            .mount(&server)
            .await;

        let adapter = adapter(&server.uri());
        let escaped = adapter.get_booking_status("../partners/PX9").await.unwrap();
        assert_eq!(escaped.status, BookingStatus::Unknown);

        let lookups: Vec<String> = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.method.as_str() == "GET")
            .map(|r| r.url.path().to_string())
            .collect();
        assert_eq!(lookups, vec!["/v1/bookings/..%2Fpartners%2FPX9"]);

        let dotted = adapter.cancel_booking("B1", "..", None).await.unwrap();
        assert!(!dotted.success);
        assert!(dotted.error.unwrap().contains("Invalid identifier"));
    }

    #[tokio::test]
    async fn test_refused_batch_lists_its_items() {
        let server = MockServer::start().await;
        mount_login(&server, 3600, 1).await;
        Mock::given(method("POST"))
            .and(path(INVENTORY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "message": "hotel suspended"
            })))
            .mount(&server)
            .await;

        let adapter = adapter(&server.uri());
        let result = adapter.sync_inventory("P1", &inventory(3)).await.unwrap();
        assert_eq!(result.status, SyncStatus::Failed);
        assert_eq!(result.failure_count, 3);
        assert!(result
            .failures
            .iter()
            .all(|f| f.error == "Sync error: hotel suspended (3 failed items)"));
    }

    #[tokio::test]
    async fn test_rejected_login_is_invalid_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(AUTH_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "bad password"})))
            .mount(&server)
            .await;

        let adapter = adapter(&server.uri());
        let validation = adapter.validate_credentials().await.unwrap();
        assert!(!validation.valid);
        assert!(validation.error.unwrap().contains("bad password"));
        assert!(!adapter.connect().await.unwrap());
    }

    #[test]
    fn test_status_vocabulary() {
        assert_eq!(map_booking_status("CONFIRMED"), BookingStatus::Confirmed);
        assert_eq!(map_booking_status("on_hold"), BookingStatus::Pending);
        assert_eq!(map_booking_status("NOSHOW"), BookingStatus::NoShow);
        assert_eq!(map_booking_status(""), BookingStatus::Unknown);
    }
}
