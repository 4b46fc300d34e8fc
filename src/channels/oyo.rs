// OYO partner API: snake_case JSON over REST with static key headers

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{
    header::{HeaderMap, HeaderName},
    Method, Url,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

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

pub const BATCH_SIZE: usize = 50;

const JSON_CONTENT_TYPE: &str = "application/json";
const API_KEY_HEADER: &str = "x-api-key";
const PARTNER_ID_HEADER: &str = "x-partner-id";

pub struct OyoCredentials {
    pub api_key: String,
    pub partner_id: String,
}

impl OyoCredentials {
    pub fn from_credentials(credentials: &Credentials) -> Result<Self> {
        Ok(Self {
            api_key: credentials.require("api_key")?.to_string(),
            partner_id: credentials.require("partner_id")?.to_string(),
        })
    }
}

#[derive(Serialize)]
struct InventoryRow<'a> {
    r#ref: String,
    room_category_id: &'a str,
    date: NaiveDate,
    available_rooms: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_nights: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_nights: Option<u32>,
    stop_arrival: bool,
    stop_departure: bool,
}

impl<'a> From<&'a InventoryData> for InventoryRow<'a> {
    fn from(item: &'a InventoryData) -> Self {
        Self {
            r#ref: item.item_id(),
            room_category_id: &item.room_type_id,
            date: item.date,
            available_rooms: item.availability,
            min_nights: item.min_stay,
            max_nights: item.max_stay,
            stop_arrival: item.closed_to_arrival,
            stop_departure: item.closed_to_departure,
        }
    }
}

#[derive(Serialize)]
struct PricingRow<'a> {
    r#ref: String,
    room_category_id: &'a str,
    rate_plan_id: &'a str,
    date: NaiveDate,
    price: f64,
    currency: &'a str,
    occupancy: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    extra_adult_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extra_child_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    meal_plan: Option<&'a str>,
}

impl<'a> From<&'a PricingData> for PricingRow<'a> {
    fn from(item: &'a PricingData) -> Self {
        Self {
            r#ref: item.item_id(),
            room_category_id: &item.room_type_id,
            rate_plan_id: &item.rate_plan_id,
            date: item.date,
            price: item.rate,
            currency: &item.currency,
            occupancy: item.occupancy,
            extra_adult_price: item.extra_adult_charge,
            extra_child_price: item.extra_child_charge,
            meal_plan: item.meal_plan.as_deref(),
        }
    }
}

#[derive(Serialize)]
struct Batch<'a, T> {
    property_id: &'a str,
    partner_id: &'a str,
    data: Vec<T>,
}

#[derive(Deserialize)]
struct FailedRow {
    r#ref: String,
    reason: String,
}

#[derive(Deserialize)]
struct BatchResponse {
    status: String,
    #[serde(default)]
    failed: Vec<FailedRow>,
    message: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct BookingResponse {
    status: Option<String>,
    message: Option<String>,
    confirmation_code: Option<String>,
    cancellation_id: Option<String>,
    booking_id: Option<String>,
}

impl BookingResponse {
    fn refusal(&self) -> Option<String> {
        match self.status.as_deref() {
            Some("error") | Some("failed") | Some("rejected") => Some(
                self.message
                    .clone()
                    .unwrap_or_else(|| "Request refused by OYO".to_string()),
            ),
            _ => None,
        }
    }
}

pub struct OyoAdapter {
    config: ChannelConfig,
    credentials: OyoCredentials,
    executor: RequestExecutor,
}

impl OyoAdapter {
    pub fn new(config: ChannelConfig, sinks: Vec<Arc<dyn LogSink>>) -> Result<Self> {
        let credentials = OyoCredentials::from_credentials(&config.credentials)?;
        let executor = RequestExecutor::new(&config, "api_key", sinks)?;
        Ok(Self {
            config,
            credentials,
            executor,
        })
    }

    // Versioned API URL. Ids from partners or callers are encoded segment by segment.
    fn api_url(&self, segments: &[&str]) -> Result<Url> {
        let base = self.config.endpoint(&format!("/api/{}", self.config.api_version));
        resource_url(&base, segments)
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
        self.executor.handle_json_response(response).await
    }

    async fn send_batch<T: Serialize + Sync, I: SyncItem + Sync>(
        &self,
        ctx: &RequestContext,
        url: &Url,
        batch: &Batch<'_, T>,
        members: &[&I],
    ) -> Result<Vec<ItemRejection>> {
        let response: BatchResponse = self.send(ctx, Method::POST, url.clone(), Some(batch)).await?;
        if response.status.eq_ignore_ascii_case("failed") && response.failed.is_empty() {
            let message = response
                .message
                .unwrap_or_else(|| "Batch rejected without details".to_string());
            return Err(batch_rejected(message, members));
        }
        Ok(response
            .failed
            .into_iter()
            .map(|row| ItemRejection {
                reference: row.r#ref,
                message: row.reason,
            })
            .collect())
    }

    async fn booking_action(
        &self,
        ctx: &RequestContext,
        method: Method,
        url: Url,
        body: Option<&Value>,
        booking_id: &str,
        external_booking_id: &str,
    ) -> Result<BookingResponse> {
        let response: Option<BookingResponse> = self.send(ctx, method, url, body).await?;
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
}

#[async_trait]
impl ChannelAdapter for OyoAdapter {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Oyo
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
        self.executor.set_status(ConnectionStatus::Disconnected);
        Ok(())
    }

    async fn validate_credentials(&self) -> Result<CredentialValidation> {
        let url = self.api_url(&["partners", self.credentials.partner_id.as_str()])?;
        let url = &url;
        let result = self
            .executor
            .execute("validate_credentials", |ctx| async move {
                self.send::<Value, Value>(&ctx, Method::GET, url.clone(), None).await
            })
            .await;

        match result {
            Ok(details) => Ok(CredentialValidation::valid(Some(json!({
                "apiVersion": self.config.api_version,
                "partnerId": self.credentials.partner_id,
                "partner": details,
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

        let url = self.api_url(&["inventory"])?;
        let url = &url;
        let mut run = SyncRun::new(property_id, items);
        for chunk in run.chunks(BATCH_SIZE) {
            let members = run.items_of(&chunk);
            let batch = Batch {
                property_id,
                partner_id: &self.credentials.partner_id,
                data: members.iter().copied().map(InventoryRow::from).collect(),
            };
            let (batch, members) = (&batch, &members[..]);
            let outcome = self
                .executor
                .execute("sync_inventory", |ctx| async move {
                    self.send_batch(&ctx, url, batch, members).await
                })
                .await;

            match outcome {
                Ok(rejections) => run.apply_rejections(&chunk, rejections),
                Err(err) => run.fail_batch(&chunk, &err),
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

        let url = self.api_url(&["pricing"])?;
        let url = &url;
        let mut run = SyncRun::new(property_id, items);
        for chunk in run.chunks(BATCH_SIZE) {
            let members = run.items_of(&chunk);
            let batch = Batch {
                property_id,
                partner_id: &self.credentials.partner_id,
                data: members.iter().copied().map(PricingRow::from).collect(),
            };
            let (batch, members) = (&batch, &members[..]);
            let outcome = self
                .executor
                .execute("sync_pricing", |ctx| async move {
                    self.send_batch(&ctx, url, batch, members).await
                })
                .await;

            match outcome {
                Ok(rejections) => run.apply_rejections(&chunk, rejections),
                Err(err) => run.fail_batch(&chunk, &err),
            }
        }

        Ok(run.finish())
    }

    async fn handle_incoming_booking(&self, booking: &BookingData) -> Result<IncomingBookingResult> {
        if let Err(err) = booking.validate() {
            return Ok(IncomingBookingResult::rejected(err.to_string()));
        }
        let external_id = booking.external_booking_id.as_str();
        let body = json!({ "property_id": booking.property_id });
        let body = &body;

        let result = self
            .executor
            .execute("handle_incoming_booking", |ctx| async move {
                let url = self.api_url(&["bookings", external_id, "ack"])?;
                self.booking_action(&ctx, Method::POST, url, Some(body), external_id, external_id)
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
        let body = json!({ "status": "confirmed", "hotel_reference": booking_id });
        let body = &body;

        let result = self
            .executor
            .execute("confirm_booking", |ctx| async move {
                let url = self.api_url(&["bookings", external_id, "status"])?;
                self.booking_action(&ctx, Method::PATCH, url, Some(body), booking_id, external_id)
                    .await
            })
            .await
            .map(|response| ConfirmationResult {
                success: true,
                confirmation_number: response
                    .confirmation_code
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
        let body = json!({ "reason": reason, "hotel_reference": booking_id });
        let body = &body;

        let result = self
            .executor
            .execute("cancel_booking", |ctx| async move {
                let url = self.api_url(&["bookings", external_booking_id, "cancel"])?;
                self.booking_action(
                    &ctx,
                    Method::POST,
                    url,
                    Some(body),
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
        let body = json!({
            "check_in": changes.check_in,
            "check_out": changes.check_out,
            "room_category_id": changes.room_type_id,
            "rate_plan_id": changes.rate_plan_id,
            "rooms": changes.rooms,
            "adults": changes.adults,
            "children": changes.children,
            "total_amount": changes.total_amount,
            "special_requests": changes.special_requests,
        });
        // only send what changed
        let body = match body {
            Value::Object(map) => Value::Object(map.into_iter().filter(|(_, v)| !v.is_null()).collect()),
            other => other,
        };
        let body = &body;

        let result = self
            .executor
            .execute("update_booking", |ctx| async move {
                let url = self.api_url(&["bookings", external_booking_id])?;
                self.booking_action(
                    &ctx,
                    Method::PATCH,
                    url,
                    Some(body),
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
                let url = self.api_url(&["bookings", external_booking_id])?;
                self.send::<Value, Value>(&ctx, Method::GET, url, None).await
            })
            .await
            .map(|details| {
                let status = map_booking_status(
                    details["booking_status"]
                        .as_str()
                        .or_else(|| details["status"].as_str())
                        .unwrap_or_default(),
                );
                BookingStatusResult {
                    status,
                    details: Some(details),
                    error: None,
                }
            });

        settle(result)
    }

    async fn authentication_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(API_KEY_HEADER),
            header_value(&self.credentials.api_key)?,
        );
        headers.insert(
            HeaderName::from_static(PARTNER_ID_HEADER),
            header_value(&self.credentials.partner_id)?,
        );
        Ok(headers)
    }
}

pub fn map_booking_status(raw: &str) -> BookingStatus {
    match raw.trim().to_ascii_lowercase().as_str() {
        "booked" | "confirmed" | "checked_in" | "checked_out" => BookingStatus::Confirmed,
        "awaiting_confirmation" | "pending" => BookingStatus::Pending,
        "cancelled" | "canceled" => BookingStatus::Cancelled,
        "amended" | "modified" => BookingStatus::Modified,
        "no_show" => BookingStatus::NoShow,
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
        let mut config = ChannelConfig::defaults_for(ChannelKind::Oyo);
        config.endpoints.production = base_url.to_string();
        config.credentials = Credentials::new()
            .with("api_key", "oyo-key")
            .with("partner_id", "PX9");
        config.retry.base_delay_ms = 1;
        config.retry.jitter = false;
        config
    }

    fn inventory(count: usize) -> Vec<InventoryData> {
        (0..count)
            .map(|i| InventoryData {
                property_id: "P1".into(),
                room_type_id: format!("CAT{i}"),
                date: NaiveDate::from_ymd_opt(2025, 10, 5).unwrap(),
                availability: 2,
                min_stay: None,
                max_stay: None,
                closed_to_arrival: false,
                closed_to_departure: false,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_three_items_complete() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/inventory"))
            .and(header("x-api-key", "oyo-key"))
            .and(header("x-partner-id", "PX9"))
            .and(body_partial_json(json!({"property_id": "P1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = OyoAdapter::new(config(&server.uri()), vec![]).unwrap();
        let result = adapter.sync_inventory("P1", &inventory(3)).await.unwrap();

        assert!(result.success);
        assert_eq!(result.status, SyncStatus::Completed);
        assert_eq!(result.success_count, 3);
        assert_eq!(result.failure_count, 0);
    }

    #[tokio::test]
    async fn test_outage_fails_every_item_of_the_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/inventory"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "partial",
                "failed": [{"ref": "CAT3:2025-10-05", "reason": "unknown category"}]
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v2/inventory"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let adapter = OyoAdapter::new(config(&server.uri()), vec![]).unwrap();
        // 60 items: one batch of 50 then one of 10
        let result = adapter.sync_inventory("P1", &inventory(60)).await.unwrap();

        assert_eq!(result.status, SyncStatus::Partial);
        assert_eq!(result.failure_count, 11);
        assert_eq!(result.success_count, 49);
        assert_eq!(result.failures[0].item_id, "CAT3:2025-10-05");
        assert!(result.failures[1].error.contains("500"));
    }

    #[tokio::test]
    async fn test_capability_disabled_sync_is_validation_error() {
        let mut config = config("http://127.0.0.1:9");
        config.capabilities.supports_pricing_sync = false;
        let adapter = OyoAdapter::new(config, vec![]).unwrap();

        let err = adapter.sync_pricing("P1", &[]).await.unwrap_err();
        assert!(matches!(err, ChannelError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_update_sends_only_changed_fields() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/v2/bookings/OYO-77"))
            .and(body_partial_json(json!({"adults": 3})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok", "booking_id": "B77-v2"})))
            .mount(&server)
            .await;

        let adapter = OyoAdapter::new(config(&server.uri()), vec![]).unwrap();
        let changes = BookingChanges {
            adults: Some(3),
            ..Default::default()
        };
        let result = adapter.update_booking("B77", "OYO-77", &changes).await.unwrap();
        assert!(result.success);
        assert_eq!(result.updated_booking_id.as_deref(), Some("B77-v2"));

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body, json!({"adults": 3}));
    }

    #[tokio::test]
    async fn test_update_without_capability_makes_no_call() {
        let server = MockServer::start().await;
        let mut config = config(&server.uri());
        config.capabilities.supports_booking_modifications = false;
        let adapter = OyoAdapter::new(config, vec![]).unwrap();

        let changes = BookingChanges {
            rooms: Some(2),
            ..Default::default()
        };
        let result = adapter.update_booking("B1", "OYO-1", &changes).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("does not support"));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_and_confirmation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/bookings/OYO-5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"booking_status": "awaiting_confirmation"})))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/api/v2/bookings/OYO-5/status"))
            .and(body_partial_json(json!({"status": "confirmed"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"confirmation_code": "OC-1"})))
            .mount(&server)
            .await;

        let adapter = OyoAdapter::new(config(&server.uri()), vec![]).unwrap();

        let status = adapter.get_booking_status("OYO-5").await.unwrap();
        assert_eq!(status.status, BookingStatus::Pending);

        let confirmed = adapter.confirm_booking("B5", Some("OYO-5")).await.unwrap();
        assert_eq!(confirmed.confirmation_number.as_deref(), Some("OC-1"));

        // partner lookup is not mounted, so the server answers 404
        let connection_test = adapter.test_connection().await;
        assert!(!connection_test.success);
        assert!(connection_test.error.unwrap().contains("404"));
    }

    #[tokio::test]
    async fn test_connection_reports_latency() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/partners/PX9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "Test Partner"})))
            .mount(&server)
            .await;

        let adapter = OyoAdapter::new(config(&server.uri()), vec![]).unwrap();
        let result = adapter.test_connection().await;
        assert!(result.success);
        assert!(result.error.is_none());

        assert!(adapter.connect().await.unwrap());
        let health = adapter.get_connection_status();
        assert_eq!(health.status, ConnectionStatus::Connected);
        assert_eq!(health.api_version, "v2");
        assert_eq!(health.request_count, 2);
    }

    #[tokio::test]
    async fn test_booking_id_is_a_single_path_segment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/partners/PX9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"booking_status": "confirmed"})))
            .expect(0)
            .mount(&server)
            .await;

        let adapter = OyoAdapter::new(config(&server.uri()), vec![]).unwrap();
        let status = adapter.get_booking_status("../partners/PX9").await.unwrap();
        assert_eq!(status.status, BookingStatus::Unknown);
        assert!(status.error.is_some());

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url.path(), "/api/v2/bookings/..%2Fpartners%2FPX9");

        // "." and ".." would be dropped from the path, so they never leave the adapter
        let ack = adapter.confirm_booking("B1", Some("..")).await.unwrap();
        assert!(!ack.success);
        assert!(ack.error.unwrap().contains("Invalid identifier"));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_batch_without_rows_fails_every_item() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/inventory"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "failed",
                "message": "property not mapped"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = OyoAdapter::new(config(&server.uri()), vec![]).unwrap();
        let result = adapter.sync_inventory("P1", &inventory(3)).await.unwrap();

        assert_eq!(result.status, SyncStatus::Failed);
        assert_eq!(result.failure_count, 3);
        assert_eq!(result.failed_item_ids(), vec!["CAT0:2025-10-05", "CAT1:2025-10-05", "CAT2:2025-10-05"]);
        assert!(result.failures[0].error.contains("property not mapped (3 failed items)"));
    }

    #[test]
    fn test_status_vocabulary() {
        assert_eq!(map_booking_status("checked_in"), BookingStatus::Confirmed);
        assert_eq!(map_booking_status("amended"), BookingStatus::Modified);
        assert_eq!(map_booking_status("no_show"), BookingStatus::NoShow);
        assert_eq!(map_booking_status("mystery"), BookingStatus::Unknown);
    }
}
