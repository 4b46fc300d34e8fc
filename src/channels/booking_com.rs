// Booking.com connectivity over OTA XML messages with Basic auth

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use chrono::{NaiveDate, Utc};
use quick_xml::{
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
    Reader, Writer,
};
use reqwest::header::{HeaderMap, AUTHORIZATION};
use serde_json::json;

use crate::{
    adapter::{
        batch_rejected, channel_booking_id, ensure_capability, settle, ChannelAdapter, ItemRejection,
        Rejected, SyncItem, SyncRun,
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

const OTA_NAMESPACE: &str = "http://www.opentravel.org/OTA/2003/05";
const XML_CONTENT_TYPE: &str = "application/xml";

const PING_PATH: &str = "/hotels/ota/OTA_Ping";
const AVAIL_NOTIF_PATH: &str = "/hotels/ota/OTA_HotelAvailNotif";
const RATE_NOTIF_PATH: &str = "/hotels/ota/OTA_HotelRateAmountNotif";
const NOTIF_REPORT_PATH: &str = "/hotels/ota/OTA_NotifReport";
const RES_MODIFY_PATH: &str = "/hotels/ota/OTA_HotelResModifyNotif";
const CANCEL_PATH: &str = "/hotels/ota/OTA_Cancel";
const READ_PATH: &str = "/hotels/ota/OTA_Read";

// UniqueID/@Type for a reservation, ResID_Type for the hotel's own reference
const RESERVATION_ID_TYPE: &str = "14";
const HOTEL_RES_ID_TYPE: &str = "10";

// AgeQualifyingCode values
const ADULT_AGE_CODE: &str = "10";
const CHILD_AGE_CODE: &str = "8";

pub struct BookingComCredentials {
    pub username: String,
    pub password: String,
}

impl BookingComCredentials {
    pub fn from_credentials(credentials: &Credentials) -> Result<Self> {
        Ok(Self {
            username: credentials.require("username")?.to_string(),
            password: credentials.require("password")?.to_string(),
        })
    }

    pub fn basic_auth(&self) -> String {
        let encoded = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {encoded}")
    }
}

pub struct BookingComAdapter {
    config: ChannelConfig,
    credentials: BookingComCredentials,
    executor: RequestExecutor,
}

impl BookingComAdapter {
    pub fn new(config: ChannelConfig, sinks: Vec<Arc<dyn LogSink>>) -> Result<Self> {
        let credentials = BookingComCredentials::from_credentials(&config.credentials)?;
        let executor = RequestExecutor::new(&config, "basic", sinks)?;
        Ok(Self {
            config,
            credentials,
            executor,
        })
    }

    async fn post_xml(&self, ctx: &RequestContext, path: &str, body: String) -> Result<OtaResponse> {
        let headers = self
            .executor
            .build_headers(self.authentication_headers().await?, XML_CONTENT_TYPE, ctx)?;
        let request = self
            .executor
            .client()
            .post(self.config.endpoint(path))
            .headers(headers)
            .body(Bytes::from(body));

        let response = self.executor.fetch_with_timeout(request, &ctx.operation).await?;
        let text = self.executor.handle_text_response(response).await?;
        OtaResponse::parse(&text)
    }

    // Sends one sync batch and splits the reply into per-record rejections
    async fn send_batch<I: SyncItem + Sync>(
        &self,
        ctx: &RequestContext,
        path: &str,
        body: String,
        members: &[&I],
    ) -> Result<Vec<ItemRejection>> {
        let response = self.post_xml(ctx, path, body).await?;
        response
            .ensure_accepted()
            .map_err(|message| batch_rejected(message, members))?;
        Ok(response.record_rejections())
    }

    // Sends a reservation message; any OTA error becomes a booking error
    async fn send_reservation(
        &self,
        ctx: &RequestContext,
        path: &str,
        body: String,
        booking_id: &str,
        external_booking_id: &str,
    ) -> Result<OtaResponse> {
        let response = self.post_xml(ctx, path, body).await?;
        response.ensure_accepted().map_err(|message| {
            ChannelError::booking(&ctx.operation, booking_id, Some(external_booking_id), message)
        })?;
        Ok(response)
    }

    fn root_attributes<'a>(&'a self, ctx: &'a RequestContext, timestamp: &'a str) -> [(&'a str, &'a str); 4] {
        [
            ("xmlns", OTA_NAMESPACE),
            ("Version", self.config.api_version.as_str()),
            ("TimeStamp", timestamp),
            ("EchoToken", ctx.correlation_id.as_str()),
        ]
    }

    fn ping_request(&self, ctx: &RequestContext) -> Result<String> {
        let timestamp = ota_timestamp();
        let mut doc = OtaXml::new()?;
        doc.start("OTA_PingRQ", &self.root_attributes(ctx, &timestamp))?
            .text("EchoData", "ping")?
            .end("OTA_PingRQ")?;
        doc.finish()
    }

    fn avail_notif_request(
        &self,
        ctx: &RequestContext,
        property_id: &str,
        items: &[&InventoryData],
    ) -> Result<String> {
        let timestamp = ota_timestamp();
        let mut doc = OtaXml::new()?;
        doc.start("OTA_HotelAvailNotifRQ", &self.root_attributes(ctx, &timestamp))?
            .start("AvailStatusMessages", &[("HotelCode", property_id)])?;

        for item in items {
            let date = item.date.to_string();
            let limit = item.availability.to_string();
            let locator = item.item_id();
            doc.start(
                "AvailStatusMessage",
                &[("BookingLimit", limit.as_str()), ("LocatorID", locator.as_str())],
            )?
            .empty(
                "StatusApplicationControl",
                &[
                    ("Start", date.as_str()),
                    ("End", date.as_str()),
                    ("InvTypeCode", item.room_type_id.as_str()),
                ],
            )?;

            if item.min_stay.is_some() || item.max_stay.is_some() {
                doc.start("LengthsOfStay", &[])?;
                if let Some(min) = item.min_stay {
                    let min = min.to_string();
                    doc.empty(
                        "LengthOfStay",
                        &[("Time", min.as_str()), ("MinMaxMessageType", "SetMinLOS")],
                    )?;
                }
                if let Some(max) = item.max_stay {
                    let max = max.to_string();
                    doc.empty(
                        "LengthOfStay",
                        &[("Time", max.as_str()), ("MinMaxMessageType", "SetMaxLOS")],
                    )?;
                }
                doc.end("LengthsOfStay")?;
            }

            doc.empty(
                "RestrictionStatus",
                &[("Restriction", "Arrival"), ("Status", open_or_close(item.closed_to_arrival))],
            )?
            .empty(
                "RestrictionStatus",
                &[("Restriction", "Departure"), ("Status", open_or_close(item.closed_to_departure))],
            )?
            .end("AvailStatusMessage")?;
        }

        doc.end("AvailStatusMessages")?.end("OTA_HotelAvailNotifRQ")?;
        doc.finish()
    }

    fn rate_notif_request(
        &self,
        ctx: &RequestContext,
        property_id: &str,
        items: &[&PricingData],
    ) -> Result<String> {
        let timestamp = ota_timestamp();
        let mut doc = OtaXml::new()?;
        doc.start("OTA_HotelRateAmountNotifRQ", &self.root_attributes(ctx, &timestamp))?
            .start("RateAmountMessages", &[("HotelCode", property_id)])?;

        for item in items {
            let date = item.date.to_string();
            let locator = item.item_id();
            let amount = format!("{:.2}", item.rate);
            let guests = item.occupancy.to_string();

            doc.start("RateAmountMessage", &[("LocatorID", locator.as_str())])?
                .empty(
                    "StatusApplicationControl",
                    &[
                        ("Start", date.as_str()),
                        ("End", date.as_str()),
                        ("InvTypeCode", item.room_type_id.as_str()),
                        ("RatePlanCode", item.rate_plan_id.as_str()),
                    ],
                )?
                .start("Rates", &[])?
                .start("Rate", &[])?
                .start("BaseByGuestAmts", &[])?
                .empty(
                    "BaseByGuestAmt",
                    &[
                        ("AmountAfterTax", amount.as_str()),
                        ("CurrencyCode", item.currency.as_str()),
                        ("NumberOfGuests", guests.as_str()),
                    ],
                )?
                .end("BaseByGuestAmts")?;

            let extras: Vec<(&str, String)> = [
                (ADULT_AGE_CODE, item.extra_adult_charge),
                (CHILD_AGE_CODE, item.extra_child_charge),
            ]
            .into_iter()
            .filter_map(|(code, charge)| charge.map(|c| (code, format!("{c:.2}"))))
            .collect();

            if !extras.is_empty() {
                doc.start("AdditionalGuestAmounts", &[])?;
                for (code, charge) in &extras {
                    doc.empty(
                        "AdditionalGuestAmount",
                        &[
                            ("AgeQualifyingCode", *code),
                            ("Amount", charge.as_str()),
                            ("CurrencyCode", item.currency.as_str()),
                        ],
                    )?;
                }
                doc.end("AdditionalGuestAmounts")?;
            }
            if let Some(meal_plan) = &item.meal_plan {
                doc.empty("MealsIncluded", &[("MealPlanCodes", meal_plan.as_str())])?;
            }

            doc.end("Rate")?.end("Rates")?.end("RateAmountMessage")?;
        }

        doc.end("RateAmountMessages")?.end("OTA_HotelRateAmountNotifRQ")?;
        doc.finish()
    }

    // Acknowledges or commits a reservation through OTA_NotifReportRQ
    fn notif_report_request(
        &self,
        ctx: &RequestContext,
        res_status: &str,
        external_booking_id: &str,
        hotel_reference: Option<&str>,
    ) -> Result<String> {
        let timestamp = ota_timestamp();
        let mut doc = OtaXml::new()?;
        doc.start("OTA_NotifReportRQ", &self.root_attributes(ctx, &timestamp))?
            .empty("Success", &[])?
            .start("NotifDetails", &[])?
            .start("HotelNotifReport", &[])?
            .start("HotelReservations", &[])?
            .start("HotelReservation", &[("ResStatus", res_status)])?
            .empty(
                "UniqueID",
                &[("Type", RESERVATION_ID_TYPE), ("ID", external_booking_id)],
            )?;

        if let Some(reference) = hotel_reference {
            doc.start("ResGlobalInfo", &[])?
                .start("HotelReservationIDs", &[])?
                .empty(
                    "HotelReservationID",
                    &[("ResID_Type", HOTEL_RES_ID_TYPE), ("ResID_Value", reference)],
                )?
                .end("HotelReservationIDs")?
                .end("ResGlobalInfo")?;
        }

        doc.end("HotelReservation")?
            .end("HotelReservations")?
            .end("HotelNotifReport")?
            .end("NotifDetails")?
            .end("OTA_NotifReportRQ")?;
        doc.finish()
    }

    fn cancel_request(
        &self,
        ctx: &RequestContext,
        external_booking_id: &str,
        reason: Option<&str>,
    ) -> Result<String> {
        let timestamp = ota_timestamp();
        let mut doc = OtaXml::new()?;
        let mut attributes = self.root_attributes(ctx, &timestamp).to_vec();
        attributes.push(("CancelType", "Cancel"));

        doc.start("OTA_CancelRQ", &attributes)?.empty(
            "UniqueID",
            &[("Type", RESERVATION_ID_TYPE), ("ID", external_booking_id)],
        )?;
        if let Some(reason) = reason {
            doc.start("Reasons", &[])?.text("Reason", reason)?.end("Reasons")?;
        }
        doc.end("OTA_CancelRQ")?;
        doc.finish()
    }

    fn modify_request(
        &self,
        ctx: &RequestContext,
        external_booking_id: &str,
        changes: &BookingChanges,
    ) -> Result<String> {
        let timestamp = ota_timestamp();
        let mut doc = OtaXml::new()?;
        doc.start("OTA_HotelResModifyNotifRQ", &self.root_attributes(ctx, &timestamp))?
            .start("HotelResModifies", &[])?
            .start("HotelResModify", &[("ResStatus", "Modify")])?
            .empty(
                "UniqueID",
                &[("Type", RESERVATION_ID_TYPE), ("ID", external_booking_id)],
            )?
            .start("RoomStays", &[])?
            .start("RoomStay", &[])?;

        if changes.room_type_id.is_some() || changes.rate_plan_id.is_some() || changes.rooms.is_some() {
            let rooms = changes.rooms.map(|r| r.to_string());
            let mut attributes = vec![];
            if let Some(room) = &changes.room_type_id {
                attributes.push(("RoomTypeCode", room.as_str()));
            }
            if let Some(plan) = &changes.rate_plan_id {
                attributes.push(("RatePlanCode", plan.as_str()));
            }
            if let Some(rooms) = &rooms {
                attributes.push(("NumberOfUnits", rooms.as_str()));
            }
            doc.empty("RoomRate", &attributes)?;
        }

        if changes.adults.is_some() || changes.children.is_some() {
            doc.start("GuestCounts", &[])?;
            for (code, count) in [(ADULT_AGE_CODE, changes.adults), (CHILD_AGE_CODE, changes.children)] {
                if let Some(count) = count {
                    let count = count.to_string();
                    doc.empty(
                        "GuestCount",
                        &[("AgeQualifyingCode", code), ("Count", count.as_str())],
                    )?;
                }
            }
            doc.end("GuestCounts")?;
        }

        if changes.check_in.is_some() || changes.check_out.is_some() {
            let start = changes.check_in.map(|d| d.to_string());
            let end = changes.check_out.map(|d| d.to_string());
            let mut attributes = vec![];
            if let Some(start) = &start {
                attributes.push(("Start", start.as_str()));
            }
            if let Some(end) = &end {
                attributes.push(("End", end.as_str()));
            }
            doc.empty("TimeSpan", &attributes)?;
        }

        if let Some(total) = changes.total_amount {
            let total = format!("{total:.2}");
            doc.empty("Total", &[("AmountAfterTax", total.as_str())])?;
        }
        if let Some(requests) = &changes.special_requests {
            doc.start("SpecialRequests", &[])?
                .text("SpecialRequest", requests)?
                .end("SpecialRequests")?;
        }

        doc.end("RoomStay")?
            .end("RoomStays")?
            .end("HotelResModify")?
            .end("HotelResModifies")?
            .end("OTA_HotelResModifyNotifRQ")?;
        doc.finish()
    }

    fn read_request(&self, ctx: &RequestContext, external_booking_id: &str) -> Result<String> {
        let timestamp = ota_timestamp();
        let mut doc = OtaXml::new()?;
        doc.start("OTA_ReadRQ", &self.root_attributes(ctx, &timestamp))?
            .start("ReadRequests", &[])?
            .start("ReadRequest", &[])?
            .empty(
                "UniqueID",
                &[("Type", RESERVATION_ID_TYPE), ("ID", external_booking_id)],
            )?
            .end("ReadRequest")?
            .end("ReadRequests")?
            .end("OTA_ReadRQ")?;
        doc.finish()
    }
}

#[async_trait]
impl ChannelAdapter for BookingComAdapter {
    fn channel(&self) -> ChannelKind {
        ChannelKind::BookingCom
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
        // Basic auth keeps no session on the OTA side
        self.executor.set_status(ConnectionStatus::Disconnected);
        Ok(())
    }

    async fn validate_credentials(&self) -> Result<CredentialValidation> {
        let result = self
            .executor
            .execute("validate_credentials", |ctx| async move {
                let body = self.ping_request(&ctx)?;
                let response = self.post_xml(&ctx, PING_PATH, body).await?;
                response.ensure_accepted().map_err(|message| {
                    ChannelError::authentication("basic", message)
                })?;
                Ok::<_, ChannelError>(response)
            })
            .await;

        match result {
            Ok(response) => Ok(CredentialValidation::valid(Some(json!({
                "apiVersion": self.config.api_version,
                "echoData": response.echo_data,
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
        for batch in group_by_date(run.valid_indices(), |i| items[i].date) {
            let batch_items = run.items_of(&batch);
            let batch_items = &batch_items;
            let outcome = self
                .executor
                .execute("sync_inventory", |ctx| async move {
                    let body = self.avail_notif_request(&ctx, property_id, batch_items)?;
                    self.send_batch(&ctx, AVAIL_NOTIF_PATH, body, batch_items).await
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
        for batch in group_by_date(run.valid_indices(), |i| items[i].date) {
            let batch_items = run.items_of(&batch);
            let batch_items = &batch_items;
            let outcome = self
                .executor
                .execute("sync_pricing", |ctx| async move {
                    let body = self.rate_notif_request(&ctx, property_id, batch_items)?;
                    self.send_batch(&ctx, RATE_NOTIF_PATH, body, batch_items).await
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

        let result = self
            .executor
            .execute("handle_incoming_booking", |ctx| async move {
                let body = self.notif_report_request(&ctx, "Book", external_id, None)?;
                self.send_reservation(&ctx, NOTIF_REPORT_PATH, body, external_id, external_id)
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

        let result = self
            .executor
            .execute("confirm_booking", |ctx| async move {
                let body = self.notif_report_request(&ctx, "Commit", external_id, Some(booking_id))?;
                self.send_reservation(&ctx, NOTIF_REPORT_PATH, body, booking_id, external_id)
                    .await
            })
            .await
            .map(|response| ConfirmationResult {
                success: true,
                confirmation_number: Some(
                    response
                        .reservation_ids
                        .into_iter()
                        .next()
                        .unwrap_or_else(|| booking_id.to_string()),
                ),
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

        let result = self
            .executor
            .execute("cancel_booking", |ctx| async move {
                let body = self.cancel_request(&ctx, external_booking_id, reason)?;
                self.send_reservation(&ctx, CANCEL_PATH, body, booking_id, external_booking_id)
                    .await
            })
            .await
            .map(|response| CancellationResult {
                success: true,
                cancellation_id: response
                    .unique_ids
                    .into_iter()
                    .find(|id| id != external_booking_id)
                    .or_else(|| Some(external_booking_id.to_string())),
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

        let result = self
            .executor
            .execute("update_booking", |ctx| async move {
                let body = self.modify_request(&ctx, external_booking_id, changes)?;
                self.send_reservation(&ctx, RES_MODIFY_PATH, body, booking_id, external_booking_id)
                    .await
            })
            .await
            .map(|_| ModificationResult {
                success: true,
                updated_booking_id: Some(booking_id.to_string()),
                error: None,
            });

        settle(result)
    }

    async fn get_booking_status(&self, external_booking_id: &str) -> Result<BookingStatusResult> {
        let result = self
            .executor
            .execute("get_booking_status", |ctx| async move {
                let body = self.read_request(&ctx, external_booking_id)?;
                self.send_reservation(&ctx, READ_PATH, body, external_booking_id, external_booking_id)
                    .await
            })
            .await
            .map(|response| {
                let raw = response.res_status.unwrap_or_default();
                BookingStatusResult {
                    status: map_reservation_status(&raw),
                    details: Some(json!({
                        "resStatus": raw,
                        "reservationIds": response.reservation_ids,
                    })),
                    error: None,
                }
            });

        settle(result)
    }

    async fn authentication_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, header_value(&self.credentials.basic_auth())?);
        Ok(headers)
    }
}

pub fn map_reservation_status(raw: &str) -> BookingStatus {
    match raw.trim().to_ascii_lowercase().as_str() {
        "book" | "commit" | "confirmed" => BookingStatus::Confirmed,
        "modify" | "modified" => BookingStatus::Modified,
        "cancel" | "cancelled" => BookingStatus::Cancelled,
        "pending" | "requested" => BookingStatus::Pending,
        "noshow" | "no_show" | "no-show" => BookingStatus::NoShow,
        _ => BookingStatus::Unknown,
    }
}

// One batch per stay date, dates ascending, input order kept within a date
fn group_by_date(indices: &[usize], date_of: impl Fn(usize) -> NaiveDate) -> Vec<Vec<usize>> {
    let mut groups: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
    for &index in indices {
        groups.entry(date_of(index)).or_default().push(index);
    }
    groups.into_values().collect()
}

fn open_or_close(closed: bool) -> &'static str {
    if closed {
        "Close"
    } else {
        "Open"
    }
}

fn ota_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

// Thin wrapper over the quick-xml writer. Attribute values and text are escaped.
struct OtaXml {
    writer: Writer<Vec<u8>>,
}

impl OtaXml {
    fn new() -> Result<Self> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        Ok(Self { writer })
    }

    fn start(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<&mut Self> {
        let element = BytesStart::new(name).with_attributes(attributes.iter().copied());
        self.writer.write_event(Event::Start(element))?;
        Ok(self)
    }

    fn empty(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<&mut Self> {
        let element = BytesStart::new(name).with_attributes(attributes.iter().copied());
        self.writer.write_event(Event::Empty(element))?;
        Ok(self)
    }

    fn text(&mut self, name: &str, text: &str) -> Result<&mut Self> {
        self.writer.write_event(Event::Start(BytesStart::new(name)))?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(self)
    }

    fn end(&mut self, name: &str) -> Result<&mut Self> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(self)
    }

    fn finish(self) -> Result<String> {
        String::from_utf8(self.writer.into_inner())
            .map_err(|e| ChannelError::connection(format!("Invalid XML output: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct OtaError {
    record_id: Option<String>,
    code: Option<String>,
    message: String,
}

// The parts of an OTA response this adapter acts on
#[derive(Debug, Default)]
struct OtaResponse {
    success: bool,
    errors: Vec<OtaError>,
    res_status: Option<String>,
    unique_ids: Vec<String>,
    reservation_ids: Vec<String>,
    echo_data: Option<String>,
}

impl OtaResponse {
    fn parse(xml: &str) -> Result<Self> {
        fn attr(element: &BytesStart, key: &[u8]) -> Result<Option<String>> {
            for attribute in element.attributes() {
                let attribute = attribute?;
                if attribute.key.as_ref() == key {
                    return Ok(Some(attribute.unescape_value()?.into_owned()));
                }
            }
            Ok(None)
        }

        fn error_of(element: &BytesStart, text: String) -> Result<OtaError> {
            let short_text = attr(element, b"ShortText")?;
            let message = match (text.trim(), short_text) {
                ("", Some(short)) => short,
                ("", None) => "Unspecified error".to_string(),
                (text, _) => text.to_string(),
            };
            Ok(OtaError {
                record_id: attr(element, b"RecordID")?,
                code: attr(element, b"Code")?,
                message,
            })
        }

        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);
        let mut parsed = Self::default();

        loop {
            match reader.read_event()? {
                Event::Start(e) if e.local_name().as_ref() == b"Error" => {
                    let text = reader.read_text(e.name())?.into_owned();
                    parsed.errors.push(error_of(&e, text)?);
                }
                Event::Empty(e) if e.local_name().as_ref() == b"Error" => {
                    parsed.errors.push(error_of(&e, String::new())?);
                }
                Event::Start(e) if e.local_name().as_ref() == b"EchoData" => {
                    parsed.echo_data = Some(reader.read_text(e.name())?.into_owned());
                }
                Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                    b"Success" => parsed.success = true,
                    b"HotelReservation" if parsed.res_status.is_none() => {
                        parsed.res_status = attr(&e, b"ResStatus")?;
                    }
                    b"UniqueID" => parsed.unique_ids.extend(attr(&e, b"ID")?),
                    b"HotelReservationID" => {
                        parsed.reservation_ids.extend(attr(&e, b"ResID_Value")?)
                    }
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(parsed)
    }

    // Errors not tied to a record reject the whole message
    fn ensure_accepted(&self) -> std::result::Result<(), String> {
        let general: Vec<String> = self
            .errors
            .iter()
            .filter(|e| e.record_id.is_none())
            .map(|e| match &e.code {
                Some(code) => format!("[{code}] {}", e.message),
                None => e.message.clone(),
            })
            .collect();

        if !general.is_empty() {
            return Err(general.join("; "));
        }
        if !self.success && self.errors.is_empty() {
            return Err("Response carried neither Success nor Errors".to_string());
        }
        Ok(())
    }

    fn record_rejections(&self) -> Vec<ItemRejection> {
        self.errors
            .iter()
            .filter_map(|e| {
                e.record_id.as_ref().map(|record| ItemRejection {
                    reference: record.clone(),
                    message: e.message.clone(),
                })
            })
            .collect()
    }
}
