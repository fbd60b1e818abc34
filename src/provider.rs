// Inventory provider client
// One authenticated call per invocation, no internal retry; callers decide what is retryable

use crate::config::ProviderConfig;
use crate::models::{GeoPoint, HotelRecord, OrderRecord, Region, StayRequest};
use crate::supplier::{
    BookingForm, CancellationReceipt, Envelope, FinishRequest, FinishStatus, SearchPage,
    WireBookingForm, WireCancelResult, WireDumpUrl, WireFinishStatus, WireHotelInfo,
    WireOrderInfo, WireRegionList, WireSerp,
};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{field, info_span, warn, Instrument, Span};

pub mod endpoints {
    pub const MULTICOMPLETE: &str = "/search/multicomplete/";
    pub const REGION_LOOKUP: &str = "/search/region/";
    pub const SERP_REGION: &str = "/search/serp/region/";
    pub const SERP_GEO: &str = "/search/serp/geo/";
    pub const SERP_HOTELS: &str = "/search/serp/hotels/";
    pub const HOTEL_PAGE: &str = "/search/hp/";
    pub const HOTEL_INFO: &str = "/hotel/info/";
    pub const HOTEL_DUMP: &str = "/hotel/info/dump/";
    pub const BOOKING_FORM: &str = "/hotel/order/booking/form/";
    pub const BOOKING_FINISH: &str = "/hotel/order/booking/finish/";
    pub const BOOKING_FINISH_STATUS: &str = "/hotel/order/booking/finish/status/";
    pub const ORDER_INFO: &str = "/hotel/order/info/";
    pub const ORDER_CANCEL: &str = "/hotel/order/cancel/";
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Provider request to {endpoint} failed: {status_code} - {message}")]
    RequestFailed {
        endpoint: String,
        status_code: u16,
        message: String,
    },

    #[error("Network error calling {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    #[error("Unreadable response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    #[error("Provider returned no data for {0}")]
    EmptyResponse(String),
}

impl ProviderError {
    pub fn message(&self) -> &str {
        match self {
            ProviderError::RequestFailed { message, .. }
            | ProviderError::Transport { message, .. }
            | ProviderError::Decode { message, .. } => message,
            ProviderError::EmptyResponse(endpoint) => endpoint,
        }
    }

    // The provider's signature for a region that exists but cannot be searched directly
    pub fn is_region_not_searchable(&self) -> bool {
        match self {
            ProviderError::RequestFailed { message, .. } => {
                let message = message.to_lowercase();
                message.contains("not searchable") || message.contains("region_not_searchable")
            }
            _ => false,
        }
    }
}

// The typed surface every higher component talks to
#[async_trait]
pub trait InventoryProvider: Send + Sync + 'static {
    async fn suggest_regions(&self, query: &str, language: &str)
        -> Result<Vec<Region>, ProviderError>;

    async fn find_regions(&self, name: &str, language: &str) -> Result<Vec<Region>, ProviderError>;

    async fn search_region(
        &self,
        region_id: u64,
        stay: &StayRequest,
    ) -> Result<SearchPage, ProviderError>;

    async fn search_geo(
        &self,
        center: GeoPoint,
        radius_meters: u32,
        stay: &StayRequest,
    ) -> Result<SearchPage, ProviderError>;

    async fn search_hotels(
        &self,
        hotel_ids: &[String],
        stay: &StayRequest,
    ) -> Result<SearchPage, ProviderError>;

    async fn hotel_page(&self, hotel_id: &str, stay: &StayRequest)
        -> Result<SearchPage, ProviderError>;

    async fn hotel_info(&self, hotel_id: &str, language: &str)
        -> Result<HotelRecord, ProviderError>;

    async fn dump_url(&self, language: &str) -> Result<String, ProviderError>;

    async fn booking_form(
        &self,
        partner_order_id: &str,
        book_hash: &str,
        language: &str,
        user_ip: &str,
    ) -> Result<BookingForm, ProviderError>;

    async fn finish_booking(&self, request: &FinishRequest) -> Result<(), ProviderError>;

    async fn finish_status(&self, partner_order_id: &str) -> Result<FinishStatus, ProviderError>;

    async fn order_info(&self, partner_order_id: &str) -> Result<OrderRecord, ProviderError>;

    async fn cancel_order(&self, partner_order_id: &str)
        -> Result<CancellationReceipt, ProviderError>;
}

fn stay_body(stay: &StayRequest) -> Value {
    json!({
        "checkin": stay.check_in.format("%Y-%m-%d").to_string(),
        "checkout": stay.check_out.format("%Y-%m-%d").to_string(),
        "residency": stay.residency,
        "language": stay.language,
        "currency": stay.currency,
        "guests": stay.rooms.iter().map(|room| json!({
            "adults": room.adults,
            "children": room.children,
        })).collect::<Vec<_>>(),
    })
}

fn merge(mut base: Value, extra: Value) -> Value {
    if let (Some(base), Value::Object(extra)) = (base.as_object_mut(), extra) {
        base.extend(extra);
    }
    base
}

pub struct HttpProviderClient {
    http: Client,
    config: ProviderConfig,
}

impl HttpProviderClient {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Transport {
                endpoint: config.base_url.clone(),
                message: e.to_string(),
            })?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    // Raw envelope; status checking is left to the caller
    pub async fn request_envelope<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: &Value,
    ) -> Result<Envelope<T>, ProviderError> {
        let span = info_span!(
            "provider_request",
            endpoint = endpoint,
            method = %method,
            outcome = field::Empty,
            status_code = field::Empty,
        );
        self.execute(method, endpoint, params)
            .instrument(span)
            .await
    }

    // Data of a successful call; HTTP errors and `status: error` envelopes both fail
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: &Value,
    ) -> Result<T, ProviderError> {
        let envelope = self.request_envelope::<T>(method, endpoint, params).await?;
        if envelope.is_error() {
            let message = envelope
                .error_message()
                .unwrap_or_else(|| "unknown provider error".to_string());
            warn!(endpoint, %message, "provider reported an error");
            return Err(ProviderError::RequestFailed {
                endpoint: endpoint.to_string(),
                status_code: 200,
                message,
            });
        }
        envelope
            .data
            .ok_or_else(|| ProviderError::EmptyResponse(endpoint.to_string()))
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: &Value,
    ) -> Result<Envelope<T>, ProviderError> {
        let span = Span::current();
        let url = format!("{}{}", self.config.base_url, endpoint);

        let builder = self
            .http
            .request(method.clone(), &url)
            .basic_auth(&self.config.key_id, Some(&self.config.api_key));
        let builder = if method == Method::GET {
            builder.query(&[("data", params.to_string())])
        } else {
            builder.json(params)
        };

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                span.record("outcome", "transport_error");
                warn!(error = %e, "provider request could not be sent");
                return Err(ProviderError::Transport {
                    endpoint: endpoint.to_string(),
                    message: e.to_string(),
                });
            }
        };

        let status = response.status();
        span.record("status_code", status.as_u16());
        let body = response.text().await.map_err(|e| {
            span.record("outcome", "transport_error");
            ProviderError::Transport {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            }
        })?;

        if !status.is_success() {
            span.record("outcome", "http_error");
            let message = serde_json::from_str::<Envelope<Value>>(&body)
                .ok()
                .and_then(|envelope| envelope.error_message())
                .unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                });
            warn!(status = status.as_u16(), %message, "provider request failed");
            return Err(ProviderError::RequestFailed {
                endpoint: endpoint.to_string(),
                status_code: status.as_u16(),
                message,
            });
        }

        match serde_json::from_str::<Envelope<T>>(&body) {
            Ok(envelope) => {
                let outcome = if envelope.is_error() { "provider_error" } else { "ok" };
                span.record("outcome", outcome);
                Ok(envelope)
            }
            Err(e) => {
                span.record("outcome", "decode_error");
                Err(ProviderError::Decode {
                    endpoint: endpoint.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl InventoryProvider for HttpProviderClient {
    async fn suggest_regions(
        &self,
        query: &str,
        language: &str,
    ) -> Result<Vec<Region>, ProviderError> {
        let params = json!({ "query": query, "language": language });
        let list: WireRegionList = self
            .request(Method::POST, endpoints::MULTICOMPLETE, &params)
            .await?;
        Ok(list.into_regions())
    }

    async fn find_regions(&self, name: &str, language: &str) -> Result<Vec<Region>, ProviderError> {
        let params = json!({ "name": name, "language": language });
        let list: WireRegionList = self
            .request(Method::POST, endpoints::REGION_LOOKUP, &params)
            .await?;
        Ok(list.into_regions())
    }

    async fn search_region(
        &self,
        region_id: u64,
        stay: &StayRequest,
    ) -> Result<SearchPage, ProviderError> {
        let params = merge(stay_body(stay), json!({ "region_id": region_id }));
        let serp: WireSerp = self
            .request(Method::POST, endpoints::SERP_REGION, &params)
            .await?;
        Ok(serp.into())
    }

    async fn search_geo(
        &self,
        center: GeoPoint,
        radius_meters: u32,
        stay: &StayRequest,
    ) -> Result<SearchPage, ProviderError> {
        let params = merge(
            stay_body(stay),
            json!({
                "latitude": center.latitude,
                "longitude": center.longitude,
                "radius": radius_meters,
            }),
        );
        let serp: WireSerp = self.request(Method::POST, endpoints::SERP_GEO, &params).await?;
        Ok(serp.into())
    }

    async fn search_hotels(
        &self,
        hotel_ids: &[String],
        stay: &StayRequest,
    ) -> Result<SearchPage, ProviderError> {
        let params = merge(stay_body(stay), json!({ "ids": hotel_ids }));
        let serp: WireSerp = self
            .request(Method::POST, endpoints::SERP_HOTELS, &params)
            .await?;
        Ok(serp.into())
    }

    async fn hotel_page(
        &self,
        hotel_id: &str,
        stay: &StayRequest,
    ) -> Result<SearchPage, ProviderError> {
        let params = merge(stay_body(stay), json!({ "id": hotel_id }));
        let serp: WireSerp = self
            .request(Method::POST, endpoints::HOTEL_PAGE, &params)
            .await?;
        Ok(serp.into())
    }

    async fn hotel_info(
        &self,
        hotel_id: &str,
        language: &str,
    ) -> Result<HotelRecord, ProviderError> {
        let params = json!({ "id": hotel_id, "language": language });
        let info: WireHotelInfo = self
            .request(Method::POST, endpoints::HOTEL_INFO, &params)
            .await?;
        info.into_record()
            .ok_or_else(|| ProviderError::EmptyResponse(endpoints::HOTEL_INFO.to_string()))
    }

    async fn dump_url(&self, language: &str) -> Result<String, ProviderError> {
        let params = json!({ "inventory": "all", "language": language });
        let dump: WireDumpUrl = self
            .request(Method::POST, endpoints::HOTEL_DUMP, &params)
            .await?;
        dump.url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ProviderError::EmptyResponse(endpoints::HOTEL_DUMP.to_string()))
    }

    async fn booking_form(
        &self,
        partner_order_id: &str,
        book_hash: &str,
        language: &str,
        user_ip: &str,
    ) -> Result<BookingForm, ProviderError> {
        let params = json!({
            "partner_order_id": partner_order_id,
            "book_hash": book_hash,
            "language": language,
            "user_ip": user_ip,
        });
        let form: WireBookingForm = self
            .request(Method::POST, endpoints::BOOKING_FORM, &params)
            .await?;
        Ok(form.into())
    }

    async fn finish_booking(&self, request: &FinishRequest) -> Result<(), ProviderError> {
        let params = serde_json::to_value(request).map_err(|e| ProviderError::Decode {
            endpoint: endpoints::BOOKING_FINISH.to_string(),
            message: e.to_string(),
        })?;
        // The acknowledgement carries no data, only the envelope status
        let envelope: Envelope<Value> = self
            .request_envelope(Method::POST, endpoints::BOOKING_FINISH, &params)
            .await?;
        if envelope.is_error() {
            return Err(ProviderError::RequestFailed {
                endpoint: endpoints::BOOKING_FINISH.to_string(),
                status_code: 200,
                message: envelope
                    .error_message()
                    .unwrap_or_else(|| "booking rejected".to_string()),
            });
        }
        Ok(())
    }

    async fn finish_status(&self, partner_order_id: &str) -> Result<FinishStatus, ProviderError> {
        let params = json!({ "partner_order_id": partner_order_id });
        let envelope: Envelope<WireFinishStatus> = self
            .request_envelope(Method::POST, endpoints::BOOKING_FINISH_STATUS, &params)
            .await?;
        Ok(FinishStatus::from_envelope(envelope))
    }

    async fn order_info(&self, partner_order_id: &str) -> Result<OrderRecord, ProviderError> {
        let params = json!({
            "ordering": { "ordering_type": "desc", "ordering_by": "created_at" },
            "pagination": { "page_size": "10", "page_number": "1" },
            "search": { "partner_order_ids": [partner_order_id] },
            "language": self.config.language,
        });
        let info: WireOrderInfo = self
            .request(Method::POST, endpoints::ORDER_INFO, &params)
            .await?;
        info.orders
            .into_iter()
            .next()
            .map(|order| order.into_record(partner_order_id))
            .ok_or_else(|| ProviderError::RequestFailed {
                endpoint: endpoints::ORDER_INFO.to_string(),
                status_code: 404,
                message: format!("order {} not found", partner_order_id),
            })
    }

    async fn cancel_order(
        &self,
        partner_order_id: &str,
    ) -> Result<CancellationReceipt, ProviderError> {
        let params = json!({ "partner_order_id": partner_order_id });
        let result: WireCancelResult = self
            .request(Method::POST, endpoints::ORDER_CANCEL, &params)
            .await?;
        Ok(result.into_receipt(partner_order_id))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RoomOccupancy;
    use chrono::NaiveDate;
    use wiremock::matchers::{body_partial_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HttpProviderClient {
        let config = ProviderConfig::new("1234", "secret")
            .unwrap()
            .with_base_url(server.uri());
        HttpProviderClient::new(config).unwrap()
    }

    fn stay() -> StayRequest {
        StayRequest::new(
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 6, 5).unwrap(),
            vec![RoomOccupancy::adults(2)],
        )
    }

    #[tokio::test]
    async fn test_region_search_sends_basic_auth_and_parses_rows() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(endpoints::SERP_REGION))
            .and(header_exists("authorization"))
            .and(body_partial_json(json!({ "region_id": 2114, "checkin": "2025-06-01" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "ok",
                "data": { "hotels": [{ "id": "grand_plaza", "rates": [] }], "total_hotels": 1 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let page = client_for(&server).search_region(2114, &stay()).await.unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].id, "grand_plaza");
    }

    #[tokio::test]
    async fn test_http_error_prefers_validation_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(endpoints::SERP_REGION))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "status": "error",
                "error": "invalid_params",
                "debug": { "validation_error": "region 965 is not searchable" }
            })))
            .mount(&server)
            .await;

        let error = client_for(&server).search_region(965, &stay()).await.unwrap_err();
        assert_eq!(
            error,
            ProviderError::RequestFailed {
                endpoint: endpoints::SERP_REGION.to_string(),
                status_code: 400,
                message: "region 965 is not searchable".to_string(),
            }
        );
        assert!(error.is_region_not_searchable());
    }

    #[tokio::test]
    async fn test_http_error_without_body_falls_back_to_status_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(endpoints::HOTEL_DUMP))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let error = client_for(&server).dump_url("en").await.unwrap_err();
        assert_eq!(error.message(), "Service Unavailable");
        assert!(!error.is_region_not_searchable());
    }

    #[tokio::test]
    async fn test_error_envelope_on_success_status_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(endpoints::BOOKING_FORM))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "error", "error": "rate_not_found", "data": null
            })))
            .mount(&server)
            .await;

        let error = client_for(&server)
            .booking_form("p-1", "h-1", "en", "127.0.0.1")
            .await
            .unwrap_err();
        assert!(matches!(error, ProviderError::RequestFailed { status_code: 200, .. }));
        assert_eq!(error.message(), "rate_not_found");
    }

    #[tokio::test]
    async fn test_finish_status_reads_envelope_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(endpoints::BOOKING_FINISH_STATUS))
            .and(body_partial_json(json!({ "partner_order_id": "p-1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "processing", "data": { "partner_order_id": "p-1", "percent": 40 }
            })))
            .mount(&server)
            .await;

        let status = client_for(&server).finish_status("p-1").await.unwrap();
        assert_eq!(status, FinishStatus::Processing);
    }

    #[tokio::test]
    async fn test_order_info_missing_order_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(endpoints::ORDER_INFO))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "ok", "data": { "orders": [] }
            })))
            .mount(&server)
            .await;

        let error = client_for(&server).order_info("p-404").await.unwrap_err();
        assert!(matches!(error, ProviderError::RequestFailed { status_code: 404, .. }));
    }
}
