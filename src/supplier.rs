// Provider wire shapes and their normalization into typed entities
// Fields the provider may omit are optional here; nothing untyped leaves this module

use crate::models::{
    CancellationTerms, GeoPoint, GuestContact, HotelRecord, Money, OrderRecord, PaymentOption,
    PenaltyWindow, RateOffer, Region,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

// Every provider response is wrapped the same way
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub debug: Option<WireDebug>,
}

impl<T> Envelope<T> {
    pub fn is_error(&self) -> bool {
        self.status.as_deref() == Some("error")
    }

    // Prefers the provider's validation message over the bare error code
    pub fn error_message(&self) -> Option<String> {
        self.debug
            .as_ref()
            .and_then(|debug| debug.validation_error.clone())
            .or_else(|| self.error.clone())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireDebug {
    pub validation_error: Option<String>,
}

// Amounts arrive as "123.45", 123.45 or null depending on endpoint
fn flexible_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Number(value)) => Some(value),
        Some(Raw::Text(text)) => text.trim().parse().ok(),
        None => None,
    })
}

fn flexible_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Number(value)) => Some(value),
        Some(Raw::Text(text)) => text.trim().parse().ok(),
        None => None,
    })
}

fn flexible_prices<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    let raw = Option::<Vec<Raw>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|price| match price {
            Raw::Number(value) => Some(value),
            Raw::Text(text) => text.trim().parse().ok(),
        })
        .collect())
}

// Provider timestamps are usually naive and implicitly UTC
pub fn parse_provider_datetime(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .map(|naive| naive.and_utc())
}

fn parse_provider_date(value: &str) -> Option<NaiveDate> {
    let date_part = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

// --- regions ---------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireRegion {
    #[serde(deserialize_with = "flexible_u64")]
    pub id: Option<u64>,
    pub name: Option<String>,
    pub country_code: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub center: Option<WireCenter>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireCenter {
    #[serde(deserialize_with = "flexible_f64")]
    pub latitude: Option<f64>,
    #[serde(deserialize_with = "flexible_f64")]
    pub longitude: Option<f64>,
}

impl WireRegion {
    pub fn into_region(self) -> Option<Region> {
        let id = self.id?;
        let center = self.center.and_then(|center| {
            Some(GeoPoint::new(center.latitude?, center.longitude?))
        });
        Some(Region {
            id,
            name: self.name.unwrap_or_default(),
            country_code: self.country_code,
            kind: self.kind,
            center,
        })
    }
}

// Autocomplete returns `{regions: [...]}`, the region search a bare list
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WireRegionList {
    Wrapped {
        #[serde(default)]
        regions: Vec<WireRegion>,
    },
    Bare(Vec<WireRegion>),
}

impl WireRegionList {
    pub fn into_regions(self) -> Vec<Region> {
        let regions = match self {
            WireRegionList::Wrapped { regions } => regions,
            WireRegionList::Bare(regions) => regions,
        };
        regions
            .into_iter()
            .filter_map(WireRegion::into_region)
            .collect()
    }
}

// --- search results --------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireSerp {
    pub hotels: Vec<WireSerpHotel>,
    #[serde(deserialize_with = "flexible_u64")]
    pub total_hotels: Option<u64>,
    pub search_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireSerpHotel {
    pub id: String,
    #[serde(deserialize_with = "flexible_u64")]
    pub hid: Option<u64>,
    pub name: Option<String>,
    pub address: Option<String>,
    #[serde(deserialize_with = "flexible_u64")]
    pub star_rating: Option<u64>,
    pub rates: Vec<WireRate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireRate {
    pub match_hash: String,
    pub book_hash: Option<String>,
    pub room_name: Option<String>,
    pub meal: Option<String>,
    #[serde(deserialize_with = "flexible_prices")]
    pub daily_prices: Vec<f64>,
    pub payment_options: WirePaymentOptions,
    #[serde(deserialize_with = "flexible_u64")]
    pub allotment: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WirePaymentOptions {
    pub payment_types: Vec<WirePaymentType>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WirePaymentType {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(deserialize_with = "flexible_f64")]
    pub amount: Option<f64>,
    #[serde(deserialize_with = "flexible_f64")]
    pub show_amount: Option<f64>,
    pub currency_code: Option<String>,
    pub show_currency_code: Option<String>,
    pub is_need_credit_card_data: bool,
    pub cancellation_penalties: Option<WireCancellationPenalties>,
}

impl WirePaymentType {
    fn price(&self) -> Option<Money> {
        let amount = self.show_amount.or(self.amount)?;
        let currency = self
            .show_currency_code
            .clone()
            .or_else(|| self.currency_code.clone())
            .unwrap_or_default();
        Some(Money::new(amount, currency))
    }
}

impl From<&WirePaymentType> for PaymentOption {
    fn from(item: &WirePaymentType) -> Self {
        let price = item.price().unwrap_or_else(|| Money::new(0.0, ""));
        PaymentOption {
            kind: item.kind.clone(),
            amount: item.amount.unwrap_or(price.amount),
            currency: item.currency_code.clone().unwrap_or(price.currency),
            requires_card_data: item.is_need_credit_card_data,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireCancellationPenalties {
    pub free_cancellation_before: Option<String>,
    pub policies: Vec<WirePenaltyPolicy>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WirePenaltyPolicy {
    pub start_at: Option<String>,
    pub end_at: Option<String>,
    #[serde(deserialize_with = "flexible_f64")]
    pub amount_show: Option<f64>,
    #[serde(deserialize_with = "flexible_f64")]
    pub amount_charge: Option<f64>,
    pub penalty: Option<WireAmount>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireAmount {
    #[serde(deserialize_with = "flexible_f64")]
    pub amount: Option<f64>,
    pub currency_code: Option<String>,
}

impl WireCancellationPenalties {
    fn into_terms(self, currency: &str) -> CancellationTerms {
        CancellationTerms {
            free_cancellation_before: self
                .free_cancellation_before
                .as_deref()
                .and_then(parse_provider_datetime),
            penalties: self
                .policies
                .into_iter()
                .map(|policy| {
                    let (amount, currency) = match policy.penalty {
                        Some(penalty) => (
                            penalty.amount.unwrap_or(0.0),
                            penalty.currency_code.unwrap_or_else(|| currency.to_string()),
                        ),
                        None => (
                            policy.amount_show.or(policy.amount_charge).unwrap_or(0.0),
                            currency.to_string(),
                        ),
                    };
                    PenaltyWindow {
                        start_at: policy.start_at.as_deref().and_then(parse_provider_datetime),
                        end_at: policy.end_at.as_deref().and_then(parse_provider_datetime),
                        amount,
                        currency,
                    }
                })
                .collect(),
        }
    }
}

impl From<WireRate> for RateOffer {
    fn from(item: WireRate) -> Self {
        // The cheapest payment type is what the guest would actually be offered
        let cheapest = item
            .payment_options
            .payment_types
            .iter()
            .filter_map(|payment| payment.price().map(|price| (payment, price)))
            .min_by(|a, b| a.1.amount.total_cmp(&b.1.amount));

        let free_cancellation_before = cheapest
            .as_ref()
            .and_then(|(payment, _)| payment.cancellation_penalties.as_ref())
            .and_then(|penalties| penalties.free_cancellation_before.as_deref())
            .and_then(parse_provider_datetime);
        let price = match cheapest {
            Some((_, price)) => price,
            None => Money::new(item.daily_prices.iter().sum(), ""),
        };

        RateOffer {
            match_hash: item.match_hash,
            book_hash: item.book_hash,
            room_name: item.room_name.unwrap_or_default(),
            meal: item.meal,
            free_cancellation_before,
            daily_prices: item.daily_prices,
            price,
            allotment: item.allotment.map(|count| count as u32),
        }
    }
}

// A provider search row, normalized but not yet enriched
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRow {
    pub id: String,
    pub hid: Option<u64>,
    pub name: Option<String>,
    pub address: Option<String>,
    pub star_rating: Option<u8>,
    pub rates: Vec<RateOffer>,
}

impl SearchRow {
    pub fn cheapest_rate(&self) -> Option<&RateOffer> {
        self.rates
            .iter()
            .min_by(|a, b| a.price.amount.total_cmp(&b.price.amount))
    }
}

impl From<WireSerpHotel> for SearchRow {
    fn from(item: WireSerpHotel) -> Self {
        SearchRow {
            id: item.id,
            hid: item.hid,
            name: item.name,
            address: item.address,
            star_rating: item.star_rating.map(|stars| stars.min(5) as u8),
            rates: item.rates.into_iter().map(RateOffer::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    pub rows: Vec<SearchRow>,
    pub total: usize,
    pub search_id: Option<String>,
}

impl From<WireSerp> for SearchPage {
    fn from(item: WireSerp) -> Self {
        let rows: Vec<SearchRow> = item.hotels.into_iter().map(SearchRow::from).collect();
        SearchPage {
            total: item.total_hotels.map(|total| total as usize).unwrap_or(rows.len()),
            rows,
            search_id: item.search_id,
        }
    }
}

// --- static hotel data (info endpoint and dump lines share one shape) ------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireHotelInfo {
    pub id: Option<String>,
    #[serde(deserialize_with = "flexible_u64")]
    pub hid: Option<u64>,
    pub name: Option<String>,
    pub address: Option<String>,
    #[serde(deserialize_with = "flexible_u64")]
    pub star_rating: Option<u64>,
    pub amenity_groups: Vec<WireAmenityGroup>,
    pub amenities: Vec<String>,
    pub images: Vec<WireImage>,
    #[serde(deserialize_with = "flexible_f64")]
    pub latitude: Option<f64>,
    #[serde(deserialize_with = "flexible_f64")]
    pub longitude: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireAmenityGroup {
    pub group_name: Option<String>,
    pub amenities: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WireImage {
    Url(String),
    Object { url: String },
}

impl WireHotelInfo {
    // None when the record has no usable identifier
    pub fn into_record(self) -> Option<HotelRecord> {
        let id = match (self.id, self.hid) {
            (Some(id), _) if !id.is_empty() => id,
            (_, Some(hid)) => hid.to_string(),
            _ => return None,
        };

        let mut amenities: Vec<String> = self
            .amenity_groups
            .into_iter()
            .flat_map(|group| group.amenities)
            .chain(self.amenities)
            .collect();
        amenities.dedup();

        let location = match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(GeoPoint::new(latitude, longitude)),
            _ => None,
        };

        Some(HotelRecord {
            name: self.name.unwrap_or_else(|| id.clone()),
            id,
            hid: self.hid,
            address: self.address.filter(|address| !address.trim().is_empty()),
            star_rating: self.star_rating.map(|stars| stars.min(5) as u8),
            amenities,
            images: self
                .images
                .into_iter()
                .map(|image| match image {
                    WireImage::Url(url) => url,
                    WireImage::Object { url } => url,
                })
                .collect(),
            location,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireDumpUrl {
    pub url: Option<String>,
    pub last_update: Option<String>,
}

// --- booking ---------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireBookingForm {
    #[serde(deserialize_with = "flexible_u64")]
    pub order_id: Option<u64>,
    pub partner_order_id: Option<String>,
    #[serde(deserialize_with = "flexible_u64")]
    pub item_id: Option<u64>,
    pub payment_types: Vec<WirePaymentType>,
}

// Result of one booking-form call (used for prebook and recheck)
#[derive(Debug, Clone, PartialEq)]
pub struct BookingForm {
    pub order_id: Option<u64>,
    pub item_id: Option<u64>,
    pub payment_options: Vec<PaymentOption>,
}

impl BookingForm {
    // Price of the stay as validated by the provider
    pub fn validated_price(&self) -> Option<Money> {
        self.payment_options
            .iter()
            .find(|option| option.is_pay_now())
            .or_else(|| self.payment_options.first())
            .map(|option| Money::new(option.amount, option.currency.clone()))
    }
}

impl From<WireBookingForm> for BookingForm {
    fn from(item: WireBookingForm) -> Self {
        BookingForm {
            order_id: item.order_id,
            item_id: item.item_id,
            payment_options: item.payment_types.iter().map(PaymentOption::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FinishRequest {
    pub user: FinishUser,
    pub supplier_data: FinishSupplierData,
    pub partner: FinishPartner,
    pub language: String,
    pub rooms: Vec<FinishRoom>,
    pub payment_type: FinishPaymentType,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FinishUser {
    pub email: String,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FinishSupplierData {
    pub first_name_original: String,
    pub last_name_original: String,
    pub phone: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FinishPartner {
    pub partner_order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FinishRoom {
    pub guests: Vec<FinishGuest>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FinishGuest {
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FinishPaymentType {
    #[serde(rename = "type")]
    pub kind: String,
    pub amount: String,
    pub currency_code: String,
}

impl FinishRequest {
    pub fn new(
        partner_order_id: &str,
        contact: &GuestContact,
        payment: &PaymentOption,
        payment_reference: &str,
        language: &str,
    ) -> Self {
        FinishRequest {
            user: FinishUser {
                email: contact.email.trim().to_string(),
                phone: contact.phone.trim().to_string(),
                comment: contact.comment.clone(),
            },
            supplier_data: FinishSupplierData {
                first_name_original: contact.lead.first_name.clone(),
                last_name_original: contact.lead.last_name.clone(),
                phone: contact.phone.trim().to_string(),
                email: contact.email.trim().to_string(),
            },
            partner: FinishPartner {
                partner_order_id: partner_order_id.to_string(),
                comment: Some(format!("payment:{}", payment_reference)),
            },
            language: language.to_string(),
            rooms: contact
                .rooms
                .iter()
                .map(|guests| FinishRoom {
                    guests: guests
                        .iter()
                        .map(|guest| FinishGuest {
                            first_name: guest.first_name.clone(),
                            last_name: guest.last_name.clone(),
                        })
                        .collect(),
                })
                .collect(),
            payment_type: FinishPaymentType {
                kind: payment.kind.clone(),
                amount: format!("{:.2}", payment.amount),
                currency_code: payment.currency.clone(),
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireFinishStatus {
    pub partner_order_id: Option<String>,
    #[serde(deserialize_with = "flexible_u64")]
    pub percent: Option<u64>,
    pub data_3ds: Option<WireThreeDs>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireThreeDs {
    pub action_url: Option<String>,
    pub method: Option<String>,
    pub data: BTreeMap<String, serde_json::Value>,
}

// Everything the caller needs to run a 3-D Secure challenge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreeDsChallenge {
    pub action_url: Option<String>,
    pub method: Option<String>,
    pub fields: BTreeMap<String, String>,
}

impl From<WireThreeDs> for ThreeDsChallenge {
    fn from(item: WireThreeDs) -> Self {
        ThreeDsChallenge {
            action_url: item.action_url,
            method: item.method,
            fields: item
                .data
                .into_iter()
                .map(|(key, value)| {
                    let value = match value {
                        serde_json::Value::String(text) => text,
                        other => other.to_string(),
                    };
                    (key, value)
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FinishStatus {
    Ok,
    Processing,
    ThreeDs(Option<ThreeDsChallenge>),
    Error(String),
}

impl FinishStatus {
    pub fn from_envelope(envelope: Envelope<WireFinishStatus>) -> Self {
        let status = envelope.status.clone().unwrap_or_default();
        match status.as_str() {
            "ok" => FinishStatus::Ok,
            "processing" => FinishStatus::Processing,
            "3ds" => FinishStatus::ThreeDs(
                envelope
                    .data
                    .and_then(|data| data.data_3ds)
                    .map(ThreeDsChallenge::from),
            ),
            "error" => FinishStatus::Error(
                envelope
                    .error_message()
                    .unwrap_or_else(|| "unknown error".to_string()),
            ),
            // Anything unrecognised is not an outcome; keep polling
            _ => FinishStatus::Processing,
        }
    }
}

// --- orders ----------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireOrderInfo {
    pub orders: Vec<WireOrder>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireOrder {
    #[serde(deserialize_with = "flexible_u64")]
    pub order_id: Option<u64>,
    pub partner_data: Option<WirePartnerData>,
    pub status: Option<String>,
    pub hotel_data: Option<WireOrderHotel>,
    pub supplier_data: Option<WireOrderSupplier>,
    pub checkin_at: Option<String>,
    pub checkout_at: Option<String>,
    pub amount_payable: Option<WireAmount>,
    pub amount_sell: Option<WireAmount>,
    pub cancellation_info: Option<WireCancellationPenalties>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WirePartnerData {
    pub order_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireOrderHotel {
    pub id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireOrderSupplier {
    pub confirmation_id: Option<String>,
}

impl WireOrder {
    pub fn into_record(self, fallback_partner_order_id: &str) -> OrderRecord {
        let amount = self
            .amount_sell
            .or(self.amount_payable)
            .and_then(|amount| Some(Money::new(amount.amount?, amount.currency_code.unwrap_or_default())));
        let currency = amount
            .as_ref()
            .map(|money| money.currency.clone())
            .unwrap_or_default();

        OrderRecord {
            order_id: self.order_id.unwrap_or_default(),
            partner_order_id: self
                .partner_data
                .and_then(|partner| partner.order_id)
                .unwrap_or_else(|| fallback_partner_order_id.to_string()),
            status: self.status.unwrap_or_else(|| "unknown".to_string()),
            hotel_id: self.hotel_data.and_then(|hotel| hotel.id),
            hotel_confirmation_number: self
                .supplier_data
                .and_then(|supplier| supplier.confirmation_id),
            check_in: self.checkin_at.as_deref().and_then(parse_provider_date),
            check_out: self.checkout_at.as_deref().and_then(parse_provider_date),
            amount,
            cancellation: self
                .cancellation_info
                .map(|info| info.into_terms(&currency))
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WireCancelResult {
    pub amount_payable: Option<WireAmount>,
    pub amount_refunded: Option<WireAmount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancellationReceipt {
    pub partner_order_id: String,
    pub amount_payable: Option<Money>,
    pub amount_refunded: Option<Money>,
}

impl WireCancelResult {
    pub fn into_receipt(self, partner_order_id: &str) -> CancellationReceipt {
        let to_money = |amount: WireAmount| {
            Some(Money::new(amount.amount?, amount.currency_code.unwrap_or_default()))
        };
        CancellationReceipt {
            partner_order_id: partner_order_id.to_string(),
            amount_payable: self.amount_payable.and_then(to_money),
            amount_refunded: self.amount_refunded.and_then(to_money),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use test_case::test_case;

    #[test]
    fn test_serp_rows_normalize_string_prices() {
        let json = r#"{
            "hotels": [{
                "id": "grand_plaza",
                "hid": 8473,
                "rates": [{
                    "match_hash": "m-1",
                    "book_hash": "h-1",
                    "room_name": "Double Room",
                    "meal": "breakfast",
                    "daily_prices": ["60.00", "60.00"],
                    "allotment": 3,
                    "payment_options": {"payment_types": [
                        {"type": "hotel", "amount": "130.00", "show_amount": "130.00", "currency_code": "EUR", "show_currency_code": "EUR"},
                        {"type": "now", "amount": "120.00", "show_amount": "120.00", "currency_code": "EUR", "show_currency_code": "EUR",
                         "cancellation_penalties": {"free_cancellation_before": "2025-05-25T09:00:00", "policies": []}}
                    ]}
                }]
            }],
            "total_hotels": "42"
        }"#;

        let serp: WireSerp = serde_json::from_str(json).unwrap();
        let page = SearchPage::from(serp);
        assert_eq!(page.total, 42);
        assert_eq!(page.rows.len(), 1);

        let rate = page.rows[0].cheapest_rate().unwrap();
        assert_eq!(rate.price, Money::new(120.0, "EUR"));
        assert_eq!(rate.book_hash.as_deref(), Some("h-1"));
        assert_eq!(rate.daily_prices, vec![60.0, 60.0]);
        assert_eq!(
            rate.free_cancellation_before,
            Some(Utc.with_ymd_and_hms(2025, 5, 25, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_region_list_shapes() {
        let wrapped: WireRegionList =
            serde_json::from_str(r#"{"regions": [{"id": 2114, "name": "London", "type": "City"}], "hotels": []}"#)
                .unwrap();
        let bare: WireRegionList =
            serde_json::from_str(r#"[{"id": "2734", "name": "Paris"}, {"name": "no id"}]"#).unwrap();

        assert_eq!(wrapped.into_regions()[0].id, 2114);
        let regions = bare.into_regions();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].name, "Paris");
    }

    #[test]
    fn test_hotel_info_flattens_amenity_groups() {
        let json = r#"{"id": "beach_resort", "hid": 77, "name": "Beach Resort", "address": "",
            "star_rating": 4, "amenity_groups": [{"group_name": "General", "amenities": ["Wi-Fi", "Pool"]}],
            "images": ["https://cdn/{size}/a.jpg", {"url": "https://cdn/b.jpg"}]}"#;
        let record = serde_json::from_str::<WireHotelInfo>(json)
            .unwrap()
            .into_record()
            .unwrap();

        assert_eq!(record.amenities, vec!["Wi-Fi", "Pool"]);
        assert_eq!(record.images.len(), 2);
        assert_eq!(record.address, None);
        assert_eq!(record.star_rating, Some(4));
    }

    #[derive(Debug, Deserialize)]
    struct Ack {
        id: u64,
    }

    #[test]
    fn test_envelope_payload_without_default() {
        let present: Envelope<Ack> = serde_json::from_str(r#"{"data": {"id": 7}, "status": "ok"}"#).unwrap();
        assert_eq!(present.data.map(|ack| ack.id), Some(7));

        let missing: Envelope<Ack> = serde_json::from_str(r#"{"status": "error", "error": "timeout"}"#).unwrap();
        assert!(missing.data.is_none());
        assert!(missing.is_error());
        assert_eq!(missing.error_message().as_deref(), Some("timeout"));
    }

    #[test]
    fn test_finish_status_mapping() {
        let ok: Envelope<WireFinishStatus> =
            serde_json::from_str(r#"{"data": {"partner_order_id": "p-1"}, "status": "ok"}"#).unwrap();
        assert_eq!(FinishStatus::from_envelope(ok), FinishStatus::Ok);

        let challenge: Envelope<WireFinishStatus> = serde_json::from_str(
            r#"{"data": {"data_3ds": {"action_url": "https://bank/3ds", "method": "POST", "data": {"PaReq": "abc", "TermUrl": 5}}}, "status": "3ds"}"#,
        )
        .unwrap();
        match FinishStatus::from_envelope(challenge) {
            FinishStatus::ThreeDs(Some(challenge)) => {
                assert_eq!(challenge.fields.get("PaReq").map(String::as_str), Some("abc"));
                assert_eq!(challenge.fields.get("TermUrl").map(String::as_str), Some("5"));
            }
            other => panic!("unexpected status {:?}", other),
        }

        let failed: Envelope<WireFinishStatus> =
            serde_json::from_str(r#"{"data": null, "status": "error", "error": "soldout"}"#).unwrap();
        assert_eq!(
            FinishStatus::from_envelope(failed),
            FinishStatus::Error("soldout".to_string())
        );
    }

    #[test_case(r#"{"data": null}"# ; "missing status")]
    #[test_case(r#"{"data": null, "status": "pending"}"# ; "unknown status")]
    fn test_unrecognised_finish_status_keeps_processing(body: &str) {
        let envelope: Envelope<WireFinishStatus> = serde_json::from_str(body).unwrap();
        assert_eq!(FinishStatus::from_envelope(envelope), FinishStatus::Processing);
    }

    #[test]
    fn test_order_record_normalization() {
        let json = r#"{"orders": [{
            "order_id": 9911, "partner_data": {"order_id": "p-55"}, "status": "completed",
            "hotel_data": {"id": "grand_plaza"}, "supplier_data": {"confirmation_id": "HCN-1"},
            "checkin_at": "2025-06-01", "checkout_at": "2025-06-05",
            "amount_sell": {"amount": "480.00", "currency_code": "EUR"},
            "cancellation_info": {"free_cancellation_before": "2025-05-25T09:00:00",
                "policies": [{"start_at": "2025-05-25T09:00:00", "end_at": null, "penalty": {"amount": "120.00", "currency_code": "EUR"}}]}
        }]}"#;
        let info: WireOrderInfo = serde_json::from_str(json).unwrap();
        let record = info.orders.into_iter().next().unwrap().into_record("fallback");

        assert_eq!(record.order_id, 9911);
        assert_eq!(record.partner_order_id, "p-55");
        assert_eq!(record.hotel_confirmation_number.as_deref(), Some("HCN-1"));
        assert_eq!(record.amount, Some(Money::new(480.0, "EUR")));
        assert_eq!(record.cancellation.penalties[0].amount, 120.0);
        assert_eq!(record.check_in, NaiveDate::from_ymd_opt(2025, 6, 1));
    }
}
