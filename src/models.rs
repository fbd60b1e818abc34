// Typed entities shared by search, booking and cancellation
// Nothing here knows about the provider's wire format; see supplier.rs for that

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_CHILD_AGE: u8 = 17;

#[derive(Error, Debug, PartialEq)]
pub enum QueryError {
    #[error("Check-out {check_out} must be after check-in {check_in}")]
    InvalidDates {
        check_in: NaiveDate,
        check_out: NaiveDate,
    },

    #[error("At least one room is required")]
    NoRooms,

    #[error("Room {0} needs at least one adult")]
    NoAdults(usize),

    #[error("Room {room} has an invalid child age {age}")]
    InvalidChildAge { room: usize, age: u8 },

    #[error("Destination is empty")]
    EmptyDestination,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomOccupancy {
    pub adults: u8,
    #[serde(default)]
    pub children: Vec<u8>,
}

impl RoomOccupancy {
    pub fn adults(adults: u8) -> Self {
        Self {
            adults,
            children: Vec::new(),
        }
    }
}

// Dates, rooms and pricing context of a stay; reused by search, hotel page and booking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StayRequest {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub rooms: Vec<RoomOccupancy>,
    pub currency: String,
    pub residency: String,
    pub language: String,
}

impl StayRequest {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate, rooms: Vec<RoomOccupancy>) -> Self {
        Self {
            check_in,
            check_out,
            rooms,
            currency: "EUR".to_string(),
            residency: "gb".to_string(),
            language: "en".to_string(),
        }
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if self.check_out <= self.check_in {
            return Err(QueryError::InvalidDates {
                check_in: self.check_in,
                check_out: self.check_out,
            });
        }
        if self.rooms.is_empty() {
            return Err(QueryError::NoRooms);
        }
        for (index, room) in self.rooms.iter().enumerate() {
            if room.adults == 0 {
                return Err(QueryError::NoAdults(index));
            }
            if let Some(age) = room.children.iter().find(|age| **age > MAX_CHILD_AGE) {
                return Err(QueryError::InvalidChildAge {
                    room: index,
                    age: *age,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub destination: String,
    pub stay: StayRequest,
}

impl SearchQuery {
    pub fn new(destination: impl Into<String>, stay: StayRequest) -> Self {
        Self {
            destination: destination.into(),
            stay,
        }
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if self.destination.trim().is_empty() {
            return Err(QueryError::EmptyDestination);
        }
        self.stay.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

// Searchability is only known after a search attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: u64,
    pub name: String,
    pub country_code: Option<String>,
    pub kind: Option<String>,
    pub center: Option<GeoPoint>,
}

// One record of the bulk static dataset, immutable once indexed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotelRecord {
    pub id: String,
    pub hid: Option<u64>,
    pub name: String,
    pub address: Option<String>,
    pub star_rating: Option<u8>,
    pub amenities: Vec<String>,
    pub images: Vec<String>,
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Money {
    pub amount: f64,
    pub currency: String,
}

impl Money {
    pub fn new(amount: f64, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateOffer {
    pub match_hash: String,
    pub book_hash: Option<String>,
    pub room_name: String,
    pub meal: Option<String>,
    pub free_cancellation_before: Option<DateTime<Utc>>,
    pub daily_prices: Vec<f64>,
    pub price: Money,
    pub allotment: Option<u32>,
}

impl RateOffer {
    pub fn is_refundable(&self) -> bool {
        self.free_cancellation_before.is_some()
    }
}

// A hotel row as returned to the caller, already enriched and marked up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotelSummary {
    pub id: String,
    pub hid: Option<u64>,
    pub name: String,
    pub address: Option<String>,
    pub star_rating: Option<u8>,
    pub amenities: Vec<String>,
    pub images: Vec<String>,
    pub cheapest_rate: Option<RateOffer>,
    pub price: Option<Money>,
    pub enriched: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub amount: f64,
    pub currency: String,
    pub captured_at: DateTime<Utc>,
}

impl PriceSnapshot {
    pub fn now(amount: f64, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
            captured_at: Utc::now(),
        }
    }

    // Signed percentage change from `self` (the original) to `current`
    pub fn drift_percent(&self, current: &PriceSnapshot) -> f64 {
        if self.amount == 0.0 {
            return 0.0;
        }
        (current.amount - self.amount) / self.amount * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentOption {
    pub kind: String,
    pub amount: f64,
    pub currency: String,
    pub requires_card_data: bool,
}

impl PaymentOption {
    pub fn is_pay_now(&self) -> bool {
        self.kind == "now"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestName {
    pub first_name: String,
    pub last_name: String,
}

impl GuestName {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }

    fn is_complete(&self) -> bool {
        !self.first_name.trim().is_empty() && !self.last_name.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestContact {
    pub lead: GuestName,
    pub email: String,
    pub phone: String,
    pub comment: Option<String>,
    // One entry per booked room
    pub rooms: Vec<Vec<GuestName>>,
}

impl GuestContact {
    // Returns the first missing or malformed field
    pub fn missing_field(&self, expected_rooms: usize) -> Option<String> {
        if !self.lead.is_complete() {
            return Some("lead guest name".to_string());
        }
        let email = self.email.trim();
        let valid_email = email
            .split_once('@')
            .map(|(user, domain)| !user.is_empty() && domain.contains('.'))
            .unwrap_or(false);
        if !valid_email {
            return Some("email".to_string());
        }
        if self.phone.chars().filter(|c| c.is_ascii_digit()).count() < 6 {
            return Some("phone".to_string());
        }
        if self.rooms.len() != expected_rooms {
            return Some(format!(
                "guests for {} rooms (got {})",
                expected_rooms,
                self.rooms.len()
            ));
        }
        for (index, room) in self.rooms.iter().enumerate() {
            if room.is_empty() || !room.iter().all(GuestName::is_complete) {
                return Some(format!("guest names for room {}", index + 1));
            }
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyWindow {
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub amount: f64,
    pub currency: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CancellationTerms {
    pub free_cancellation_before: Option<DateTime<Utc>>,
    pub penalties: Vec<PenaltyWindow>,
}

impl CancellationTerms {
    // Penalty that applies if cancelled at `at`; zero inside the free window
    pub fn penalty_at(&self, at: DateTime<Utc>) -> f64 {
        if let Some(free_before) = self.free_cancellation_before {
            if at < free_before {
                return 0.0;
            }
        }
        self.penalties
            .iter()
            .find(|window| {
                window.start_at.map_or(true, |start| at >= start)
                    && window.end_at.map_or(true, |end| at < end)
            })
            .map(|window| window.amount)
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: u64,
    pub partner_order_id: String,
    pub status: String,
    pub hotel_id: Option<String>,
    pub hotel_confirmation_number: Option<String>,
    pub check_in: Option<NaiveDate>,
    pub check_out: Option<NaiveDate>,
    pub amount: Option<Money>,
    pub cancellation: CancellationTerms,
}

impl OrderRecord {
    pub fn is_cancelled(&self) -> bool {
        self.status.eq_ignore_ascii_case("cancelled")
    }
}
