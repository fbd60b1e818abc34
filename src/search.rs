// Hotel search orchestration
// Resolves a destination, searches by region with a geo-radius fallback, then enriches
// the first rows from the dump cache and applies the markup.

use crate::config::SearchConfig;
use crate::hotel_cache::HotelDataCache;
use crate::models::{
    GeoPoint, HotelRecord, HotelSummary, Money, QueryError, RateOffer, Region, SearchQuery,
    StayRequest,
};
use crate::provider::{InventoryProvider, ProviderError};
use crate::supplier::{SearchPage, SearchRow};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

pub const HOTEL_TOKEN_PREFIX: &str = "hotel:";

// Reference point for geo searches when nothing better is known
pub const DEFAULT_GEO_CENTER: GeoPoint = GeoPoint::new(51.5074, -0.1278);

struct KnownDestination {
    codes: &'static [&'static str],
    region_id: u64,
    label: &'static str,
    center: GeoPoint,
}

const KNOWN_DESTINATIONS: &[KnownDestination] = &[
    KnownDestination { codes: &["LON", "LHR", "GB", "UK", "LONDON"], region_id: 2114, label: "London", center: GeoPoint::new(51.5074, -0.1278) },
    KnownDestination { codes: &["PAR", "CDG", "FR", "PARIS"], region_id: 2734, label: "Paris", center: GeoPoint::new(48.8566, 2.3522) },
    KnownDestination { codes: &["NYC", "JFK", "US", "NEW YORK"], region_id: 2621, label: "New York", center: GeoPoint::new(40.7128, -74.0060) },
    KnownDestination { codes: &["DXB", "AE", "DUBAI"], region_id: 6053839, label: "Dubai", center: GeoPoint::new(25.2048, 55.2708) },
    KnownDestination { codes: &["BCN", "BARCELONA"], region_id: 1775, label: "Barcelona", center: GeoPoint::new(41.3874, 2.1686) },
    KnownDestination { codes: &["ROM", "FCO", "IT", "ROME"], region_id: 3023, label: "Rome", center: GeoPoint::new(41.9028, 12.4964) },
    KnownDestination { codes: &["BER", "DE", "BERLIN"], region_id: 1382, label: "Berlin", center: GeoPoint::new(52.5200, 13.4050) },
    KnownDestination { codes: &["AMS", "NL", "AMSTERDAM"], region_id: 2395, label: "Amsterdam", center: GeoPoint::new(52.3676, 4.9041) },
    KnownDestination { codes: &["IST", "TR", "ISTANBUL"], region_id: 1639, label: "Istanbul", center: GeoPoint::new(41.0082, 28.9784) },
    KnownDestination { codes: &["BKK", "TH", "BANGKOK"], region_id: 604, label: "Bangkok", center: GeoPoint::new(13.7563, 100.5018) },
];

fn known_by_code(token: &str) -> Option<&'static KnownDestination> {
    let token = token.trim().to_ascii_uppercase();
    KNOWN_DESTINATIONS
        .iter()
        .find(|known| known.codes.contains(&token.as_str()))
}

fn known_by_region(region_id: u64) -> Option<&'static KnownDestination> {
    KNOWN_DESTINATIONS
        .iter()
        .find(|known| known.region_id == region_id)
}

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid search: {0}")]
    InvalidQuery(#[from] QueryError),

    #[error("Destination '{0}' could not be resolved to a region")]
    DestinationNotResolved(String),

    #[error("Search failed: {0}")]
    Provider(ProviderError),

    #[error("Region {region_id} is not searchable ({region_error}); geo search also failed ({geo_error})")]
    FallbackFailed {
        region_id: u64,
        region_error: String,
        geo_error: String,
    },

    #[error("Hotel {0} has no available rates")]
    HotelUnavailable(String),
}

impl SearchError {
    pub fn user_message(&self) -> String {
        match self {
            SearchError::InvalidQuery(e) => format!("Please check your search: {}.", e),
            SearchError::DestinationNotResolved(destination) => {
                format!("We couldn't find a destination matching \"{}\".", destination)
            }
            SearchError::Provider(_) => {
                "Hotel availability is temporarily unavailable. Please try again shortly.".to_string()
            }
            SearchError::FallbackFailed { .. } => {
                "We couldn't search hotels in this area, neither by city nor by map location."
                    .to_string()
            }
            SearchError::HotelUnavailable(_) => {
                "This hotel has no rooms available for your dates.".to_string()
            }
        }
    }

    pub fn suggestions(&self) -> Vec<String> {
        match self {
            SearchError::InvalidQuery(_) => vec!["Make sure check-out is after check-in".to_string()],
            SearchError::DestinationNotResolved(_) => vec![
                "Check the spelling of the destination".to_string(),
                "Try a city name or airport code instead".to_string(),
            ],
            SearchError::Provider(_) => vec!["Try again in a few minutes".to_string()],
            SearchError::FallbackFailed { .. } => vec![
                "Try a nearby larger city".to_string(),
                "Try different dates".to_string(),
            ],
            SearchError::HotelUnavailable(_) => vec!["Try different dates".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchTarget {
    Region(u64),
    Hotels(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDestination {
    pub target: SearchTarget,
    pub label: String,
    pub center: Option<GeoPoint>,
}

impl ResolvedDestination {
    fn from_region(region: Region) -> Self {
        ResolvedDestination {
            target: SearchTarget::Region(region.id),
            label: region.name,
            center: region.center,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub success: bool,
    pub hotels: Vec<HotelSummary>,
    pub search_id: String,
    pub total_results: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFailure {
    pub success: bool,
    pub error: String,
    pub technical_error: String,
    pub suggestions: Vec<String>,
}

impl From<&SearchError> for SearchFailure {
    fn from(error: &SearchError) -> Self {
        SearchFailure {
            success: false,
            error: error.user_message(),
            technical_error: error.to_string(),
            suggestions: error.suggestions(),
        }
    }
}

// A failed search is a displayable outcome, not a crash
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SearchOutcome {
    Found(SearchResults),
    Failed(SearchFailure),
}

impl SearchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SearchOutcome::Found(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricedRate {
    pub rate: RateOffer,
    pub display_price: Money,
    pub refundable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HotelDetails {
    pub hotel: HotelSummary,
    pub rates: Vec<PricedRate>,
}

// Marked-up price rounded to the nearest whole currency unit
pub fn apply_markup(amount: f64, markup_percent: f64) -> f64 {
    (amount * (1.0 + markup_percent / 100.0)).round()
}

fn local_search_id() -> String {
    format!("local-{:016x}", rand::random::<u64>())
}

// Stable: equal prices keep provider order, unpriced hotels go last
fn rank_by_price(hotels: &mut [HotelSummary]) {
    hotels.sort_by(|a, b| match (&a.price, &b.price) {
        (Some(a), Some(b)) => a.amount.total_cmp(&b.amount),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}

pub struct SearchOrchestrator {
    provider: Arc<dyn InventoryProvider>,
    cache: Arc<HotelDataCache>,
    config: SearchConfig,
}

impl SearchOrchestrator {
    pub fn new(
        provider: Arc<dyn InventoryProvider>,
        cache: Arc<HotelDataCache>,
        config: SearchConfig,
    ) -> Self {
        Self {
            provider,
            cache,
            config,
        }
    }

    pub async fn search(&self, query: &SearchQuery) -> SearchOutcome {
        match self.try_search(query).await {
            Ok(results) => SearchOutcome::Found(results),
            Err(e) => {
                warn!(destination = %query.destination, error = %e, "hotel search failed");
                SearchOutcome::Failed(SearchFailure::from(&e))
            }
        }
    }

    #[instrument(skip(self, query), fields(destination = %query.destination))]
    pub async fn try_search(&self, query: &SearchQuery) -> Result<SearchResults, SearchError> {
        query.validate()?;
        let destination = self
            .resolve_destination(&query.destination, &query.stay.language)
            .await?;

        let page = match &destination.target {
            SearchTarget::Hotels(ids) => self
                .provider
                .search_hotels(ids, &query.stay)
                .await
                .map_err(SearchError::Provider)?,
            SearchTarget::Region(region_id) => {
                self.search_region_with_fallback(*region_id, &destination, &query.stay)
                    .await?
            }
        };

        Ok(self.build_results(page).await)
    }

    pub async fn resolve_destination(
        &self,
        token: &str,
        language: &str,
    ) -> Result<ResolvedDestination, SearchError> {
        let token = token.trim();

        if let Some(ids) = token.strip_prefix(HOTEL_TOKEN_PREFIX) {
            let ids: Vec<String> = ids
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect();
            if ids.is_empty() {
                return Err(SearchError::DestinationNotResolved(token.to_string()));
            }
            return Ok(ResolvedDestination {
                label: ids.join(", "),
                target: SearchTarget::Hotels(ids),
                center: None,
            });
        }

        if let Ok(region_id) = token.parse::<u64>() {
            return Ok(ResolvedDestination {
                target: SearchTarget::Region(region_id),
                label: token.to_string(),
                center: known_by_region(region_id).map(|known| known.center),
            });
        }

        if let Some(known) = known_by_code(token) {
            return Ok(ResolvedDestination {
                target: SearchTarget::Region(known.region_id),
                label: known.label.to_string(),
                center: Some(known.center),
            });
        }

        match self.provider.suggest_regions(token, language).await {
            Ok(regions) => {
                if let Some(region) = regions.into_iter().next() {
                    debug!(region_id = region.id, "destination resolved by autocomplete");
                    return Ok(ResolvedDestination::from_region(region));
                }
            }
            Err(e) => warn!(error = %e, "autocomplete failed, trying region name search"),
        }

        match self.provider.find_regions(token, language).await {
            Ok(regions) => regions
                .into_iter()
                .next()
                .map(ResolvedDestination::from_region)
                .ok_or_else(|| SearchError::DestinationNotResolved(token.to_string())),
            Err(e) => {
                warn!(error = %e, "region name search failed");
                Err(SearchError::DestinationNotResolved(token.to_string()))
            }
        }
    }

    fn geo_center(&self, region_id: u64, destination: &ResolvedDestination) -> GeoPoint {
        known_by_region(region_id)
            .map(|known| known.center)
            .or(destination.center)
            .unwrap_or(DEFAULT_GEO_CENTER)
    }

    async fn search_region_with_fallback(
        &self,
        region_id: u64,
        destination: &ResolvedDestination,
        stay: &StayRequest,
    ) -> Result<SearchPage, SearchError> {
        let region_error = match self.provider.search_region(region_id, stay).await {
            Ok(page) => return Ok(page),
            Err(e) if e.is_region_not_searchable() => e,
            Err(e) => return Err(SearchError::Provider(e)),
        };

        let center = self.geo_center(region_id, destination);
        info!(
            region_id,
            latitude = center.latitude,
            longitude = center.longitude,
            "region not searchable, falling back to geo search"
        );

        // An empty geo result is "no hotels found", not a failure
        self.provider
            .search_geo(center, self.config.geo_radius_meters, stay)
            .await
            .map_err(|geo_error| SearchError::FallbackFailed {
                region_id,
                region_error: region_error.message().to_string(),
                geo_error: geo_error.message().to_string(),
            })
    }

    async fn build_results(&self, page: SearchPage) -> SearchResults {
        let total_results = page.total;
        let search_id = page.search_id.unwrap_or_else(local_search_id);

        let rows = page.rows.into_iter().take(self.config.max_results);
        let mut hotels = join_all(rows.map(|row| self.summarize(row))).await;
        rank_by_price(&mut hotels);

        SearchResults {
            success: true,
            hotels,
            search_id,
            total_results,
        }
    }

    async fn find_record(&self, id: &str, hid: Option<u64>) -> Option<Arc<HotelRecord>> {
        if let Some(record) = self.cache.lookup(id).await {
            return Some(record);
        }
        match hid {
            Some(hid) => self.cache.lookup(&hid.to_string()).await,
            None => None,
        }
    }

    fn marked_up(&self, price: &Money) -> Money {
        Money::new(
            apply_markup(price.amount, self.config.markup_percent),
            price.currency.clone(),
        )
    }

    async fn summarize(&self, row: SearchRow) -> HotelSummary {
        let record = self.find_record(&row.id, row.hid).await;
        let cheapest_rate = row.cheapest_rate().cloned();
        self.summary_from(row, record.as_deref(), cheapest_rate)
    }

    fn summary_from(
        &self,
        row: SearchRow,
        record: Option<&HotelRecord>,
        cheapest_rate: Option<RateOffer>,
    ) -> HotelSummary {
        let price = cheapest_rate.as_ref().map(|rate| self.marked_up(&rate.price));
        match record {
            Some(record) => HotelSummary {
                id: row.id,
                hid: row.hid.or(record.hid),
                name: record.name.clone(),
                address: record.address.clone().or(row.address),
                star_rating: record.star_rating.or(row.star_rating),
                amenities: record.amenities.clone(),
                images: record.images.clone(),
                cheapest_rate,
                price,
                enriched: true,
            },
            None => HotelSummary {
                name: row.name.unwrap_or_else(|| row.id.clone()),
                id: row.id,
                hid: row.hid,
                address: row.address,
                star_rating: row.star_rating,
                amenities: Vec::new(),
                images: Vec::new(),
                cheapest_rate,
                price,
                enriched: false,
            },
        }
    }

    // All rates of one hotel, enriched from the dump or the static-info endpoint
    #[instrument(skip(self, stay))]
    pub async fn hotel_page(
        &self,
        hotel_id: &str,
        stay: &StayRequest,
    ) -> Result<HotelDetails, SearchError> {
        stay.validate()?;
        let page = self
            .provider
            .hotel_page(hotel_id, stay)
            .await
            .map_err(SearchError::Provider)?;
        let row = page
            .rows
            .into_iter()
            .next()
            .ok_or_else(|| SearchError::HotelUnavailable(hotel_id.to_string()))?;

        let record = match self.find_record(&row.id, row.hid).await {
            Some(record) => Some(record),
            None => match self.provider.hotel_info(hotel_id, &stay.language).await {
                Ok(record) => Some(Arc::new(record)),
                Err(e) => {
                    debug!(error = %e, "no static info for hotel");
                    None
                }
            },
        };

        let mut rates: Vec<PricedRate> = row
            .rates
            .iter()
            .map(|rate| PricedRate {
                display_price: self.marked_up(&rate.price),
                refundable: rate.is_refundable(),
                rate: rate.clone(),
            })
            .collect();
        rates.sort_by(|a, b| a.display_price.amount.total_cmp(&b.display_price.amount));

        let cheapest_rate = row.cheapest_rate().cloned();
        Ok(HotelDetails {
            hotel: self.summary_from(row, record.as_deref(), cheapest_rate),
            rates,
        })
    }
}
