// Main library file for the hotel inventory integration layer

// Configuration and shared entities
pub mod config;
pub mod models;

// Provider boundary: wire shapes and the HTTP client
pub mod provider;
pub mod supplier;

// Components built on top of the provider
pub mod booking;
pub mod cancellation;
pub mod hotel_cache;
pub mod payment;
pub mod search;

// Re-export key types for convenience
pub use booking::{
    BookingError, BookingOrder, BookingState, BookingStep, BookingTransactionCoordinator,
    PollOutcome, PrebookOutcome, RecheckOutcome,
};
pub use cancellation::{CancellationError, CancellationManager, PenaltyQuote};
pub use config::{
    BookingConfig, ConfigError, DumpConfig, PaymentConfig, PollConfig, ProviderConfig,
    SearchConfig,
};
pub use hotel_cache::{CachePhase, CacheStatsReport, DumpError, HotelDataCache, ProviderDumpSource};
pub use models::{
    CancellationTerms, GuestContact, GuestName, HotelRecord, HotelSummary, Money, OrderRecord,
    PaymentOption, PriceSnapshot, RateOffer, Region, RoomOccupancy, SearchQuery, StayRequest,
};
pub use payment::{HttpPaymentProcessor, PaymentError, PaymentIntent, PaymentProcessor};
pub use provider::{HttpProviderClient, InventoryProvider, ProviderError};
pub use search::{HotelDetails, SearchError, SearchOrchestrator, SearchOutcome};
pub use supplier::{CancellationReceipt, FinishStatus, ThreeDsChallenge};
