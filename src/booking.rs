// Booking transaction coordinator
// One strict forward state machine per booking attempt:
// prebook -> guests -> recheck -> payment -> finish -> status polling -> retrieval.

use crate::config::BookingConfig;
use crate::models::{GuestContact, OrderRecord, PaymentOption, PriceSnapshot, QueryError, StayRequest};
use crate::payment::{to_minor_units, PaymentError, PaymentIntent, PaymentIntentRequest, PaymentProcessor};
use crate::provider::{InventoryProvider, ProviderError};
use crate::supplier::{BookingForm, FinishRequest, FinishStatus, ThreeDsChallenge};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingState {
    Created,
    Prebooked,
    GuestDetailsCollected,
    Rechecked,
    PaymentPrepared,
    Submitted,
    PendingThreeDs,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStep {
    Prebook,
    CollectGuests,
    Recheck,
    PreparePayment,
    Submit,
    PollStatus,
    AwaitThreeDs,
    Confirm,
    Fail,
}

impl fmt::Display for BookingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BookingState::Created => "created",
            BookingState::Prebooked => "prebooked",
            BookingState::GuestDetailsCollected => "guest_details_collected",
            BookingState::Rechecked => "rechecked",
            BookingState::PaymentPrepared => "payment_prepared",
            BookingState::Submitted => "submitted",
            BookingState::PendingThreeDs => "pending_3ds",
            BookingState::Confirmed => "confirmed",
            BookingState::Failed => "failed",
        };
        f.write_str(name)
    }
}

impl fmt::Display for BookingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BookingStep::Prebook => "prebook",
            BookingStep::CollectGuests => "collect guests",
            BookingStep::Recheck => "recheck",
            BookingStep::PreparePayment => "prepare payment",
            BookingStep::Submit => "finish",
            BookingStep::PollStatus => "poll status",
            BookingStep::AwaitThreeDs => "await 3-D Secure",
            BookingStep::Confirm => "confirm",
            BookingStep::Fail => "fail",
        };
        f.write_str(name)
    }
}

impl BookingState {
    pub fn is_terminal(self) -> bool {
        matches!(self, BookingState::Confirmed | BookingState::Failed)
    }

    // The only place a state changes; anything not listed is out of order
    pub fn advance(self, step: BookingStep) -> Result<BookingState, BookingError> {
        use BookingState::*;

        let next = match (self, step) {
            (Created, BookingStep::Prebook) => Prebooked,
            (Prebooked | GuestDetailsCollected, BookingStep::CollectGuests) => GuestDetailsCollected,
            (GuestDetailsCollected, BookingStep::Recheck) => Rechecked,
            (Rechecked, BookingStep::PreparePayment) => PaymentPrepared,
            (PaymentPrepared, BookingStep::Submit) => Submitted,
            (Submitted | PendingThreeDs, BookingStep::PollStatus) => self,
            (Submitted | PendingThreeDs, BookingStep::AwaitThreeDs) => PendingThreeDs,
            (Submitted | PendingThreeDs, BookingStep::Confirm) => Confirmed,
            (state, BookingStep::Fail) if !state.is_terminal() => Failed,
            (state, step) => return Err(BookingError::InvalidTransition { state, step }),
        };
        Ok(next)
    }
}

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("Cannot {step} while the booking is {state}")]
    InvalidTransition {
        state: BookingState,
        step: BookingStep,
    },

    #[error("Invalid stay: {0}")]
    InvalidStay(#[from] QueryError),

    #[error("Missing or invalid guest information: {0}")]
    MissingGuestField(String),

    #[error("Provider rejected {step}: {source}")]
    Provider {
        step: BookingStep,
        #[source]
        source: ProviderError,
    },

    #[error("Provider returned no payable price at {0}")]
    NoPrice(BookingStep),

    #[error("Price changed by {drift_percent:+.1}% ({original:.2} -> {current:.2} {currency}); explicit confirmation required")]
    PriceChangeNotAcknowledged {
        original: f64,
        current: f64,
        currency: String,
        drift_percent: f64,
    },

    #[error("Payment type '{0}' is not offered for this rate")]
    UnknownPaymentType(String),

    #[error("Payment intent covers {intent_minor} {intent_currency} but the selected payment is {payment_minor} {payment_currency}")]
    PaymentMismatch {
        intent_minor: i64,
        intent_currency: String,
        payment_minor: i64,
        payment_currency: String,
    },

    #[error("Payment preparation failed: {0}")]
    Payment(#[from] PaymentError),
}

impl BookingError {
    pub fn user_message(&self) -> String {
        match self {
            BookingError::InvalidTransition { .. } => {
                "Please complete the previous booking step first.".to_string()
            }
            BookingError::InvalidStay(_) => {
                "Please check your travel dates and room occupancy.".to_string()
            }
            BookingError::MissingGuestField(field) => format!("Please provide a valid {}.", field),
            BookingError::Provider {
                step: BookingStep::Prebook | BookingStep::Recheck,
                ..
            }
            | BookingError::NoPrice(_) => {
                "This room is no longer available at this price. Please choose another rate."
                    .to_string()
            }
            BookingError::Provider {
                step: BookingStep::Submit,
                source: ProviderError::RequestFailed { .. },
            } => "The hotel could not complete your booking. Please start a new search.".to_string(),
            BookingError::Provider {
                step: BookingStep::Submit,
                ..
            } => "Your booking was sent but not yet acknowledged. Please check its status shortly."
                .to_string(),
            BookingError::Provider { .. } => {
                "We couldn't reach the hotel provider. Please try again shortly.".to_string()
            }
            BookingError::PriceChangeNotAcknowledged {
                original,
                current,
                currency,
                ..
            } => format!(
                "The price changed from {:.2} to {:.2} {}. Please confirm the new price to continue.",
                original, current, currency
            ),
            BookingError::UnknownPaymentType(_) => {
                "That payment method isn't available for this room.".to_string()
            }
            BookingError::PaymentMismatch { .. } => {
                "Your payment no longer matches this booking. Please start a new booking.".to_string()
            }
            BookingError::Payment(_) => {
                "We couldn't set up your payment. Please try again.".to_string()
            }
        }
    }
}

// Session-owned state of one booking attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingOrder {
    book_hash: String,
    stay: StayRequest,
    state: BookingState,
    partner_order_id: Option<String>,
    provider_order_id: Option<u64>,
    item_id: Option<u64>,
    original_price: Option<PriceSnapshot>,
    latest_price: Option<PriceSnapshot>,
    drift_percent: Option<f64>,
    requires_price_confirmation: bool,
    price_change_acknowledged: bool,
    payment_options: Vec<PaymentOption>,
    selected_payment: Option<PaymentOption>,
    guest: Option<GuestContact>,
    payment_intent: Option<PaymentIntent>,
    failure: Option<String>,
}

impl BookingOrder {
    pub fn new(book_hash: impl Into<String>, stay: StayRequest) -> Self {
        Self {
            book_hash: book_hash.into(),
            stay,
            state: BookingState::Created,
            partner_order_id: None,
            provider_order_id: None,
            item_id: None,
            original_price: None,
            latest_price: None,
            drift_percent: None,
            requires_price_confirmation: false,
            price_change_acknowledged: false,
            payment_options: Vec::new(),
            selected_payment: None,
            guest: None,
            payment_intent: None,
            failure: None,
        }
    }

    pub fn state(&self) -> BookingState {
        self.state
    }

    // The idempotency token; None until the first prebook
    pub fn partner_order_id(&self) -> Option<&str> {
        self.partner_order_id.as_deref()
    }

    pub fn provider_order_id(&self) -> Option<u64> {
        self.provider_order_id
    }

    pub fn item_id(&self) -> Option<u64> {
        self.item_id
    }

    pub fn book_hash(&self) -> &str {
        &self.book_hash
    }

    pub fn stay(&self) -> &StayRequest {
        &self.stay
    }

    pub fn original_price(&self) -> Option<&PriceSnapshot> {
        self.original_price.as_ref()
    }

    pub fn latest_price(&self) -> Option<&PriceSnapshot> {
        self.latest_price.as_ref()
    }

    pub fn drift_percent(&self) -> Option<f64> {
        self.drift_percent
    }

    pub fn payment_options(&self) -> &[PaymentOption] {
        &self.payment_options
    }

    pub fn selected_payment(&self) -> Option<&PaymentOption> {
        self.selected_payment.as_ref()
    }

    pub fn guest(&self) -> Option<&GuestContact> {
        self.guest.as_ref()
    }

    pub fn payment_intent(&self) -> Option<&PaymentIntent> {
        self.payment_intent.as_ref()
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    // True while a large price change is waiting for the caller's confirmation
    pub fn needs_price_confirmation(&self) -> bool {
        self.requires_price_confirmation && !self.price_change_acknowledged
    }

    pub fn acknowledge_price_change(&mut self) -> Result<(), BookingError> {
        if self.state != BookingState::Rechecked {
            return Err(BookingError::InvalidTransition {
                state: self.state,
                step: BookingStep::PreparePayment,
            });
        }
        self.price_change_acknowledged = true;
        Ok(())
    }

    // Locked once a payment intent exists for the current selection
    pub fn select_payment_type(&mut self, kind: &str) -> Result<&PaymentOption, BookingError> {
        if !matches!(
            self.state,
            BookingState::Prebooked | BookingState::GuestDetailsCollected | BookingState::Rechecked
        ) {
            return Err(BookingError::InvalidTransition {
                state: self.state,
                step: BookingStep::PreparePayment,
            });
        }
        let option = self
            .payment_options
            .iter()
            .find(|option| option.kind == kind)
            .cloned()
            .ok_or_else(|| BookingError::UnknownPaymentType(kind.to_string()))?;
        let selected = self.selected_payment.insert(option);
        Ok(&*selected)
    }

    // The selected payment, provided the prepared intent charges exactly that amount
    fn paid_selection(&self) -> Result<&PaymentOption, BookingError> {
        let (payment, intent) = match (&self.selected_payment, &self.payment_intent) {
            (Some(payment), Some(intent)) => (payment, intent),
            _ => return Err(BookingError::NoPrice(BookingStep::Submit)),
        };
        let payment_minor = to_minor_units(payment.amount, &payment.currency)?;
        if payment_minor != intent.amount_minor
            || !payment.currency.eq_ignore_ascii_case(&intent.currency)
        {
            return Err(BookingError::PaymentMismatch {
                intent_minor: intent.amount_minor,
                intent_currency: intent.currency.clone(),
                payment_minor,
                payment_currency: payment.currency.clone(),
            });
        }
        Ok(payment)
    }

    fn ensure_can(&self, step: BookingStep) -> Result<(), BookingError> {
        self.state.advance(step).map(|_| ())
    }

    fn apply(&mut self, step: BookingStep) -> Result<(), BookingError> {
        let next = self.state.advance(step)?;
        debug!(from = %self.state, to = %next, "booking state change");
        self.state = next;
        Ok(())
    }

    fn fail(&mut self, reason: String) {
        if self.state.advance(BookingStep::Fail).is_ok() {
            warn!(state = %self.state, %reason, "booking attempt failed");
            self.state = BookingState::Failed;
            self.failure = Some(reason);
        }
    }

    fn token(&self) -> &str {
        self.partner_order_id.as_deref().unwrap_or_default()
    }

    // Keeps the caller's choice when the provider still offers it
    fn refresh_payment_options(&mut self, options: Vec<PaymentOption>) {
        let previous_kind = self.selected_payment.as_ref().map(|option| option.kind.clone());
        self.selected_payment = previous_kind
            .and_then(|kind| options.iter().find(|option| option.kind == kind).cloned())
            .or_else(|| default_payment(&options).cloned());
        self.payment_options = options;
    }
}

fn default_payment(options: &[PaymentOption]) -> Option<&PaymentOption> {
    options
        .iter()
        .find(|option| option.is_pay_now())
        .or_else(|| options.first())
}

fn new_partner_order_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrebookOutcome {
    pub price: PriceSnapshot,
    pub payment_options: Vec<PaymentOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecheckOutcome {
    pub original: PriceSnapshot,
    pub current: PriceSnapshot,
    pub drift_percent: f64,
    pub requires_confirmation: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Confirmed,
    Failed(String),
    ThreeDsRequired(Option<ThreeDsChallenge>),
    // Still processing or interrupted; check back later with the same token
    Unresolved,
}

pub struct BookingTransactionCoordinator {
    provider: Arc<dyn InventoryProvider>,
    payments: Arc<dyn PaymentProcessor>,
    config: BookingConfig,
}

impl BookingTransactionCoordinator {
    pub fn new(
        provider: Arc<dyn InventoryProvider>,
        payments: Arc<dyn PaymentProcessor>,
        config: BookingConfig,
    ) -> Self {
        Self {
            provider,
            payments,
            config,
        }
    }

    async fn booking_form(
        &self,
        order: &mut BookingOrder,
        step: BookingStep,
    ) -> Result<(BookingForm, PriceSnapshot), BookingError> {
        let result = self
            .provider
            .booking_form(
                order.token(),
                &order.book_hash,
                &self.config.language,
                &self.config.user_ip,
            )
            .await;

        let form = match result {
            Ok(form) => form,
            Err(source) => {
                order.fail(source.to_string());
                return Err(BookingError::Provider { step, source });
            }
        };

        match form.validated_price() {
            Some(price) => {
                let snapshot = PriceSnapshot::now(price.amount, price.currency);
                Ok((form, snapshot))
            }
            None => {
                order.fail(format!("no payable price at {}", step));
                Err(BookingError::NoPrice(step))
            }
        }
    }

    #[instrument(skip(self, order), fields(book_hash = %order.book_hash))]
    pub async fn prebook(&self, order: &mut BookingOrder) -> Result<PrebookOutcome, BookingError> {
        order.ensure_can(BookingStep::Prebook)?;
        order.stay.validate()?;

        let token = order
            .partner_order_id
            .get_or_insert_with(new_partner_order_id)
            .clone();
        let (form, snapshot) = self.booking_form(order, BookingStep::Prebook).await?;

        order.provider_order_id = form.order_id;
        order.item_id = form.item_id;
        order.refresh_payment_options(form.payment_options);
        order.original_price = Some(snapshot.clone());
        order.latest_price = Some(snapshot.clone());
        order.apply(BookingStep::Prebook)?;

        info!(
            partner_order_id = %token,
            amount = snapshot.amount,
            currency = %snapshot.currency,
            "rate prebooked"
        );
        Ok(PrebookOutcome {
            price: snapshot,
            payment_options: order.payment_options.clone(),
        })
    }

    // Local validation only
    pub fn collect_guests(
        &self,
        order: &mut BookingOrder,
        contact: GuestContact,
    ) -> Result<(), BookingError> {
        order.ensure_can(BookingStep::CollectGuests)?;
        if let Some(field) = contact.missing_field(order.stay.rooms.len()) {
            return Err(BookingError::MissingGuestField(field));
        }
        order.guest = Some(contact);
        order.apply(BookingStep::CollectGuests)
    }

    #[instrument(skip(self, order), fields(partner_order_id = %order.token()))]
    pub async fn recheck(&self, order: &mut BookingOrder) -> Result<RecheckOutcome, BookingError> {
        order.ensure_can(BookingStep::Recheck)?;
        let original = order
            .original_price
            .clone()
            .ok_or(BookingError::InvalidTransition {
                state: order.state,
                step: BookingStep::Recheck,
            })?;

        let (form, current) = self.booking_form(order, BookingStep::Recheck).await?;

        let drift_percent = original.drift_percent(&current);
        let requires_confirmation = drift_percent.abs() > self.config.drift_threshold_percent
            || original.currency != current.currency;
        if requires_confirmation {
            warn!(
                original = original.amount,
                current = current.amount,
                drift_percent,
                "price changed beyond the notification threshold"
            );
        }

        order.refresh_payment_options(form.payment_options);
        order.latest_price = Some(current.clone());
        order.drift_percent = Some(drift_percent);
        order.requires_price_confirmation = requires_confirmation;
        order.price_change_acknowledged = false;
        order.apply(BookingStep::Recheck)?;

        Ok(RecheckOutcome {
            original,
            current,
            drift_percent,
            requires_confirmation,
        })
    }

    // A failure here leaves the order rechecked, so this step alone can be retried
    #[instrument(skip(self, order), fields(partner_order_id = %order.token()))]
    pub async fn prepare_payment(&self, order: &mut BookingOrder) -> Result<PaymentIntent, BookingError> {
        order.ensure_can(BookingStep::PreparePayment)?;

        if order.needs_price_confirmation() {
            let (original, current) = match (&order.original_price, &order.latest_price) {
                (Some(original), Some(current)) => (original, current),
                _ => return Err(BookingError::NoPrice(BookingStep::PreparePayment)),
            };
            return Err(BookingError::PriceChangeNotAcknowledged {
                original: original.amount,
                current: current.amount,
                currency: current.currency.clone(),
                drift_percent: order.drift_percent.unwrap_or_default(),
            });
        }

        let payment = order
            .selected_payment
            .clone()
            .ok_or(BookingError::NoPrice(BookingStep::PreparePayment))?;
        let amount_minor = to_minor_units(payment.amount, &payment.currency)?;

        let mut metadata = BTreeMap::new();
        metadata.insert("partner_order_id".to_string(), order.token().to_string());
        metadata.insert("payment_type".to_string(), payment.kind.clone());
        metadata.insert("check_in".to_string(), order.stay.check_in.to_string());
        metadata.insert("check_out".to_string(), order.stay.check_out.to_string());
        if let Some(order_id) = order.provider_order_id {
            metadata.insert("provider_order_id".to_string(), order_id.to_string());
        }

        let intent = self
            .payments
            .create_intent(PaymentIntentRequest {
                amount_minor,
                currency: payment.currency.to_uppercase(),
                description: format!(
                    "Hotel stay {} to {}",
                    order.stay.check_in, order.stay.check_out
                ),
                metadata,
            })
            .await?;

        info!(intent_id = %intent.id, amount_minor, "payment intent created");
        order.payment_intent = Some(intent.clone());
        order.apply(BookingStep::PreparePayment)?;
        Ok(intent)
    }

    // Acknowledgment only; completion is learnt by polling.
    // A rejection fails the order; a lost acknowledgment leaves it submitted.
    #[instrument(skip(self, order, payment_id), fields(partner_order_id = %order.token()))]
    pub async fn finish(&self, order: &mut BookingOrder, payment_id: &str) -> Result<(), BookingError> {
        order.ensure_can(BookingStep::Submit)?;

        let payment = order.paid_selection()?;
        let guest = order
            .guest
            .as_ref()
            .ok_or_else(|| BookingError::MissingGuestField("guest details".to_string()))?;
        let request = FinishRequest::new(
            order.token(),
            guest,
            payment,
            payment_id,
            &self.config.language,
        );

        match self.provider.finish_booking(&request).await {
            Ok(()) => {
                order.apply(BookingStep::Submit)?;
                info!("booking submitted, awaiting status");
                Ok(())
            }
            Err(source @ ProviderError::RequestFailed { .. }) => {
                order.fail(source.to_string());
                Err(BookingError::Provider {
                    step: BookingStep::Submit,
                    source,
                })
            }
            // The request may have reached the provider; only polling can tell
            Err(source) => {
                warn!(error = %source, "finish not acknowledged, outcome left to status polling");
                order.apply(BookingStep::Submit)?;
                Err(BookingError::Provider {
                    step: BookingStep::Submit,
                    source,
                })
            }
        }
    }

    // One status call; provider errors here never change the order state
    pub async fn poll_status(&self, order: &mut BookingOrder) -> Result<FinishStatus, BookingError> {
        order.ensure_can(BookingStep::PollStatus)?;

        let status = self
            .provider
            .finish_status(order.token())
            .await
            .map_err(|source| BookingError::Provider {
                step: BookingStep::PollStatus,
                source,
            })?;

        match &status {
            FinishStatus::Ok => order.apply(BookingStep::Confirm)?,
            FinishStatus::ThreeDs(_) => order.apply(BookingStep::AwaitThreeDs)?,
            FinishStatus::Error(message) => order.fail(message.clone()),
            FinishStatus::Processing => {}
        }
        Ok(status)
    }

    // Bounded polling; `cancel` resolving first leaves the order unresolved
    #[instrument(skip(self, order, cancel), fields(partner_order_id = %order.token()))]
    pub async fn resolve_status<C>(
        &self,
        order: &mut BookingOrder,
        cancel: C,
    ) -> Result<PollOutcome, BookingError>
    where
        C: Future<Output = ()>,
    {
        order.ensure_can(BookingStep::PollStatus)?;
        let poll = self.poll_until_settled(order);

        let outcome = tokio::select! {
            biased;
            _ = cancel => {
                info!("status polling cancelled by caller");
                PollOutcome::Unresolved
            }
            outcome = poll => outcome,
        };
        Ok(outcome)
    }

    pub async fn resolve_status_within(
        &self,
        order: &mut BookingOrder,
        timeout: Duration,
    ) -> Result<PollOutcome, BookingError> {
        self.resolve_status(order, tokio::time::sleep(timeout)).await
    }

    async fn poll_until_settled(&self, order: &mut BookingOrder) -> PollOutcome {
        let max_attempts = self.config.poll.max_attempts;

        for attempt in 1..=max_attempts {
            match self.poll_status(order).await {
                Ok(FinishStatus::Ok) => return PollOutcome::Confirmed,
                Ok(FinishStatus::Error(message)) => return PollOutcome::Failed(message),
                Ok(FinishStatus::ThreeDs(challenge)) => {
                    info!(attempt, "3-D Secure challenge required");
                    return PollOutcome::ThreeDsRequired(challenge);
                }
                Ok(FinishStatus::Processing) => debug!(attempt, "booking still processing"),
                Err(e) => warn!(attempt, error = %e, "status poll failed"),
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.config.poll.interval).await;
            }
        }

        info!(max_attempts, "status still unresolved after polling cap");
        PollOutcome::Unresolved
    }

    // Read-only, safe to retry
    pub async fn retrieve_order(&self, partner_order_id: &str) -> Result<OrderRecord, BookingError> {
        self.provider
            .order_info(partner_order_id)
            .await
            .map_err(|source| BookingError::Provider {
                step: BookingStep::Confirm,
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PollConfig;
    use crate::models::{GuestName, Money, RoomOccupancy};
    use crate::payment::mock_payments::MockPaymentProcessor;
    use crate::provider::endpoints;
    use crate::provider::mock_provider::{request_failed, MockProvider};
    use chrono::NaiveDate;
    use std::sync::atomic::Ordering;
    use test_case::test_case;

    fn stay() -> StayRequest {
        StayRequest::new(
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 6, 5).unwrap(),
            vec![RoomOccupancy::adults(2)],
        )
    }

    fn option(kind: &str, amount: f64) -> PaymentOption {
        PaymentOption {
            kind: kind.to_string(),
            amount,
            currency: "EUR".to_string(),
            requires_card_data: kind == "now",
        }
    }

    fn form(amount: f64) -> BookingForm {
        BookingForm {
            order_id: Some(55_001),
            item_id: Some(77),
            payment_options: vec![option("deposit", amount / 4.0), option("now", amount)],
        }
    }

    fn guests() -> GuestContact {
        GuestContact {
            lead: GuestName::new("Ada", "Lovelace"),
            email: "ada@example.com".to_string(),
            phone: "+44 20 7946 0958".to_string(),
            comment: None,
            rooms: vec![vec![GuestName::new("Ada", "Lovelace"), GuestName::new("Charles", "Babbage")]],
        }
    }

    struct Harness {
        provider: Arc<MockProvider>,
        payments: Arc<MockPaymentProcessor>,
        coordinator: BookingTransactionCoordinator,
    }

    fn harness() -> Harness {
        let provider = Arc::new(MockProvider::new());
        let payments = Arc::new(MockPaymentProcessor::default());
        let config = BookingConfig {
            poll: PollConfig {
                interval: Duration::from_millis(1),
                max_attempts: 5,
            },
            ..BookingConfig::default()
        };
        let coordinator = BookingTransactionCoordinator::new(
            Arc::clone(&provider) as Arc<dyn InventoryProvider>,
            Arc::clone(&payments) as Arc<dyn PaymentProcessor>,
            config,
        );
        Harness {
            provider,
            payments,
            coordinator,
        }
    }

    // Drives an order up to `rechecked` with the given prebook and recheck prices
    async fn rechecked_order(h: &Harness, original: f64, current: f64) -> BookingOrder {
        h.provider.push_booking_form(Ok(form(original)));
        h.provider.push_booking_form(Ok(form(current)));
        let mut order = BookingOrder::new("h-grand-plaza-dbl", stay());
        h.coordinator.prebook(&mut order).await.unwrap();
        h.coordinator.collect_guests(&mut order, guests()).unwrap();
        h.coordinator.recheck(&mut order).await.unwrap();
        order
    }

    async fn submitted_order(h: &Harness) -> BookingOrder {
        let mut order = rechecked_order(h, 1000.0, 1000.0).await;
        let intent = h.coordinator.prepare_payment(&mut order).await.unwrap();
        h.coordinator.finish(&mut order, &intent.id).await.unwrap();
        order
    }

    #[test_case(BookingState::Created, BookingStep::Prebook, Some(BookingState::Prebooked) ; "prebook from created")]
    #[test_case(BookingState::Created, BookingStep::Recheck, None ; "recheck before prebook")]
    #[test_case(BookingState::Prebooked, BookingStep::Recheck, None ; "recheck before guests")]
    #[test_case(BookingState::GuestDetailsCollected, BookingStep::Submit, None ; "finish before recheck")]
    #[test_case(BookingState::Rechecked, BookingStep::Submit, None ; "finish before payment")]
    #[test_case(BookingState::PendingThreeDs, BookingStep::Confirm, Some(BookingState::Confirmed) ; "confirm after 3ds")]
    #[test_case(BookingState::Confirmed, BookingStep::Fail, None ; "terminal states stay put")]
    #[test_case(BookingState::Failed, BookingStep::Prebook, None ; "failed order cannot restart")]
    fn test_transitions(state: BookingState, step: BookingStep, expected: Option<BookingState>) {
        assert_eq!(state.advance(step).ok(), expected);
    }

    #[tokio::test]
    async fn test_full_booking_flow_reuses_one_token() {
        let h = harness();
        let mut order = submitted_order(&h).await;
        let token = order.partner_order_id().unwrap().to_string();

        h.provider.push_status(Ok(FinishStatus::Processing));
        h.provider.push_status(Ok(FinishStatus::Ok));
        h.provider.orders.lock().insert(
            token.clone(),
            OrderRecord {
                order_id: 55_001,
                partner_order_id: token.clone(),
                status: "completed".to_string(),
                hotel_id: Some("grand_plaza".to_string()),
                hotel_confirmation_number: Some("GP-123".to_string()),
                check_in: None,
                check_out: None,
                amount: Some(Money::new(1000.0, "EUR")),
                cancellation: Default::default(),
            },
        );

        let outcome = h.coordinator.resolve_status(&mut order, std::future::pending()).await.unwrap();
        assert_eq!(outcome, PollOutcome::Confirmed);
        assert_eq!(order.state(), BookingState::Confirmed);

        assert_eq!(*h.provider.booking_form_tokens.lock(), vec![token.clone(), token.clone()]);
        let finished = h.provider.finished.lock();
        assert_eq!(finished[0].partner.partner_order_id, token);
        assert_eq!(finished[0].payment_type.kind, "now");
        assert_eq!(finished[0].partner.comment.as_deref(), Some("payment:pi_mock_1"));

        let record = h.coordinator.retrieve_order(&token).await.unwrap();
        assert_eq!(record.hotel_confirmation_number.as_deref(), Some("GP-123"));
    }

    #[tokio::test]
    async fn test_recheck_before_prebook_is_rejected() {
        let h = harness();
        let mut order = BookingOrder::new("h-1", stay());

        let error = h.coordinator.recheck(&mut order).await.unwrap_err();

        assert!(matches!(error, BookingError::InvalidTransition { state: BookingState::Created, .. }));
        assert_eq!(h.provider.booking_form_calls.load(Ordering::SeqCst), 0);
        assert!(order.partner_order_id().is_none());
    }

    #[tokio::test]
    async fn test_finish_before_recheck_is_rejected() {
        let h = harness();
        h.provider.push_booking_form(Ok(form(500.0)));
        let mut order = BookingOrder::new("h-1", stay());
        h.coordinator.prebook(&mut order).await.unwrap();
        h.coordinator.collect_guests(&mut order, guests()).unwrap();

        let result = h.coordinator.finish(&mut order, "pi_x").await;

        tokio_test::assert_err!(&result);
        assert_eq!(order.state(), BookingState::GuestDetailsCollected);
        assert_eq!(h.provider.finish_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_large_drift_requires_confirmation_before_payment() {
        let h = harness();
        let mut order = rechecked_order(&h, 1000.0, 1080.0).await;

        assert!((order.drift_percent().unwrap() - 8.0).abs() < 1e-9);
        assert!(order.needs_price_confirmation());

        let error = h.coordinator.prepare_payment(&mut order).await.unwrap_err();
        assert!(matches!(error, BookingError::PriceChangeNotAcknowledged { .. }));
        assert!(error.user_message().contains("1080.00"));
        assert!(h.payments.requests.lock().is_empty());

        order.acknowledge_price_change().unwrap();
        let intent = h.coordinator.prepare_payment(&mut order).await.unwrap();
        assert_eq!(intent.amount_minor, 108_000);
        assert_eq!(order.state(), BookingState::PaymentPrepared);
    }

    #[tokio::test]
    async fn test_small_drift_passes_without_confirmation() {
        let h = harness();
        let mut order = rechecked_order(&h, 1000.0, 1040.0).await;

        assert!(!order.needs_price_confirmation());
        let intent = h.coordinator.prepare_payment(&mut order).await;
        tokio_test::assert_ok!(intent);
    }

    #[tokio::test]
    async fn test_payment_failure_keeps_rechecked_state() {
        let h = harness();
        let mut order = rechecked_order(&h, 1000.0, 1000.0).await;
        *h.payments.fail_with.lock() = Some(PaymentError::Network("timeout".to_string()));

        let error = h.coordinator.prepare_payment(&mut order).await.unwrap_err();
        assert!(matches!(error, BookingError::Payment(_)));
        assert_eq!(order.state(), BookingState::Rechecked);

        h.coordinator.prepare_payment(&mut order).await.unwrap();
        let requests = h.payments.requests.lock();
        assert_eq!(
            requests[0].metadata.get("partner_order_id").map(String::as_str),
            order.partner_order_id()
        );
    }

    #[tokio::test]
    async fn test_processing_until_cap_is_unresolved() {
        let h = harness();
        let mut order = submitted_order(&h).await;

        let outcome = h.coordinator.resolve_status(&mut order, std::future::pending()).await.unwrap();

        assert_eq!(outcome, PollOutcome::Unresolved);
        assert_eq!(order.state(), BookingState::Submitted);
        assert_eq!(h.provider.status_calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_poll_errors_count_as_attempts() {
        let h = harness();
        let mut order = submitted_order(&h).await;
        for _ in 0..5 {
            h.provider.push_status(Err(request_failed(endpoints::BOOKING_FINISH_STATUS, 502, "bad gateway")));
        }

        let outcome = h.coordinator.resolve_status(&mut order, std::future::pending()).await.unwrap();

        assert_eq!(outcome, PollOutcome::Unresolved);
        assert_eq!(order.state(), BookingState::Submitted);
    }

    #[tokio::test]
    async fn test_cancelled_polling_leaves_order_unresolved() {
        let h = harness();
        let mut order = submitted_order(&h).await;

        let outcome = h.coordinator.resolve_status(&mut order, async {}).await.unwrap();

        assert_eq!(outcome, PollOutcome::Unresolved);
        assert_eq!(order.state(), BookingState::Submitted);
    }

    #[tokio::test]
    async fn test_three_ds_then_confirmation() {
        let h = harness();
        let mut order = submitted_order(&h).await;
        h.provider.push_status(Ok(FinishStatus::ThreeDs(None)));

        let outcome = h.coordinator.resolve_status(&mut order, std::future::pending()).await.unwrap();
        assert_eq!(outcome, PollOutcome::ThreeDsRequired(None));
        assert_eq!(order.state(), BookingState::PendingThreeDs);

        h.provider.push_status(Ok(FinishStatus::Ok));
        let outcome = h
            .coordinator
            .resolve_status_within(&mut order, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome, PollOutcome::Confirmed);
    }

    #[tokio::test]
    async fn test_error_status_fails_the_order() {
        let h = harness();
        let mut order = submitted_order(&h).await;
        h.provider.push_status(Ok(FinishStatus::Error("soldout".to_string())));

        let outcome = h.coordinator.resolve_status(&mut order, std::future::pending()).await.unwrap();

        assert_eq!(outcome, PollOutcome::Failed("soldout".to_string()));
        assert_eq!(order.state(), BookingState::Failed);
        assert_eq!(order.failure(), Some("soldout"));
    }

    #[tokio::test]
    async fn test_prebook_rejection_is_terminal() {
        let h = harness();
        h.provider.push_booking_form(Err(request_failed(endpoints::BOOKING_FORM, 400, "rate_not_found")));
        let mut order = BookingOrder::new("h-stale", stay());

        let error = h.coordinator.prebook(&mut order).await.unwrap_err();
        assert!(matches!(error, BookingError::Provider { step: BookingStep::Prebook, .. }));
        assert_ne!(error.user_message(), error.to_string());
        assert_eq!(order.state(), BookingState::Failed);

        let retry = h.coordinator.prebook(&mut order).await.unwrap_err();
        assert!(matches!(retry, BookingError::InvalidTransition { .. }));
        assert_eq!(h.provider.booking_form_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recheck_rejection_is_terminal() {
        let h = harness();
        h.provider.push_booking_form(Ok(form(1000.0)));
        h.provider.push_booking_form(Err(request_failed(endpoints::BOOKING_FORM, 400, "rate_not_found")));
        let mut order = BookingOrder::new("h-1", stay());
        h.coordinator.prebook(&mut order).await.unwrap();
        h.coordinator.collect_guests(&mut order, guests()).unwrap();

        let error = h.coordinator.recheck(&mut order).await.unwrap_err();
        assert!(matches!(error, BookingError::Provider { step: BookingStep::Recheck, .. }));
        assert_eq!(order.state(), BookingState::Failed);

        let retry = h.coordinator.recheck(&mut order).await.unwrap_err();
        assert!(matches!(retry, BookingError::InvalidTransition { state: BookingState::Failed, .. }));
        assert_eq!(h.provider.booking_form_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_finish_rejection_fails_the_order() {
        let h = harness();
        let mut order = rechecked_order(&h, 1000.0, 1000.0).await;
        let intent = h.coordinator.prepare_payment(&mut order).await.unwrap();
        *h.provider.finish_result.lock() =
            Some(request_failed(endpoints::BOOKING_FINISH, 400, "booking_form_expired"));

        let error = h.coordinator.finish(&mut order, &intent.id).await.unwrap_err();
        assert!(matches!(error, BookingError::Provider { step: BookingStep::Submit, .. }));
        assert!(error.user_message().contains("new search"));
        assert_eq!(order.state(), BookingState::Failed);

        let retry = h.coordinator.finish(&mut order, &intent.id).await.unwrap_err();
        assert!(matches!(retry, BookingError::InvalidTransition { state: BookingState::Failed, .. }));
        assert_eq!(h.provider.finish_calls.load(Ordering::SeqCst), 1);
    }

    #[test_case(ProviderError::Transport { endpoint: endpoints::BOOKING_FINISH.to_string(), message: "connection reset".to_string() } ; "transport error")]
    #[test_case(ProviderError::Decode { endpoint: endpoints::BOOKING_FINISH.to_string(), message: "expected value".to_string() } ; "decode error")]
    #[test_case(ProviderError::EmptyResponse(endpoints::BOOKING_FINISH.to_string()) ; "empty response")]
    #[tokio::test]
    async fn test_unacknowledged_finish_is_left_to_polling(failure: ProviderError) {
        let h = harness();
        let mut order = rechecked_order(&h, 1000.0, 1000.0).await;
        let intent = h.coordinator.prepare_payment(&mut order).await.unwrap();
        *h.provider.finish_result.lock() = Some(failure);

        let error = h.coordinator.finish(&mut order, &intent.id).await.unwrap_err();
        assert!(matches!(error, BookingError::Provider { step: BookingStep::Submit, .. }));
        assert!(error.user_message().contains("check its status"));
        assert_eq!(order.state(), BookingState::Submitted);
        assert!(order.failure().is_none());

        h.provider.push_status(Ok(FinishStatus::Ok));
        let outcome = h.coordinator.resolve_status(&mut order, std::future::pending()).await.unwrap();
        assert_eq!(outcome, PollOutcome::Confirmed);
        assert_eq!(order.state(), BookingState::Confirmed);
    }

    #[tokio::test]
    async fn test_payment_type_locked_once_payment_prepared() {
        let h = harness();
        let mut order = rechecked_order(&h, 1000.0, 1000.0).await;
        h.coordinator.prepare_payment(&mut order).await.unwrap();

        let error = order.select_payment_type("deposit").unwrap_err();

        assert!(matches!(
            error,
            BookingError::InvalidTransition { state: BookingState::PaymentPrepared, step: BookingStep::PreparePayment }
        ));
        assert_eq!(order.selected_payment().unwrap().kind, "now");
    }

    #[tokio::test]
    async fn test_finish_refuses_payment_that_differs_from_intent() {
        let h = harness();
        let mut order = rechecked_order(&h, 1000.0, 1000.0).await;
        let intent = h.coordinator.prepare_payment(&mut order).await.unwrap();
        // Restored order whose selection was swapped after the intent was created
        order.selected_payment = Some(option("deposit", 250.0));

        let error = h.coordinator.finish(&mut order, &intent.id).await.unwrap_err();

        assert!(matches!(
            error,
            BookingError::PaymentMismatch { intent_minor: 100_000, payment_minor: 25_000, .. }
        ));
        assert_eq!(order.state(), BookingState::PaymentPrepared);
        assert_eq!(h.provider.finish_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_guests_keep_prebooked_state() {
        let h = harness();
        h.provider.push_booking_form(Ok(form(500.0)));
        let mut order = BookingOrder::new("h-1", stay());
        h.coordinator.prebook(&mut order).await.unwrap();

        let mut contact = guests();
        contact.phone = "12".to_string();
        let error = h.coordinator.collect_guests(&mut order, contact).unwrap_err();

        assert!(matches!(error, BookingError::MissingGuestField(ref field) if field == "phone"));
        assert_eq!(order.state(), BookingState::Prebooked);
        h.coordinator.collect_guests(&mut order, guests()).unwrap();
        assert_eq!(order.state(), BookingState::GuestDetailsCollected);
    }

    #[tokio::test]
    async fn test_payment_type_selection() {
        let h = harness();
        h.provider.push_booking_form(Ok(form(1000.0)));
        let mut order = BookingOrder::new("h-1", stay());
        let prebook = h.coordinator.prebook(&mut order).await.unwrap();

        assert_eq!(prebook.payment_options.len(), 2);
        assert_eq!(prebook.price.amount, 1000.0);
        assert_eq!(order.selected_payment().unwrap().kind, "now");

        assert_eq!(order.select_payment_type("deposit").unwrap().amount, 250.0);
        assert!(matches!(
            order.select_payment_type("hotel"),
            Err(BookingError::UnknownPaymentType(_))
        ));
        assert_eq!(order.selected_payment().unwrap().kind, "deposit");
    }
}
