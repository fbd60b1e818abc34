// Cancellation of confirmed orders
// Quoting penalties and cancelling are separate calls so the cost can be shown first.

use crate::models::{CancellationTerms, OrderRecord};
use crate::provider::{InventoryProvider, ProviderError};
use crate::supplier::CancellationReceipt;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Error, Debug)]
pub enum CancellationError {
    #[error("Order {0} was not found")]
    NotFound(String),

    #[error("Order {0} is already cancelled")]
    AlreadyCancelled(String),

    #[error("Provider rejected {operation}: {source}")]
    Provider {
        operation: &'static str,
        #[source]
        source: ProviderError,
    },
}

impl CancellationError {
    pub fn user_message(&self) -> String {
        match self {
            CancellationError::NotFound(_) => "We couldn't find this booking.".to_string(),
            CancellationError::AlreadyCancelled(_) => {
                "This booking has already been cancelled.".to_string()
            }
            CancellationError::Provider { .. } => {
                "We couldn't reach the hotel provider. Please try again shortly.".to_string()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PenaltyQuote {
    pub partner_order_id: String,
    pub order_status: String,
    pub terms: CancellationTerms,
    // What cancelling right now would cost
    pub penalty_now: f64,
    pub currency: Option<String>,
    pub free_cancellation: bool,
}

impl PenaltyQuote {
    fn for_order(order: OrderRecord, at: DateTime<Utc>) -> Self {
        let penalty_now = order.cancellation.penalty_at(at);
        let currency = order
            .cancellation
            .penalties
            .first()
            .map(|window| window.currency.clone())
            .or_else(|| order.amount.as_ref().map(|amount| amount.currency.clone()));
        PenaltyQuote {
            partner_order_id: order.partner_order_id,
            order_status: order.status,
            terms: order.cancellation,
            free_cancellation: penalty_now == 0.0,
            penalty_now,
            currency,
        }
    }
}

pub struct CancellationManager {
    provider: Arc<dyn InventoryProvider>,
}

impl CancellationManager {
    pub fn new(provider: Arc<dyn InventoryProvider>) -> Self {
        Self { provider }
    }

    async fn order(&self, partner_order_id: &str) -> Result<OrderRecord, CancellationError> {
        self.provider
            .order_info(partner_order_id)
            .await
            .map_err(|source| match source {
                ProviderError::RequestFailed {
                    status_code: 404, ..
                } => CancellationError::NotFound(partner_order_id.to_string()),
                source => CancellationError::Provider {
                    operation: "order lookup",
                    source,
                },
            })
    }

    // Never changes the order
    pub async fn penalties(&self, partner_order_id: &str) -> Result<PenaltyQuote, CancellationError> {
        self.penalties_at(partner_order_id, Utc::now()).await
    }

    pub async fn penalties_at(
        &self,
        partner_order_id: &str,
        at: DateTime<Utc>,
    ) -> Result<PenaltyQuote, CancellationError> {
        let order = self.order(partner_order_id).await?;
        Ok(PenaltyQuote::for_order(order, at))
    }

    #[instrument(skip(self))]
    pub async fn cancel(&self, partner_order_id: &str) -> Result<CancellationReceipt, CancellationError> {
        let order = self.order(partner_order_id).await?;
        if order.is_cancelled() {
            return Err(CancellationError::AlreadyCancelled(partner_order_id.to_string()));
        }

        let receipt = self
            .provider
            .cancel_order(partner_order_id)
            .await
            .map_err(|source| CancellationError::Provider {
                operation: "cancellation",
                source,
            })?;

        info!(
            order_id = order.order_id,
            refunded = receipt.amount_refunded.as_ref().map(|money| money.amount),
            "order cancelled"
        );
        Ok(receipt)
    }
}
