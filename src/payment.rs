// Payment processor seam
// Only intent creation happens server-side; confirmation is done by the client and
// hands back a payment id that the booking finish step consumes.

use crate::config::PaymentConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info_span, warn, Instrument};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PaymentError {
    #[error("Payment processor rejected the intent: {status_code} - {message}")]
    Rejected { status_code: u16, message: String },

    #[error("Payment processor unreachable: {0}")]
    Network(String),

    #[error("Invalid payment amount: {0}")]
    InvalidAmount(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentIntentRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    pub amount_minor: i64,
    pub currency: String,
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync + 'static {
    async fn create_intent(&self, request: PaymentIntentRequest) -> Result<PaymentIntent, PaymentError>;
}

// Number of decimal places a currency uses for its smallest unit
pub fn minor_unit_exponent(currency: &str) -> u32 {
    match currency.to_ascii_uppercase().as_str() {
        "BIF" | "CLP" | "DJF" | "GNF" | "ISK" | "JPY" | "KMF" | "KRW" | "PYG" | "RWF" | "UGX"
        | "VND" | "VUV" | "XAF" | "XOF" | "XPF" => 0,
        "BHD" | "IQD" | "JOD" | "KWD" | "LYD" | "OMR" | "TND" => 3,
        _ => 2,
    }
}

pub fn to_minor_units(amount: f64, currency: &str) -> Result<i64, PaymentError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(PaymentError::InvalidAmount(format!("{} {}", amount, currency)));
    }
    let factor = 10f64.powi(minor_unit_exponent(currency) as i32);
    Ok((amount * factor).round() as i64)
}

#[derive(Debug, Deserialize)]
struct WireIntent {
    id: String,
    client_secret: Option<String>,
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct WireErrorBody {
    error: WireErrorDetail,
}

#[derive(Debug, Deserialize)]
struct WireErrorDetail {
    message: Option<String>,
}

// Stripe-compatible payment-intents API
pub struct HttpPaymentProcessor {
    http: Client,
    config: PaymentConfig,
}

impl HttpPaymentProcessor {
    pub fn new(config: PaymentConfig) -> Result<Self, PaymentError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::Network(e.to_string()))?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl PaymentProcessor for HttpPaymentProcessor {
    async fn create_intent(&self, request: PaymentIntentRequest) -> Result<PaymentIntent, PaymentError> {
        let mut form = vec![
            ("amount".to_string(), request.amount_minor.to_string()),
            ("currency".to_string(), request.currency.to_lowercase()),
            ("description".to_string(), request.description.clone()),
            ("capture_method".to_string(), "automatic".to_string()),
        ];
        form.extend(
            request
                .metadata
                .iter()
                .map(|(key, value)| (format!("metadata[{}]", key), value.clone())),
        );

        let span = info_span!("payment_intent", amount = request.amount_minor, currency = %request.currency);
        async {
            let response = self
                .http
                .post(format!("{}/payment_intents", self.config.base_url))
                .bearer_auth(&self.config.secret_key)
                .form(&form)
                .send()
                .await
                .map_err(|e| PaymentError::Network(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let message = response
                    .json::<WireErrorBody>()
                    .await
                    .ok()
                    .and_then(|body| body.error.message)
                    .unwrap_or_else(|| status.canonical_reason().unwrap_or("rejected").to_string());
                warn!(status = status.as_u16(), %message, "payment intent rejected");
                return Err(PaymentError::Rejected {
                    status_code: status.as_u16(),
                    message,
                });
            }

            let intent: WireIntent = response
                .json()
                .await
                .map_err(|e| PaymentError::Network(e.to_string()))?;
            Ok(PaymentIntent {
                client_secret: intent.client_secret.unwrap_or_default(),
                id: intent.id,
                amount_minor: intent.amount,
                currency: intent.currency.to_uppercase(),
            })
        }
        .instrument(span)
        .await
    }
}
