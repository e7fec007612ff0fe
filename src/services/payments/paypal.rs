//! PayPal Orders v2 adapter.
//!
//! There is no local signature to verify: trust comes from the authenticated
//! server-to-server capture call. We only mark an order paid from the capture
//! response, never from the redirect or a webhook body. The payment session
//! id rides in the purchase unit's `custom_id`, which PayPal returns in the
//! capture response.
//!
//! PayPal has no VND support, so order totals are converted to USD with the
//! configured reference rate at session creation.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::config::PaypalConfig;
use crate::entities::order;
use crate::errors::ServiceError;
use crate::services::payments::VerifiedPayment;

const STATUS_COMPLETED: &str = "COMPLETED";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct Link {
    rel: String,
    href: String,
}

#[derive(Debug, Deserialize)]
struct CreateOrderResponse {
    id: String,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct CaptureAmount {
    value: String,
}

#[derive(Debug, Deserialize)]
struct Capture {
    id: String,
    status: String,
    #[serde(default)]
    custom_id: Option<String>,
    amount: CaptureAmount,
}

#[derive(Debug, Deserialize)]
struct CapturePayments {
    #[serde(default)]
    captures: Vec<Capture>,
}

#[derive(Debug, Deserialize)]
struct CapturePurchaseUnit {
    #[serde(default)]
    payments: Option<CapturePayments>,
}

#[derive(Debug, Deserialize)]
struct CaptureOrderResponse {
    status: String,
    #[serde(default)]
    purchase_units: Vec<CapturePurchaseUnit>,
}

/// Result of creating a PayPal order: their order id plus the approval URL
/// the shopper is redirected to.
#[derive(Debug, Clone)]
pub struct PaypalCheckout {
    pub paypal_order_id: String,
    pub approve_url: String,
}

pub struct PaypalGateway {
    cfg: PaypalConfig,
    http: reqwest::Client,
    /// Cached OAuth token with its expiry.
    token: Mutex<Option<(String, DateTime<Utc>)>>,
}

impl PaypalGateway {
    pub fn new(cfg: PaypalConfig, http: reqwest::Client) -> Self {
        Self {
            cfg,
            http,
            token: Mutex::new(None),
        }
    }

    /// Order total converted to USD at the configured reference rate.
    pub fn usd_amount(&self, total_vnd: Decimal) -> Decimal {
        (total_vnd / Decimal::from(self.cfg.vnd_per_usd)).round_dp(2)
    }

    async fn access_token(&self) -> Result<String, ServiceError> {
        let mut cached = self.token.lock().await;
        if let Some((token, expires_at)) = cached.as_ref() {
            if *expires_at > Utc::now() + Duration::seconds(60) {
                return Ok(token.clone());
            }
        }

        let response: TokenResponse = self
            .http
            .post(format!("{}/v1/oauth2/token", self.cfg.api_base))
            .basic_auth(&self.cfg.client_id, Some(&self.cfg.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| ServiceError::ExternalApi(format!("paypal token request failed: {e}")))?
            .error_for_status()
            .map_err(|e| ServiceError::ExternalApi(format!("paypal token request rejected: {e}")))?
            .json()
            .await
            .map_err(|e| ServiceError::ExternalApi(format!("paypal token malformed: {e}")))?;

        let expires_at = Utc::now() + Duration::seconds(response.expires_in);
        *cached = Some((response.access_token.clone(), expires_at));
        Ok(response.access_token)
    }

    /// Create a PayPal order for checkout approval.
    #[instrument(skip(self, order), fields(order_number = %order.order_number))]
    pub async fn create_order(&self, order: &order::Model) -> Result<PaypalCheckout, ServiceError> {
        let token = self.access_token().await?;
        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": order.id,
                "custom_id": order.payment_session_id,
                "description": format!("SkyBite order {}", order.order_number),
                "amount": {
                    "currency_code": "USD",
                    "value": self.usd_amount(order.total).to_string(),
                },
            }],
        });

        let response: CreateOrderResponse = self
            .http
            .post(format!("{}/v2/checkout/orders", self.cfg.api_base))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalApi(format!("paypal create failed: {e}")))?
            .error_for_status()
            .map_err(|e| ServiceError::ExternalApi(format!("paypal create rejected: {e}")))?
            .json()
            .await
            .map_err(|e| ServiceError::ExternalApi(format!("paypal create malformed: {e}")))?;

        let approve_url = response
            .links
            .iter()
            .find(|l| l.rel == "approve")
            .map(|l| l.href.clone())
            .ok_or_else(|| {
                ServiceError::ExternalApi("paypal response missing approve link".to_string())
            })?;

        Ok(PaypalCheckout {
            paypal_order_id: response.id,
            approve_url,
        })
    }

    /// Capture an approved PayPal order and reduce the result to a
    /// [`VerifiedPayment`].
    #[instrument(skip(self))]
    pub async fn capture_order(
        &self,
        paypal_order_id: &str,
    ) -> Result<VerifiedPayment, ServiceError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!(
                "{}/v2/checkout/orders/{paypal_order_id}/capture",
                self.cfg.api_base
            ))
            .bearer_auth(token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| ServiceError::ExternalApi(format!("paypal capture failed: {e}")))?
            .error_for_status()
            .map_err(|e| ServiceError::ExternalApi(format!("paypal capture rejected: {e}")))?;

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ServiceError::ExternalApi(format!("paypal capture malformed: {e}")))?;
        let parsed: CaptureOrderResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ServiceError::ExternalApi(format!("paypal capture malformed: {e}")))?;

        let capture = parsed
            .purchase_units
            .into_iter()
            .filter_map(|u| u.payments)
            .flat_map(|p| p.captures)
            .next()
            .ok_or_else(|| {
                ServiceError::ExternalApi("paypal capture response has no captures".to_string())
            })?;

        let session_id = capture.custom_id.clone().ok_or_else(|| {
            ServiceError::ExternalApi("paypal capture missing custom_id".to_string())
        })?;

        let success = parsed.status == STATUS_COMPLETED && capture.status == STATUS_COMPLETED;
        let amount_usd = capture
            .amount
            .value
            .parse::<Decimal>()
            .unwrap_or_default();

        Ok(VerifiedPayment {
            provider: "paypal",
            session_id,
            order_ref: None,
            transaction_id: capture.id,
            amount: amount_usd * Decimal::from(self.cfg.vnd_per_usd),
            success,
            failure_reason: (!success)
                .then(|| format!("paypal capture status {}", capture.status)),
            raw,
        })
    }
}
