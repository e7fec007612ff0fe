//! MoMo wallet adapter.
//!
//! MoMo signs with HMAC-SHA256 over a raw string whose field order is fixed
//! by the provider contract (not sorted). The payment session id travels in
//! `extraData`, a base64 JSON blob MoMo echoes back signed in the IPN.
//!
//! The IPN endpoint always answers 204 regardless of outcome; MoMo retries on
//! anything else and a forged IPN must not learn whether its signature
//! survived verification.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::instrument;
use uuid::Uuid;

use crate::config::MomoConfig;
use crate::entities::order;
use crate::errors::ServiceError;
use crate::services::payments::VerifiedPayment;

type HmacSha256 = Hmac<Sha256>;

const REQUEST_TYPE: &str = "captureWallet";
const RESULT_CODE_SUCCESS: i64 = 0;

/// Session envelope carried in `extraData`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtraData {
    session_id: String,
}

/// IPN body as posted by MoMo.
#[derive(Debug, Clone, Deserialize, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MomoIpn {
    pub partner_code: String,
    pub order_id: String,
    pub request_id: String,
    pub amount: i64,
    pub order_info: String,
    pub order_type: String,
    pub trans_id: i64,
    pub result_code: i64,
    pub message: String,
    pub pay_type: String,
    pub response_time: i64,
    pub extra_data: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateResponse {
    result_code: i64,
    message: String,
    #[serde(default)]
    pay_url: Option<String>,
}

pub struct MomoGateway {
    cfg: MomoConfig,
    http: reqwest::Client,
}

impl MomoGateway {
    pub fn new(cfg: MomoConfig, http: reqwest::Client) -> Self {
        Self { cfg, http }
    }

    /// Create a hosted-checkout session with MoMo and return the pay URL.
    #[instrument(skip(self, order), fields(order_number = %order.order_number))]
    pub async fn create_payment(&self, order: &order::Model) -> Result<String, ServiceError> {
        let request_id = Uuid::new_v4().to_string();
        let amount = (order.total.trunc()).to_string();
        let order_info = format!("SkyBite order {}", order.order_number);
        let extra_data = BASE64.encode(
            serde_json::to_vec(&ExtraData {
                session_id: order.payment_session_id.clone(),
            })
            .map_err(|e| ServiceError::Internal(format!("extraData encoding failed: {e}")))?,
        );

        let signature = self.sign(&create_raw_signature(
            &self.cfg.access_key,
            &amount,
            &extra_data,
            &self.cfg.ipn_url,
            &order.order_number,
            &order_info,
            &self.cfg.partner_code,
            &self.cfg.redirect_url,
            &request_id,
        ));

        let body = serde_json::json!({
            "partnerCode": self.cfg.partner_code,
            "accessKey": self.cfg.access_key,
            "requestId": request_id,
            "amount": amount,
            "orderId": order.order_number,
            "orderInfo": order_info,
            "redirectUrl": self.cfg.redirect_url,
            "ipnUrl": self.cfg.ipn_url,
            "extraData": extra_data,
            "requestType": REQUEST_TYPE,
            "lang": "vi",
            "signature": signature,
        });

        let response: CreateResponse = self
            .http
            .post(&self.cfg.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalApi(format!("momo create failed: {e}")))?
            .json()
            .await
            .map_err(|e| ServiceError::ExternalApi(format!("momo response malformed: {e}")))?;

        if response.result_code != RESULT_CODE_SUCCESS {
            return Err(ServiceError::ExternalApi(format!(
                "momo rejected payment creation: {} ({})",
                response.message, response.result_code
            )));
        }
        response.pay_url.ok_or_else(|| {
            ServiceError::ExternalApi("momo response missing payUrl".to_string())
        })
    }

    /// Verify an IPN and reduce it to a [`VerifiedPayment`].
    pub fn verify_ipn(&self, ipn: &MomoIpn) -> Result<VerifiedPayment, ServiceError> {
        self.verify(
            &ipn_raw_signature(&self.cfg.access_key, ipn),
            &ipn.signature,
        )?;

        let decoded = BASE64
            .decode(&ipn.extra_data)
            .map_err(|_| ServiceError::SignatureVerification { provider: "momo" })?;
        let extra: ExtraData = serde_json::from_slice(&decoded)
            .map_err(|_| ServiceError::SignatureVerification { provider: "momo" })?;

        let success = ipn.result_code == RESULT_CODE_SUCCESS;
        Ok(VerifiedPayment {
            provider: "momo",
            session_id: extra.session_id,
            order_ref: Some(ipn.order_id.clone()),
            transaction_id: ipn.trans_id.to_string(),
            amount: Decimal::from(ipn.amount),
            success,
            failure_reason: (!success)
                .then(|| format!("momo result code {}: {}", ipn.result_code, ipn.message)),
            raw: serde_json::to_value(ipn).unwrap_or_default(),
        })
    }

    fn sign(&self, raw: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.cfg.secret_key.as_bytes())
            .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
        mac.update(raw.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn verify(&self, raw: &str, provided_hex: &str) -> Result<(), ServiceError> {
        let provided = hex::decode(provided_hex)
            .map_err(|_| ServiceError::SignatureVerification { provider: "momo" })?;
        let mut mac = HmacSha256::new_from_slice(self.cfg.secret_key.as_bytes())
            .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
        mac.update(raw.as_bytes());
        mac.verify_slice(&provided)
            .map_err(|_| ServiceError::SignatureVerification { provider: "momo" })
    }
}

/// Raw string for the create-payment signature. Field order is fixed by the
/// provider contract.
#[allow(clippy::too_many_arguments)]
fn create_raw_signature(
    access_key: &str,
    amount: &str,
    extra_data: &str,
    ipn_url: &str,
    order_id: &str,
    order_info: &str,
    partner_code: &str,
    redirect_url: &str,
    request_id: &str,
) -> String {
    format!(
        "accessKey={access_key}&amount={amount}&extraData={extra_data}&ipnUrl={ipn_url}\
         &orderId={order_id}&orderInfo={order_info}&partnerCode={partner_code}\
         &redirectUrl={redirect_url}&requestId={request_id}&requestType={REQUEST_TYPE}"
    )
}

/// Raw string for the IPN signature. Field order is fixed by the provider
/// contract and differs from the create-payment order.
fn ipn_raw_signature(access_key: &str, ipn: &MomoIpn) -> String {
    format!(
        "accessKey={access_key}&amount={}&extraData={}&message={}&orderId={}&orderInfo={}\
         &orderType={}&partnerCode={}&payType={}&requestId={}&responseTime={}&resultCode={}\
         &transId={}",
        ipn.amount,
        ipn.extra_data,
        ipn.message,
        ipn.order_id,
        ipn.order_info,
        ipn.order_type,
        ipn.partner_code,
        ipn.pay_type,
        ipn.request_id,
        ipn.response_time,
        ipn.result_code,
        ipn.trans_id,
    )
}
