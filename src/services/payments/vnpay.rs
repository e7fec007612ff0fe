//! VNPay hosted-checkout adapter.
//!
//! VNPay redirects the shopper to its pay page and returns them (and an IPN)
//! with the same parameter set, signed with HMAC-SHA512 over the
//! lexicographically sorted, URL-encoded parameters. The payment session id
//! rides inside `vnp_OrderInfo`, which VNPay echoes back signed, so the
//! return leg proves it belongs to the session we issued.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sha2::Sha512;
use url::form_urlencoded;

use crate::config::VnpayConfig;
use crate::entities::order;
use crate::errors::ServiceError;
use crate::services::payments::VerifiedPayment;

type HmacSha512 = Hmac<Sha512>;

const VNP_VERSION: &str = "2.1.0";
const RESPONSE_CODE_SUCCESS: &str = "00";

pub struct VnpayGateway {
    cfg: VnpayConfig,
}

impl VnpayGateway {
    pub fn new(cfg: VnpayConfig) -> Self {
        Self { cfg }
    }

    /// Build the signed redirect URL for an order.
    pub fn build_payment_url(
        &self,
        order: &order::Model,
        client_ip: &str,
        now: DateTime<Utc>,
    ) -> Result<String, ServiceError> {
        // VNPay amounts are VND with two implied decimals
        let amount = (order.total * Decimal::from(100))
            .trunc()
            .to_string();

        let mut params: Vec<(String, String)> = vec![
            ("vnp_Version".into(), VNP_VERSION.into()),
            ("vnp_Command".into(), "pay".into()),
            ("vnp_TmnCode".into(), self.cfg.tmn_code.clone()),
            ("vnp_Amount".into(), amount),
            ("vnp_CurrCode".into(), "VND".into()),
            ("vnp_TxnRef".into(), txn_ref(order, now)),
            (
                "vnp_OrderInfo".into(),
                order_info(&order.order_number, &order.payment_session_id),
            ),
            ("vnp_OrderType".into(), "250000".into()), // food and beverage
            ("vnp_Locale".into(), "vn".into()),
            ("vnp_ReturnUrl".into(), self.cfg.return_url.clone()),
            ("vnp_IpAddr".into(), client_ip.to_string()),
            (
                "vnp_CreateDate".into(),
                now.format("%Y%m%d%H%M%S").to_string(),
            ),
        ];
        params.sort();

        let query = encode_sorted(&params);
        let signature = self.sign(&query);
        Ok(format!(
            "{}?{}&vnp_SecureHash={}",
            self.cfg.pay_url, query, signature
        ))
    }

    /// Verify a return/IPN parameter set and reduce it to a
    /// [`VerifiedPayment`].
    pub fn verify_callback(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<VerifiedPayment, ServiceError> {
        let provided = params
            .get("vnp_SecureHash")
            .ok_or(ServiceError::SignatureVerification { provider: "vnpay" })?;

        let mut signed: Vec<(String, String)> = params
            .iter()
            .filter(|(k, _)| k.as_str() != "vnp_SecureHash" && k.as_str() != "vnp_SecureHashType")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        signed.sort();

        self.verify(&encode_sorted(&signed), provided)?;

        let order_info = params
            .get("vnp_OrderInfo")
            .ok_or(ServiceError::SignatureVerification { provider: "vnpay" })?;
        let session_id = session_from_order_info(order_info)
            .ok_or(ServiceError::SignatureVerification { provider: "vnpay" })?;

        let transaction_id = params
            .get("vnp_TransactionNo")
            .cloned()
            .unwrap_or_default();
        let response_code = params
            .get("vnp_ResponseCode")
            .map(String::as_str)
            .unwrap_or("");
        let amount = params
            .get("vnp_Amount")
            .and_then(|a| a.parse::<Decimal>().ok())
            .map(|a| a / Decimal::from(100))
            .unwrap_or_default();

        let success = response_code == RESPONSE_CODE_SUCCESS;
        Ok(VerifiedPayment {
            provider: "vnpay",
            session_id: session_id.to_string(),
            order_ref: params.get("vnp_TxnRef").cloned(),
            transaction_id,
            amount,
            success,
            failure_reason: (!success)
                .then(|| format!("vnpay response code {response_code}")),
            raw: serde_json::to_value(params).unwrap_or_default(),
        })
    }

    fn sign(&self, data: &str) -> String {
        let mut mac = HmacSha512::new_from_slice(self.cfg.hash_secret.as_bytes())
            .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
        mac.update(data.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn verify(&self, data: &str, provided_hex: &str) -> Result<(), ServiceError> {
        let provided = hex::decode(provided_hex)
            .map_err(|_| ServiceError::SignatureVerification { provider: "vnpay" })?;
        let mut mac = HmacSha512::new_from_slice(self.cfg.hash_secret.as_bytes())
            .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
        mac.update(data.as_bytes());
        // constant-time comparison
        mac.verify_slice(&provided)
            .map_err(|_| ServiceError::SignatureVerification { provider: "vnpay" })
    }
}

/// `vnp_TxnRef` wire format: `{order_id}_{timestamp}`, unique per payment
/// attempt so a retried checkout gets a fresh gateway transaction.
fn txn_ref(order: &order::Model, now: DateTime<Utc>) -> String {
    format!("{}_{}", order.id, now.format("%Y%m%d%H%M%S"))
}

/// `vnp_OrderInfo` payload: human-readable description with the session id as
/// the final colon-separated segment.
fn order_info(order_number: &str, session_id: &str) -> String {
    format!("Thanh toan don hang {order_number}:{session_id}")
}

fn session_from_order_info(order_info: &str) -> Option<&str> {
    order_info.rsplit(':').next().filter(|s| !s.is_empty())
}

/// URL-encode sorted pairs the way VNPay hashes them (the hash input and the
/// query string are the same encoding).
fn encode_sorted(params: &[(String, String)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (k, v) in params {
        serializer.append_pair(k, v);
    }
    serializer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> VnpayGateway {
        VnpayGateway::new(VnpayConfig {
            tmn_code: "SKYBITE1".into(),
            hash_secret: "VNPAYSECRETKEY".into(),
            pay_url: "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".into(),
            return_url: "http://localhost/return".into(),
        })
    }

    /// Build the callback VNPay would send for a successful payment, signed
    /// with the shared secret.
    fn signed_callback(gw: &VnpayGateway, session_id: &str, amount_vnd: &str) -> HashMap<String, String> {
        let mut params: Vec<(String, String)> = vec![
            ("vnp_Amount".into(), format!("{amount_vnd}00")),
            ("vnp_ResponseCode".into(), "00".into()),
            ("vnp_TransactionNo".into(), "14425919".into()),
            ("vnp_TxnRef".into(), "SB1700000000001".into()),
            (
                "vnp_OrderInfo".into(),
                order_info("SB1700000000001", session_id),
            ),
        ];
        params.sort();
        let signature = gw.sign(&encode_sorted(&params));
        let mut map: HashMap<String, String> = params.into_iter().collect();
        map.insert("vnp_SecureHash".into(), signature);
        map
    }

    #[test]
    fn valid_callback_verifies_and_extracts_the_session() {
        let gw = gateway();
        let callback = signed_callback(&gw, "sess-abc123", "115000");
        let verified = gw.verify_callback(&callback).unwrap();
        assert!(verified.success);
        assert_eq!(verified.session_id, "sess-abc123");
        assert_eq!(verified.transaction_id, "14425919");
        assert_eq!(verified.amount, Decimal::from(115000));
    }

    #[test]
    fn tampered_amount_fails_verification() {
        let gw = gateway();
        let mut callback = signed_callback(&gw, "sess-abc123", "115000");
        callback.insert("vnp_Amount".into(), "100".into());
        let err = gw.verify_callback(&callback).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::SignatureVerification { provider: "vnpay" }
        ));
    }

    #[test]
    fn missing_signature_fails_verification() {
        let gw = gateway();
        let mut callback = signed_callback(&gw, "sess-abc123", "115000");
        callback.remove("vnp_SecureHash");
        assert!(gw.verify_callback(&callback).is_err());
    }

    #[test]
    fn secure_hash_type_is_excluded_from_the_signed_payload() {
        let gw = gateway();
        let mut callback = signed_callback(&gw, "sess-abc123", "115000");
        callback.insert("vnp_SecureHashType".into(), "HMACSHA512".into());
        assert!(gw.verify_callback(&callback).is_ok());
    }

    #[test]
    fn declined_payment_verifies_but_is_not_successful() {
        let gw = gateway();
        let mut params: Vec<(String, String)> = vec![
            ("vnp_Amount".into(), "11500000".into()),
            ("vnp_ResponseCode".into(), "24".into()), // customer cancelled
            ("vnp_TransactionNo".into(), "14425920".into()),
            (
                "vnp_OrderInfo".into(),
                order_info("SB1700000000001", "sess-abc123"),
            ),
        ];
        params.sort();
        let signature = gw.sign(&encode_sorted(&params));
        let mut callback: HashMap<String, String> = params.into_iter().collect();
        callback.insert("vnp_SecureHash".into(), signature);

        let verified = gw.verify_callback(&callback).unwrap();
        assert!(!verified.success);
        assert!(verified.failure_reason.unwrap().contains("24"));
    }

    #[test]
    fn payment_url_carries_the_signed_session() {
        use crate::entities::order::{OrderStatus, PaymentMethod, PaymentStatus, Timeline};
        use rust_decimal_macros::dec;
        use uuid::Uuid;

        let now = Utc::now();
        let order = order::Model {
            id: Uuid::new_v4(),
            order_number: "SB1700000000001".to_string(),
            restaurant_id: Uuid::new_v4(),
            customer_id: None,
            guest_name: Some("Guest".into()),
            guest_phone: Some("0900000000".into()),
            guest_email: None,
            subtotal: dec!(100000),
            delivery_fee: dec!(15000),
            discount: dec!(0),
            total: dec!(115000),
            payment_method: PaymentMethod::Vnpay,
            payment_provider: "vnpay".to_string(),
            payment_session_id: "sess-xyz".to_string(),
            payment_session_expires_at: now,
            payment_status: PaymentStatus::Pending,
            transaction_id: None,
            paid_at: None,
            paid_amount: None,
            status: OrderStatus::Pending,
            timeline: Timeline::default(),
            delivery_address: "addr".to_string(),
            pickup_lat: 0.0,
            pickup_lng: 0.0,
            dropoff_lat: 0.0,
            dropoff_lng: 0.0,
            assigned_drone_id: None,
            dispatched_at: None,
            estimated_delivery_time: None,
            actual_delivery_time: None,
            created_at: now,
            updated_at: None,
        };

        let url = gateway()
            .build_payment_url(&order, "203.0.113.7", now)
            .unwrap();
        assert!(url.starts_with("https://sandbox.vnpayment.vn/paymentv2/vpcpay.html?"));
        assert!(url.contains("vnp_Amount=11500000"));
        assert!(url.contains("sess-xyz"));
        assert!(url.contains("vnp_SecureHash="));
        let txn_ref = format!(
            "vnp_TxnRef={}_{}",
            order.id,
            now.format("%Y%m%d%H%M%S")
        );
        assert!(url.contains(&txn_ref));
    }
}
