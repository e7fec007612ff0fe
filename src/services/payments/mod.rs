//! Payment gateway adapters.
//!
//! Every adapter reduces its provider's callback to a [`VerifiedPayment`]
//! after checking the provider signature; the reconciler consumes that one
//! shape and never sees provider-specific fields. Verification is fail-closed:
//! a callback that cannot be authenticated never reaches the reconciler.

pub mod momo;
pub mod paypal;
pub mod vnpay;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

/// Opaque one-time payment session token bound to a single order.
pub fn new_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// What the client needs to start paying for a freshly created order.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CheckoutSession {
    pub provider: String,
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
    /// Redirect target for hosted checkout flows. Absent for DronePay,
    /// which confirms in-app.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pay_url: Option<String>,
}

/// A provider callback that passed signature verification.
///
/// `success == false` still carries a verified transaction: the provider
/// authentically reported a failed or abandoned payment.
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    pub provider: &'static str,
    /// Session token echoed through the provider round-trip.
    pub session_id: String,
    /// Provider-side order reference (our order number), cross-checked
    /// against the order the session resolves to. Absent for providers that
    /// only echo the session.
    pub order_ref: Option<String>,
    pub transaction_id: String,
    pub amount: Decimal,
    pub success: bool,
    pub failure_reason: Option<String>,
    /// Full provider payload, persisted verbatim in the payment ledger.
    pub raw: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique_and_url_safe() {
        let a = new_session_id();
        let b = new_session_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43); // 32 bytes, unpadded base64
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
