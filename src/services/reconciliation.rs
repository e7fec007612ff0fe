//! Payment reconciliation.
//!
//! Single entry point through which every verified provider callback flows,
//! regardless of gateway. The caller has already authenticated the payload;
//! this service correlates it to an order via the payment session, converges
//! the order's payment state, and appends the immutable payment ledger row.
//!
//! Idempotency is layered: an already-paid order short-circuits, and the
//! unique index on `payments.transaction_id` catches the remaining window
//! where two callbacks for the same transaction race past that check.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, SqlErr};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::order::{self, PaymentStatus};
use crate::entities::payment;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::notifications::NotificationService;
use crate::services::payments::VerifiedPayment;

/// Underpayment tolerance for providers that settle in a foreign currency.
/// PayPal amounts round-trip through a two-decimal USD conversion.
const FX_TOLERANCE_RATIO: f64 = 0.01;

pub struct ReconciliationService {
    db: Arc<DbPool>,
    events: EventSender,
    notifications: Arc<NotificationService>,
}

impl ReconciliationService {
    pub fn new(
        db: Arc<DbPool>,
        events: EventSender,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            db,
            events,
            notifications,
        }
    }

    /// Converge an order's payment state with a verified provider callback.
    /// Safe to call any number of times for the same transaction.
    #[instrument(skip(self, verified), fields(provider = verified.provider))]
    pub async fn reconcile(
        &self,
        verified: VerifiedPayment,
    ) -> Result<order::Model, ServiceError> {
        let order = order::Entity::find()
            .filter(order::Column::PaymentSessionId.eq(verified.session_id.as_str()))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound("payment session not found".to_string()))?;

        // Cross-check the provider's order reference against the order the
        // session resolved to. A mismatch means the session token was grafted
        // onto someone else's transaction.
        if let Some(order_ref) = &verified.order_ref {
            if !reference_matches(order_ref, &order) {
                return Err(ServiceError::SessionMismatch { order_id: order.id });
            }
        }

        if !verified.success {
            return self.record_failure(order, &verified).await;
        }

        if order.payment_status == PaymentStatus::Paid {
            debug!(order_id = %order.id, "order already paid, callback ignored");
            return Ok(order);
        }

        if underpaid(order.total, verified.amount, verified.provider) {
            warn!(
                order_id = %order.id,
                expected = %order.total,
                received = %verified.amount,
                "payment amount below order total"
            );
            let failed = VerifiedPayment {
                failure_reason: Some(format!(
                    "amount mismatch: expected {}, received {}",
                    order.total, verified.amount
                )),
                ..verified
            };
            return self.record_failure(order, &failed).await;
        }

        let now = Utc::now();
        let mut timeline = order.timeline.clone();
        timeline.push(
            order.status,
            Some(format!("payment received via {}", verified.provider)),
            now,
        );
        let mut active: order::ActiveModel = order.clone().into();
        active.payment_status = Set(PaymentStatus::Paid);
        active.transaction_id = Set(Some(verified.transaction_id.clone()));
        active.paid_at = Set(Some(now));
        active.paid_amount = Set(Some(verified.amount));
        active.timeline = Set(timeline);
        active.updated_at = Set(Some(now));
        let updated = active.update(self.db.as_ref()).await?;

        info!(
            order_id = %updated.id,
            transaction_id = %verified.transaction_id,
            "payment reconciled"
        );

        // The ledger write is the final idempotency gate; a unique violation
        // means a concurrent callback already recorded this transaction and
        // both executions converged on the same order state.
        let ledger_row = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(updated.id),
            transaction_id: Set(verified.transaction_id.clone()),
            provider: Set(verified.provider.to_string()),
            method: Set(updated.payment_method.display_name().to_string()),
            amount: Set(verified.amount),
            raw_data: Set(verified.raw.clone()),
            created_at: Set(now),
        };
        match ledger_row.insert(self.db.as_ref()).await {
            Ok(_) => {}
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                debug!(
                    transaction_id = %verified.transaction_id,
                    "ledger row already recorded by a concurrent callback"
                );
            }
            Err(e) => {
                // The order is already marked paid; losing the ledger row is
                // recoverable from raw provider data, failing the callback
                // here would instead trigger provider retries against a paid
                // order.
                warn!(
                    order_id = %updated.id,
                    "payment ledger write failed, needs manual review: {}", e
                );
            }
        }

        self.events
            .send(Event::PaymentReceived {
                order_id: updated.id,
                transaction_id: verified.transaction_id.clone(),
                provider: verified.provider.to_string(),
                amount: verified.amount,
            })
            .await;
        if let Err(e) = self.notifications.payment_received(&updated).await {
            warn!(order_id = %updated.id, "failed to send payment notifications: {}", e);
        }

        Ok(updated)
    }

    /// Settle an in-app DronePay payment. The client proves possession of
    /// the session token issued at order creation; there is no external
    /// provider round-trip. A reported failure takes the failure path and
    /// never marks the order paid.
    #[instrument(skip(self, session_id))]
    pub async fn confirm_dronepay(
        &self,
        order_id: Uuid,
        session_id: &str,
        success: bool,
    ) -> Result<order::Model, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))?;

        if order.payment_session_id != session_id {
            return Err(ServiceError::SessionMismatch { order_id });
        }
        if order.payment_session_expires_at < Utc::now()
            && order.payment_status != PaymentStatus::Paid
        {
            return Err(ServiceError::Conflict(
                "payment session has expired".to_string(),
            ));
        }

        self.reconcile(VerifiedPayment {
            provider: "dronepay",
            session_id: session_id.to_string(),
            order_ref: Some(order.order_number.clone()),
            transaction_id: format!("DP-{}", order.order_number),
            amount: order.total,
            success,
            failure_reason: (!success).then(|| "payment declined in app".to_string()),
            raw: serde_json::json!({ "source": "dronepay", "order_id": order.id }),
        })
        .await
    }

    /// Record an authenticated failure callback. Only a pending order moves
    /// to failed; late failure callbacks never claw back a paid order.
    async fn record_failure(
        &self,
        order: order::Model,
        verified: &VerifiedPayment,
    ) -> Result<order::Model, ServiceError> {
        let reason = verified
            .failure_reason
            .clone()
            .unwrap_or_else(|| "payment was not completed".to_string());

        if order.payment_status != PaymentStatus::Pending {
            debug!(
                order_id = %order.id,
                status = ?order.payment_status,
                "failure callback ignored for non-pending payment"
            );
            return Ok(order);
        }

        let now = Utc::now();
        let mut timeline = order.timeline.clone();
        timeline.push(order.status, Some(format!("payment failed: {reason}")), now);
        let mut active: order::ActiveModel = order.clone().into();
        active.payment_status = Set(PaymentStatus::Failed);
        active.timeline = Set(timeline);
        active.updated_at = Set(Some(now));
        let updated = active.update(self.db.as_ref()).await?;

        info!(order_id = %updated.id, reason, "payment failure recorded");
        self.events
            .send(Event::PaymentFailed {
                order_id: updated.id,
                provider: verified.provider.to_string(),
                reason: reason.clone(),
            })
            .await;
        if let Err(e) = self.notifications.payment_failed(&updated, &reason).await {
            warn!(order_id = %updated.id, "failed to send failure notification: {}", e);
        }

        Ok(updated)
    }
}

/// Provider order references come in two shapes: the order number (MoMo,
/// DronePay) or the VNPay transaction reference `{order_id}_{timestamp}`.
fn reference_matches(order_ref: &str, order: &order::Model) -> bool {
    if order_ref == order.order_number {
        return true;
    }
    order_ref
        .split_once('_')
        .and_then(|(id, _)| Uuid::parse_str(id).ok())
        .is_some_and(|id| id == order.id)
}

/// Whether the received amount falls short of the order total, allowing the
/// currency-conversion tolerance for foreign-settled providers.
fn underpaid(expected: Decimal, received: Decimal, provider: &str) -> bool {
    if received >= expected {
        return false;
    }
    if provider == "paypal" {
        let shortfall = expected - received;
        let tolerance = expected * Decimal::try_from(FX_TOLERANCE_RATIO).unwrap_or_default();
        return shortfall > tolerance;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn exact_and_over_payment_are_accepted() {
        assert!(!underpaid(dec!(115000), dec!(115000), "vnpay"));
        assert!(!underpaid(dec!(115000), dec!(120000), "momo"));
    }

    #[test]
    fn vnd_providers_allow_no_shortfall() {
        assert!(underpaid(dec!(115000), dec!(114999), "vnpay"));
        assert!(underpaid(dec!(115000), dec!(1), "momo"));
    }

    #[test]
    fn paypal_tolerates_conversion_rounding() {
        // 4.59 USD at 25,000 VND/USD is 114,750: within 1%
        assert!(!underpaid(dec!(115000), dec!(114750), "paypal"));
        // a real shortfall still fails
        assert!(underpaid(dec!(115000), dec!(100000), "paypal"));
    }
}
