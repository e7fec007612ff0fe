use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde_json::json;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::notification::{self, RecipientRole};
use crate::entities::order::{self, OrderStatus};
use crate::errors::ServiceError;
use crate::events::realtime::{RealtimeEvent, RealtimePublisher, Room};

/// Message template for a customer-facing status notification.
fn status_template(status: OrderStatus) -> Option<(&'static str, &'static str, &'static str)> {
    // (kind, title, message)
    match status {
        OrderStatus::Confirmed => Some((
            "order_confirmed",
            "Order confirmed",
            "The restaurant has confirmed your order.",
        )),
        OrderStatus::Preparing => Some((
            "order_preparing",
            "Order in the kitchen",
            "Your food is being prepared.",
        )),
        OrderStatus::Ready => Some((
            "order_ready",
            "Order ready",
            "Your order is packed and waiting for a drone.",
        )),
        OrderStatus::Delivering => Some((
            "order_delivering",
            "Drone on the way",
            "A drone has picked up your order and is flying to you.",
        )),
        OrderStatus::Delivered => Some((
            "order_delivered",
            "Order delivered",
            "Your order has arrived. Enjoy your meal!",
        )),
        // pending is the initial state, completed is an internal settlement
        // step, cancellation has its own richer template
        OrderStatus::Pending | OrderStatus::Completed | OrderStatus::Cancelled => None,
    }
}

/// Persists notifications and mirrors them to the realtime channel.
///
/// Notification failures are logged and swallowed by callers where the
/// triggering state change has already committed; a lost notification must
/// never roll back an order update.
pub struct NotificationService {
    db: Arc<DbPool>,
    realtime: Arc<dyn RealtimePublisher>,
}

impl NotificationService {
    pub fn new(db: Arc<DbPool>, realtime: Arc<dyn RealtimePublisher>) -> Self {
        Self { db, realtime }
    }

    async fn persist(
        &self,
        recipient_id: Uuid,
        recipient_role: RecipientRole,
        order_id: Uuid,
        kind: &str,
        title: &str,
        message: &str,
    ) -> Result<notification::Model, ServiceError> {
        let row = notification::ActiveModel {
            id: Set(Uuid::new_v4()),
            recipient_id: Set(recipient_id),
            recipient_role: Set(recipient_role),
            order_id: Set(order_id),
            kind: Set(kind.to_string()),
            title: Set(title.to_string()),
            message: Set(message.to_string()),
            read: Set(false),
            created_at: Set(Utc::now()),
        };
        Ok(row.insert(self.db.as_ref()).await?)
    }

    /// Tell the restaurant a new order arrived.
    #[instrument(skip(self, order))]
    pub async fn order_created(&self, order: &order::Model) -> Result<(), ServiceError> {
        self.persist(
            order.restaurant_id,
            RecipientRole::Restaurant,
            order.id,
            "new_order",
            "New order",
            &format!("Order {} is waiting for confirmation.", order.order_number),
        )
        .await?;

        let payload = json!({
            "order_id": order.id,
            "order_number": order.order_number,
            "total": order.total,
            "status": order.status,
        });
        self.realtime.publish(
            Room::Restaurant(order.restaurant_id),
            RealtimeEvent::new_order(payload.clone()),
        );
        self.realtime
            .publish(Room::Admin, RealtimeEvent::new_order(payload));
        Ok(())
    }

    /// Fan out a fulfillment status change to the customer and both dashboards.
    #[instrument(skip(self, order))]
    pub async fn status_changed(
        &self,
        order: &order::Model,
        to: OrderStatus,
    ) -> Result<(), ServiceError> {
        if let (Some(customer_id), Some((kind, title, message))) =
            (order.customer_id, status_template(to))
        {
            self.persist(
                customer_id,
                RecipientRole::Customer,
                order.id,
                kind,
                title,
                message,
            )
            .await?;
        }

        let payload = json!({
            "order_id": order.id,
            "order_number": order.order_number,
            "status": to,
        });
        if let Some(customer_id) = order.customer_id {
            self.realtime.publish(
                Room::Customer(customer_id),
                RealtimeEvent::order_updated(payload.clone()),
            );
        }
        self.realtime.publish(
            Room::Restaurant(order.restaurant_id),
            RealtimeEvent::order_updated(payload.clone()),
        );
        self.realtime
            .publish(Room::Admin, RealtimeEvent::order_updated(payload));
        Ok(())
    }

    #[instrument(skip(self, order))]
    pub async fn payment_received(&self, order: &order::Model) -> Result<(), ServiceError> {
        if let Some(customer_id) = order.customer_id {
            self.persist(
                customer_id,
                RecipientRole::Customer,
                order.id,
                "payment_received",
                "Payment received",
                &format!(
                    "We received your {} payment for order {}.",
                    order.payment_method.display_name(),
                    order.order_number
                ),
            )
            .await?;
        }
        self.persist(
            order.restaurant_id,
            RecipientRole::Restaurant,
            order.id,
            "payment_received",
            "Order paid",
            &format!("Order {} has been paid.", order.order_number),
        )
        .await?;

        let payload = json!({
            "order_id": order.id,
            "order_number": order.order_number,
            "amount": order.paid_amount,
            "provider": order.payment_provider,
        });
        if let Some(customer_id) = order.customer_id {
            self.realtime.publish(
                Room::Customer(customer_id),
                RealtimeEvent::payment_received(payload.clone()),
            );
        }
        self.realtime.publish(
            Room::Restaurant(order.restaurant_id),
            RealtimeEvent::payment_received(payload),
        );
        Ok(())
    }

    /// Push a fresh tracking snapshot to every room watching the order.
    /// Realtime only, nothing is persisted; clients poll the track endpoint
    /// for the durable view.
    pub fn tracking_updated(&self, order: &order::Model, tracking: serde_json::Value) {
        let payload = json!({
            "order_id": order.id,
            "order_number": order.order_number,
            "status": order.status,
            "tracking": tracking,
        });
        if let Some(customer_id) = order.customer_id {
            self.realtime.publish(
                Room::Customer(customer_id),
                RealtimeEvent::order_tracking_updated(payload.clone()),
            );
        }
        self.realtime.publish(
            Room::Restaurant(order.restaurant_id),
            RealtimeEvent::order_tracking_updated(payload.clone()),
        );
        self.realtime
            .publish(Room::Admin, RealtimeEvent::order_tracking_updated(payload));
    }

    /// Push an interpolated drone position for an in-flight order.
    pub fn drone_location(&self, order: &order::Model, position: serde_json::Value) {
        let payload = json!({
            "order_id": order.id,
            "drone_id": order.assigned_drone_id,
            "position": position,
        });
        if let Some(customer_id) = order.customer_id {
            self.realtime.publish(
                Room::Customer(customer_id),
                RealtimeEvent::drone_location_update(payload.clone()),
            );
        }
        self.realtime.publish(
            Room::Restaurant(order.restaurant_id),
            RealtimeEvent::drone_location_update(payload),
        );
    }

    #[instrument(skip(self, order))]
    pub async fn payment_failed(
        &self,
        order: &order::Model,
        reason: &str,
    ) -> Result<(), ServiceError> {
        if let Some(customer_id) = order.customer_id {
            self.persist(
                customer_id,
                RecipientRole::Customer,
                order.id,
                "payment_failed",
                "Payment failed",
                &format!(
                    "Your payment for order {} did not go through: {reason}",
                    order.order_number
                ),
            )
            .await?;
        }
        Ok(())
    }

    #[instrument(skip(self, order))]
    pub async fn order_cancelled(
        &self,
        order: &order::Model,
        reason: Option<&str>,
    ) -> Result<(), ServiceError> {
        let message = match reason {
            Some(r) => format!("Order {} was cancelled: {r}", order.order_number),
            None => format!("Order {} was cancelled.", order.order_number),
        };
        if let Some(customer_id) = order.customer_id {
            self.persist(
                customer_id,
                RecipientRole::Customer,
                order.id,
                "order_cancelled",
                "Order cancelled",
                &message,
            )
            .await?;
        }
        self.persist(
            order.restaurant_id,
            RecipientRole::Restaurant,
            order.id,
            "order_cancelled",
            "Order cancelled",
            &message,
        )
        .await?;

        let payload = json!({
            "order_id": order.id,
            "order_number": order.order_number,
        });
        if let Some(customer_id) = order.customer_id {
            self.realtime.publish(
                Room::Customer(customer_id),
                RealtimeEvent::order_cancelled(payload.clone()),
            );
        }
        self.realtime.publish(
            Room::Restaurant(order.restaurant_id),
            RealtimeEvent::order_cancelled(payload),
        );
        Ok(())
    }

    /// Convenience wrapper for call sites that must not fail on notification
    /// errors.
    pub async fn try_status_changed(&self, order: &order::Model, to: OrderStatus) {
        if let Err(e) = self.status_changed(order, to).await {
            warn!(order_id = %order.id, "failed to send status notification: {}", e);
        }
    }

    /// List a recipient's notifications, newest first.
    pub async fn list_for(
        &self,
        recipient_id: Uuid,
        role: RecipientRole,
    ) -> Result<Vec<notification::Model>, ServiceError> {
        Ok(notification::Entity::find()
            .filter(notification::Column::RecipientId.eq(recipient_id))
            .filter(notification::Column::RecipientRole.eq(role))
            .order_by_desc(notification::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?)
    }

    /// Mark one notification read. Scoped to the recipient so one user cannot
    /// touch another's rows.
    pub async fn mark_read(
        &self,
        recipient_id: Uuid,
        notification_id: Uuid,
    ) -> Result<notification::Model, ServiceError> {
        let found = notification::Entity::find_by_id(notification_id)
            .one(self.db.as_ref())
            .await?
            .filter(|n| n.recipient_id == recipient_id)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("notification {notification_id} not found"))
            })?;

        if found.read {
            return Ok(found);
        }
        let mut active: notification::ActiveModel = found.into();
        active.read = Set(true);
        Ok(active.update(self.db.as_ref()).await?)
    }

    pub async fn mark_all_read(&self, recipient_id: Uuid) -> Result<u64, ServiceError> {
        let result = notification::Entity::update_many()
            .col_expr(notification::Column::Read, sea_orm::sea_query::Expr::value(true))
            .filter(notification::Column::RecipientId.eq(recipient_id))
            .filter(notification::Column::Read.eq(false))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_visible_status_has_a_template() {
        for status in [
            OrderStatus::Confirmed,
            OrderStatus::Preparing,
            OrderStatus::Ready,
            OrderStatus::Delivering,
            OrderStatus::Delivered,
        ] {
            assert!(status_template(status).is_some(), "{status:?}");
        }
    }

    #[test]
    fn internal_statuses_have_no_template() {
        assert!(status_template(OrderStatus::Pending).is_none());
        assert!(status_template(OrderStatus::Completed).is_none());
        assert!(status_template(OrderStatus::Cancelled).is_none());
    }
}
