use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::entities::delivery::{self, DeliveryStatus};
use crate::entities::order::{self, OrderStatus, PaymentMethod, PaymentStatus, Timeline};
use crate::entities::order_item;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::catalog::{ProductCatalog, RestaurantDirectory};
use crate::services::drones::DroneService;
use crate::services::geocoding::{self, Coordinates};
use crate::services::notifications::NotificationService;
use crate::services::payments::new_session_id;
use crate::services::settlement::SettlementService;
use crate::services::tracking;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 20))]
    pub quantity: i32,
}

/// Order intake payload. Prices are looked up server-side; the client only
/// names products and quantities.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    pub restaurant_id: Uuid,
    #[validate(length(min = 1, max = 50))]
    pub items: Vec<CreateOrderItemRequest>,
    pub payment_method: PaymentMethod,
    #[validate(length(min = 5, max = 200))]
    pub delivery_address: String,
    // Guest checkout identity, required when no bearer token is presented
    #[validate(length(min = 1, max = 100))]
    pub guest_name: Option<String>,
    #[validate(length(min = 8, max = 20))]
    pub guest_phone: Option<String>,
    #[validate(email)]
    pub guest_email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct OrderListFilter {
    pub status: Option<OrderStatus>,
    pub restaurant_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default)]
    pub per_page: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
    pub note: Option<String>,
}

/// Order lifecycle owner: intake, status transitions, cancellation and the
/// dispatch/settlement side effects that ride on specific transitions.
pub struct OrderService {
    db: Arc<DbPool>,
    events: EventSender,
    notifications: Arc<NotificationService>,
    drones: Arc<DroneService>,
    settlement: Arc<SettlementService>,
    directory: Arc<dyn RestaurantDirectory>,
    catalog: Arc<dyn ProductCatalog>,
    session_ttl: Duration,
    flight_duration: Duration,
}

impl OrderService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DbPool>,
        events: EventSender,
        notifications: Arc<NotificationService>,
        drones: Arc<DroneService>,
        settlement: Arc<SettlementService>,
        directory: Arc<dyn RestaurantDirectory>,
        catalog: Arc<dyn ProductCatalog>,
        session_ttl: Duration,
        flight_duration: Duration,
    ) -> Self {
        Self {
            db,
            events,
            notifications,
            drones,
            settlement,
            directory,
            catalog,
            session_ttl,
            flight_duration,
        }
    }

    /// Create an order with server-computed pricing and a fresh payment
    /// session. `customer_id` comes from the bearer token when present;
    /// guests must supply contact details instead.
    #[instrument(skip(self, req), fields(restaurant_id = %req.restaurant_id))]
    pub async fn create_order(
        &self,
        req: CreateOrderRequest,
        customer_id: Option<Uuid>,
    ) -> Result<(order::Model, Vec<order_item::Model>), ServiceError> {
        req.validate()?;
        for item in &req.items {
            item.validate()?;
        }

        if customer_id.is_none() && (req.guest_name.is_none() || req.guest_phone.is_none()) {
            return Err(ServiceError::Validation(
                "guest orders require guest_name and guest_phone".to_string(),
            ));
        }
        // An authenticated customer never doubles as a guest
        let (guest_name, guest_phone, guest_email) = if customer_id.is_some() {
            (None, None, None)
        } else {
            (req.guest_name, req.guest_phone, req.guest_email)
        };

        let restaurant = self.directory.restaurant(req.restaurant_id).await?;
        if !restaurant.accepting_orders {
            return Err(ServiceError::Conflict(format!(
                "restaurant {} is not accepting orders",
                restaurant.name
            )));
        }

        let mut subtotal = Decimal::ZERO;
        let mut priced_items = Vec::with_capacity(req.items.len());
        for item in &req.items {
            let product = self.catalog.product(item.product_id).await?;
            if product.restaurant_id != req.restaurant_id {
                return Err(ServiceError::Validation(format!(
                    "product {} does not belong to this restaurant",
                    product.name
                )));
            }
            if !product.available {
                return Err(ServiceError::Conflict(format!(
                    "product {} is currently unavailable",
                    product.name
                )));
            }
            let line_total = product.price * Decimal::from(item.quantity);
            subtotal += line_total;
            priced_items.push((product, item.quantity, line_total));
        }

        let discount = Decimal::ZERO;
        let total = subtotal + restaurant.delivery_fee - discount;
        let dropoff = geocoding::geocode(&req.delivery_address);

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let mut timeline = Timeline::default();
        timeline.push(OrderStatus::Pending, Some("order placed".to_string()), now);

        let order_row = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(generate_order_number(now.timestamp())),
            restaurant_id: Set(req.restaurant_id),
            customer_id: Set(customer_id),
            guest_name: Set(guest_name),
            guest_phone: Set(guest_phone),
            guest_email: Set(guest_email),
            subtotal: Set(subtotal),
            delivery_fee: Set(restaurant.delivery_fee),
            discount: Set(discount),
            total: Set(total),
            payment_method: Set(req.payment_method),
            payment_provider: Set(provider_name(req.payment_method).to_string()),
            payment_session_id: Set(new_session_id()),
            payment_session_expires_at: Set(now + self.session_ttl),
            payment_status: Set(PaymentStatus::Pending),
            transaction_id: Set(None),
            paid_at: Set(None),
            paid_amount: Set(None),
            status: Set(OrderStatus::Pending),
            timeline: Set(timeline),
            delivery_address: Set(req.delivery_address),
            pickup_lat: Set(restaurant.location.lat),
            pickup_lng: Set(restaurant.location.lng),
            dropoff_lat: Set(dropoff.lat),
            dropoff_lng: Set(dropoff.lng),
            assigned_drone_id: Set(None),
            dispatched_at: Set(None),
            estimated_delivery_time: Set(None),
            actual_delivery_time: Set(None),
            created_at: Set(now),
            updated_at: Set(None),
        };

        let txn = self.db.begin().await?;
        let order = order_row.insert(&txn).await?;
        let mut items = Vec::with_capacity(priced_items.len());
        for (product, quantity, line_total) in priced_items {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(product.id),
                name: Set(product.name),
                unit_price: Set(product.price),
                quantity: Set(quantity),
                total_price: Set(line_total),
            }
            .insert(&txn)
            .await?;
            items.push(item);
        }
        txn.commit().await?;

        info!(order_id = %order.id, order_number = %order.order_number, %total, "order created");
        self.events
            .send(Event::OrderCreated {
                order_id: order.id,
                restaurant_id: order.restaurant_id,
                total: order.total,
            })
            .await;
        if let Err(e) = self.notifications.order_created(&order).await {
            warn!(order_id = %order.id, "failed to notify restaurant of new order: {}", e);
        }

        Ok((order, items))
    }

    pub async fn get_order(&self, id: Uuid) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {id} not found")))
    }

    pub async fn get_order_with_items(
        &self,
        id: Uuid,
    ) -> Result<(order::Model, Vec<order_item::Model>), ServiceError> {
        let order = self.get_order(id).await?;
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(id))
            .all(self.db.as_ref())
            .await?;
        Ok((order, items))
    }

    pub async fn list_orders(
        &self,
        filter: OrderListFilter,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let mut query = order::Entity::find().order_by_desc(order::Column::CreatedAt);
        if let Some(status) = filter.status {
            query = query.filter(order::Column::Status.eq(status));
        }
        if let Some(restaurant_id) = filter.restaurant_id {
            query = query.filter(order::Column::RestaurantId.eq(restaurant_id));
        }
        if let Some(customer_id) = filter.customer_id {
            query = query.filter(order::Column::CustomerId.eq(customer_id));
        }

        let per_page = filter.per_page.unwrap_or(20).clamp(1, 100);
        let page = filter.page.unwrap_or(1).max(1);
        let paginator = query.paginate(self.db.as_ref(), per_page);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;
        Ok((orders, total))
    }

    /// Apply a fulfillment transition with its side effects.
    ///
    /// Re-submitting the current status is a no-op for retry friendliness;
    /// any other edge outside the state machine is rejected.
    #[instrument(skip(self, note))]
    pub async fn update_status(
        &self,
        id: Uuid,
        target: OrderStatus,
        note: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let order = self.get_order(id).await?;

        if order.status == target {
            return Ok(order);
        }
        if !order.status.can_transition_to(target) {
            return Err(ServiceError::InvalidTransition(format!(
                "cannot move order {} from {} to {}",
                order.order_number,
                order.status.as_str(),
                target.as_str()
            )));
        }
        if target == OrderStatus::Cancelled {
            // Cancellation carries its own flow (refund marking, fan-out)
            return self.cancel_order(id, note).await;
        }
        if target == OrderStatus::Confirmed
            && order.payment_status != PaymentStatus::Paid
            && order.payment_method != PaymentMethod::Cod
        {
            return Err(ServiceError::Conflict(format!(
                "order {} has not been paid yet",
                order.order_number
            )));
        }

        let now = Utc::now();
        let from = order.status;
        let mut timeline = order.timeline.clone();
        timeline.push(target, note, now);

        let mut active: order::ActiveModel = order.clone().into();
        active.status = Set(target);
        active.timeline = Set(timeline);
        active.updated_at = Set(Some(now));

        match target {
            OrderStatus::Delivering => {
                // Hand over to a drone: fix the flight window now so tracking
                // interpolates from a stable zero point.
                let drone = self.drones.claim_available(order.id).await?;
                active.assigned_drone_id = Set(drone.as_ref().map(|d| d.id));
                active.dispatched_at = Set(Some(now));
                active.estimated_delivery_time = Set(Some(now + self.flight_duration));

                if let Some(drone) = &drone {
                    delivery::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        order_id: Set(order.id),
                        drone_id: Set(drone.id),
                        status: Set(DeliveryStatus::Assigned),
                        pickup_lat: Set(order.pickup_lat),
                        pickup_lng: Set(order.pickup_lng),
                        dropoff_lat: Set(order.dropoff_lat),
                        dropoff_lng: Set(order.dropoff_lng),
                        dispatched_at: Set(now),
                        arrived_at: Set(None),
                    }
                    .insert(self.db.as_ref())
                    .await?;

                    self.events
                        .send(Event::DroneDispatched {
                            order_id: order.id,
                            drone_id: drone.id,
                            estimated_arrival: now + self.flight_duration,
                        })
                        .await;
                }
            }
            OrderStatus::Delivered => {
                active.actual_delivery_time = Set(Some(now));
            }
            _ => {}
        }

        let updated = active.update(self.db.as_ref()).await?;

        // Post-commit side effects; failures here are logged, never unwound
        if target == OrderStatus::Delivered {
            self.finish_delivery(&updated, now).await;
        }
        if target == OrderStatus::Completed {
            if let Err(e) = self
                .settlement
                .settle_order(
                    updated.restaurant_id,
                    updated.id,
                    &updated.order_number,
                    updated.total,
                )
                .await
            {
                warn!(order_id = %updated.id, "settlement write failed, needs manual review: {}", e);
            }
        }

        self.events
            .send(Event::OrderStatusChanged {
                order_id: updated.id,
                from,
                to: target,
            })
            .await;
        self.notifications.try_status_changed(&updated, target).await;
        if matches!(target, OrderStatus::Delivering | OrderStatus::Delivered) {
            let snap = tracking::snapshot(&updated, now, self.flight_duration);
            let payload = serde_json::to_value(&snap).unwrap_or_default();
            self.notifications.tracking_updated(&updated, payload);
        }

        Ok(updated)
    }

    /// Release the drone and close the delivery leg after arrival.
    async fn finish_delivery(&self, order: &order::Model, now: chrono::DateTime<Utc>) {
        let Some(drone_id) = order.assigned_drone_id else {
            return;
        };
        let dropoff = Coordinates {
            lat: order.dropoff_lat,
            lng: order.dropoff_lng,
        };
        if let Err(e) = self.drones.release(drone_id, dropoff).await {
            warn!(order_id = %order.id, %drone_id, "failed to release drone: {}", e);
        }

        let close = delivery::Entity::update_many()
            .col_expr(
                delivery::Column::Status,
                sea_orm::sea_query::Expr::value(DeliveryStatus::Delivered),
            )
            .col_expr(
                delivery::Column::ArrivedAt,
                sea_orm::sea_query::Expr::value(now),
            )
            .filter(delivery::Column::OrderId.eq(order.id))
            .exec(self.db.as_ref())
            .await;
        if let Err(e) = close {
            warn!(order_id = %order.id, "failed to close delivery record: {}", e);
        }
    }

    /// Cancel an order. Only allowed while the kitchen has not started; a
    /// paid order is flagged refunded for the manual refund queue.
    #[instrument(skip(self, reason))]
    pub async fn cancel_order(
        &self,
        id: Uuid,
        reason: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let order = self.get_order(id).await?;

        if order.status == OrderStatus::Cancelled {
            return Ok(order);
        }
        if !order.status.can_transition_to(OrderStatus::Cancelled) {
            return Err(ServiceError::InvalidTransition(format!(
                "order {} can no longer be cancelled ({})",
                order.order_number,
                order.status.as_str()
            )));
        }

        let now = Utc::now();
        let mut timeline = order.timeline.clone();
        timeline.push(OrderStatus::Cancelled, reason.clone(), now);

        let was_paid = order.payment_status == PaymentStatus::Paid;
        let mut active: order::ActiveModel = order.clone().into();
        active.status = Set(OrderStatus::Cancelled);
        active.timeline = Set(timeline);
        active.updated_at = Set(Some(now));
        if was_paid {
            active.payment_status = Set(PaymentStatus::Refunded);
        }
        let updated = active.update(self.db.as_ref()).await?;

        if was_paid {
            info!(order_id = %updated.id, "paid order cancelled, queued for refund");
        }
        self.events
            .send(Event::OrderCancelled {
                order_id: updated.id,
                reason: reason.clone(),
            })
            .await;
        if let Err(e) = self
            .notifications
            .order_cancelled(&updated, reason.as_deref())
            .await
        {
            warn!(order_id = %updated.id, "failed to send cancellation notifications: {}", e);
        }

        Ok(updated)
    }
}

fn provider_name(method: PaymentMethod) -> &'static str {
    match method {
        PaymentMethod::Vnpay => "vnpay",
        PaymentMethod::Momo => "momo",
        PaymentMethod::Paypal => "paypal",
        PaymentMethod::Dronepay => "dronepay",
        PaymentMethod::Cod => "cod",
    }
}

/// Human-quotable order number: SB prefix, creation timestamp, random tail
/// to disambiguate same-second orders.
fn generate_order_number(timestamp: i64) -> String {
    let tail: u16 = rand::thread_rng().gen_range(0..1000);
    format!("SB{timestamp}{tail:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_numbers_have_the_expected_shape() {
        let n = generate_order_number(1_700_000_000);
        assert!(n.starts_with("SB1700000000"));
        assert_eq!(n.len(), "SB1700000000".len() + 3);
    }

    #[test]
    fn create_request_validation_catches_bad_input() {
        let req = CreateOrderRequest {
            restaurant_id: Uuid::new_v4(),
            items: vec![],
            payment_method: PaymentMethod::Vnpay,
            delivery_address: "x".to_string(),
            guest_name: None,
            guest_phone: None,
            guest_email: None,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn quantity_range_is_enforced() {
        let zero = CreateOrderItemRequest {
            product_id: Uuid::new_v4(),
            quantity: 0,
        };
        let oversized = CreateOrderItemRequest {
            product_id: Uuid::new_v4(),
            quantity: 21,
        };
        assert!(zero.validate().is_err());
        assert!(oversized.validate().is_err());
    }
}
