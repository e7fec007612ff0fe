//! Delivery progress simulation.
//!
//! Nothing here writes to the database. Progress and drone position are pure
//! functions of the order's state and the elapsed time since dispatch, so two
//! concurrent polls always agree and the tracker needs no background ticker.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::order::{self, OrderStatus};
use crate::services::geocoding::Coordinates;

/// Progress shown while the parcel is still at the restaurant waiting for a
/// drone. Flight interpolation starts from here.
const READY_PROGRESS: u8 = 10;

/// In-flight progress cap. The jump to 100 happens only on the confirmed
/// `delivered` transition, never from elapsed time alone.
const FLIGHT_CAP: u8 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPhase {
    Pickup,
    InFlight,
    Dropoff,
}

/// Point-in-time view of a delivery, assembled per request.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TrackingSnapshot {
    pub order_id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub phase: DeliveryPhase,
    /// 0..=100
    pub progress: u8,
    pub drone_lat: f64,
    pub drone_lng: f64,
    pub drone_id: Option<Uuid>,
    pub estimated_delivery_time: Option<DateTime<Utc>>,
}

/// Progress percentage for an order at time `now`.
///
/// Monotonic over the order's life: 0 before the kitchen hands over, 10 once
/// ready, 10..=90 during flight scaled by elapsed time over the configured
/// flight duration, 100 once delivered.
pub fn progress_at(order: &order::Model, now: DateTime<Utc>, flight_duration: Duration) -> u8 {
    match order.status {
        OrderStatus::Pending | OrderStatus::Confirmed | OrderStatus::Preparing => 0,
        OrderStatus::Ready => READY_PROGRESS,
        OrderStatus::Delivering => {
            let dispatched = order.dispatched_at.unwrap_or(order.created_at);
            let elapsed = (now - dispatched).max(Duration::zero());
            let total_ms = flight_duration.num_milliseconds().max(1);
            let fraction = (elapsed.num_milliseconds() as f64 / total_ms as f64).clamp(0.0, 1.0);
            let flown = (fraction * f64::from(FLIGHT_CAP - READY_PROGRESS)).round() as u8;
            (READY_PROGRESS + flown).min(FLIGHT_CAP)
        }
        OrderStatus::Delivered | OrderStatus::Completed => 100,
        OrderStatus::Cancelled => 0,
    }
}

/// Simulated drone position for the given progress, linearly interpolated
/// between pickup and dropoff over the in-flight progress band.
pub fn position_at(order: &order::Model, progress: u8) -> Coordinates {
    let pickup = Coordinates {
        lat: order.pickup_lat,
        lng: order.pickup_lng,
    };
    let dropoff = Coordinates {
        lat: order.dropoff_lat,
        lng: order.dropoff_lng,
    };

    if progress <= READY_PROGRESS {
        return pickup;
    }
    if progress >= 100 {
        return dropoff;
    }

    let t = f64::from(progress.min(FLIGHT_CAP) - READY_PROGRESS)
        / f64::from(FLIGHT_CAP - READY_PROGRESS);
    Coordinates {
        lat: pickup.lat + (dropoff.lat - pickup.lat) * t,
        lng: pickup.lng + (dropoff.lng - pickup.lng) * t,
    }
}

fn phase_for(status: OrderStatus, progress: u8) -> DeliveryPhase {
    match status {
        OrderStatus::Delivered | OrderStatus::Completed => DeliveryPhase::Dropoff,
        OrderStatus::Delivering if progress > READY_PROGRESS => DeliveryPhase::InFlight,
        _ => DeliveryPhase::Pickup,
    }
}

/// Assemble the tracking view for an order.
pub fn snapshot(
    order: &order::Model,
    now: DateTime<Utc>,
    flight_duration: Duration,
) -> TrackingSnapshot {
    let progress = progress_at(order, now, flight_duration);
    let position = position_at(order, progress);
    TrackingSnapshot {
        order_id: order.id,
        order_number: order.order_number.clone(),
        status: order.status,
        phase: phase_for(order.status, progress),
        progress,
        drone_lat: position.lat,
        drone_lng: position.lng,
        drone_id: order.assigned_drone_id,
        estimated_delivery_time: order.estimated_delivery_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::order::{PaymentMethod, PaymentStatus, Timeline};
    use rust_decimal_macros::dec;

    fn order_with(status: OrderStatus, dispatched_at: Option<DateTime<Utc>>) -> order::Model {
        let now = Utc::now();
        order::Model {
            id: Uuid::new_v4(),
            order_number: "SB1700000000001".to_string(),
            restaurant_id: Uuid::new_v4(),
            customer_id: Some(Uuid::new_v4()),
            guest_name: None,
            guest_phone: None,
            guest_email: None,
            subtotal: dec!(100000),
            delivery_fee: dec!(15000),
            discount: dec!(0),
            total: dec!(115000),
            payment_method: PaymentMethod::Vnpay,
            payment_provider: "vnpay".to_string(),
            payment_session_id: "sess".to_string(),
            payment_session_expires_at: now,
            payment_status: PaymentStatus::Paid,
            transaction_id: None,
            paid_at: None,
            paid_amount: None,
            status,
            timeline: Timeline::default(),
            delivery_address: "1 Tran Hung Dao".to_string(),
            pickup_lat: 10.0,
            pickup_lng: 106.0,
            dropoff_lat: 11.0,
            dropoff_lng: 107.0,
            assigned_drone_id: None,
            dispatched_at,
            estimated_delivery_time: None,
            actual_delivery_time: None,
            created_at: now,
            updated_at: None,
        }
    }

    fn flight() -> Duration {
        Duration::minutes(20)
    }

    #[test]
    fn progress_before_handover_is_zero() {
        let now = Utc::now();
        for status in [
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            OrderStatus::Preparing,
        ] {
            assert_eq!(progress_at(&order_with(status, None), now, flight()), 0);
        }
    }

    #[test]
    fn ready_pins_progress_at_ten() {
        let order = order_with(OrderStatus::Ready, None);
        assert_eq!(progress_at(&order, Utc::now(), flight()), 10);
        assert_eq!(position_at(&order, 10), Coordinates { lat: 10.0, lng: 106.0 });
    }

    #[test]
    fn halfway_through_the_flight_is_progress_fifty_at_the_midpoint() {
        let now = Utc::now();
        let order = order_with(OrderStatus::Delivering, Some(now - Duration::minutes(10)));
        let progress = progress_at(&order, now, flight());
        assert_eq!(progress, 50);

        let pos = position_at(&order, progress);
        assert!((pos.lat - 10.5).abs() < 1e-9);
        assert!((pos.lng - 106.5).abs() < 1e-9);
    }

    #[test]
    fn in_flight_progress_is_capped_at_ninety() {
        let now = Utc::now();
        let order = order_with(OrderStatus::Delivering, Some(now - Duration::hours(3)));
        assert_eq!(progress_at(&order, now, flight()), 90);
    }

    #[test]
    fn progress_is_monotonic_during_flight() {
        let dispatched = Utc::now();
        let order = order_with(OrderStatus::Delivering, Some(dispatched));
        let mut last = 0;
        for minute in 0..=30 {
            let p = progress_at(&order, dispatched + Duration::minutes(minute), flight());
            assert!(p >= last, "minute {minute}: {p} < {last}");
            last = p;
        }
    }

    #[test]
    fn delivered_snaps_to_dropoff_and_one_hundred() {
        let order = order_with(OrderStatus::Delivered, Some(Utc::now()));
        assert_eq!(progress_at(&order, Utc::now(), flight()), 100);
        assert_eq!(
            position_at(&order, 100),
            Coordinates { lat: 11.0, lng: 107.0 }
        );
    }

    #[test]
    fn clock_skew_before_dispatch_clamps_to_start() {
        let now = Utc::now();
        let order = order_with(OrderStatus::Delivering, Some(now + Duration::minutes(5)));
        assert_eq!(progress_at(&order, now, flight()), 10);
    }

    #[test]
    fn snapshot_reports_phase() {
        let now = Utc::now();
        let in_flight = order_with(OrderStatus::Delivering, Some(now - Duration::minutes(10)));
        assert_eq!(
            snapshot(&in_flight, now, flight()).phase,
            DeliveryPhase::InFlight
        );

        let waiting = order_with(OrderStatus::Ready, None);
        assert_eq!(snapshot(&waiting, now, flight()).phase, DeliveryPhase::Pickup);

        let done = order_with(OrderStatus::Delivered, None);
        assert_eq!(snapshot(&done, now, flight()).phase, DeliveryPhase::Dropoff);
    }
}
