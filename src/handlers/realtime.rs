use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use tokio::sync::broadcast;

use crate::auth::{AuthUser, Role};
use crate::errors::ServiceError;
use crate::events::realtime::{Room, RoomMessage};
use crate::AppState;

/// Rooms a caller is entitled to watch. Restaurant staff without a
/// restaurant claim see nothing rather than everything.
fn rooms_for(user: &AuthUser) -> Vec<Room> {
    match user.role {
        Role::Customer => vec![Room::Customer(user.id)],
        Role::Restaurant => user.restaurant_id.map(Room::Restaurant).into_iter().collect(),
        Role::Admin => vec![Room::Admin],
    }
}

/// Drop messages addressed to other rooms; a lagged receiver skips ahead
/// instead of closing the stream.
fn room_stream(
    rx: broadcast::Receiver<RoomMessage>,
    rooms: Vec<Room>,
) -> impl Stream<Item = RoomMessage> {
    futures::stream::unfold((rx, rooms), |(mut rx, rooms)| async move {
        loop {
            match rx.recv().await {
                Ok(msg) if rooms.contains(&msg.room) => return Some((msg, (rx, rooms))),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}

#[utoipa::path(
    get,
    path = "/api/v1/realtime/subscribe",
    summary = "Subscribe to realtime events",
    description = "Server-sent event stream of the caller's rooms. Customers receive \
                   their own orders, restaurant staff their restaurant's, admins the \
                   admin feed. Event names follow the room events: `new_order`, \
                   `order_updated`, `order_cancelled`, `order_tracking_updated`, \
                   `drone_location_update`, `payment_received`.",
    responses(
        (status = 200, description = "SSE stream", content_type = "text/event-stream"),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn subscribe_events(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ServiceError> {
    let rx = state.realtime.subscribe().ok_or_else(|| {
        ServiceError::Conflict("realtime transport is not enabled".to_string())
    })?;

    let stream = room_stream(rx, rooms_for(&user)).map(|msg| {
        Event::default()
            .event(msg.event.event)
            .json_data(&msg.event.payload)
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::realtime::{BroadcastPublisher, RealtimeEvent, RealtimePublisher};
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn rooms_follow_the_caller_role() {
        let customer = AuthUser {
            id: Uuid::new_v4(),
            role: Role::Customer,
            restaurant_id: None,
        };
        assert_eq!(rooms_for(&customer), vec![Room::Customer(customer.id)]);

        let restaurant = Uuid::new_v4();
        let staff = AuthUser {
            id: Uuid::new_v4(),
            role: Role::Restaurant,
            restaurant_id: Some(restaurant),
        };
        assert_eq!(rooms_for(&staff), vec![Room::Restaurant(restaurant)]);

        let unclaimed = AuthUser {
            id: Uuid::new_v4(),
            role: Role::Restaurant,
            restaurant_id: None,
        };
        assert!(rooms_for(&unclaimed).is_empty());
    }

    #[tokio::test]
    async fn stream_only_carries_the_subscribed_rooms() {
        let publisher = BroadcastPublisher::new(16);
        let rx = publisher.subscribe().unwrap();
        let customer = Uuid::new_v4();

        publisher.publish(Room::Admin, RealtimeEvent::new_order(json!({"n": 1})));
        publisher.publish(
            Room::Customer(customer),
            RealtimeEvent::order_updated(json!({"n": 2})),
        );

        let mut stream = Box::pin(room_stream(rx, vec![Room::Customer(customer)]));
        let msg = stream.next().await.unwrap();
        assert_eq!(msg.room, Room::Customer(customer));
        assert_eq!(msg.event.event, "order_updated");
    }
}
