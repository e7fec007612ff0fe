//! Background cleanup of abandoned orders.
//!
//! Two sweeps share one deletion mechanism: a frequent one for orders whose
//! payment session expired, and a daily one for unpaid pending orders past
//! the retention age regardless of session state. Each row is deleted with
//! its guard conditions in the WHERE clause, so a payment that lands between
//! the candidate scan and the delete wins the race and keeps the order.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use sea_orm::{ColumnTrait, Condition, EntityTrait, QueryFilter, QuerySelect};
use tracing::{debug, error, info, instrument};

use crate::db::DbPool;
use crate::entities::order::{self, OrderStatus, PaymentStatus};
use crate::entities::order_item;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Time source seam so tests can sweep at a chosen instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed clock for tests.
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub struct SweeperService {
    db: Arc<DbPool>,
    events: EventSender,
    clock: Arc<dyn Clock>,
    retention: Duration,
}

impl SweeperService {
    pub fn new(
        db: Arc<DbPool>,
        events: EventSender,
        clock: Arc<dyn Clock>,
        retention_hours: i64,
    ) -> Self {
        Self {
            db,
            events,
            clock,
            retention: Duration::hours(retention_hours),
        }
    }

    /// Delete pending, unpaid orders whose payment session has expired.
    /// Returns the number of orders removed.
    #[instrument(skip(self))]
    pub async fn sweep_expired_sessions(&self) -> Result<u64, ServiceError> {
        let cutoff = self.clock.now();
        self.sweep(
            Condition::all()
                .add(order::Column::Status.eq(OrderStatus::Pending))
                .add(order::Column::PaymentStatus.ne(PaymentStatus::Paid))
                .add(order::Column::PaymentSessionExpiresAt.lt(cutoff)),
        )
        .await
    }

    /// Delete pending, unpaid orders older than the retention window, even
    /// if their session somehow never expired.
    #[instrument(skip(self))]
    pub async fn sweep_stale_orders(&self) -> Result<u64, ServiceError> {
        let cutoff = self.clock.now() - self.retention;
        self.sweep(
            Condition::all()
                .add(order::Column::Status.eq(OrderStatus::Pending))
                .add(order::Column::PaymentStatus.ne(PaymentStatus::Paid))
                .add(order::Column::CreatedAt.lt(cutoff)),
        )
        .await
    }

    async fn sweep(&self, condition: Condition) -> Result<u64, ServiceError> {
        let candidates: Vec<uuid::Uuid> = order::Entity::find()
            .select_only()
            .column(order::Column::Id)
            .filter(condition.clone())
            .into_tuple()
            .all(self.db.as_ref())
            .await?;

        let mut deleted = 0u64;
        for id in candidates {
            // Guards repeated in the delete so a concurrent payment keeps
            // the order alive
            let result = order::Entity::delete_many()
                .filter(order::Column::Id.eq(id))
                .filter(condition.clone())
                .exec(self.db.as_ref())
                .await?;
            if result.rows_affected == 0 {
                debug!(order_id = %id, "order rescued between scan and delete");
                continue;
            }
            order_item::Entity::delete_many()
                .filter(order_item::Column::OrderId.eq(id))
                .exec(self.db.as_ref())
                .await?;
            deleted += 1;
        }

        if deleted > 0 {
            info!(deleted, "abandoned orders swept");
            self.events.send(Event::OrdersSwept { deleted }).await;
        }
        Ok(deleted)
    }

    /// Spawn the periodic sweep loops. Tasks run until the process exits.
    pub fn start(self: Arc<Self>, session_interval_secs: u64, retention_interval_secs: u64) {
        let sweeper = Arc::clone(&self);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(StdDuration::from_secs(session_interval_secs.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = sweeper.sweep_expired_sessions().await {
                    error!("expired-session sweep failed: {}", e);
                }
            }
        });

        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(StdDuration::from_secs(retention_interval_secs.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep_stale_orders().await {
                    error!("retention sweep failed: {}", e);
                }
            }
        });
    }
}
