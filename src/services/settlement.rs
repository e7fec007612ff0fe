use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::settlement_tx::{self, TransactionKind};
use crate::errors::ServiceError;

/// Restaurant settlement ledger. Rows are append-only with balance snapshots;
/// the current balance is the latest row's `balance_after`.
pub struct SettlementService {
    db: Arc<DbPool>,
}

impl SettlementService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Current balance for a restaurant, zero when it has no ledger rows.
    pub async fn balance(&self, restaurant_id: Uuid) -> Result<Decimal, ServiceError> {
        let latest = settlement_tx::Entity::find()
            .filter(settlement_tx::Column::RestaurantId.eq(restaurant_id))
            .order_by_desc(settlement_tx::Column::CreatedAt)
            .one(self.db.as_ref())
            .await?;
        Ok(latest.map(|t| t.balance_after).unwrap_or_default())
    }

    /// Append a ledger row. The balance read and the insert share one
    /// database transaction so snapshots stay consistent under concurrency.
    #[instrument(skip(self))]
    pub async fn record(
        &self,
        restaurant_id: Uuid,
        kind: TransactionKind,
        amount: Decimal,
        order_id: Option<Uuid>,
        note: Option<String>,
    ) -> Result<settlement_tx::Model, ServiceError> {
        if amount <= Decimal::ZERO {
            return Err(ServiceError::Validation(
                "transaction amount must be positive".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let balance_before = settlement_tx::Entity::find()
            .filter(settlement_tx::Column::RestaurantId.eq(restaurant_id))
            .order_by_desc(settlement_tx::Column::CreatedAt)
            .one(&txn)
            .await?
            .map(|t| t.balance_after)
            .unwrap_or_default();

        let balance_after = if kind.is_credit() {
            balance_before + amount
        } else {
            balance_before - amount
        };

        if balance_after < Decimal::ZERO {
            txn.rollback().await?;
            return Err(ServiceError::Conflict(
                "insufficient balance for this transaction".to_string(),
            ));
        }

        let row = settlement_tx::ActiveModel {
            id: Set(Uuid::new_v4()),
            restaurant_id: Set(restaurant_id),
            kind: Set(kind),
            amount: Set(amount),
            balance_before: Set(balance_before),
            balance_after: Set(balance_after),
            order_id: Set(order_id),
            note: Set(note),
            created_at: Set(Utc::now()),
        };
        let inserted = row.insert(&txn).await?;
        txn.commit().await?;

        info!(%restaurant_id, %amount, ?kind, "settlement transaction recorded");
        Ok(inserted)
    }

    /// Credit the order total to the restaurant when the order is completed.
    pub async fn settle_order(
        &self,
        restaurant_id: Uuid,
        order_id: Uuid,
        order_number: &str,
        total: Decimal,
    ) -> Result<settlement_tx::Model, ServiceError> {
        self.record(
            restaurant_id,
            TransactionKind::Income,
            total,
            Some(order_id),
            Some(format!("settlement for order {order_number}")),
        )
        .await
    }

    /// Ledger history for a restaurant, newest first.
    pub async fn history(
        &self,
        restaurant_id: Uuid,
    ) -> Result<Vec<settlement_tx::Model>, ServiceError> {
        Ok(settlement_tx::Entity::find()
            .filter(settlement_tx::Column::RestaurantId.eq(restaurant_id))
            .order_by_desc(settlement_tx::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?)
    }
}
