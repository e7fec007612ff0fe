use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::drone::{self, DroneStatus};
use crate::errors::ServiceError;
use crate::services::geocoding::Coordinates;

/// Fleet management for the simulated drones.
pub struct DroneService {
    db: Arc<DbPool>,
}

impl DroneService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Claim the best available drone for a delivery. Returns `None` when the
    /// fleet is exhausted; dispatch proceeds without an assigned drone and the
    /// tracker falls back to pure time interpolation.
    #[instrument(skip(self))]
    pub async fn claim_available(&self, order_id: Uuid) -> Result<Option<drone::Model>, ServiceError> {
        let candidate = drone::Entity::find()
            .filter(drone::Column::Status.eq(DroneStatus::Available))
            .order_by_desc(drone::Column::BatteryLevel)
            .one(self.db.as_ref())
            .await?;

        let Some(found) = candidate else {
            warn!(%order_id, "no available drone, dispatching without assignment");
            return Ok(None);
        };

        let mut active: drone::ActiveModel = found.clone().into();
        active.status = Set(DroneStatus::Delivering);
        active.updated_at = Set(Utc::now());
        let claimed = active.update(self.db.as_ref()).await?;

        info!(drone_id = %claimed.id, %order_id, "drone claimed");
        Ok(Some(claimed))
    }

    /// Return a drone to the pool after its delivery completes. Simulated
    /// battery drain sends low drones to charging instead of back into rotation.
    #[instrument(skip(self))]
    pub async fn release(&self, drone_id: Uuid, position: Coordinates) -> Result<(), ServiceError> {
        let found = drone::Entity::find_by_id(drone_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("drone {drone_id} not found")))?;

        let battery = (found.battery_level - 15).max(0);
        let next_status = if battery < 30 {
            DroneStatus::Charging
        } else {
            DroneStatus::Available
        };

        let mut active: drone::ActiveModel = found.into();
        active.status = Set(next_status);
        active.battery_level = Set(battery);
        active.current_lat = Set(position.lat);
        active.current_lng = Set(position.lng);
        active.updated_at = Set(Utc::now());
        active.update(self.db.as_ref()).await?;

        info!(%drone_id, battery, ?next_status, "drone released");
        Ok(())
    }

    pub async fn get(&self, drone_id: Uuid) -> Result<drone::Model, ServiceError> {
        drone::Entity::find_by_id(drone_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("drone {drone_id} not found")))
    }
}
