//! Restaurant and menu lookups.
//!
//! Restaurant profiles and menus are owned by a separate catalog service;
//! this crate only needs enough of them to price an order and to locate the
//! pickup point. The traits are the seam; the in-memory implementation backs
//! development and tests.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::services::geocoding::Coordinates;

/// Restaurant summary as needed for order intake.
#[derive(Debug, Clone)]
pub struct RestaurantInfo {
    pub id: Uuid,
    pub name: String,
    pub location: Coordinates,
    pub delivery_fee: Decimal,
    pub accepting_orders: bool,
}

/// Menu item as needed for pricing. Prices are authoritative here; client
/// supplied prices are never trusted.
#[derive(Debug, Clone)]
pub struct ProductInfo {
    pub id: Uuid,
    pub restaurant_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub available: bool,
}

#[async_trait]
pub trait RestaurantDirectory: Send + Sync {
    async fn restaurant(&self, id: Uuid) -> Result<RestaurantInfo, ServiceError>;
}

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn product(&self, id: Uuid) -> Result<ProductInfo, ServiceError>;
}

/// In-memory directory and catalog used in development and tests.
#[derive(Default)]
pub struct InMemoryCatalog {
    restaurants: RwLock<HashMap<Uuid, RestaurantInfo>>,
    products: RwLock<HashMap<Uuid, ProductInfo>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_restaurant(&self, info: RestaurantInfo) {
        self.restaurants
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(info.id, info);
    }

    pub fn insert_product(&self, info: ProductInfo) {
        self.products
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(info.id, info);
    }
}

#[async_trait]
impl RestaurantDirectory for InMemoryCatalog {
    async fn restaurant(&self, id: Uuid) -> Result<RestaurantInfo, ServiceError> {
        self.restaurants
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("restaurant {id} not found")))
    }
}

#[async_trait]
impl ProductCatalog for InMemoryCatalog {
    async fn product(&self, id: Uuid) -> Result<ProductInfo, ServiceError> {
        self.products
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("product {id} not found")))
    }
}
