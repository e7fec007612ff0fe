use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::extract::OptionalFromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::order::{self, OrderStatus};
use crate::errors::ServiceError;

/// Principal role carried in the JWT. Guests carry no token at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Restaurant,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Principal id (customer id, restaurant staff id, or admin id)
    pub sub: Uuid,
    pub role: Role,
    /// Set for restaurant staff, scoping them to one restaurant
    pub restaurant_id: Option<Uuid>,
    pub exp: i64,
    pub iat: i64,
}

/// JWT key pair shared through request extensions by the auth middleware.
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
}

impl JwtKeys {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Mint a bearer token for the given principal. Used by tooling and tests;
/// this service verifies tokens, an upstream identity service issues them.
pub fn issue_token(
    keys: &JwtKeys,
    sub: Uuid,
    role: Role,
    restaurant_id: Option<Uuid>,
    ttl: Duration,
) -> Result<String, ServiceError> {
    let now = Utc::now();
    let claims = Claims {
        sub,
        role,
        restaurant_id,
        exp: (now + ttl).timestamp(),
        iat: now.timestamp(),
    };
    encode(&Header::default(), &claims, &keys.encoding)
        .map_err(|e| ServiceError::Internal(format!("failed to sign token: {e}")))
}

/// Authenticated principal extracted from the `Authorization: Bearer` header.
///
/// Extract as `AuthUser` on routes that require authentication and as
/// `Option<AuthUser>` on routes that also serve guests.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
    pub restaurant_id: Option<Uuid>,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

fn decode_bearer(parts: &Parts) -> Result<AuthUser, ServiceError> {
    let keys = parts
        .extensions
        .get::<Arc<JwtKeys>>()
        .ok_or_else(|| ServiceError::Internal("JWT keys not configured".to_string()))?;

    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::Unauthorized("missing authorization header".to_string()))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ServiceError::Unauthorized("malformed authorization header".to_string()))?;

    let data = decode::<Claims>(token, &keys.decoding, &Validation::default())
        .map_err(|_| ServiceError::Unauthorized("invalid or expired token".to_string()))?;

    Ok(AuthUser {
        id: data.claims.sub,
        role: data.claims.role,
        restaurant_id: data.claims.restaurant_id,
    })
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        decode_bearer(parts)
    }
}

impl<S> OptionalFromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        if !parts.headers.contains_key(AUTHORIZATION) {
            return Ok(None);
        }
        // A present but invalid token is rejected rather than downgraded to
        // guest access.
        decode_bearer(parts).map(Some)
    }
}

/// Order-scoped actions subject to the authorization policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    View,
    Cancel,
    ConfirmPayment,
    Transition(OrderStatus),
}

/// Single authorization decision point for order-scoped actions. Every
/// handler routes its permission check through here so the whole policy is
/// readable in one match.
pub fn authorize(
    user: &AuthUser,
    action: Action,
    order: &order::Model,
) -> Result<(), ServiceError> {
    if user.is_admin() {
        return Ok(());
    }

    let owns_order = |user: &AuthUser| order.customer_id == Some(user.id);
    let staffs_restaurant =
        |user: &AuthUser| user.restaurant_id == Some(order.restaurant_id);

    let allowed = match (user.role, action) {
        (Role::Customer, Action::View) => owns_order(user),
        (Role::Customer, Action::Cancel) => owns_order(user),
        (Role::Customer, Action::ConfirmPayment) => owns_order(user),
        (Role::Customer, Action::Transition(_)) => false,

        (Role::Restaurant, Action::View) => staffs_restaurant(user),
        // Cancellation belongs to the owning customer or an admin;
        // restaurants drive the fulfillment flow only.
        (Role::Restaurant, Action::Cancel) => false,
        (Role::Restaurant, Action::ConfirmPayment) => false,
        (Role::Restaurant, Action::Transition(target)) => {
            staffs_restaurant(user) && target != OrderStatus::Cancelled
        }

        (Role::Admin, _) => true,
    };

    if allowed {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(
            "not permitted to perform this action on this order".to_string(),
        ))
    }
}
