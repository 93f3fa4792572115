use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;

use crate::{
    cache::CacheBackend,
    entities::user,
    errors::ServiceError,
    services::{
        orders::{OrderService, OrderWithProducts},
        users::UserService,
    },
};

const SERIALIZED_ORDER_MODEL: &str = "shopapp.order";

pub fn cache_key(user_id: i32) -> String {
    format!("user_orders_{}", user_id)
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RequesterSummary {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl From<user::Model> for RequesterSummary {
    fn from(user: user::Model) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SerializedOrderFields {
    pub delivery_address: String,
    pub promocode: String,
    pub created_at: DateTime<Utc>,
    pub user: i32,
    pub products: Vec<i32>,
}

/// One order in `{"model", "pk", "fields"}` form.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SerializedOrder {
    pub model: String,
    pub pk: i32,
    pub fields: SerializedOrderFields,
}

impl From<OrderWithProducts> for SerializedOrder {
    fn from(order: OrderWithProducts) -> Self {
        Self {
            model: SERIALIZED_ORDER_MODEL.to_string(),
            pk: order.id,
            fields: SerializedOrderFields {
                delivery_address: order.delivery_address,
                promocode: order.promocode,
                created_at: order.created_at,
                user: order.user_id,
                products: order.products,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserOrdersExport {
    pub user: RequesterSummary,
    pub orders: Vec<SerializedOrder>,
}

/// JSON text of an export and whether it came from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPayload {
    pub body: String,
    pub cache_hit: bool,
}

/// Per-user order export, memoized in the cache for `ttl`.
#[derive(Clone)]
pub struct UserOrdersExportService {
    users: UserService,
    orders: OrderService,
    cache: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl UserOrdersExportService {
    pub fn new(
        users: UserService,
        orders: OrderService,
        cache: Arc<dyn CacheBackend>,
        ttl: Duration,
    ) -> Self {
        Self {
            users,
            orders,
            cache,
            ttl,
        }
    }

    /// Returns the cached text when present; otherwise builds, stores and
    /// returns it. Cache failures are logged and never surface.
    #[instrument(skip(self))]
    pub async fn export_for_user(&self, user_id: i32) -> Result<CachedPayload, ServiceError> {
        let key = cache_key(user_id);

        match self.cache.get(&key).await {
            Ok(Some(body)) if !body.is_empty() => {
                debug!(%key, "User orders export served from cache");
                return Ok(CachedPayload {
                    body,
                    cache_hit: true,
                });
            }
            Ok(_) => {}
            Err(e) => warn!(%key, error = %e, "Cache read failed, loading from database"),
        }

        let user = self.users.get_user(user_id).await?;
        let orders = self.orders.orders_for_user(user_id).await?;
        if orders.is_empty() {
            return Err(ServiceError::NotFound(format!(
                "No orders found for user {}",
                user_id
            )));
        }

        let export = UserOrdersExport {
            user: user.into(),
            orders: orders.into_iter().map(SerializedOrder::from).collect(),
        };
        let body = serde_json::to_string(&export)?;

        if let Err(e) = self.cache.set(&key, &body, Some(self.ttl)).await {
            warn!(%key, error = %e, "Cache write failed, returning uncached export");
        } else {
            info!(%key, orders = export.orders.len(), ttl_secs = self.ttl.as_secs(), "User orders export cached");
        }

        Ok(CachedPayload {
            body,
            cache_hit: false,
        })
    }
}
