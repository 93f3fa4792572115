pub mod common;
pub mod health;
pub mod orders;
pub mod products;
pub mod users;

use crate::{
    cache::CacheBackend,
    db::DbPool,
    services::{
        orders::OrderService, products::ProductService, user_orders::UserOrdersExportService,
        users::UserService,
    },
};
use std::sync::Arc;
use std::time::Duration;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub products: Arc<ProductService>,
    pub orders: Arc<OrderService>,
    pub users: Arc<UserService>,
    pub user_orders: Arc<UserOrdersExportService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        cache: Arc<dyn CacheBackend>,
        user_orders_ttl: Duration,
    ) -> Self {
        let users = UserService::new(db_pool.clone());
        let orders = OrderService::new(db_pool.clone(), users.clone());
        let user_orders =
            UserOrdersExportService::new(users.clone(), orders.clone(), cache, user_orders_ttl);

        Self {
            products: Arc::new(ProductService::new(db_pool)),
            orders: Arc::new(orders),
            users: Arc::new(users),
            user_orders: Arc::new(user_orders),
        }
    }
}
