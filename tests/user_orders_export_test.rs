mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, Method, StatusCode};
use common::{body_json, body_text, TestApp};
use sea_orm::EntityTrait;
use serde_json::{json, Value};
use shop_api::{
    cache::{CacheBackend, CacheError, InMemoryCache},
    entities::{order, order_product},
    services::{
        orders::OrderService,
        user_orders::{cache_key, UserOrdersExportService},
        users::UserService,
    },
};

/// Backend whose every operation fails, as an unreachable Redis would.
struct UnavailableCache;

#[async_trait::async_trait]
impl CacheBackend for UnavailableCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(CacheError::OperationFailed("connection refused".into()))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> Result<(), CacheError> {
        Err(CacheError::OperationFailed("connection refused".into()))
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::OperationFailed("connection refused".into()))
    }

    async fn exists(&self, _key: &str) -> Result<bool, CacheError> {
        Err(CacheError::OperationFailed("connection refused".into()))
    }

    async fn clear(&self) -> Result<(), CacheError> {
        Err(CacheError::OperationFailed("connection refused".into()))
    }
}

fn export_service(
    app: &TestApp,
    cache: Arc<dyn CacheBackend>,
    ttl: Duration,
) -> UserOrdersExportService {
    let users = UserService::new(app.state.db.clone());
    let orders = OrderService::new(app.state.db.clone(), users.clone());
    UserOrdersExportService::new(users, orders, cache, ttl)
}

async fn place_order(app: &TestApp, user_id: i32, address: &str, products: Value) -> i64 {
    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "delivery_address": address,
                "promocode": "SALE123",
                "user_id": user_id,
                "products": products
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await["data"]["id"].as_i64().unwrap()
}

#[tokio::test]
async fn unknown_user_is_not_found() {
    let app = TestApp::new().await;

    let response = app
        .request(Method::GET, "/api/v1/users/404/orders/export", None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn user_without_orders_is_not_found() {
    let app = TestApp::new().await;
    let user = app.create_user("alice").await;

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/users/{}/orders/export", user.id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains(&format!("No orders found for user {}", user.id)));
    assert!(app.cache.get(&cache_key(user.id)).await.unwrap().is_none());
}

#[tokio::test]
async fn export_describes_requester_and_orders() {
    let app = TestApp::new().await;
    let user = app.create_user("alice").await;
    let other = app.create_user("bob").await;
    app.upload_csv(
        "/api/v1/products/import",
        b"name,price\nIphone 10,1000\nIphone 11,1100\n",
        "text/csv",
    )
    .await;

    let first = place_order(&app, user.id, "Ul Veteranov d 14", json!([2, 1])).await;
    place_order(&app, other.id, "Nevsky 1", json!([])).await;
    let second = place_order(&app, user.id, "Nevsky 2", json!([])).await;

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/users/{}/orders/export", user.id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    let body = body_json(response).await;

    assert_eq!(body["user"]["id"], user.id);
    assert_eq!(body["user"]["username"], "alice");
    assert_eq!(body["user"]["email"], "alice@example.com");

    let orders = body["orders"].as_array().unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0]["model"], "shopapp.order");
    assert_eq!(orders[0]["pk"], first);
    assert_eq!(orders[0]["fields"]["delivery_address"], "Ul Veteranov d 14");
    assert_eq!(orders[0]["fields"]["user"], user.id);
    assert_eq!(orders[0]["fields"]["products"], json!([1, 2]));
    assert_eq!(orders[1]["pk"], second);
}

#[tokio::test]
async fn repeated_export_is_served_from_cache() {
    let app = TestApp::new().await;
    let user = app.create_user("alice").await;
    place_order(&app, user.id, "Ul Veteranov d 14", json!([])).await;

    let uri = format!("/api/v1/users/{}/orders/export", user.id);
    let response = app.request(Method::GET, &uri, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-cache").unwrap(), "MISS");
    let first = body_text(response).await;

    assert_eq!(
        app.cache.get(&cache_key(user.id)).await.unwrap().as_deref(),
        Some(first.as_str())
    );

    // the cached copy outlives the rows it was built from
    order_product::Entity::delete_many()
        .exec(&*app.state.db)
        .await
        .unwrap();
    order::Entity::delete_many()
        .exec(&*app.state.db)
        .await
        .unwrap();

    let response = app.request(Method::GET, &uri, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-cache").unwrap(), "HIT");
    assert_eq!(body_text(response).await, first);

    let response = app
        .request(Method::GET, &format!("/api/v1/users/{}/orders", user.id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"], json!([]));
}

#[tokio::test]
async fn cache_entries_are_per_user() {
    let app = TestApp::new().await;
    let alice = app.create_user("alice").await;
    let bob = app.create_user("bob").await;
    place_order(&app, alice.id, "Ul Veteranov d 14", json!([])).await;
    place_order(&app, bob.id, "Nevsky 1", json!([])).await;

    let alice_body = body_json(
        app.request(
            Method::GET,
            &format!("/api/v1/users/{}/orders/export", alice.id),
            None,
        )
        .await,
    )
    .await;
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/users/{}/orders/export", bob.id),
            None,
        )
        .await;
    assert_eq!(response.headers().get("x-cache").unwrap(), "MISS");
    let bob_body = body_json(response).await;

    assert_eq!(alice_body["user"]["username"], "alice");
    assert_eq!(bob_body["user"]["username"], "bob");
    assert_eq!(bob_body["orders"][0]["fields"]["delivery_address"], "Nevsky 1");
}

#[tokio::test]
async fn failing_cache_falls_back_to_the_store() {
    let app = TestApp::new().await;
    let user = app.create_user("alice").await;
    let order_id = place_order(&app, user.id, "Ul Veteranov d 14", json!([])).await;

    let service = export_service(&app, Arc::new(UnavailableCache), Duration::from_secs(200));

    let first = service.export_for_user(user.id).await.expect("export");
    assert!(!first.cache_hit);
    let body: Value = serde_json::from_str(&first.body).unwrap();
    assert_eq!(body["user"]["username"], "alice");
    assert_eq!(body["orders"][0]["pk"], order_id);

    let second = service.export_for_user(user.id).await.expect("export");
    assert!(!second.cache_hit);
    assert_eq!(second.body, first.body);

    // missing users are still reported when the cache is down
    assert!(service.export_for_user(user.id + 100).await.is_err());
}

#[tokio::test]
async fn expired_entry_is_recomputed() {
    let app = TestApp::new().await;
    let user = app.create_user("alice").await;
    place_order(&app, user.id, "Ul Veteranov d 14", json!([])).await;

    let service = export_service(
        &app,
        Arc::new(InMemoryCache::new()),
        Duration::from_millis(50),
    );

    let first = service.export_for_user(user.id).await.expect("export");
    assert!(!first.cache_hit);
    let cached = service.export_for_user(user.id).await.expect("export");
    assert!(cached.cache_hit);
    assert_eq!(cached.body, first.body);

    place_order(&app, user.id, "Nevsky 2", json!([])).await;
    tokio::time::sleep(Duration::from_millis(120)).await;

    let fresh = service.export_for_user(user.id).await.expect("export");
    assert!(!fresh.cache_hit);
    let body: Value = serde_json::from_str(&fresh.body).unwrap();
    assert_eq!(body["orders"].as_array().unwrap().len(), 2);
}
