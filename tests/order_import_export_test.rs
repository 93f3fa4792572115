mod common;

use axum::http::{header, Method, StatusCode};
use common::{body_json, TestApp};
use sea_orm::{EntityTrait, PaginatorTrait};
use serde_json::json;
use shop_api::entities::{order, order_product};

async fn order_count(app: &TestApp) -> u64 {
    order::Entity::find()
        .count(&*app.state.db)
        .await
        .expect("count orders")
}

async fn seed_products(app: &TestApp) {
    let response = app
        .upload_csv(
            "/api/v1/products/import",
            b"name,price\nIphone 10,1000\nIphone 11,1100\nIphone 12,1200\n",
            "text/csv",
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn unknown_user_fails_import_without_writes() {
    let app = TestApp::new().await;
    let user = app.create_user("alice").await;

    let csv = format!(
        "delivery_address,promocode,user\nUl Veteranov d 14,SALE123,{}\nNevsky 1,,{}\n",
        user.id,
        user.id + 41
    );
    let response = app
        .upload_csv("/api/v1/orders/import", csv.as_bytes(), "text/csv")
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains(&format!("User with ID {} not found", user.id + 41)));

    assert_eq!(order_count(&app).await, 0);
}

#[tokio::test]
async fn unknown_product_fails_import_without_writes() {
    let app = TestApp::new().await;
    let user = app.create_user("alice").await;
    seed_products(&app).await;

    let csv = format!("user,products\n{},1;7\n", user.id);
    let response = app
        .upload_csv("/api/v1/orders/import", csv.as_bytes(), "text/csv")
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(order_count(&app).await, 0);
    let links = order_product::Entity::find()
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(links, 0);
}

#[tokio::test]
async fn malformed_rows_are_reported_per_cell() {
    let app = TestApp::new().await;

    let response = app
        .upload_csv(
            "/api/v1/orders/import",
            b"user,promocode,created_at\n,SALE,\nabc,THIS-CODE-IS-FAR-TOO-LONG,yesterday\n",
            "text/csv",
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    let errors: Vec<&str> = body["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e.as_str().unwrap())
        .collect();
    assert!(errors.contains(&"row 2, column user: this field is required"));
    assert!(errors.iter().any(|e| e.starts_with("row 3, column user")));
    assert!(errors.iter().any(|e| e.starts_with("row 3, column created_at")));
    assert!(errors.iter().any(|e| e.starts_with("row 3, column promocode")));
}

#[tokio::test]
async fn missing_user_column_is_rejected() {
    let app = TestApp::new().await;

    let response = app
        .upload_csv(
            "/api/v1/orders/import",
            b"delivery_address,promocode\nNevsky 1,SALE\n",
            "text/csv",
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0], "column user: this column is required");
}

#[tokio::test]
async fn import_links_products_and_export_lists_them() {
    let app = TestApp::new().await;
    let user = app.create_user("alice").await;
    seed_products(&app).await;

    let csv = format!(
        "delivery_address,promocode,user,created_at,products\n\
         Ul Veteranov d 14,SALE123,{id},2024-03-01 10:00:00,3;1;1\n\
         Nevsky 1,,{id},2024-03-02T12:30:00Z,\n",
        id = user.id
    );
    let response = app
        .upload_csv("/api/v1/orders/import", csv.as_bytes(), "text/csv")
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/api/v1/orders"
    );
    assert_eq!(body_json(response).await["data"]["created"], 2);

    let response = app.request(Method::GET, "/api/v1/orders/export", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({
            "orders": [
                {
                    "pk": 1,
                    "delivery_address": "Ul Veteranov d 14",
                    "promocode": "SALE123",
                    "user": user.id,
                    "products": [1, 3]
                },
                {
                    "pk": 2,
                    "delivery_address": "Nevsky 1",
                    "promocode": "",
                    "user": user.id,
                    "products": []
                }
            ]
        })
    );

    // newest first
    let body = body_json(app.request(Method::GET, "/api/v1/orders", None).await).await;
    assert_eq!(body["data"][0]["id"], 2);
    assert_eq!(body["data"][1]["created_at"], "2024-03-01T10:00:00Z");
}

#[tokio::test]
async fn empty_order_export() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/api/v1/orders/export", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"orders": []}));
}

#[tokio::test]
async fn order_crud_lifecycle() {
    let app = TestApp::new().await;
    let user = app.create_user("bob").await;
    seed_products(&app).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "delivery_address": "Ul Veteranov d 14",
                "promocode": "SALE123",
                "user_id": user.id,
                "products": [2]
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let id = created["data"]["id"].as_i64().unwrap();
    assert_eq!(created["data"]["products"], json!([2]));

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{id}"),
            Some(json!({"promocode": "", "products": [1, 3]})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let updated = body_json(response).await;
    assert_eq!(updated["data"]["promocode"], "");
    assert_eq!(updated["data"]["delivery_address"], "Ul Veteranov d 14");
    assert_eq!(updated["data"]["products"], json!([1, 3]));

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{id}"),
            Some(json!({"products": [99]})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .request(Method::DELETE, &format!("/api/v1/orders/{id}"), None)
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .request(Method::GET, &format!("/api/v1/orders/{id}"), None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let links = order_product::Entity::find()
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(links, 0);

    let response = app
        .request(Method::DELETE, &format!("/api/v1/orders/{id}"), None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_order_for_unknown_user_is_not_found() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({"user_id": 12, "delivery_address": "Nevsky 1"})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(order_count(&app).await, 0);
}

#[tokio::test]
async fn large_order_import_links_every_row() {
    let app = TestApp::new().await;
    let user = app.create_user("alice").await;
    seed_products(&app).await;

    let rows = 1500;
    let mut csv = String::from("delivery_address,user,products\n");
    for i in 0..rows {
        csv.push_str(&format!("Street {i},{},1;2\n", user.id));
    }
    let response = app
        .upload_csv("/api/v1/orders/import", csv.as_bytes(), "text/csv")
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(body_json(response).await["data"]["created"], rows);

    let links = order_product::Entity::find()
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(links, 2 * rows as u64);

    let body = body_json(app.request(Method::GET, "/api/v1/orders/export", None).await).await;
    let exported = body["orders"].as_array().unwrap();
    assert_eq!(exported.len(), rows);
    assert!(exported.iter().all(|o| o["products"] == json!([1, 2])));
}
