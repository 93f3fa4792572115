use axum::{routing::get, Json, Router};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Shop API",
        version = "0.1.0",
        description = r#"
# Shop API

Product catalog and orders, with CSV import/export.

## Imports

`POST /api/v1/products/import` and `POST /api/v1/orders/import` take a
multipart form with the file in field `csv_file`. The charset is read from
the part's `Content-Type` (then the request's), defaulting to UTF-8. A file
is imported entirely or not at all. Success answers `303 See Other` pointing
at the listing.

## Errors

Failures carry a JSON body:

```json
{
  "error": "Bad Request",
  "message": "CSV import failed validation",
  "errors": ["row 2, column price: 'abc' is not a valid number"],
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "products", description = "Catalog management, CSV import and export"),
        (name = "orders", description = "Order management, CSV import and export"),
        (name = "users", description = "Per-user order views and the cached export"),
        (name = "health", description = "Health check endpoints")
    ),
    paths(
        // Products
        crate::handlers::products::list_products,
        crate::handlers::products::create_product,
        crate::handlers::products::get_product,
        crate::handlers::products::update_product,
        crate::handlers::products::archive_product,
        crate::handlers::products::archive_products,
        crate::handlers::products::unarchive_products,
        crate::handlers::products::import_products,
        crate::handlers::products::export_products,
        crate::handlers::products::export_products_csv,

        // Orders
        crate::handlers::orders::list_orders,
        crate::handlers::orders::create_order,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_order,
        crate::handlers::orders::delete_order,
        crate::handlers::orders::import_orders,
        crate::handlers::orders::export_orders,

        // Users
        crate::handlers::users::list_user_orders,
        crate::handlers::users::export_user_orders,

        // Health
        crate::handlers::health::health_check,
    ),
    components(
        schemas(
            crate::handlers::products::ProductResponse,
            crate::handlers::products::ProductIdsRequest,
            crate::handlers::products::ArchiveResult,
            crate::handlers::common::ImportSummary,
            crate::services::products::ProductInput,
            crate::services::products::ProductUpdate,
            crate::services::products::ProductExport,
            crate::services::products::ProductExportRow,
            crate::services::orders::OrderInput,
            crate::services::orders::OrderUpdate,
            crate::services::orders::OrderWithProducts,
            crate::services::orders::OrderExport,
            crate::services::orders::OrderExportRow,
            crate::services::user_orders::UserOrdersExport,
            crate::services::user_orders::RequesterSummary,
            crate::services::user_orders::SerializedOrder,
            crate::services::user_orders::SerializedOrderFields,
            crate::handlers::health::HealthResponse,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub const OPENAPI_JSON_PATH: &str = "/api-docs/openapi.json";

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDocV1::openapi())
}

/// Serves the generated document at [`OPENAPI_JSON_PATH`].
pub fn openapi_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route(OPENAPI_JSON_PATH, get(openapi_json))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_import_and_export_paths() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string(&openapi).unwrap();
        assert!(json.contains("Shop API"));
        assert!(json.contains("/api/v1/products/import"));
        assert!(json.contains("/api/v1/users/{user_id}/orders/export"));
    }
}
