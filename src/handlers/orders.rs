use axum::{
    extract::{Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};

use crate::{
    errors::ServiceError,
    handlers::common::{imported_response, read_csv_upload},
    services::orders::{OrderExport, OrderInput, OrderUpdate, OrderWithProducts},
    ApiResponse, AppState,
};

const ORDERS_LOCATION: &str = "/api/v1/orders";

/// List orders
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List orders",
    description = "All orders with their product ids, newest first",
    responses(
        (status = 200, description = "Orders retrieved successfully", body = ApiResponse<Vec<OrderWithProducts>>),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<OrderWithProducts>>>, ServiceError> {
    let orders = state.services.orders.list_orders().await?;
    Ok(Json(ApiResponse::success(orders)))
}

/// Create order
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    request_body = OrderInput,
    responses(
        (status = 201, description = "Order created successfully", body = ApiResponse<OrderWithProducts>),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 404, description = "User or product not found", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    Json(input): Json<OrderInput>,
) -> Result<(StatusCode, Json<ApiResponse<OrderWithProducts>>), ServiceError> {
    let order = state.services.orders.create_order(input).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

/// Get order
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = i32, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order retrieved successfully", body = ApiResponse<OrderWithProducts>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<OrderWithProducts>>, ServiceError> {
    let order = state.services.orders.get_order(id).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Update order
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}",
    summary = "Update order",
    description = "Changes the address or promocode; `products` replaces the whole product set",
    params(("id" = i32, Path, description = "Order ID")),
    request_body = OrderUpdate,
    responses(
        (status = 200, description = "Order updated successfully", body = ApiResponse<OrderWithProducts>),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order or product not found", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn update_order(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(update): Json<OrderUpdate>,
) -> Result<Json<ApiResponse<OrderWithProducts>>, ServiceError> {
    let order = state.services.orders.update_order(id, update).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Delete order
#[utoipa::path(
    delete,
    path = "/api/v1/orders/{id}",
    summary = "Delete order",
    params(("id" = i32, Path, description = "Order ID")),
    responses(
        (status = 204, description = "Order deleted"),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn delete_order(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, ServiceError> {
    state.services.orders.delete_order(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Import orders from CSV
#[utoipa::path(
    post,
    path = "/api/v1/orders/import",
    summary = "Import orders from CSV",
    description = "Multipart upload in field `csv_file`. Columns: delivery_address, promocode, user, created_at, products (`;`-separated ids). All rows are created or none are.",
    responses(
        (status = 303, description = "Data from CSV was imported", body = ApiResponse<crate::handlers::common::ImportSummary>),
        (status = 400, description = "Undecodable file or invalid rows", body = crate::errors::ErrorResponse),
        (status = 404, description = "A referenced user or product does not exist", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn import_orders(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, ServiceError> {
    let upload = read_csv_upload(&headers, multipart).await?;
    let created = state.services.orders.import_csv(&upload).await?;
    Ok(imported_response(ORDERS_LOCATION, created))
}

/// Export orders as JSON
#[utoipa::path(
    get,
    path = "/api/v1/orders/export",
    summary = "Export orders",
    responses(
        (status = 200, description = "Every order ordered by id", body = OrderExport),
    ),
    tag = "orders"
)]
pub async fn export_orders(State(state): State<AppState>) -> Result<Json<OrderExport>, ServiceError> {
    Ok(Json(state.services.orders.export().await?))
}

pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_orders).post(create_order))
        .route("/orders/import", post(import_orders))
        .route("/orders/export", get(export_orders))
        .route(
            "/orders/{id}",
            get(get_order).put(update_order).delete(delete_order),
        )
}
