use axum::{
    extract::{Path, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

use crate::{
    errors::ServiceError, services::orders::OrderWithProducts, ApiResponse, AppState,
};

/// Reports whether the per-user export came from the cache
pub const CACHE_STATUS_HEADER: &str = "x-cache";

/// List a user's orders
#[utoipa::path(
    get,
    path = "/api/v1/users/{user_id}/orders",
    summary = "List user orders",
    params(("user_id" = i32, Path, description = "User ID")),
    responses(
        (status = 200, description = "Orders of the user, by id", body = ApiResponse<Vec<OrderWithProducts>>),
        (status = 404, description = "User not found", body = crate::errors::ErrorResponse),
    ),
    tag = "users"
)]
pub async fn list_user_orders(
    State(state): State<AppState>,
    Path(user_id): Path<i32>,
) -> Result<Json<ApiResponse<Vec<OrderWithProducts>>>, ServiceError> {
    let orders = state.services.orders.list_user_orders(user_id).await?;
    Ok(Json(ApiResponse::success(orders)))
}

/// Export a user's orders
#[utoipa::path(
    get,
    path = "/api/v1/users/{user_id}/orders/export",
    summary = "Export user orders",
    description = "User summary plus serialized orders. The JSON text is cached per user; repeated calls within the TTL return it byte for byte.",
    params(("user_id" = i32, Path, description = "User ID")),
    responses(
        (status = 200, description = "Export payload", body = crate::services::user_orders::UserOrdersExport,
            headers(("x-cache" = String, description = "HIT or MISS"))
        ),
        (status = 404, description = "User not found or user has no orders", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "users"
)]
pub async fn export_user_orders(
    State(state): State<AppState>,
    Path(user_id): Path<i32>,
) -> Result<Response, ServiceError> {
    let payload = state.services.user_orders.export_for_user(user_id).await?;
    let cache_status = if payload.cache_hit { "HIT" } else { "MISS" };

    let mut response = (StatusCode::OK, payload.body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(
        HeaderName::from_static(CACHE_STATUS_HEADER),
        HeaderValue::from_static(cache_status),
    );
    Ok(response)
}

pub fn users_routes() -> Router<AppState> {
    Router::new()
        .route("/users/{user_id}/orders", get(list_user_orders))
        .route("/users/{user_id}/orders/export", get(export_user_orders))
}
