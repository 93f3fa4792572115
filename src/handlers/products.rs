use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    entities::product,
    errors::ServiceError,
    handlers::common::{imported_response, read_csv_upload},
    services::products::{ProductExport, ProductFilter, ProductInput, ProductUpdate},
    ApiResponse, AppState,
};

const PRODUCTS_LOCATION: &str = "/api/v1/products";

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProductResponse {
    pub id: i32,
    pub name: String,
    pub description: String,
    /// First 48 characters of the description
    pub description_short: String,
    pub price: Decimal,
    pub discount: i16,
    pub archived: bool,
    pub created_by_id: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl From<product::Model> for ProductResponse {
    fn from(model: product::Model) -> Self {
        Self {
            description_short: model.description_short(),
            id: model.id,
            name: model.name,
            description: model.description,
            price: model.price,
            discount: model.discount,
            archived: model.archived,
            created_by_id: model.created_by_id,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ProductIdsRequest {
    pub ids: Vec<i32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ArchiveResult {
    pub affected: u64,
}

/// List products
#[utoipa::path(
    get,
    path = "/api/v1/products",
    summary = "List products",
    description = "Products ordered by id. Archived products are hidden unless `archived=true`.",
    params(
        ("search" = Option<String>, Query, description = "Substring of name or description"),
        ("archived" = Option<bool>, Query, description = "List archived instead of active products"),
    ),
    responses(
        (status = 200, description = "Products retrieved successfully", body = ApiResponse<Vec<ProductResponse>>),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "products"
)]
pub async fn list_products(
    State(state): State<AppState>,
    Query(filter): Query<ProductFilter>,
) -> Result<Json<ApiResponse<Vec<ProductResponse>>>, ServiceError> {
    let products = state.services.products.list_products(&filter).await?;
    Ok(Json(ApiResponse::success(
        products.into_iter().map(ProductResponse::from).collect(),
    )))
}

/// Create product
#[utoipa::path(
    post,
    path = "/api/v1/products",
    summary = "Create product",
    request_body = ProductInput,
    responses(
        (status = 201, description = "Product created successfully", body = ApiResponse<ProductResponse>),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
    ),
    tag = "products"
)]
pub async fn create_product(
    State(state): State<AppState>,
    Json(input): Json<ProductInput>,
) -> Result<(StatusCode, Json<ApiResponse<ProductResponse>>), ServiceError> {
    let created = state.services.products.create_product(input, None).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(created.into())),
    ))
}

/// Get product
#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    summary = "Get product",
    params(("id" = i32, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Product retrieved successfully", body = ApiResponse<ProductResponse>),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    tag = "products"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<ProductResponse>>, ServiceError> {
    let product = state.services.products.get_product(id).await?;
    Ok(Json(ApiResponse::success(product.into())))
}

/// Update product
#[utoipa::path(
    put,
    path = "/api/v1/products/{id}",
    summary = "Update product",
    params(("id" = i32, Path, description = "Product ID")),
    request_body = ProductUpdate,
    responses(
        (status = 200, description = "Product updated successfully", body = ApiResponse<ProductResponse>),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    tag = "products"
)]
pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(update): Json<ProductUpdate>,
) -> Result<Json<ApiResponse<ProductResponse>>, ServiceError> {
    let product = state.services.products.update_product(id, update).await?;
    Ok(Json(ApiResponse::success(product.into())))
}

/// Archive product
#[utoipa::path(
    post,
    path = "/api/v1/products/{id}/archive",
    summary = "Archive product",
    description = "Soft delete: the product is flagged archived and hidden from the default listing",
    params(("id" = i32, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Product archived", body = ApiResponse<ProductResponse>),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    tag = "products"
)]
pub async fn archive_product(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<ProductResponse>>, ServiceError> {
    let product = state.services.products.archive_product(id).await?;
    Ok(Json(ApiResponse::success(product.into())))
}

/// Archive several products
#[utoipa::path(
    post,
    path = "/api/v1/products/archive",
    summary = "Bulk archive products",
    request_body = ProductIdsRequest,
    responses(
        (status = 200, description = "Number of products changed", body = ApiResponse<ArchiveResult>),
    ),
    tag = "products"
)]
pub async fn archive_products(
    State(state): State<AppState>,
    Json(request): Json<ProductIdsRequest>,
) -> Result<Json<ApiResponse<ArchiveResult>>, ServiceError> {
    let affected = state
        .services
        .products
        .set_archived(&request.ids, true)
        .await?;
    Ok(Json(ApiResponse::success(ArchiveResult { affected })))
}

/// Unarchive several products
#[utoipa::path(
    post,
    path = "/api/v1/products/unarchive",
    summary = "Bulk unarchive products",
    request_body = ProductIdsRequest,
    responses(
        (status = 200, description = "Number of products changed", body = ApiResponse<ArchiveResult>),
    ),
    tag = "products"
)]
pub async fn unarchive_products(
    State(state): State<AppState>,
    Json(request): Json<ProductIdsRequest>,
) -> Result<Json<ApiResponse<ArchiveResult>>, ServiceError> {
    let affected = state
        .services
        .products
        .set_archived(&request.ids, false)
        .await?;
    Ok(Json(ApiResponse::success(ArchiveResult { affected })))
}

/// Import products from CSV
#[utoipa::path(
    post,
    path = "/api/v1/products/import",
    summary = "Import products from CSV",
    description = "Multipart upload in field `csv_file`. Columns: name, price, description, discount, archived. All rows are created or none are.",
    responses(
        (status = 303, description = "Data from CSV was imported", body = ApiResponse<crate::handlers::common::ImportSummary>),
        (status = 400, description = "Undecodable file or invalid rows", body = crate::errors::ErrorResponse),
    ),
    tag = "products"
)]
pub async fn import_products(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, ServiceError> {
    let upload = read_csv_upload(&headers, multipart).await?;
    let created = state.services.products.import_csv(&upload).await?;
    Ok(imported_response(PRODUCTS_LOCATION, created))
}

/// Export products as JSON
#[utoipa::path(
    get,
    path = "/api/v1/products/export",
    summary = "Export products",
    responses(
        (status = 200, description = "Every product ordered by id", body = ProductExport),
    ),
    tag = "products"
)]
pub async fn export_products(
    State(state): State<AppState>,
) -> Result<Json<ProductExport>, ServiceError> {
    Ok(Json(state.services.products.export().await?))
}

/// Export products as CSV
#[utoipa::path(
    get,
    path = "/api/v1/products/export.csv",
    summary = "Export products as CSV",
    description = "Same columns the importer accepts",
    responses(
        (status = 200, description = "CSV file", content_type = "text/csv", body = String),
    ),
    tag = "products"
)]
pub async fn export_products_csv(State(state): State<AppState>) -> Result<Response, ServiceError> {
    let csv = state.services.products.export_csv().await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"products.csv\"",
            ),
        ],
        csv,
    )
        .into_response())
}

pub fn products_routes() -> Router<AppState> {
    Router::new()
        .route("/products", get(list_products).post(create_product))
        .route("/products/import", post(import_products))
        .route("/products/export", get(export_products))
        .route("/products/export.csv", get(export_products_csv))
        .route("/products/archive", post(archive_products))
        .route("/products/unarchive", post(unarchive_products))
        .route("/products/{id}", get(get_product).put(update_product))
        .route("/products/{id}/archive", post(archive_product))
}
