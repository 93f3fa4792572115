use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize, Serializer};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use crate::{
    db::{DbPool, INSERT_CHUNK_ROWS, LOOKUP_CHUNK_IDS},
    entities::product::{self, Column as ProductColumn, Entity as Product},
    errors::ServiceError,
    services::csv_import::{
        decode_upload, read_table, validation_row_errors, write_table, CsvRow, CsvUpload,
        ImportError, RowError, TableSchema,
    },
};

/// Columns accepted by the product importer, in export order.
pub const PRODUCT_COLUMNS: [&str; 5] = ["name", "price", "description", "discount", "archived"];

const DISCOUNT_RANGE_MESSAGE: &str = "must be between 0 and 100";

const PRODUCT_TABLE: TableSchema = TableSchema {
    allowed: &PRODUCT_COLUMNS,
    required: &["name"],
};

fn validate_price(price: &Decimal) -> Result<(), ValidationError> {
    if *price < Decimal::ZERO {
        let mut err = ValidationError::new("price");
        err.message = Some("must not be negative".into());
        return Err(err);
    }
    // decimal(8, 2)
    if price.trunc() >= Decimal::from(1_000_000) {
        let mut err = ValidationError::new("price");
        err.message = Some("must have at most 6 integer digits".into());
        return Err(err);
    }
    if price.normalize().scale() > 2 {
        let mut err = ValidationError::new("price");
        err.message = Some("must have at most 2 decimal places".into());
        return Err(err);
    }
    Ok(())
}

/// Fields of a new catalog entry; absent fields take their defaults.
#[derive(Debug, Clone, PartialEq, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ProductInput {
    #[validate(length(min = 1, max = 100, message = "must be between 1 and 100 characters"))]
    pub name: String,
    #[serde(default)]
    #[validate(custom = "validate_price")]
    pub price: Decimal,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    #[validate(range(min = 0, max = 100, message = "must be between 0 and 100"))]
    pub discount: i16,
    #[serde(default)]
    pub archived: bool,
}

impl ProductInput {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            price: Decimal::ZERO,
            description: String::new(),
            discount: 0,
            archived: false,
        }
    }

    /// Builds and validates one input from a CSV row, reporting every bad cell.
    fn from_row(row: &CsvRow) -> Result<Self, Vec<RowError>> {
        let mut errors = Vec::new();
        let price = row.decimal("price").unwrap_or_else(|e| {
            errors.push(e);
            None
        });
        // wide parse so values past i16 still get the range message
        let discount = match row.integer::<i64>("discount") {
            Ok(Some(value)) => match i16::try_from(value) {
                Ok(discount) => Some(discount),
                Err(_) => {
                    errors.push(RowError::cell(row.line, "discount", DISCOUNT_RANGE_MESSAGE));
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                errors.push(e);
                None
            }
        };
        let archived = row.boolean("archived").unwrap_or_else(|e| {
            errors.push(e);
            None
        });

        let input = Self {
            name: row.text("name"),
            price: price.unwrap_or_default(),
            description: row.text("description"),
            discount: discount.unwrap_or_default(),
            archived: archived.unwrap_or_default(),
        };
        if let Err(validation) = input.validate() {
            // cells that failed to parse were already reported
            let fresh: Vec<RowError> = validation_row_errors(row.line, &validation)
                .into_iter()
                .filter(|e| !errors.iter().any(|prev| prev.column == e.column))
                .collect();
            errors.extend(fresh);
        }

        if errors.is_empty() {
            Ok(input)
        } else {
            Err(errors)
        }
    }

    fn into_active_model(self, created_by: Option<i32>) -> product::ActiveModel {
        product::ActiveModel {
            name: Set(self.name),
            price: Set(self.price),
            description: Set(self.description),
            discount: Set(self.discount),
            archived: Set(self.archived),
            created_by_id: Set(created_by),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
    }
}

/// Partial update; only present fields change.
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ProductUpdate {
    #[validate(length(min = 1, max = 100, message = "must be between 1 and 100 characters"))]
    pub name: Option<String>,
    #[validate(custom = "validate_price")]
    pub price: Option<Decimal>,
    pub description: Option<String>,
    #[validate(range(min = 0, max = 100, message = "must be between 0 and 100"))]
    pub discount: Option<i16>,
    pub archived: Option<bool>,
}

/// Listing filter. Archived entries are hidden unless asked for.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductFilter {
    pub search: Option<String>,
    pub archived: Option<bool>,
}

/// Renders a decimal as a JSON number; integral values become integers.
pub fn serialize_decimal_as_number<S>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let normalized = value.normalize();
    if normalized.scale() == 0 {
        if let Some(int) = normalized.to_i64() {
            return serializer.serialize_i64(int);
        }
    }
    match normalized.to_f64() {
        Some(float) => serializer.serialize_f64(float),
        None => Err(serde::ser::Error::custom(format!(
            "price {} is not representable as a number",
            value
        ))),
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProductExportRow {
    pub pk: i32,
    pub name: String,
    #[serde(serialize_with = "serialize_decimal_as_number")]
    #[schema(value_type = f64)]
    pub price: Decimal,
    pub archived: bool,
}

/// Product export envelope. The key is `orders` for compatibility with
/// existing consumers of this export.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProductExport {
    #[serde(rename = "orders")]
    pub products: Vec<ProductExportRow>,
}

/// Catalog operations: CRUD, archival, CSV import and export.
#[derive(Clone)]
pub struct ProductService {
    db_pool: Arc<DbPool>,
}

impl ProductService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Imports every row of a product CSV, or nothing at all.
    #[instrument(skip(self, upload), fields(bytes = upload.bytes.len()))]
    pub async fn import_csv(&self, upload: &CsvUpload) -> Result<usize, ServiceError> {
        let text = decode_upload(upload)?;
        let rows = read_table(&text, &PRODUCT_TABLE)?;

        let mut inputs = Vec::with_capacity(rows.len());
        let mut errors = Vec::new();
        for row in &rows {
            match ProductInput::from_row(row) {
                Ok(input) => inputs.push(input),
                Err(mut row_errors) => errors.append(&mut row_errors),
            }
        }
        if !errors.is_empty() {
            warn!(invalid = errors.len(), "Rejecting product CSV import");
            return Err(ImportError::from(errors).into());
        }

        let created = self.bulk_create(inputs, None).await?;
        info!(created, "Products imported from CSV");
        Ok(created)
    }

    /// Persists already validated inputs in one transaction, `INSERT_CHUNK_ROWS`
    /// rows per statement.
    pub async fn bulk_create(
        &self,
        inputs: Vec<ProductInput>,
        created_by: Option<i32>,
    ) -> Result<usize, ServiceError> {
        if inputs.is_empty() {
            return Ok(0);
        }
        let db = &*self.db_pool;
        let count = inputs.len();
        let models: Vec<product::ActiveModel> = inputs
            .into_iter()
            .map(|input| input.into_active_model(created_by))
            .collect();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start product import transaction");
            ServiceError::db_error(e)
        })?;
        for chunk in models.chunks(INSERT_CHUNK_ROWS) {
            Product::insert_many(chunk.to_vec())
                .exec(&txn)
                .await
                .map_err(|e| {
                    let msg = format!("Failed to bulk insert products: {}", e);
                    error!(%msg);
                    ServiceError::db_error(msg)
                })?;
        }
        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit product import");
            ServiceError::db_error(e)
        })?;
        Ok(count)
    }

    #[instrument(skip(self))]
    pub async fn create_product(
        &self,
        input: ProductInput,
        created_by: Option<i32>,
    ) -> Result<product::Model, ServiceError> {
        input.validate()?;
        let db = &*self.db_pool;
        let created = input
            .into_active_model(created_by)
            .insert(db)
            .await
            .map_err(|e| {
                let msg = format!("Failed to create product: {}", e);
                error!(%msg);
                ServiceError::db_error(msg)
            })?;
        info!(product_id = created.id, name = %created.name, "Product created successfully");
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, id: i32) -> Result<product::Model, ServiceError> {
        let db = &*self.db_pool;
        Product::find_by_id(id)
            .one(db)
            .await
            .map_err(|e| {
                error!(product_id = id, error = %e, "Database error when fetching product");
                ServiceError::db_error(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("Product with ID {} not found", id)))
    }

    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        filter: &ProductFilter,
    ) -> Result<Vec<product::Model>, ServiceError> {
        let db = &*self.db_pool;
        let mut query =
            Product::find().filter(ProductColumn::Archived.eq(filter.archived.unwrap_or(false)));

        if let Some(term) = filter.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            query = query.filter(
                Condition::any()
                    .add(ProductColumn::Name.contains(term))
                    .add(ProductColumn::Description.contains(term)),
            );
        }

        query
            .order_by_asc(ProductColumn::Id)
            .all(db)
            .await
            .map_err(|e| {
                let msg = format!("Failed to list products: {}", e);
                error!(%msg);
                ServiceError::db_error(msg)
            })
    }

    #[instrument(skip(self))]
    pub async fn update_product(
        &self,
        id: i32,
        update: ProductUpdate,
    ) -> Result<product::Model, ServiceError> {
        update.validate()?;
        let db = &*self.db_pool;
        let mut active: product::ActiveModel = self.get_product(id).await?.into();

        if let Some(name) = update.name {
            active.name = Set(name);
        }
        if let Some(price) = update.price {
            active.price = Set(price);
        }
        if let Some(description) = update.description {
            active.description = Set(description);
        }
        if let Some(discount) = update.discount {
            active.discount = Set(discount);
        }
        if let Some(archived) = update.archived {
            active.archived = Set(archived);
        }

        let updated = active.update(db).await.map_err(|e| {
            let msg = format!("Failed to update product {}: {}", id, e);
            error!(%msg);
            ServiceError::db_error(msg)
        })?;
        info!(product_id = id, "Product updated");
        Ok(updated)
    }

    /// Soft delete.
    #[instrument(skip(self))]
    pub async fn archive_product(&self, id: i32) -> Result<product::Model, ServiceError> {
        self.update_product(
            id,
            ProductUpdate {
                archived: Some(true),
                ..Default::default()
            },
        )
        .await
    }

    /// Sets the archived flag on every listed product, returning how many rows changed.
    #[instrument(skip(self))]
    pub async fn set_archived(&self, ids: &[i32], archived: bool) -> Result<u64, ServiceError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let db = &*self.db_pool;
        let unique: Vec<i32> = ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        let txn = db.begin().await.map_err(ServiceError::db_error)?;
        let mut affected = 0;
        for chunk in unique.chunks(LOOKUP_CHUNK_IDS) {
            let result = Product::update_many()
                .col_expr(ProductColumn::Archived, Expr::value(archived))
                .filter(ProductColumn::Id.is_in(chunk.iter().copied()))
                .exec(&txn)
                .await
                .map_err(|e| {
                    let msg = format!("Failed to update archived flag: {}", e);
                    error!(%msg);
                    ServiceError::db_error(msg)
                })?;
            affected += result.rows_affected;
        }
        txn.commit().await.map_err(ServiceError::db_error)?;
        info!(archived, affected, "Archived flag updated");
        Ok(affected)
    }

    async fn all_by_pk(&self) -> Result<Vec<product::Model>, ServiceError> {
        let db = &*self.db_pool;
        Product::find()
            .order_by_asc(ProductColumn::Id)
            .all(db)
            .await
            .map_err(|e| {
                let msg = format!("Failed to load products for export: {}", e);
                error!(%msg);
                ServiceError::db_error(msg)
            })
    }

    /// Every product, archived included, ordered by pk.
    #[instrument(skip(self))]
    pub async fn export(&self) -> Result<ProductExport, ServiceError> {
        let products = self
            .all_by_pk()
            .await?
            .into_iter()
            .map(|p| ProductExportRow {
                pk: p.id,
                name: p.name,
                price: p.price,
                archived: p.archived,
            })
            .collect();
        Ok(ProductExport { products })
    }

    /// CSV in the importer's column layout.
    #[instrument(skip(self))]
    pub async fn export_csv(&self) -> Result<String, ServiceError> {
        let rows = self.all_by_pk().await?.into_iter().map(|p| {
            vec![
                p.name,
                p.price.normalize().to_string(),
                p.description,
                p.discount.to_string(),
                p.archived.to_string(),
            ]
        });
        write_table(&PRODUCT_COLUMNS, rows)
    }
}
