use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    db::{DbPool, INSERT_CHUNK_ROWS, LOOKUP_CHUNK_IDS},
    entities::{
        order::{self, Column as OrderColumn, Entity as Order},
        order_product::{self, Column as OrderProductColumn, Entity as OrderProduct},
        product::{self, Entity as Product},
    },
    errors::ServiceError,
    services::{
        csv_import::{
            decode_upload, read_table, validation_row_errors, CsvRow, CsvUpload, ImportError,
            RowError, TableSchema,
        },
        users::UserService,
    },
};

/// Separator between product ids in the `products` column.
pub const PRODUCT_ID_SEPARATOR: char = ';';

const ORDER_TABLE: TableSchema = TableSchema {
    allowed: &["delivery_address", "promocode", "user", "created_at", "products"],
    required: &["user"],
};

/// Fields of a new order.
#[derive(Debug, Clone, PartialEq, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct OrderInput {
    #[serde(default)]
    pub delivery_address: String,
    #[serde(default)]
    #[validate(length(max = 20, message = "must be at most 20 characters"))]
    pub promocode: String,
    pub user_id: i32,
    #[serde(default)]
    pub products: Vec<i32>,
    /// Defaults to the time of creation
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl OrderInput {
    fn from_row(row: &CsvRow) -> Result<Self, Vec<RowError>> {
        let mut errors = Vec::new();

        let user_id = match row.integer::<i32>("user") {
            Ok(Some(id)) => Some(id),
            Ok(None) => {
                errors.push(RowError::cell(row.line, "user", "this field is required"));
                None
            }
            Err(e) => {
                errors.push(e);
                None
            }
        };
        let created_at = row.timestamp("created_at").unwrap_or_else(|e| {
            errors.push(e);
            None
        });
        let products = row
            .integer_list::<i32>("products", PRODUCT_ID_SEPARATOR)
            .unwrap_or_else(|e| {
                errors.push(e);
                Vec::new()
            });

        let input = Self {
            delivery_address: row.text("delivery_address"),
            promocode: row.text("promocode"),
            user_id: user_id.unwrap_or_default(),
            products,
            created_at,
        };
        if let Err(validation) = input.validate() {
            errors.extend(validation_row_errors(row.line, &validation));
        }

        if errors.is_empty() {
            Ok(input)
        } else {
            Err(errors)
        }
    }
}

/// Partial update. `products`, when present, replaces the whole set.
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct OrderUpdate {
    pub delivery_address: Option<String>,
    #[validate(length(max = 20, message = "must be at most 20 characters"))]
    pub promocode: Option<String>,
    pub products: Option<Vec<i32>>,
}

/// Order row together with its product ids, ascending.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct OrderWithProducts {
    pub id: i32,
    pub delivery_address: String,
    pub promocode: String,
    pub user_id: i32,
    pub created_at: DateTime<Utc>,
    pub products: Vec<i32>,
}

impl OrderWithProducts {
    fn new(order: order::Model, products: Vec<i32>) -> Self {
        Self {
            id: order.id,
            delivery_address: order.delivery_address,
            promocode: order.promocode,
            user_id: order.user_id,
            created_at: order.created_at,
            products,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderExportRow {
    pub pk: i32,
    pub delivery_address: String,
    pub promocode: String,
    pub user: i32,
    pub products: Vec<i32>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderExport {
    pub orders: Vec<OrderExportRow>,
}

fn db_failure(context: &str, e: DbErr) -> ServiceError {
    let msg = format!("{}: {}", context, e);
    error!(%msg);
    ServiceError::db_error(msg)
}

/// Order operations: CRUD, CSV import and export.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    users: UserService,
}

impl OrderService {
    pub fn new(db_pool: Arc<DbPool>, users: UserService) -> Self {
        Self { db_pool, users }
    }

    /// Imports every row of an order CSV, or nothing at all. Unknown users
    /// or products fail the whole file with `NotFound`.
    #[instrument(skip(self, upload), fields(bytes = upload.bytes.len()))]
    pub async fn import_csv(&self, upload: &CsvUpload) -> Result<usize, ServiceError> {
        let text = decode_upload(upload)?;
        let rows = read_table(&text, &ORDER_TABLE)?;

        let mut inputs = Vec::with_capacity(rows.len());
        let mut errors = Vec::new();
        for row in &rows {
            match OrderInput::from_row(row) {
                Ok(input) => inputs.push(input),
                Err(mut row_errors) => errors.append(&mut row_errors),
            }
        }
        if !errors.is_empty() {
            warn!(invalid = errors.len(), "Rejecting order CSV import");
            return Err(ImportError::from(errors).into());
        }

        self.ensure_references(&inputs).await?;
        let created = self.bulk_create(inputs).await?;
        info!(created = created.len(), "Orders imported from CSV");
        Ok(created.len())
    }

    /// Fails with `NotFound` on the first user or product that does not exist.
    async fn ensure_references(&self, inputs: &[OrderInput]) -> Result<(), ServiceError> {
        let user_ids: HashSet<i32> = inputs.iter().map(|i| i.user_id).collect();
        let known_users = self.users.existing_ids(&user_ids).await?;
        if let Some(missing) = inputs.iter().find(|i| !known_users.contains(&i.user_id)) {
            return Err(ServiceError::NotFound(format!(
                "User with ID {} not found",
                missing.user_id
            )));
        }

        let product_ids: HashSet<i32> = inputs
            .iter()
            .flat_map(|i| i.products.iter().copied())
            .collect();
        let known_products = self.existing_product_ids(&product_ids).await?;
        let mut requested: Vec<i32> = product_ids.into_iter().collect();
        requested.sort_unstable();
        if let Some(missing) = requested.iter().find(|id| !known_products.contains(id)) {
            return Err(ServiceError::NotFound(format!(
                "Product with ID {} not found",
                missing
            )));
        }
        Ok(())
    }

    async fn existing_product_ids(
        &self,
        ids: &HashSet<i32>,
    ) -> Result<HashSet<i32>, ServiceError> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let db = &*self.db_pool;
        let ids: Vec<i32> = ids.iter().copied().collect();
        let mut known = HashSet::with_capacity(ids.len());
        for chunk in ids.chunks(LOOKUP_CHUNK_IDS) {
            let found = Product::find()
                .filter(product::Column::Id.is_in(chunk.iter().copied()))
                .all(db)
                .await
                .map_err(|e| db_failure("Failed to resolve products", e))?;
            known.extend(found.into_iter().map(|p| p.id));
        }
        Ok(known)
    }

    /// Writes orders and their product links in one transaction. Callers
    /// must have resolved every reference beforehand.
    pub async fn bulk_create(&self, inputs: Vec<OrderInput>) -> Result<Vec<i32>, ServiceError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let db = &*self.db_pool;
        let txn = db
            .begin()
            .await
            .map_err(|e| db_failure("Failed to start transaction", e))?;

        let now = Utc::now();
        let mut ids = Vec::with_capacity(inputs.len());
        let mut links = Vec::new();
        for input in inputs {
            // one row at a time: the generated id is needed for the product links
            let created = order::ActiveModel {
                delivery_address: Set(input.delivery_address),
                promocode: Set(input.promocode),
                user_id: Set(input.user_id),
                created_at: Set(input.created_at.unwrap_or(now)),
                ..Default::default()
            }
            .insert(&txn)
            .await
            .map_err(|e| db_failure("Failed to insert order", e))?;

            links.extend(link_models(created.id, &input.products));
            ids.push(created.id);
        }
        insert_links(&txn, links).await?;

        txn.commit()
            .await
            .map_err(|e| db_failure("Failed to commit orders", e))?;
        Ok(ids)
    }

    #[instrument(skip(self))]
    pub async fn create_order(&self, input: OrderInput) -> Result<OrderWithProducts, ServiceError> {
        input.validate()?;
        self.ensure_references(std::slice::from_ref(&input)).await?;

        let ids = self.bulk_create(vec![input]).await?;
        let id = ids
            .first()
            .copied()
            .ok_or_else(|| ServiceError::InternalError("order insert returned no id".into()))?;
        info!(order_id = id, "Order created successfully");
        self.get_order(id).await
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, id: i32) -> Result<OrderWithProducts, ServiceError> {
        let db = &*self.db_pool;
        let order = Order::find_by_id(id)
            .one(db)
            .await
            .map_err(|e| db_failure("Failed to get order", e))?
            .ok_or_else(|| ServiceError::NotFound(format!("Order with ID {} not found", id)))?;
        let mut products = self.product_ids_by_order(&[id]).await?;
        Ok(OrderWithProducts::new(
            order,
            products.remove(&id).unwrap_or_default(),
        ))
    }

    /// All orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders(&self) -> Result<Vec<OrderWithProducts>, ServiceError> {
        let db = &*self.db_pool;
        let orders = Order::find()
            .order_by_desc(OrderColumn::CreatedAt)
            .order_by_desc(OrderColumn::Id)
            .all(db)
            .await
            .map_err(|e| db_failure("Failed to list orders", e))?;
        self.attach_products(orders).await
    }

    /// Orders placed by one user, by id ascending. An unknown user is `NotFound`.
    #[instrument(skip(self))]
    pub async fn list_user_orders(
        &self,
        user_id: i32,
    ) -> Result<Vec<OrderWithProducts>, ServiceError> {
        self.users.get_user(user_id).await?;
        self.orders_for_user(user_id).await
    }

    /// Same as [`list_user_orders`](Self::list_user_orders) without the user check.
    pub async fn orders_for_user(
        &self,
        user_id: i32,
    ) -> Result<Vec<OrderWithProducts>, ServiceError> {
        let db = &*self.db_pool;
        let orders = Order::find()
            .filter(OrderColumn::UserId.eq(user_id))
            .order_by_asc(OrderColumn::Id)
            .all(db)
            .await
            .map_err(|e| db_failure("Failed to load user orders", e))?;
        self.attach_products(orders).await
    }

    #[instrument(skip(self))]
    pub async fn update_order(
        &self,
        id: i32,
        update: OrderUpdate,
    ) -> Result<OrderWithProducts, ServiceError> {
        update.validate()?;
        let db = &*self.db_pool;
        let existing = Order::find_by_id(id)
            .one(db)
            .await
            .map_err(|e| db_failure("Failed to get order", e))?
            .ok_or_else(|| ServiceError::NotFound(format!("Order with ID {} not found", id)))?;

        if let Some(products) = &update.products {
            let requested: HashSet<i32> = products.iter().copied().collect();
            let known = self.existing_product_ids(&requested).await?;
            if let Some(missing) = products.iter().find(|p| !known.contains(p)) {
                return Err(ServiceError::NotFound(format!(
                    "Product with ID {} not found",
                    missing
                )));
            }
        }

        let txn = db
            .begin()
            .await
            .map_err(|e| db_failure("Failed to start transaction", e))?;

        let mut active: order::ActiveModel = existing.into();
        if let Some(address) = update.delivery_address {
            active.delivery_address = Set(address);
        }
        if let Some(promocode) = update.promocode {
            active.promocode = Set(promocode);
        }
        if active.is_changed() {
            active
                .update(&txn)
                .await
                .map_err(|e| db_failure("Failed to update order", e))?;
        }

        if let Some(products) = update.products {
            OrderProduct::delete_many()
                .filter(OrderProductColumn::OrderId.eq(id))
                .exec(&txn)
                .await
                .map_err(|e| db_failure("Failed to clear order products", e))?;
            insert_links(&txn, link_models(id, &products)).await?;
        }

        txn.commit()
            .await
            .map_err(|e| db_failure("Failed to commit order update", e))?;
        info!(order_id = id, "Order updated");
        self.get_order(id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_order(&self, id: i32) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let txn = db
            .begin()
            .await
            .map_err(|e| db_failure("Failed to start transaction", e))?;
        OrderProduct::delete_many()
            .filter(OrderProductColumn::OrderId.eq(id))
            .exec(&txn)
            .await
            .map_err(|e| db_failure("Failed to delete order products", e))?;
        let result = Order::delete_by_id(id)
            .exec(&txn)
            .await
            .map_err(|e| db_failure("Failed to delete order", e))?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Order with ID {} not found",
                id
            )));
        }
        txn.commit()
            .await
            .map_err(|e| db_failure("Failed to commit order delete", e))?;
        info!(order_id = id, "Order deleted");
        Ok(())
    }

    /// Every order ordered by pk, with product ids ascending.
    #[instrument(skip(self))]
    pub async fn export(&self) -> Result<OrderExport, ServiceError> {
        let db = &*self.db_pool;
        let orders = Order::find()
            .order_by_asc(OrderColumn::Id)
            .all(db)
            .await
            .map_err(|e| db_failure("Failed to load orders for export", e))?;
        let orders = self
            .attach_products(orders)
            .await?
            .into_iter()
            .map(|o| OrderExportRow {
                pk: o.id,
                delivery_address: o.delivery_address,
                promocode: o.promocode,
                user: o.user_id,
                products: o.products,
            })
            .collect();
        Ok(OrderExport { orders })
    }

    async fn attach_products(
        &self,
        orders: Vec<order::Model>,
    ) -> Result<Vec<OrderWithProducts>, ServiceError> {
        let ids: Vec<i32> = orders.iter().map(|o| o.id).collect();
        let mut products = self.product_ids_by_order(&ids).await?;
        Ok(orders
            .into_iter()
            .map(|o| {
                let ids = products.remove(&o.id).unwrap_or_default();
                OrderWithProducts::new(o, ids)
            })
            .collect())
    }

    async fn product_ids_by_order(
        &self,
        order_ids: &[i32],
    ) -> Result<HashMap<i32, Vec<i32>>, ServiceError> {
        if order_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let db = &*self.db_pool;
        let mut grouped: HashMap<i32, Vec<i32>> = HashMap::new();
        for chunk in order_ids.chunks(LOOKUP_CHUNK_IDS) {
            let links = OrderProduct::find()
                .filter(OrderProductColumn::OrderId.is_in(chunk.iter().copied()))
                .order_by_asc(OrderProductColumn::OrderId)
                .order_by_asc(OrderProductColumn::ProductId)
                .all(db)
                .await
                .map_err(|e| db_failure("Failed to load order products", e))?;
            for link in links {
                grouped.entry(link.order_id).or_default().push(link.product_id);
            }
        }
        Ok(grouped)
    }
}

fn link_models(order_id: i32, products: &[i32]) -> Vec<order_product::ActiveModel> {
    let unique: BTreeSet<i32> = products.iter().copied().collect();
    unique
        .into_iter()
        .map(|product_id| order_product::ActiveModel {
            order_id: Set(order_id),
            product_id: Set(product_id),
        })
        .collect()
}

async fn insert_links<C: ConnectionTrait>(
    conn: &C,
    links: Vec<order_product::ActiveModel>,
) -> Result<(), ServiceError> {
    for chunk in links.chunks(INSERT_CHUNK_ROWS) {
        OrderProduct::insert_many(chunk.to_vec())
            .exec_without_returning(conn)
            .await
            .map_err(|e| db_failure("Failed to insert order products", e))?;
    }
    Ok(())
}
