//! Seed data script - populates the database with demo data
//!
//! Run with: cargo run --bin seed-data -- all
//!
//! This creates (each step is idempotent):
//! - the `admin` user
//! - six phones as products
//! - one order for `admin`

use clap::{Parser, Subcommand};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::info;

use shop_api::{
    db::{self, DbConfig},
    entities::{order, product, user},
    services::{
        orders::{OrderInput, OrderService},
        products::{ProductInput, ProductService},
        users::UserService,
    },
};

const DEMO_USERNAME: &str = "admin";
const DEMO_PRODUCTS: [&str; 6] = [
    "Iphone 10",
    "Iphone 11",
    "Iphone 12",
    "Samsung A54",
    "Samsung A53",
    "Xiaomi 13",
];
const DEMO_ADDRESS: &str = "Ul Veteranov d 14";
const DEMO_PROMOCODE: &str = "SALE123";

#[derive(Debug, Parser)]
#[command(name = "seed-data", about = "Populate the shop database with demo data")]
struct Cli {
    /// Database URL; falls back to DATABASE_URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://shop.db?mode=rwc")]
    database_url: String,

    /// Apply migrations before seeding
    #[arg(long)]
    migrate: bool,

    #[command(subcommand)]
    command: Option<SeedCommand>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum SeedCommand {
    /// Create the demo user
    User,
    /// Create the demo phones
    Products,
    /// Create the demo order for the demo user
    Order,
    /// Run every step
    All,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();
    info!("=== Shop API Seed Data ===");

    let pool = db::establish_connection_with_config(&DbConfig {
        url: cli.database_url.clone(),
        max_connections: 5,
        ..Default::default()
    })
    .await?;
    if cli.migrate {
        db::run_migrations(&pool).await?;
    }
    let pool = Arc::new(pool);

    let users = UserService::new(pool.clone());
    let products = ProductService::new(pool.clone());
    let orders = OrderService::new(pool.clone(), users.clone());

    match cli.command.unwrap_or(SeedCommand::All) {
        SeedCommand::User => {
            seed_user(&users).await?;
        }
        SeedCommand::Products => seed_products(&pool, &products).await?,
        SeedCommand::Order => seed_order(&pool, &users, &orders).await?,
        SeedCommand::All => {
            seed_user(&users).await?;
            seed_products(&pool, &products).await?;
            seed_order(&pool, &users, &orders).await?;
        }
    }

    info!("=== Seed Data Complete ===");
    info!("Try these API calls:");
    info!("  curl http://localhost:8080/api/v1/products");
    info!("  curl http://localhost:8080/api/v1/orders/export");
    Ok(())
}

async fn seed_user(users: &UserService) -> anyhow::Result<user::Model> {
    info!("Creating user {}...", DEMO_USERNAME);
    let admin = users.get_or_create(DEMO_USERNAME).await?;
    info!("  User {} has id {}", admin.username, admin.id);
    Ok(admin)
}

async fn seed_products(pool: &db::DbPool, products: &ProductService) -> anyhow::Result<()> {
    info!("Creating products...");
    for name in DEMO_PRODUCTS {
        let existing = product::Entity::find()
            .filter(product::Column::Name.eq(name))
            .one(pool)
            .await?;
        match existing {
            Some(found) => info!("  Product {} already exists (id {})", found.name, found.id),
            None => {
                let created = products
                    .create_product(ProductInput::named(name), None)
                    .await?;
                info!("  Created product {} (id {})", created.name, created.id);
            }
        }
    }
    Ok(())
}

async fn seed_order(
    pool: &db::DbPool,
    users: &UserService,
    orders: &OrderService,
) -> anyhow::Result<()> {
    info!("Creating order...");
    let admin = users.get_or_create(DEMO_USERNAME).await?;

    let existing = order::Entity::find()
        .filter(order::Column::UserId.eq(admin.id))
        .filter(order::Column::DeliveryAddress.eq(DEMO_ADDRESS))
        .filter(order::Column::Promocode.eq(DEMO_PROMOCODE))
        .one(pool)
        .await?;
    if let Some(found) = existing {
        info!("  Order {} already exists", found.id);
        return Ok(());
    }

    let created = orders
        .create_order(OrderInput {
            delivery_address: DEMO_ADDRESS.to_string(),
            promocode: DEMO_PROMOCODE.to_string(),
            user_id: admin.id,
            products: Vec::new(),
            created_at: None,
        })
        .await?;
    info!("  Created order {}", created.id);
    Ok(())
}
