use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Catalog entry. Never hard-deleted; `archived` is the soft-delete flag.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub name: String,

    #[sea_orm(column_type = "Text")]
    pub description: String,

    #[sea_orm(column_type = "Decimal(Some((8, 2)))")]
    pub price: Decimal,

    /// Percentage, 0..=100
    pub discount: i16,

    pub archived: bool,

    pub created_by_id: Option<i32>,

    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::CreatedById",
        to = "super::user::Column::Id",
        on_delete = "SetNull"
    )]
    CreatedBy,
    #[sea_orm(has_many = "super::order_product::Entity")]
    OrderProducts,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CreatedBy.def()
    }
}

impl Related<super::order_product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderProducts.def()
    }
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        super::order_product::Relation::Order.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::order_product::Relation::Product.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Description trimmed for list views: first 48 characters plus an ellipsis.
    pub fn description_short(&self) -> String {
        if self.description.chars().count() < 48 {
            return self.description.clone();
        }
        let head: String = self.description.chars().take(48).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn product_with_description(description: &str) -> Model {
        Model {
            id: 1,
            name: "Iphone 10".into(),
            description: description.into(),
            price: dec!(1000),
            discount: 0,
            archived: false,
            created_by_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn short_description_is_untouched() {
        let product = product_with_description("A good phone");
        assert_eq!(product.description_short(), "A good phone");
    }

    #[test]
    fn long_description_is_truncated_to_48_chars() {
        let long = "x".repeat(60);
        let product = product_with_description(&long);
        let short = product.description_short();
        assert_eq!(short.len(), 51);
        assert!(short.ends_with("..."));
    }
}
