use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{
        inventory_level::{self, Entity as InventoryLevel},
        order_item,
    },
    errors::ServiceError,
};

/// Stock counters per variant. Every decrement is a conditional single-row
/// `UPDATE ... WHERE on_hand >= qty`; the database serializes concurrent
/// orders for the same variant, so counts never go negative and no update is
/// lost.
pub struct InventoryLedger {
    db: Arc<DatabaseConnection>,
}

impl InventoryLedger {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Decrements stock for every item of a paid order. Lines that cannot be
    /// satisfied are collected and reported together; satisfied lines keep
    /// their decrement. Callers treat the error as a review flag, never as a
    /// payment failure.
    #[instrument(skip(self, items), fields(item_count = items.len()))]
    pub async fn decrement_for_order(
        &self,
        items: &[order_item::Model],
    ) -> Result<(), ServiceError> {
        let mut shortfalls: Vec<String> = Vec::new();

        for item in items {
            let result = InventoryLevel::update_many()
                .col_expr(
                    inventory_level::Column::OnHand,
                    Expr::col(inventory_level::Column::OnHand).sub(item.quantity),
                )
                .col_expr(
                    inventory_level::Column::Version,
                    Expr::col(inventory_level::Column::Version).add(1),
                )
                .col_expr(
                    inventory_level::Column::UpdatedAt,
                    Expr::value(Utc::now()),
                )
                .filter(inventory_level::Column::VariantId.eq(item.variant_id))
                .filter(inventory_level::Column::OnHand.gte(item.quantity))
                .exec(self.db.as_ref())
                .await?;

            if result.rows_affected == 0 {
                warn!(sku = %item.sku, quantity = item.quantity, "Stock shortfall");
                shortfalls.push(format!("{} x{}", item.sku, item.quantity));
            } else {
                debug!(sku = %item.sku, quantity = item.quantity, "Stock decremented");
            }
        }

        if shortfalls.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::InsufficientStock(shortfalls.join(", ")))
        }
    }

    /// Sets the absolute stock level for a variant, creating the row on
    /// first use.
    pub async fn set_level(&self, variant_id: Uuid, on_hand: i32) -> Result<(), ServiceError> {
        if on_hand < 0 {
            return Err(ServiceError::ValidationError(
                "Stock level cannot be negative".to_string(),
            ));
        }

        let existing = InventoryLevel::find()
            .filter(inventory_level::Column::VariantId.eq(variant_id))
            .one(self.db.as_ref())
            .await?;

        match existing {
            Some(level) => {
                let version = level.version + 1;
                let mut active: inventory_level::ActiveModel = level.into();
                active.on_hand = Set(on_hand);
                active.version = Set(version);
                active.updated_at = Set(Utc::now());
                active.update(self.db.as_ref()).await?;
            }
            None => {
                let active = inventory_level::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    variant_id: Set(variant_id),
                    on_hand: Set(on_hand),
                    version: Set(1),
                    updated_at: Set(Utc::now()),
                };
                active.insert(self.db.as_ref()).await?;
            }
        }

        Ok(())
    }

    pub async fn get_level(&self, variant_id: Uuid) -> Result<Option<i32>, ServiceError> {
        let level = InventoryLevel::find()
            .filter(inventory_level::Column::VariantId.eq(variant_id))
            .one(self.db.as_ref())
            .await?;
        Ok(level.map(|l| l.on_hand))
    }
}
