use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Customer profile keyed by normalized contact identity. Rows are upserted
/// on every checkout (update, never replace) and there is no deletion path.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "customers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Lowercased before persistence; unique contact identity.
    #[sea_orm(unique)]
    pub email: String,
    pub phone: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    /// Authenticated account link, if the checkout was not a guest one.
    pub account_id: Option<Uuid>,
    #[sea_orm(column_type = "Json", nullable)]
    pub default_address: Option<Json>,
    pub orders_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
