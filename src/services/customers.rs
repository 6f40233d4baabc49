use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use serde_json::Value as Json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::customer::{self, Entity as Customer},
    errors::ServiceError,
};

/// Contact details captured at checkout, used to upsert the customer ledger.
pub struct CheckoutContact {
    pub email: String,
    pub phone: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub account_id: Option<Uuid>,
    pub address: Option<Json>,
}

/// Maintains one customer row per normalized email. Upsert-only: existing
/// rows are enriched, never replaced, and nothing here deletes.
pub struct CustomerLedger {
    db: Arc<DatabaseConnection>,
}

impl CustomerLedger {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Inserts or updates the ledger row for this contact and bumps its
    /// order counter. Returns the persisted row.
    #[instrument(skip(self, contact))]
    pub async fn upsert_from_checkout(
        &self,
        contact: CheckoutContact,
    ) -> Result<customer::Model, ServiceError> {
        let email = contact.email.trim().to_lowercase();
        if email.is_empty() {
            return Err(ServiceError::ValidationError(
                "Customer email cannot be empty".to_string(),
            ));
        }

        let existing = Customer::find()
            .filter(customer::Column::Email.eq(email.clone()))
            .one(self.db.as_ref())
            .await?;

        let now = Utc::now();
        let model = match existing {
            Some(found) => {
                let orders_count = found.orders_count + 1;

                // Only overwrite fields the new checkout actually supplied.
                let first = if contact.first_name.trim().is_empty() {
                    found.first_name.clone()
                } else {
                    contact.first_name.trim().to_string()
                };
                let last = if contact.last_name.trim().is_empty() {
                    found.last_name.clone()
                } else {
                    contact.last_name.trim().to_string()
                };

                let mut active: customer::ActiveModel = found.into();
                active.first_name = Set(first.clone());
                active.last_name = Set(last.clone());
                active.full_name = Set(format!("{} {}", first, last).trim().to_string());
                if contact.phone.is_some() {
                    active.phone = Set(contact.phone);
                }
                if contact.account_id.is_some() {
                    active.account_id = Set(contact.account_id);
                }
                if contact.address.is_some() {
                    active.default_address = Set(contact.address);
                }
                active.orders_count = Set(orders_count);
                active.updated_at = Set(now);
                active.update(self.db.as_ref()).await?
            }
            None => {
                let first = contact.first_name.trim().to_string();
                let last = contact.last_name.trim().to_string();
                let full_name = format!("{} {}", first, last).trim().to_string();
                let active = customer::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    email: Set(email.clone()),
                    phone: Set(contact.phone),
                    first_name: Set(first),
                    last_name: Set(last),
                    full_name: Set(full_name),
                    account_id: Set(contact.account_id),
                    default_address: Set(contact.address),
                    orders_count: Set(1),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                let inserted = active.insert(self.db.as_ref()).await?;
                info!(customer_id = %inserted.id, "Customer created");
                inserted
            }
        };

        Ok(model)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<customer::Model>, ServiceError> {
        let found = Customer::find()
            .filter(customer::Column::Email.eq(email.trim().to_lowercase()))
            .one(self.db.as_ref())
            .await?;
        Ok(found)
    }
}
