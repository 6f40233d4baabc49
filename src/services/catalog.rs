use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{product, product_variant},
    errors::ServiceError,
};

/// A single cart line as submitted by the storefront. The reference is either
/// a variant UUID or a product slug; the optional variant selector picks a
/// variant by label or SKU when the reference is a slug.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CartLine {
    #[validate(length(min = 1, message = "Product reference cannot be empty"))]
    pub reference: String,
    pub variant: Option<String>,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

/// A cart line resolved against the live catalog. Carries the full product
/// and variant rows so downstream snapshotting never re-queries.
#[derive(Debug, Clone)]
pub struct ResolvedLine {
    pub product: product::Model,
    pub variant: product_variant::Model,
    pub quantity: i32,
}

impl ResolvedLine {
    pub fn unit_price(&self) -> Decimal {
        self.variant.price
    }

    pub fn line_total(&self) -> Decimal {
        self.variant.price * Decimal::from(self.quantity)
    }
}

/// Resolves raw cart references to canonical catalog rows. All lookups are
/// batched; resolving N lines costs a fixed number of queries, not N.
pub struct ProductResolver {
    db: Arc<DatabaseConnection>,
}

impl ProductResolver {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Resolves every line or fails the whole batch. Any line whose reference
    /// does not match an active product aborts with the line index and the
    /// offending reference so the storefront can point at the bad row.
    #[instrument(skip(self, lines), fields(line_count = lines.len()))]
    pub async fn resolve_lines(&self, lines: &[CartLine]) -> Result<Vec<ResolvedLine>, ServiceError> {
        if lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "Cart must contain at least one line".to_string(),
            ));
        }

        let mut id_refs: Vec<Uuid> = Vec::new();
        let mut slug_refs: Vec<String> = Vec::new();
        for line in lines {
            match Uuid::parse_str(line.reference.trim()) {
                Ok(id) => id_refs.push(id),
                Err(_) => slug_refs.push(line.reference.trim().to_lowercase()),
            }
        }

        // One query per reference shape: variants by id, products by id (for
        // UUIDs that were product ids), products by slug.
        let variants_by_id: HashMap<Uuid, product_variant::Model> = if id_refs.is_empty() {
            HashMap::new()
        } else {
            product_variant::Entity::find()
                .filter(product_variant::Column::Id.is_in(id_refs.clone()))
                .all(self.db.as_ref())
                .await?
                .into_iter()
                .map(|v| (v.id, v))
                .collect()
        };

        let unresolved_ids: Vec<Uuid> = id_refs
            .iter()
            .copied()
            .filter(|id| !variants_by_id.contains_key(id))
            .collect();

        let mut products: Vec<product::Model> = Vec::new();
        if !unresolved_ids.is_empty() {
            products.extend(
                product::Entity::find()
                    .filter(product::Column::Id.is_in(unresolved_ids))
                    .all(self.db.as_ref())
                    .await?,
            );
        }
        if !slug_refs.is_empty() {
            products.extend(
                product::Entity::find()
                    .filter(product::Column::Slug.is_in(slug_refs))
                    .all(self.db.as_ref())
                    .await?,
            );
        }

        let mut product_ids: Vec<Uuid> = products.iter().map(|p| p.id).collect();
        product_ids.extend(variants_by_id.values().map(|v| v.product_id));

        let all_products: HashMap<Uuid, product::Model> = {
            let mut map: HashMap<Uuid, product::Model> =
                products.into_iter().map(|p| (p.id, p)).collect();
            let missing: Vec<Uuid> = product_ids
                .iter()
                .copied()
                .filter(|id| !map.contains_key(id))
                .collect();
            if !missing.is_empty() {
                for p in product::Entity::find()
                    .filter(product::Column::Id.is_in(missing))
                    .all(self.db.as_ref())
                    .await?
                {
                    map.insert(p.id, p);
                }
            }
            map
        };

        let mut variants_by_product: HashMap<Uuid, Vec<product_variant::Model>> = HashMap::new();
        if !all_products.is_empty() {
            let ids: Vec<Uuid> = all_products.keys().copied().collect();
            for v in product_variant::Entity::find()
                .filter(product_variant::Column::ProductId.is_in(ids))
                .all(self.db.as_ref())
                .await?
            {
                variants_by_product.entry(v.product_id).or_default().push(v);
            }
        }

        let mut resolved = Vec::with_capacity(lines.len());
        for (idx, line) in lines.iter().enumerate() {
            let reference = line.reference.trim();

            let (product_row, variant_row) = match Uuid::parse_str(reference) {
                Ok(id) => {
                    if let Some(variant) = variants_by_id.get(&id) {
                        let product = all_products.get(&variant.product_id);
                        (product.cloned(), Some(variant.clone()))
                    } else if let Some(product) = all_products.get(&id) {
                        let variant = pick_variant(
                            variants_by_product.get(&id),
                            line.variant.as_deref(),
                        );
                        (Some(product.clone()), variant)
                    } else {
                        (None, None)
                    }
                }
                Err(_) => {
                    let product = all_products
                        .values()
                        .find(|p| p.slug.eq_ignore_ascii_case(reference));
                    let variant = product.and_then(|p| {
                        pick_variant(variants_by_product.get(&p.id), line.variant.as_deref())
                    });
                    (product.cloned(), variant)
                }
            };

            match (product_row, variant_row) {
                (Some(product), Some(variant)) if product.is_active => {
                    debug!(line = idx, sku = %variant.sku, "Resolved cart line");
                    resolved.push(ResolvedLine {
                        product,
                        variant,
                        quantity: line.quantity,
                    });
                }
                _ => {
                    return Err(ServiceError::ProductNotFound {
                        line: idx,
                        reference: reference.to_string(),
                    });
                }
            }
        }

        Ok(resolved)
    }
}

/// Picks a variant by label or SKU match, falling back to the lowest
/// position when no selector was given.
fn pick_variant(
    variants: Option<&Vec<product_variant::Model>>,
    selector: Option<&str>,
) -> Option<product_variant::Model> {
    let variants = variants?;
    match selector {
        Some(sel) => variants
            .iter()
            .find(|v| v.label.eq_ignore_ascii_case(sel) || v.sku.eq_ignore_ascii_case(sel))
            .cloned(),
        None => variants.iter().min_by_key(|v| v.position).cloned(),
    }
}
