use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{DomainError, DomainResult, ProductId};

/// Price in the smallest currency unit (e.g. cents) plus an ISO currency code.
///
/// Pricing is stored opaquely; only the amount sign is validated.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Money {
    pub currency: String,
    pub amount: i64,
}

impl Money {
    pub fn new(currency: impl Into<String>, amount: i64) -> Self {
        Self {
            currency: currency.into(),
            amount,
        }
    }
}

/// Product record: catalog data plus the authoritative stock quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    pub sku: String,
    pub price: Money,
    pub stock_quantity: i64,
    pub category: String,
    pub attributes: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by the store on every write (catalog edits and stock adjustments).
    pub version: u64,
}

impl Product {
    /// Whether `quantity` units can be taken from the current stock.
    pub fn can_fulfil(&self, quantity: i64) -> bool {
        quantity <= self.stock_quantity
    }

    /// Compute the stock quantity after applying `delta`.
    ///
    /// Fails with `InsufficientStock` if the result would go below zero.
    pub fn stock_after(&self, delta: i64) -> DomainResult<i64> {
        if delta == 0 {
            return Err(DomainError::validation("delta cannot be zero"));
        }
        match self.stock_quantity.checked_add(delta) {
            Some(next) if next >= 0 => Ok(next),
            Some(_) => Err(DomainError::insufficient_stock(
                self.stock_quantity,
                delta.saturating_neg(),
            )),
            None => Err(DomainError::validation("stock delta overflows")),
        }
    }

    /// Apply a stock delta in place, stamping `updated_at` and bumping the version.
    pub fn apply_stock_delta(&mut self, delta: i64, now: DateTime<Utc>) -> DomainResult<i64> {
        let next = self.stock_after(delta)?;
        self.stock_quantity = next;
        self.updated_at = now;
        self.version += 1;
        Ok(next)
    }
}

/// Request: create a product.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub sku: String,
    #[serde(default)]
    pub price: Money,
    pub stock_quantity: i64,
    pub category: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl NewProduct {
    /// Validate required fields: name, SKU, category and a non-negative stock.
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if self.sku.trim().is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if self.category.trim().is_empty() {
            return Err(DomainError::validation("category cannot be empty"));
        }
        if self.stock_quantity < 0 {
            return Err(DomainError::validation("stock_quantity cannot be negative"));
        }
        if self.price.amount < 0 {
            return Err(DomainError::validation("price amount cannot be negative"));
        }
        Ok(())
    }

    /// Build the stored record (version 1) once the store has assigned an id.
    pub fn into_product(self, id: ProductId, now: DateTime<Utc>) -> Product {
        Product {
            id,
            name: self.name,
            description: self.description,
            sku: self.sku,
            price: self.price,
            stock_quantity: self.stock_quantity,
            category: self.category,
            attributes: self.attributes,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }
}

/// Request: partial product update.
///
/// Only fields that are present overwrite the existing values. Blank strings
/// are treated as absent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProductPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub price: Option<Money>,
    #[serde(default)]
    pub stock_quantity: Option<i64>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub attributes: Option<BTreeMap<String, String>>,
}

fn present(value: &Option<String>) -> Option<&String> {
    value.as_ref().filter(|v| !v.trim().is_empty())
}

impl ProductPatch {
    pub fn is_empty(&self) -> bool {
        present(&self.name).is_none()
            && present(&self.description).is_none()
            && present(&self.sku).is_none()
            && self.price.is_none()
            && self.stock_quantity.is_none()
            && present(&self.category).is_none()
            && self.attributes.is_none()
    }

    /// Produce the updated record. Does not mutate `current`; the version is
    /// left untouched (the store bumps it on write).
    pub fn apply_to(&self, current: &Product, now: DateTime<Utc>) -> DomainResult<Product> {
        if let Some(qty) = self.stock_quantity {
            if qty < 0 {
                return Err(DomainError::validation("stock_quantity cannot be negative"));
            }
        }
        if let Some(price) = &self.price {
            if price.amount < 0 {
                return Err(DomainError::validation("price amount cannot be negative"));
            }
        }

        let mut next = current.clone();
        if let Some(name) = present(&self.name) {
            next.name = name.clone();
        }
        if let Some(description) = present(&self.description) {
            next.description = description.clone();
        }
        if let Some(sku) = present(&self.sku) {
            next.sku = sku.clone();
        }
        if let Some(price) = &self.price {
            next.price = price.clone();
        }
        if let Some(qty) = self.stock_quantity {
            next.stock_quantity = qty;
        }
        if let Some(category) = present(&self.category) {
            next.category = category.clone();
        }
        if let Some(attributes) = &self.attributes {
            next.attributes = attributes.clone();
        }
        next.updated_at = now;
        Ok(next)
    }
}
