use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use stockroom_core::{DomainError, ExpectedVersion, ProductId};
use stockroom_products::{ListQuery, NewProduct, Product, ProductPage};

use super::r#trait::{ProductStore, StoreError};

#[derive(Debug, Default)]
struct Catalog {
    products: HashMap<ProductId, Product>,
    skus: HashMap<String, ProductId>,
}

/// In-memory product store.
///
/// Intended for tests/dev. A single lock guards the catalog, so every stock
/// adjustment is a serialized check-and-write.
#[derive(Debug, Default)]
pub struct InMemoryProductStore {
    catalog: RwLock<Catalog>,
}

impl InMemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Catalog>, StoreError> {
        self.catalog
            .read()
            .map_err(|_| StoreError::Unavailable("product catalog lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Catalog>, StoreError> {
        self.catalog
            .write()
            .map_err(|_| StoreError::Unavailable("product catalog lock poisoned".to_string()))
    }
}

fn map_stock_error(id: &ProductId, err: DomainError) -> StoreError {
    match err {
        DomainError::InsufficientStock {
            available,
            requested,
        } => StoreError::InsufficientStock {
            product_id: id.clone(),
            available,
            requested,
        },
        other => StoreError::Invalid(other.to_string()),
    }
}

#[async_trait::async_trait]
impl ProductStore for InMemoryProductStore {
    async fn create(&self, new: NewProduct) -> Result<Product, StoreError> {
        let mut catalog = self.write()?;
        if catalog.skus.contains_key(&new.sku) {
            return Err(StoreError::DuplicateSku(new.sku));
        }

        let product = new.into_product(ProductId::generate(), Utc::now());
        catalog
            .skus
            .insert(product.sku.clone(), product.id.clone());
        catalog
            .products
            .insert(product.id.clone(), product.clone());
        Ok(product)
    }

    async fn get(&self, id: &ProductId) -> Result<Product, StoreError> {
        self.read()?
            .products
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn update(
        &self,
        mut product: Product,
        expected: ExpectedVersion,
    ) -> Result<Product, StoreError> {
        let mut catalog = self.write()?;
        let current = catalog
            .products
            .get(&product.id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(product.id.clone()))?;

        expected
            .check(current.version)
            .map_err(|e| StoreError::Conflict(e.to_string()))?;

        if product.sku != current.sku {
            if let Some(owner) = catalog.skus.get(&product.sku) {
                if owner != &product.id {
                    return Err(StoreError::DuplicateSku(product.sku));
                }
            }
            catalog.skus.remove(&current.sku);
            catalog
                .skus
                .insert(product.sku.clone(), product.id.clone());
        }

        product.created_at = current.created_at;
        product.updated_at = Utc::now();
        product.version = current.version + 1;
        catalog
            .products
            .insert(product.id.clone(), product.clone());
        Ok(product)
    }

    async fn list(&self, query: &ListQuery) -> Result<ProductPage, StoreError> {
        let catalog = self.read()?;
        let mut matching: Vec<&Product> = catalog
            .products
            .values()
            .filter(|p| query.matches(p))
            .collect();
        matching.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.page_size as usize)
            .cloned()
            .collect();

        Ok(ProductPage {
            items,
            total,
            page: query.page,
            page_size: query.page_size,
        })
    }

    async fn delete(&self, id: &ProductId) -> Result<bool, StoreError> {
        let mut catalog = self.write()?;
        match catalog.products.remove(id) {
            Some(product) => {
                catalog.skus.remove(&product.sku);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn adjust_stock(&self, id: &ProductId, delta: i64) -> Result<i64, StoreError> {
        let mut catalog = self.write()?;
        let product = catalog
            .products
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        product
            .apply_stock_delta(delta, Utc::now())
            .map_err(|e| map_stock_error(id, e))
    }
}
