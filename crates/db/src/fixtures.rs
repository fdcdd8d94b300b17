use std::collections::BTreeSet;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;

use pedido_core::domain::product::{Product, ProductId};

use crate::connection::DbPool;
use crate::repositories::{ProductRepository, RepositoryError, SqlProductRepository};

/// Demo catalog used by `pedido seed` and local runs.
pub struct DemoCatalog;

impl DemoCatalog {
    pub const JSON: &'static str = include_str!("../../../config/fixtures/demo_catalog.json");

    pub fn products() -> Result<Vec<Product>, RepositoryError> {
        let fixture: CatalogFixture = serde_json::from_str(Self::JSON)
            .map_err(|error| RepositoryError::Decode(format!("demo catalog fixture: {error}")))?;

        fixture
            .products
            .into_iter()
            .map(|row| {
                Ok(Product {
                    id: ProductId(row.id),
                    name: row.name,
                    product_type: row.product_type,
                    sell_price_client: Decimal::from_str(&row.sell_price_client).map_err(
                        |error| {
                            RepositoryError::Decode(format!(
                                "demo catalog price for product {}: {error}",
                                row.id
                            ))
                        },
                    )?,
                })
            })
            .collect()
    }

    /// Upserts every demo product; running it twice leaves one row per id.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let repository = SqlProductRepository::new(pool.clone());
        let products = Self::products()?;
        let mut product_types = BTreeSet::new();

        for product in &products {
            product_types.insert(product.product_type.clone());
            repository.upsert(product.clone()).await?;
        }

        Ok(SeedResult { products_seeded: products.len(), product_types })
    }

    pub async fn verify(pool: &DbPool) -> Result<bool, RepositoryError> {
        let stored = SqlProductRepository::new(pool.clone()).list_products().await?;
        let expected = Self::products()?;
        Ok(expected.iter().all(|product| stored.contains(product)))
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFixture {
    products: Vec<ProductRow>,
}

#[derive(Debug, Deserialize)]
struct ProductRow {
    id: i64,
    name: String,
    product_type: String,
    sell_price_client: String,
}

#[derive(Debug)]
pub struct SeedResult {
    pub products_seeded: usize,
    pub product_types: BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::DemoCatalog;
    use crate::repositories::{ProductRepository, SqlProductRepository};
    use crate::{connect_with_settings, migrations};

    #[test]
    fn fixture_parses() {
        let products = DemoCatalog::products().expect("fixture parses");
        assert!(!products.is_empty());
    }

    #[tokio::test]
    async fn load_is_idempotent_and_verifiable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let first = DemoCatalog::load(&pool).await.expect("first load");
        let second = DemoCatalog::load(&pool).await.expect("second load");
        assert_eq!(first.products_seeded, second.products_seeded);

        let stored = SqlProductRepository::new(pool.clone()).list_products().await.expect("list");
        assert_eq!(stored.len(), first.products_seeded);
        assert!(DemoCatalog::verify(&pool).await.expect("verify"));
    }
}
