use std::str::FromStr;

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::Row;

use pedido_core::domain::product::{Product, ProductId};

use super::{decode_err, ProductRepository, RepositoryError};
use crate::DbPool;

pub struct SqlProductRepository {
    pool: DbPool,
}

impl SqlProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_product(row: &sqlx::sqlite::SqliteRow) -> Result<Product, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(decode_err)?;
    let name: String = row.try_get("name").map_err(decode_err)?;
    let product_type: String = row.try_get("product_type").map_err(decode_err)?;
    let price: String = row.try_get("sell_price_client").map_err(decode_err)?;

    Ok(Product {
        id: ProductId(id),
        name,
        product_type,
        sell_price_client: Decimal::from_str(&price).map_err(decode_err)?,
    })
}

#[async_trait::async_trait]
impl ProductRepository for SqlProductRepository {
    async fn list_products(&self) -> Result<Vec<Product>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, product_type, sell_price_client FROM product ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_product).collect()
    }

    async fn upsert(&self, product: Product) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO product (id, name, product_type, sell_price_client, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 product_type = excluded.product_type,
                 sell_price_client = excluded.sell_price_client,
                 updated_at = excluded.updated_at",
        )
        .bind(product.id.0)
        .bind(&product.name)
        .bind(&product.product_type)
        .bind(product.sell_price_client.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
