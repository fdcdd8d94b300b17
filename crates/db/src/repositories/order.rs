use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;

use pedido_core::domain::client::ClientId;
use pedido_core::domain::order::{Order, OrderDraft, OrderId, OrderItem, ProposalRef};
use pedido_core::domain::product::ProductId;

use super::{decode_err, OrderRepository, RepositoryError};
use crate::DbPool;

pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_item(row: &sqlx::sqlite::SqliteRow) -> Result<(i64, OrderItem), RepositoryError> {
    let order_id: i64 = row.try_get("order_id").map_err(decode_err)?;
    let product_id: i64 = row.try_get("product_id").map_err(decode_err)?;
    let price: String = row.try_get("price_per_unit").map_err(decode_err)?;
    let quantity: i64 = row.try_get("quantity").map_err(decode_err)?;

    Ok((
        order_id,
        OrderItem {
            product_id: ProductId(product_id),
            price_per_unit: Decimal::from_str(&price).map_err(decode_err)?,
            quantity: u32::try_from(quantity).map_err(decode_err)?,
        },
    ))
}

fn row_to_order(
    row: &sqlx::sqlite::SqliteRow,
    items: Vec<OrderItem>,
) -> Result<Order, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(decode_err)?;
    let client_id: i64 = row.try_get("client_id").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(decode_err)?;

    Ok(Order { id: OrderId(id), client_id: ClientId(client_id), items, created_at })
}

fn proposal_index(proposal: &ProposalRef) -> Result<i64, RepositoryError> {
    i64::try_from(proposal.sequence_index).map_err(decode_err)
}

impl SqlOrderRepository {
    async fn find_by_proposal(
        &self,
        proposal: &ProposalRef,
    ) -> Result<Option<Order>, RepositoryError> {
        let Some(row) = sqlx::query(
            "SELECT id, client_id, created_at FROM customer_order
             WHERE thread_id = ? AND proposal_index = ?",
        )
        .bind(proposal.thread_id.as_str())
        .bind(proposal_index(proposal)?)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let order_id: i64 = row.try_get("id").map_err(decode_err)?;
        let items = sqlx::query(
            "SELECT order_id, product_id, price_per_unit, quantity FROM order_item
             WHERE order_id = ? ORDER BY line_number ASC",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|item_row| row_to_item(item_row).map(|(_, item)| item))
        .collect::<Result<Vec<_>, _>>()?;

        row_to_order(&row, items).map(Some)
    }

    async fn insert(
        &self,
        proposal: &ProposalRef,
        draft: &OrderDraft,
    ) -> Result<Order, RepositoryError> {
        let created_at = Utc::now();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "INSERT INTO customer_order (client_id, thread_id, proposal_index, total, created_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(draft.client_id.0)
        .bind(proposal.thread_id.as_str())
        .bind(proposal_index(proposal)?)
        .bind(draft.total().to_string())
        .bind(created_at.to_rfc3339())
        .fetch_one(&mut *tx)
        .await
        .map_err(|error| RepositoryError::from_write(error, "order"))?;
        let order_id: i64 = row.try_get("id").map_err(decode_err)?;

        for (line_number, item) in draft.items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_item (order_id, line_number, product_id, price_per_unit, quantity)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(order_id)
            .bind(line_number as i64 + 1)
            .bind(item.product_id.0)
            .bind(item.price_per_unit.to_string())
            .bind(i64::from(item.quantity))
            .execute(&mut *tx)
            .await
            .map_err(|error| RepositoryError::from_write(error, "order item"))?;
        }

        tx.commit().await?;

        Ok(Order {
            id: OrderId(order_id),
            client_id: draft.client_id,
            items: draft.items.clone(),
            created_at,
        })
    }
}

#[async_trait::async_trait]
impl OrderRepository for SqlOrderRepository {
    async fn submit(
        &self,
        proposal: &ProposalRef,
        draft: &OrderDraft,
    ) -> Result<(Order, bool), RepositoryError> {
        if let Some(existing) = self.find_by_proposal(proposal).await? {
            return Ok((existing, false));
        }

        match self.insert(proposal, draft).await {
            Ok(order) => Ok((order, true)),
            // Lost a race on the (thread_id, proposal_index) key.
            Err(error @ RepositoryError::Conflict(_)) => match self.find_by_proposal(proposal).await? {
                Some(existing) => Ok((existing, false)),
                None => Err(error),
            },
            Err(error) => Err(error),
        }
    }

    async fn list_for_client(&self, client_id: ClientId) -> Result<Vec<Order>, RepositoryError> {
        let order_rows = sqlx::query(
            "SELECT id, client_id, created_at FROM customer_order
             WHERE client_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(client_id.0)
        .fetch_all(&self.pool)
        .await?;

        let item_rows = sqlx::query(
            "SELECT oi.order_id, oi.product_id, oi.price_per_unit, oi.quantity
             FROM order_item oi
             JOIN customer_order co ON co.id = oi.order_id
             WHERE co.client_id = ?
             ORDER BY oi.order_id ASC, oi.line_number ASC",
        )
        .bind(client_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut items_by_order: BTreeMap<i64, Vec<OrderItem>> = BTreeMap::new();
        for row in &item_rows {
            let (order_id, item) = row_to_item(row)?;
            items_by_order.entry(order_id).or_default().push(item);
        }

        order_rows
            .iter()
            .map(|row| {
                let id: i64 = row.try_get("id").map_err(decode_err)?;
                row_to_order(row, items_by_order.remove(&id).unwrap_or_default())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use pedido_core::domain::client::{ClientId, NewClient};
    use pedido_core::domain::conversation::ThreadId;
    use pedido_core::domain::order::{OrderDraft, OrderItem, ProposalRef};
    use pedido_core::domain::product::{Product, ProductId};

    use super::SqlOrderRepository;
    use crate::repositories::{
        ClientRepository, OrderRepository, ProductRepository, RepositoryError,
        SqlClientRepository, SqlProductRepository,
    };
    use crate::{connect_with_settings, migrations, DbPool};

    async fn pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    async fn seed(pool: &DbPool) -> ClientId {
        let products = SqlProductRepository::new(pool.clone());
        for (id, name, price) in [(1, "Café", 1000), (2, "Té", 800)] {
            products
                .upsert(Product {
                    id: ProductId(id),
                    name: name.to_string(),
                    product_type: "bebidas".to_string(),
                    sell_price_client: Decimal::from(price),
                })
                .await
                .expect("seed product");
        }

        let (client, _) = SqlClientRepository::new(pool.clone())
            .create_or_get(NewClient {
                name: "Ana".to_string(),
                local_name: "Almacén Ana".to_string(),
                address: "Calle 1".to_string(),
                phone: "5491155550000".to_string(),
                sender_id: "ana@chat".to_string(),
            })
            .await
            .expect("seed client");
        client.id
    }

    fn proposal(sequence_index: u64) -> ProposalRef {
        ProposalRef { thread_id: ThreadId("ana@chat".to_string()), sequence_index }
    }

    fn draft(client_id: ClientId) -> OrderDraft {
        OrderDraft::new(
            client_id,
            vec![
                OrderItem {
                    product_id: ProductId(1),
                    price_per_unit: Decimal::from(1000),
                    quantity: 2,
                },
                OrderItem { product_id: ProductId(2), price_per_unit: Decimal::from(800), quantity: 1 },
            ],
        )
        .expect("draft")
    }

    #[tokio::test]
    async fn submit_persists_items_at_draft_prices() {
        let pool = pool().await;
        let client_id = seed(&pool).await;
        let repo = SqlOrderRepository::new(pool);

        let (order, created) = repo.submit(&proposal(2), &draft(client_id)).await.expect("submit");
        assert!(created);
        assert_eq!(order.total(), Decimal::from(2800));

        let listed = repo.list_for_client(client_id).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, order.id);
        assert_eq!(listed[0].items, draft(client_id).items);
    }

    #[tokio::test]
    async fn unknown_client_is_rejected_as_conflict() {
        let pool = pool().await;
        let _ = seed(&pool).await;
        let repo = SqlOrderRepository::new(pool);

        let error =
            repo.submit(&proposal(2), &draft(ClientId(404))).await.expect_err("must fail");
        assert!(matches!(error, RepositoryError::Conflict(_)));
        assert!(repo.list_for_client(ClientId(404)).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn resubmitting_a_proposal_returns_the_stored_order() {
        let pool = pool().await;
        let client_id = seed(&pool).await;
        let repo = SqlOrderRepository::new(pool);

        let (first, created) = repo.submit(&proposal(2), &draft(client_id)).await.expect("first");
        let (second, created_again) =
            repo.submit(&proposal(2), &draft(client_id)).await.expect("second");
        assert!(created);
        assert!(!created_again);
        assert_eq!(second.id, first.id);
        assert_eq!(second.items, first.items);

        let (other, created_other) =
            repo.submit(&proposal(6), &draft(client_id)).await.expect("later proposal");
        assert!(created_other);
        assert_ne!(other.id, first.id);
        assert_eq!(repo.list_for_client(client_id).await.expect("list").len(), 2);
    }
}
