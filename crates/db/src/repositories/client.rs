use chrono::{DateTime, Utc};
use sqlx::Row;

use pedido_core::domain::client::{Client, ClientId, NewClient};

use super::{decode_err, ClientRepository, RepositoryError};
use crate::DbPool;

pub struct SqlClientRepository {
    pool: DbPool,
}

impl SqlClientRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn find_by_key(
        &self,
        phone: &str,
        sender_id: &str,
    ) -> Result<Option<Client>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, local_name, address, phone, sender_id, created_at
             FROM client WHERE phone = ? AND sender_id = ?",
        )
        .bind(phone)
        .bind(sender_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_client).transpose()
    }
}

fn row_to_client(row: &sqlx::sqlite::SqliteRow) -> Result<Client, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(decode_err)?;
    let name: String = row.try_get("name").map_err(decode_err)?;
    let local_name: String = row.try_get("local_name").map_err(decode_err)?;
    let address: String = row.try_get("address").map_err(decode_err)?;
    let phone: String = row.try_get("phone").map_err(decode_err)?;
    let sender_id: String = row.try_get("sender_id").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;

    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(decode_err)?;

    Ok(Client { id: ClientId(id), name, local_name, address, phone, sender_id, created_at })
}

#[async_trait::async_trait]
impl ClientRepository for SqlClientRepository {
    async fn find_by_identity(
        &self,
        sender_id: &str,
        phone: Option<&str>,
    ) -> Result<Option<Client>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, local_name, address, phone, sender_id, created_at
             FROM client
             WHERE sender_id = ?1 OR (?2 IS NOT NULL AND phone = ?2)
             ORDER BY CASE WHEN sender_id = ?1 THEN 0 ELSE 1 END, id
             LIMIT 1",
        )
        .bind(sender_id)
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_client).transpose()
    }

    async fn create_or_get(&self, client: NewClient) -> Result<(Client, bool), RepositoryError> {
        let inserted = sqlx::query(
            "INSERT INTO client (name, local_name, address, phone, sender_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&client.name)
        .bind(&client.local_name)
        .bind(&client.address)
        .bind(&client.phone)
        .bind(&client.sender_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|error| RepositoryError::from_write(error, "client"));

        let created = match inserted {
            Ok(_) => true,
            // Someone holds this (phone, sender_id) already; hand back their row.
            Err(RepositoryError::Conflict(_)) => false,
            Err(error) => return Err(error),
        };

        let stored = self.find_by_key(&client.phone, &client.sender_id).await?.ok_or_else(|| {
            RepositoryError::Decode(format!(
                "client for sender `{}` vanished after insert",
                client.sender_id
            ))
        })?;

        Ok((stored, created))
    }
}
