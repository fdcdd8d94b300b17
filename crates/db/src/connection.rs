use std::time::Duration;

use pedido_core::config::DatabaseConfig;
use sqlx::sqlite::SqlitePoolOptions;

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

pub async fn connect_with_config(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.url, config.max_connections, config.timeout_secs).await
}

pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
}

/// `sqlite://` URLs need `mode=rwc` for the file to be created on first run.
pub fn with_create_mode(database_url: &str) -> String {
    let is_file = database_url.starts_with("sqlite://") && !database_url.contains(":memory:");
    if !is_file || database_url.contains("mode=") {
        return database_url.to_string();
    }
    let separator = if database_url.contains('?') { '&' } else { '?' };
    format!("{database_url}{separator}mode=rwc")
}

#[cfg(test)]
mod tests {
    use super::{connect_with_settings, with_create_mode};

    #[test]
    fn create_mode_is_added_to_file_urls_only() {
        assert_eq!(with_create_mode("sqlite://pedido.db"), "sqlite://pedido.db?mode=rwc");
        assert_eq!(with_create_mode("sqlite://pedido.db?cache=shared"), "sqlite://pedido.db?cache=shared&mode=rwc");
        assert_eq!(with_create_mode("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(with_create_mode("sqlite://pedido.db?mode=ro"), "sqlite://pedido.db?mode=ro");
    }

    #[tokio::test]
    async fn in_memory_pool_enables_foreign_keys() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        let enabled: i64 =
            sqlx::query_scalar("PRAGMA foreign_keys").fetch_one(&pool).await.expect("pragma");
        assert_eq!(enabled, 1);
    }
}
