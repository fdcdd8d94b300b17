use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::Row;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use pedido_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use pedido_core::domain::order::OrderId;

use super::{decode_err, AuditEventRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAuditEventRepository {
    pool: DbPool,
}

impl SqlAuditEventRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_category(value: &str) -> Result<AuditCategory, RepositoryError> {
    match value {
        "ingress" => Ok(AuditCategory::Ingress),
        "routing" => Ok(AuditCategory::Routing),
        "ordering" => Ok(AuditCategory::Ordering),
        "registration" => Ok(AuditCategory::Registration),
        "persistence" => Ok(AuditCategory::Persistence),
        "system" => Ok(AuditCategory::System),
        other => Err(RepositoryError::Decode(format!("unknown audit category `{other}`"))),
    }
}

fn parse_outcome(value: &str) -> Result<AuditOutcome, RepositoryError> {
    match value {
        "success" => Ok(AuditOutcome::Success),
        "rejected" => Ok(AuditOutcome::Rejected),
        "failed" => Ok(AuditOutcome::Failed),
        other => Err(RepositoryError::Decode(format!("unknown audit outcome `{other}`"))),
    }
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<AuditEvent, RepositoryError> {
    let event_id: String = row.try_get("id").map_err(decode_err)?;
    let thread_id: Option<String> = row.try_get("thread_id").map_err(decode_err)?;
    let order_id: Option<i64> = row.try_get("order_id").map_err(decode_err)?;
    let correlation_id: String = row.try_get("correlation_id").map_err(decode_err)?;
    let event_type: String = row.try_get("event_type").map_err(decode_err)?;
    let category: String = row.try_get("category").map_err(decode_err)?;
    let actor: String = row.try_get("actor").map_err(decode_err)?;
    let outcome: String = row.try_get("outcome").map_err(decode_err)?;
    let metadata_json: String = row.try_get("metadata_json").map_err(decode_err)?;
    let occurred_at: String = row.try_get("occurred_at").map_err(decode_err)?;

    Ok(AuditEvent {
        event_id,
        thread_id,
        order_id: order_id.map(OrderId),
        correlation_id,
        event_type,
        category: parse_category(&category)?,
        actor,
        outcome: parse_outcome(&outcome)?,
        metadata: serde_json::from_str::<BTreeMap<String, String>>(&metadata_json)
            .map_err(decode_err)?,
        occurred_at: DateTime::parse_from_rfc3339(&occurred_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(decode_err)?,
    })
}

#[async_trait::async_trait]
impl AuditEventRepository for SqlAuditEventRepository {
    async fn record(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        let metadata_json = serde_json::to_string(&event.metadata).map_err(decode_err)?;

        sqlx::query(
            "INSERT INTO audit_event (id, thread_id, order_id, correlation_id, event_type,
                                      category, actor, outcome, metadata_json, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&event.event_id)
        .bind(&event.thread_id)
        .bind(event.order_id.map(|id| id.0))
        .bind(&event.correlation_id)
        .bind(&event.event_type)
        .bind(event.category.as_str())
        .bind(&event.actor)
        .bind(event.outcome.as_str())
        .bind(metadata_json)
        .bind(event.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_thread(&self, thread_id: &str) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, thread_id, order_id, correlation_id, event_type, category, actor,
                    outcome, metadata_json, occurred_at
             FROM audit_event WHERE thread_id = ? ORDER BY occurred_at ASC, rowid ASC",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }
}

/// [`AuditSink`] that hands events to a background writer.
///
/// `emit` never blocks the caller; write failures are logged and dropped.
#[derive(Clone)]
pub struct SqlAuditSink {
    sender: mpsc::UnboundedSender<AuditEvent>,
}

impl SqlAuditSink {
    /// Spawns the writer on the current runtime. The task ends once every
    /// sink clone has been dropped and the queue is drained.
    pub fn spawn(repository: Arc<dyn AuditEventRepository>) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<AuditEvent>();
        let writer = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if let Err(error) = repository.record(&event).await {
                    tracing::warn!(
                        event_name = "audit.write_failed",
                        event_type = %event.event_type,
                        correlation_id = %event.correlation_id,
                        error = %error,
                        "failed to persist audit event"
                    );
                }
            }
        });
        (Self { sender }, writer)
    }
}

impl AuditSink for SqlAuditSink {
    fn emit(&self, event: AuditEvent) {
        if self.sender.send(event).is_err() {
            tracing::warn!(event_name = "audit.sink_closed", "audit writer is no longer running");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pedido_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
    use pedido_core::domain::order::OrderId;

    use super::{SqlAuditEventRepository, SqlAuditSink};
    use crate::repositories::AuditEventRepository;
    use crate::{connect_with_settings, migrations};

    fn event(event_type: &str) -> AuditEvent {
        AuditEvent::new(
            Some("ana@chat".to_string()),
            Some(OrderId(5)),
            "msg-1",
            event_type,
            AuditCategory::Ordering,
            "turn-router",
            AuditOutcome::Success,
        )
        .with_metadata("total", "2800")
    }

    #[tokio::test]
    async fn sink_persists_events_in_emission_order() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repository = Arc::new(SqlAuditEventRepository::new(pool));

        let (sink, writer) = SqlAuditSink::spawn(repository.clone());
        sink.emit(event("order.proposed"));
        sink.emit(event("order.submitted"));
        drop(sink);
        writer.await.expect("writer drains queue");

        let stored = repository.list_for_thread("ana@chat").await.expect("list");
        let types = stored.iter().map(|event| event.event_type.as_str()).collect::<Vec<_>>();
        assert_eq!(types, vec!["order.proposed", "order.submitted"]);
        assert_eq!(stored[1].order_id, Some(OrderId(5)));
        assert_eq!(stored[1].metadata.get("total").map(String::as_str), Some("2800"));
    }
}
