use chrono::{DateTime, Utc};
use sqlx::Row;

use pedido_core::domain::conversation::{
    AttachedDraft, HistoryOrder, NewTurn, Role, ThreadId, Turn, TurnEvent, TurnMetadata,
};
use pedido_core::domain::order::OrderId;

use super::{decode_err, ConversationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const TURN_COLUMNS: &str = "thread_id, sequence_index, role, text, sender_id, phone_number,
                            attached_draft_json, event, order_id, created_at";

fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> Result<Turn, RepositoryError> {
    let thread_id: String = row.try_get("thread_id").map_err(decode_err)?;
    let sequence_index: i64 = row.try_get("sequence_index").map_err(decode_err)?;
    let role: String = row.try_get("role").map_err(decode_err)?;
    let text: String = row.try_get("text").map_err(decode_err)?;
    let sender_id: String = row.try_get("sender_id").map_err(decode_err)?;
    let phone_number: Option<String> = row.try_get("phone_number").map_err(decode_err)?;
    let attached_draft_json: Option<String> =
        row.try_get("attached_draft_json").map_err(decode_err)?;
    let event: Option<String> = row.try_get("event").map_err(decode_err)?;
    let order_id: Option<i64> = row.try_get("order_id").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;

    let role = Role::parse(&role)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown turn role `{role}`")))?;
    let attached_draft = attached_draft_json
        .map(|raw| serde_json::from_str::<AttachedDraft>(&raw))
        .transpose()
        .map_err(decode_err)?;
    let event = event
        .map(|raw| {
            TurnEvent::parse(&raw)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown turn event `{raw}`")))
        })
        .transpose()?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(decode_err)?;

    Ok(Turn {
        thread_id: ThreadId(thread_id),
        sequence_index: u64::try_from(sequence_index).map_err(decode_err)?,
        role,
        text,
        metadata: TurnMetadata {
            sender_id,
            phone_number,
            attached_draft,
            event,
            order_id: order_id.map(OrderId),
        },
        created_at,
    })
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn append(&self, thread_id: &ThreadId, turn: NewTurn) -> Result<Turn, RepositoryError> {
        let attached_draft_json =
            turn.metadata.attached_draft.as_ref().map(serde_json::to_string).transpose().map_err(
                |error| RepositoryError::Decode(format!("could not encode draft: {error}")),
            )?;
        let created_at = Utc::now();

        // Index allocation and insert happen in one statement so two appends
        // can never claim the same slot.
        let row = sqlx::query(
            "INSERT INTO conversation_turn (thread_id, sequence_index, role, text, sender_id,
                                            phone_number, attached_draft_json, event, order_id,
                                            created_at)
             SELECT ?1, COALESCE(MAX(sequence_index), 0) + 1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9
             FROM conversation_turn WHERE thread_id = ?1
             RETURNING sequence_index",
        )
        .bind(thread_id.as_str())
        .bind(turn.role.as_str())
        .bind(&turn.text)
        .bind(&turn.metadata.sender_id)
        .bind(&turn.metadata.phone_number)
        .bind(&attached_draft_json)
        .bind(turn.metadata.event.map(|event| event.as_str()))
        .bind(turn.metadata.order_id.map(|id| id.0))
        .bind(created_at.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(|error| RepositoryError::from_write(error, "conversation turn"))?;

        let sequence_index: i64 = row.try_get("sequence_index").map_err(decode_err)?;
        let mut stored = Turn::from_new(
            thread_id.clone(),
            u64::try_from(sequence_index).map_err(decode_err)?,
            turn,
        );
        stored.created_at = created_at;
        Ok(stored)
    }

    async fn history(
        &self,
        thread_id: &ThreadId,
        order: HistoryOrder,
    ) -> Result<Vec<Turn>, RepositoryError> {
        let direction = match order {
            HistoryOrder::OldestFirst => "ASC",
            HistoryOrder::NewestFirst => "DESC",
        };
        let rows = sqlx::query(&format!(
            "SELECT {TURN_COLUMNS} FROM conversation_turn
             WHERE thread_id = ? ORDER BY sequence_index {direction}"
        ))
        .bind(thread_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_turn).collect()
    }

    async fn recent(
        &self,
        thread_id: &ThreadId,
        limit: usize,
    ) -> Result<Vec<Turn>, RepositoryError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            "SELECT {TURN_COLUMNS} FROM conversation_turn
             WHERE thread_id = ? ORDER BY sequence_index DESC LIMIT ?"
        ))
        .bind(thread_id.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_turn).collect()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use pedido_core::domain::client::{ClientId, SenderIdentity};
    use pedido_core::domain::conversation::{
        find_pending_order, AttachedDraft, DraftLookup, HistoryOrder, NewTurn, ThreadId, TurnEvent,
        ORDER_CONFIRMATION_MARKER,
    };
    use pedido_core::domain::order::{OrderDraft, OrderItem};
    use pedido_core::domain::product::ProductId;

    use super::SqlConversationRepository;
    use crate::repositories::ConversationRepository;
    use crate::{connect_with_settings, migrations};

    async fn repository() -> SqlConversationRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlConversationRepository::new(pool)
    }

    fn identity() -> SenderIdentity {
        SenderIdentity::new("5491155550000@chat", Some("5491155550000".to_string()))
    }

    #[tokio::test]
    async fn unknown_thread_has_empty_history() {
        let repo = repository().await;
        let history = repo
            .history(&ThreadId("nobody".to_string()), HistoryOrder::OldestFirst)
            .await
            .expect("history");
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn sequence_indexes_increase_per_thread() {
        let repo = repository().await;
        let thread = ThreadId::from(&identity());
        let other = ThreadId("someone-else".to_string());

        for text in ["hola", "precios", "gracias"] {
            repo.append(&thread, NewTurn::user(text, &identity())).await.expect("append");
        }
        repo.append(&other, NewTurn::user("hi", &identity())).await.expect("append other");

        let oldest_first =
            repo.history(&thread, HistoryOrder::OldestFirst).await.expect("history");
        let indexes = oldest_first.iter().map(|turn| turn.sequence_index).collect::<Vec<_>>();
        assert_eq!(indexes, vec![1, 2, 3]);
        assert_eq!(oldest_first[0].text, "hola");

        let newest_first =
            repo.history(&thread, HistoryOrder::NewestFirst).await.expect("history");
        assert_eq!(newest_first[0].text, "gracias");

        let other_history = repo.history(&other, HistoryOrder::OldestFirst).await.expect("other");
        assert_eq!(other_history.len(), 1);
        assert_eq!(other_history[0].sequence_index, 1);
    }

    #[tokio::test]
    async fn attached_draft_and_event_survive_storage() {
        let repo = repository().await;
        let thread = ThreadId::from(&identity());
        let draft = OrderDraft::new(
            ClientId(3),
            vec![OrderItem {
                product_id: ProductId(1),
                price_per_unit: Decimal::new(105050, 2),
                quantity: 2,
            }],
        )
        .expect("draft");

        repo.append(
            &thread,
            NewTurn::assistant(format!("summary\n{ORDER_CONFIRMATION_MARKER}"), &identity())
                .with_draft(AttachedDraft::Order(draft.clone()))
                .with_event(TurnEvent::OrderProposed),
        )
        .await
        .expect("append proposal");
        repo.append(&thread, NewTurn::user("dale", &identity())).await.expect("append user");

        let recent = repo.recent(&thread, 10).await.expect("recent");
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].event(), Some(TurnEvent::OrderProposed));
        assert_eq!(recent[1].metadata.phone_number.as_deref(), Some("5491155550000"));
        assert_eq!(find_pending_order(&recent, 10), DraftLookup::Pending { draft, proposed_at: 1 });

        let limited = repo.recent(&thread, 1).await.expect("recent limited");
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].sequence_index, 2);
    }
}
