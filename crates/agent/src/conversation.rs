use std::sync::Arc;

use pedido_core::domain::conversation::{find_pending_client_draft, find_pending_order};
use pedido_core::{ClientDraft, DraftLookup, NewTurn, ThreadId, Turn};
use pedido_db::repositories::{ConversationRepository, RepositoryError};

/// History access for one router, bounded by the recovery window.
#[derive(Clone)]
pub struct ConversationLog {
    repository: Arc<dyn ConversationRepository>,
    window: usize,
}

impl ConversationLog {
    pub fn new(repository: Arc<dyn ConversationRepository>, window: usize) -> Self {
        Self { repository, window: window.max(1) }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub async fn append(&self, thread_id: &ThreadId, turn: NewTurn) -> Result<Turn, RepositoryError> {
        self.repository.append(thread_id, turn).await
    }

    pub async fn pending_order(&self, thread_id: &ThreadId) -> Result<DraftLookup, RepositoryError> {
        let recent = self.repository.recent(thread_id, self.window).await?;
        Ok(find_pending_order(&recent, self.window))
    }

    pub async fn pending_client_draft(
        &self,
        thread_id: &ThreadId,
    ) -> Result<Option<ClientDraft>, RepositoryError> {
        let recent = self.repository.recent(thread_id, self.window).await?;
        Ok(find_pending_client_draft(&recent, self.window))
    }
}
