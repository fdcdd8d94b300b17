use async_trait::async_trait;
use thiserror::Error;

use pedido_core::audit::AuditEvent;
use pedido_core::domain::client::{Client, NewClient};
use pedido_core::domain::conversation::{HistoryOrder, NewTurn, ThreadId, Turn};
use pedido_core::domain::order::{Order, OrderDraft, ProposalRef};
use pedido_core::domain::product::Product;
use pedido_core::ClientId;

pub mod audit;
pub mod client;
pub mod conversation;
pub mod memory;
pub mod order;
pub mod product;

pub use audit::{SqlAuditEventRepository, SqlAuditSink};
pub use client::SqlClientRepository;
pub use conversation::SqlConversationRepository;
pub use memory::{
    InMemoryAuditEventRepository, InMemoryClientRepository, InMemoryConversationRepository,
    InMemoryOrderRepository, InMemoryProductRepository,
};
pub use order::SqlOrderRepository;
pub use product::SqlProductRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

impl RepositoryError {
    /// Maps constraint violations to `Conflict`, leaving other errors as-is.
    pub(crate) fn from_write(error: sqlx::Error, what: &str) -> Self {
        if let sqlx::Error::Database(database_error) = &error {
            if database_error.is_unique_violation() {
                return Self::Conflict(format!("{what} already exists"));
            }
            if database_error.is_foreign_key_violation() {
                return Self::Conflict(format!("{what} references a missing record"));
            }
        }
        Self::Database(error)
    }
}

pub(crate) fn decode_err(error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

/// Append-only, per-thread ordered turn history.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Assigns the next sequence index for `thread_id` and stores the turn.
    async fn append(&self, thread_id: &ThreadId, turn: NewTurn) -> Result<Turn, RepositoryError>;

    /// Full history; an unknown thread yields an empty list.
    async fn history(
        &self,
        thread_id: &ThreadId,
        order: HistoryOrder,
    ) -> Result<Vec<Turn>, RepositoryError>;

    /// The newest `limit` turns, newest first.
    async fn recent(&self, thread_id: &ThreadId, limit: usize)
        -> Result<Vec<Turn>, RepositoryError>;
}

#[async_trait]
pub trait ClientRepository: Send + Sync {
    /// Looks up by sender id first, then by phone.
    async fn find_by_identity(
        &self,
        sender_id: &str,
        phone: Option<&str>,
    ) -> Result<Option<Client>, RepositoryError>;

    /// Creates the client unless `(phone, sender_id)` is taken; the flag is
    /// `true` only when a row was inserted.
    async fn create_or_get(&self, client: NewClient) -> Result<(Client, bool), RepositoryError>;
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn list_products(&self) -> Result<Vec<Product>, RepositoryError>;
    async fn upsert(&self, product: Product) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Creates the order for `proposal` unless one exists; the flag is
    /// `true` only when a row was inserted.
    async fn submit(
        &self,
        proposal: &ProposalRef,
        draft: &OrderDraft,
    ) -> Result<(Order, bool), RepositoryError>;
    async fn list_for_client(&self, client_id: ClientId) -> Result<Vec<Order>, RepositoryError>;
}

#[async_trait]
pub trait AuditEventRepository: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<(), RepositoryError>;
    async fn list_for_thread(&self, thread_id: &str) -> Result<Vec<AuditEvent>, RepositoryError>;
}
