use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use pedido_core::audit::AuditEvent;
use pedido_core::domain::client::{Client, ClientId, NewClient};
use pedido_core::domain::conversation::{HistoryOrder, NewTurn, ThreadId, Turn};
use pedido_core::domain::order::{Order, OrderDraft, OrderId, ProposalRef};
use pedido_core::domain::product::{Product, ProductId};

use super::{
    AuditEventRepository, ClientRepository, ConversationRepository, OrderRepository,
    ProductRepository, RepositoryError,
};

#[derive(Default)]
pub struct InMemoryConversationRepository {
    threads: RwLock<HashMap<ThreadId, Vec<Turn>>>,
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn append(&self, thread_id: &ThreadId, turn: NewTurn) -> Result<Turn, RepositoryError> {
        let mut threads = self.threads.write().await;
        let turns = threads.entry(thread_id.clone()).or_default();
        let next_index = turns.last().map(|last| last.sequence_index + 1).unwrap_or(1);
        let stored = Turn::from_new(thread_id.clone(), next_index, turn);
        turns.push(stored.clone());
        Ok(stored)
    }

    async fn history(
        &self,
        thread_id: &ThreadId,
        order: HistoryOrder,
    ) -> Result<Vec<Turn>, RepositoryError> {
        let threads = self.threads.read().await;
        let mut turns = threads.get(thread_id).cloned().unwrap_or_default();
        if order == HistoryOrder::NewestFirst {
            turns.reverse();
        }
        Ok(turns)
    }

    async fn recent(
        &self,
        thread_id: &ThreadId,
        limit: usize,
    ) -> Result<Vec<Turn>, RepositoryError> {
        let threads = self.threads.read().await;
        Ok(threads
            .get(thread_id)
            .map(|turns| turns.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct InMemoryClientRepository {
    clients: RwLock<Vec<Client>>,
}

impl InMemoryClientRepository {
    pub async fn count(&self) -> usize {
        self.clients.read().await.len()
    }
}

#[async_trait::async_trait]
impl ClientRepository for InMemoryClientRepository {
    async fn find_by_identity(
        &self,
        sender_id: &str,
        phone: Option<&str>,
    ) -> Result<Option<Client>, RepositoryError> {
        let clients = self.clients.read().await;
        let by_sender = clients.iter().find(|client| client.sender_id == sender_id);
        let by_phone =
            || phone.and_then(|phone| clients.iter().find(|client| client.phone == phone));
        Ok(by_sender.or_else(by_phone).cloned())
    }

    async fn create_or_get(&self, client: NewClient) -> Result<(Client, bool), RepositoryError> {
        // The write lock makes find-then-insert atomic, like the unique index.
        let mut clients = self.clients.write().await;
        if let Some(existing) = clients
            .iter()
            .find(|stored| stored.phone == client.phone && stored.sender_id == client.sender_id)
        {
            return Ok((existing.clone(), false));
        }

        let created = Client {
            id: ClientId(clients.len() as i64 + 1),
            name: client.name,
            local_name: client.local_name,
            address: client.address,
            phone: client.phone,
            sender_id: client.sender_id,
            created_at: Utc::now(),
        };
        clients.push(created.clone());
        Ok((created, true))
    }
}

#[derive(Default)]
pub struct InMemoryProductRepository {
    products: RwLock<HashMap<ProductId, Product>>,
}

impl InMemoryProductRepository {
    pub fn with_products(products: Vec<Product>) -> Self {
        Self {
            products: RwLock::new(
                products.into_iter().map(|product| (product.id, product)).collect(),
            ),
        }
    }
}

#[async_trait::async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn list_products(&self) -> Result<Vec<Product>, RepositoryError> {
        let products = self.products.read().await;
        let mut listed = products.values().cloned().collect::<Vec<_>>();
        listed.sort_by_key(|product| product.id);
        Ok(listed)
    }

    async fn upsert(&self, product: Product) -> Result<(), RepositoryError> {
        let mut products = self.products.write().await;
        products.insert(product.id, product);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<Vec<Order>>,
    by_proposal: RwLock<HashMap<ProposalRef, OrderId>>,
}

impl InMemoryOrderRepository {
    pub async fn submitted(&self) -> Vec<Order> {
        self.orders.read().await.clone()
    }
}

#[async_trait::async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn submit(
        &self,
        proposal: &ProposalRef,
        draft: &OrderDraft,
    ) -> Result<(Order, bool), RepositoryError> {
        let mut by_proposal = self.by_proposal.write().await;
        let mut orders = self.orders.write().await;
        if let Some(existing) = by_proposal
            .get(proposal)
            .and_then(|id| orders.iter().find(|order| order.id == *id))
        {
            return Ok((existing.clone(), false));
        }

        let order = Order {
            id: OrderId(orders.len() as i64 + 1),
            client_id: draft.client_id,
            items: draft.items.clone(),
            created_at: Utc::now(),
        };
        by_proposal.insert(proposal.clone(), order.id);
        orders.push(order.clone());
        Ok((order, true))
    }

    async fn list_for_client(&self, client_id: ClientId) -> Result<Vec<Order>, RepositoryError> {
        let orders = self.orders.read().await;
        Ok(orders.iter().filter(|order| order.client_id == client_id).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryAuditEventRepository {
    events: RwLock<Vec<AuditEvent>>,
}

#[async_trait::async_trait]
impl AuditEventRepository for InMemoryAuditEventRepository {
    async fn record(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn list_for_thread(&self, thread_id: &str) -> Result<Vec<AuditEvent>, RepositoryError> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|event| event.thread_id.as_deref() == Some(thread_id))
            .cloned()
            .collect())
    }
}
