//! One handler per actionable intent.
//!
//! Handlers return the assistant turns to append, or a [`TurnFailure`] that
//! the router turns into a single reply. They never hold state between
//! messages: pending drafts are recovered from the conversation log.

use std::sync::Arc;

use pedido_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use pedido_core::orders::{render, QuantityError};
use pedido_core::{
    AttachedDraft, Catalog, Client, DraftLookup, Intent, MoneyFormat, NewTurn, ProposalRef,
    SenderIdentity, ThreadId, TurnEvent, TurnFailure,
};
use pedido_db::repositories::{
    ClientRepository, OrderRepository, ProductRepository, RepositoryError,
};

use crate::conversation::ConversationLog;
use crate::extract::{OrderExtraction, StructuredExtractor};

const NO_ITEMS_MESSAGE: &str =
    "I couldn't find any products in your message. Ask for the price list to see what we sell.";
const BAD_QUANTITY_MESSAGE: &str = "Quantities must be whole numbers greater than zero.";
const UNCLEAR_ORDER_MESSAGE: &str = "I couldn't tell which products you want. Could you list them \
                                     with their quantities?";

#[derive(Clone)]
pub struct HandlerDeps {
    pub products: Arc<dyn ProductRepository>,
    pub clients: Arc<dyn ClientRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub conversation: ConversationLog,
    pub audit: Arc<dyn AuditSink>,
    pub money: MoneyFormat,
}

/// What a handler knows about the message it is answering.
pub struct TurnContext<'a> {
    pub thread_id: &'a ThreadId,
    pub identity: &'a SenderIdentity,
    pub text: &'a str,
    pub audit: &'a AuditContext,
}

pub struct Handlers {
    deps: HandlerDeps,
    extractor: StructuredExtractor,
}

fn storage(error: RepositoryError) -> TurnFailure {
    TurnFailure::Storage(error.to_string())
}

impl Handlers {
    pub fn new(deps: HandlerDeps, extractor: StructuredExtractor) -> Self {
        Self { deps, extractor }
    }

    /// `NotRelated` has no handler; the router answers it directly.
    pub async fn dispatch(
        &self,
        intent: Intent,
        ctx: &TurnContext<'_>,
    ) -> Result<Vec<NewTurn>, TurnFailure> {
        match intent {
            Intent::ListPrices => self.list_prices(ctx).await,
            Intent::ListOrders => self.list_orders(ctx).await,
            Intent::RegisterClient => self.register_client(ctx).await,
            Intent::PlaceOrder => self.place_order(ctx).await,
            Intent::ConfirmOrder => self.confirm_order(ctx).await,
            Intent::CancelOrder => self.cancel_order(ctx).await,
            Intent::NotRelated => Err(TurnFailure::Classification(
                "not_related has no handler".to_string(),
            )),
        }
    }

    async fn catalog(&self) -> Result<Catalog, TurnFailure> {
        Ok(Catalog::new(self.deps.products.list_products().await.map_err(storage)?))
    }

    async fn registered_client(&self, identity: &SenderIdentity) -> Result<Option<Client>, TurnFailure> {
        self.deps
            .clients
            .find_by_identity(&identity.sender_id, identity.phone())
            .await
            .map_err(storage)
    }

    fn reply(&self, ctx: &TurnContext<'_>, text: impl Into<String>) -> NewTurn {
        NewTurn::assistant(text, ctx.identity)
    }

    pub async fn list_prices(&self, ctx: &TurnContext<'_>) -> Result<Vec<NewTurn>, TurnFailure> {
        let catalog = self.catalog().await?;
        Ok(vec![self.reply(ctx, render::price_list(&catalog, &self.deps.money))])
    }

    /// Only the sender's own orders are listed.
    pub async fn list_orders(&self, ctx: &TurnContext<'_>) -> Result<Vec<NewTurn>, TurnFailure> {
        let Some(client) = self.registered_client(ctx.identity).await? else {
            return Ok(vec![self.reply(ctx, render::REGISTRATION_REQUIRED_MESSAGE)]);
        };

        let orders = self.deps.orders.list_for_client(client.id).await.map_err(storage)?;
        let catalog = self.catalog().await?;
        Ok(vec![self.reply(ctx, render::order_list(&orders, &catalog, &self.deps.money))])
    }

    pub async fn register_client(&self, ctx: &TurnContext<'_>) -> Result<Vec<NewTurn>, TurnFailure> {
        if let Some(existing) = self.registered_client(ctx.identity).await? {
            return Ok(vec![self
                .reply(ctx, render::client_already_registered(&existing))
                .with_event(TurnEvent::ClientRegistered)]);
        }

        let extracted = self
            .extractor
            .client_fields(ctx.text)
            .await
            .map_err(|error| error.into_failure("registration"))?;
        let pending =
            self.deps.conversation.pending_client_draft(ctx.thread_id).await.map_err(storage)?;
        let merged = match pending {
            Some(earlier) => extracted.merged_over(&earlier),
            None => extracted,
        };

        let missing = merged.missing_fields();
        if !missing.is_empty() {
            return Ok(vec![self
                .reply(ctx, render::missing_client_fields(&missing))
                .with_draft(AttachedDraft::Client(merged))]);
        }

        let Some(new_client) = merged.complete(ctx.identity) else {
            return Err(TurnFailure::Validation(render::PHONE_REQUIRED_MESSAGE.to_string()));
        };

        let (client, created) =
            self.deps.clients.create_or_get(new_client).await.map_err(storage)?;
        self.deps.audit.emit(
            ctx.audit
                .event("client.registered", AuditCategory::Registration, AuditOutcome::Success)
                .with_metadata("client_id", client.id.to_string())
                .with_metadata("created", created.to_string()),
        );
        tracing::info!(
            event_name = "client.registered",
            client_id = %client.id,
            created,
            "client registration completed"
        );

        let text = if created {
            render::client_registered(&client)
        } else {
            render::client_already_registered(&client)
        };
        Ok(vec![self.reply(ctx, text).with_event(TurnEvent::ClientRegistered)])
    }

    pub async fn place_order(&self, ctx: &TurnContext<'_>) -> Result<Vec<NewTurn>, TurnFailure> {
        if ctx.identity.phone().is_none() {
            return Err(TurnFailure::Validation(render::PHONE_REQUIRED_MESSAGE.to_string()));
        }
        let Some(client) = self.registered_client(ctx.identity).await? else {
            return Ok(vec![self.reply(ctx, render::REGISTRATION_REQUIRED_MESSAGE)]);
        };

        let catalog = self.catalog().await?;
        let extraction = self
            .extractor
            .order_items(ctx.text, &catalog)
            .await
            .map_err(|error| error.into_failure("order"))?;

        let requested = match extraction {
            OrderExtraction::Rejected { message } | OrderExtraction::Ambiguous { message } => {
                self.deps.audit.emit(
                    ctx.audit
                        .event("order.not_extracted", AuditCategory::Ordering, AuditOutcome::Rejected)
                        .with_metadata("reason", message.clone()),
                );
                let text = if message.is_empty() { UNCLEAR_ORDER_MESSAGE.to_string() } else { message };
                return Ok(vec![self.reply(ctx, text)]);
            }
            OrderExtraction::Items(items) if items.is_empty() => {
                return Err(TurnFailure::Validation(NO_ITEMS_MESSAGE.to_string()));
            }
            OrderExtraction::Items(items) => items,
        };

        let resolved = catalog.resolve(&requested).map_err(|error| {
            TurnFailure::Validation(match error {
                QuantityError::NotPositive { .. } => BAD_QUANTITY_MESSAGE.to_string(),
                QuantityError::OutOfRange { product_id, quantity } => format!(
                    "{quantity} is more than we can take of {}. Each product can be ordered \
                     up to {} units.",
                    catalog.product_name(&product_id),
                    u32::MAX
                ),
            })
        })?;
        if !resolved.unresolved.is_empty() {
            let ids = resolved.unresolved.iter().map(ToString::to_string).collect::<Vec<_>>();
            return Err(TurnFailure::Validation(format!(
                "These products are not in our catalog: {}. Ask for the price list to see what we sell.",
                ids.join(", ")
            )));
        }
        let draft = resolved
            .into_draft(client.id)
            .map_err(|error| TurnFailure::Validation(error.to_string()))?;

        self.deps.audit.emit(
            ctx.audit
                .event("order.proposed", AuditCategory::Ordering, AuditOutcome::Success)
                .with_metadata("client_id", client.id.to_string())
                .with_metadata("lines", draft.items.len().to_string())
                .with_metadata("total", draft.total().to_string()),
        );

        let summary = render::draft_summary(&draft, &catalog, &self.deps.money);
        Ok(vec![self
            .reply(ctx, summary)
            .with_draft(AttachedDraft::Order(draft))
            .with_event(TurnEvent::OrderProposed)])
    }

    /// Submits the pending proposal. Submission is keyed by the proposal turn,
    /// so confirming a proposal whose confirmation turn was never stored
    /// returns the existing order. A failed submission leaves the proposal
    /// pending so the customer can retry.
    pub async fn confirm_order(&self, ctx: &TurnContext<'_>) -> Result<Vec<NewTurn>, TurnFailure> {
        let (draft, proposal) =
            match self.deps.conversation.pending_order(ctx.thread_id).await.map_err(storage)? {
                DraftLookup::Pending { draft, proposed_at } => (
                    draft,
                    ProposalRef { thread_id: ctx.thread_id.clone(), sequence_index: proposed_at },
                ),
                DraftLookup::Settled { .. } | DraftLookup::NoProposal => {
                    return Err(TurnFailure::NotFound(
                        render::NO_PENDING_ORDER_MESSAGE.to_string(),
                    ));
                }
            };

        match self.deps.orders.submit(&proposal, &draft).await {
            Ok((order, created)) => {
                let event_name = if created { "order.submitted" } else { "order.already_submitted" };
                self.deps.audit.emit(
                    ctx.audit
                        .event(event_name, AuditCategory::Ordering, AuditOutcome::Success)
                        .with_order(order.id)
                        .with_metadata("proposal_index", proposal.sequence_index.to_string())
                        .with_metadata("total", order.total().to_string()),
                );
                tracing::info!(
                    event_name,
                    order_id = %order.id,
                    client_id = %order.client_id,
                    proposal_index = proposal.sequence_index,
                    "order submitted"
                );
                Ok(vec![self
                    .reply(ctx, render::order_confirmed(&order, &self.deps.money))
                    .with_event(TurnEvent::OrderConfirmed)
                    .with_order_id(order.id)])
            }
            Err(error) => {
                self.deps.audit.emit(
                    ctx.audit
                        .event("order.submission_failed", AuditCategory::Ordering, AuditOutcome::Failed)
                        .with_metadata("error", error.to_string()),
                );
                Err(TurnFailure::Submission(error.to_string()))
            }
        }
    }

    pub async fn cancel_order(&self, ctx: &TurnContext<'_>) -> Result<Vec<NewTurn>, TurnFailure> {
        self.deps.audit.emit(ctx.audit.event(
            "order.cancelled",
            AuditCategory::Ordering,
            AuditOutcome::Success,
        ));
        Ok(vec![self
            .reply(ctx, render::ORDER_CANCELLED_MESSAGE)
            .with_event(TurnEvent::OrderCancelled)])
    }
}
