//! Conversation turns and draft recovery.
//!
//! A conversation is the append-only list of turns exchanged with one sender.
//! Handlers never keep state between messages: an order proposal lives in the
//! assistant turn that showed it to the customer, and a later turn recovers it
//! by walking the history backwards until the first terminal event.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::client::{ClientDraft, SenderIdentity};
use crate::domain::order::{OrderDraft, OrderId};

/// Closing line of every order proposal. Recovery only accepts assistant
/// turns that carry both this phrase and an attached order draft.
pub const ORDER_CONFIRMATION_MARKER: &str =
    "Do you want to confirm this order? Reply \"confirm\" to place it or \"cancel\" to discard it.";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&SenderIdentity> for ThreadId {
    fn from(identity: &SenderIdentity) -> Self {
        Self(identity.sender_id.clone())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttachedDraft {
    Order(OrderDraft),
    Client(ClientDraft),
}

/// Marks an assistant turn as a step of the order or registration protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnEvent {
    OrderProposed,
    OrderConfirmed,
    OrderCancelled,
    ClientRegistered,
}

impl TurnEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderProposed => "order_proposed",
            Self::OrderConfirmed => "order_confirmed",
            Self::OrderCancelled => "order_cancelled",
            Self::ClientRegistered => "client_registered",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "order_proposed" => Some(Self::OrderProposed),
            "order_confirmed" => Some(Self::OrderConfirmed),
            "order_cancelled" => Some(Self::OrderCancelled),
            "client_registered" => Some(Self::ClientRegistered),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnMetadata {
    pub sender_id: String,
    pub phone_number: Option<String>,
    pub attached_draft: Option<AttachedDraft>,
    pub event: Option<TurnEvent>,
    pub order_id: Option<OrderId>,
}

impl TurnMetadata {
    pub fn for_sender(identity: &SenderIdentity) -> Self {
        Self {
            sender_id: identity.sender_id.clone(),
            phone_number: identity.phone_number.clone(),
            attached_draft: None,
            event: None,
            order_id: None,
        }
    }
}

/// A turn that has not been appended yet; the store assigns its index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTurn {
    pub role: Role,
    pub text: String,
    pub metadata: TurnMetadata,
}

impl NewTurn {
    pub fn user(text: impl Into<String>, identity: &SenderIdentity) -> Self {
        Self { role: Role::User, text: text.into(), metadata: TurnMetadata::for_sender(identity) }
    }

    pub fn assistant(text: impl Into<String>, identity: &SenderIdentity) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            metadata: TurnMetadata::for_sender(identity),
        }
    }

    pub fn with_draft(mut self, draft: AttachedDraft) -> Self {
        self.metadata.attached_draft = Some(draft);
        self
    }

    pub fn with_event(mut self, event: TurnEvent) -> Self {
        self.metadata.event = Some(event);
        self
    }

    pub fn with_order_id(mut self, order_id: OrderId) -> Self {
        self.metadata.order_id = Some(order_id);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub thread_id: ThreadId,
    pub sequence_index: u64,
    pub role: Role,
    pub text: String,
    pub metadata: TurnMetadata,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn from_new(thread_id: ThreadId, sequence_index: u64, turn: NewTurn) -> Self {
        Self {
            thread_id,
            sequence_index,
            role: turn.role,
            text: turn.text,
            metadata: turn.metadata,
            created_at: Utc::now(),
        }
    }

    pub fn event(&self) -> Option<TurnEvent> {
        self.metadata.event
    }

    /// The order draft proposed by this turn, if it is a well-formed proposal.
    pub fn order_proposal(&self) -> Option<&OrderDraft> {
        if self.role != Role::Assistant || !self.text.contains(ORDER_CONFIRMATION_MARKER) {
            return None;
        }
        match &self.metadata.attached_draft {
            Some(AttachedDraft::Order(draft)) => Some(draft),
            _ => None,
        }
    }

    pub fn client_draft(&self) -> Option<&ClientDraft> {
        if self.role != Role::Assistant {
            return None;
        }
        match &self.metadata.attached_draft {
            Some(AttachedDraft::Client(draft)) => Some(draft),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryOrder {
    OldestFirst,
    NewestFirst,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DraftLookup {
    /// The newest protocol turn is an unconsumed proposal.
    Pending { draft: OrderDraft, proposed_at: u64 },
    /// The newest protocol turn confirmed or cancelled an order.
    Settled { event: TurnEvent, at: u64 },
    NoProposal,
}

/// Walks `newest_first` (at most `window` turns) and stops at the first
/// terminal event: a proposal, a confirmation or a cancellation.
pub fn find_pending_order(newest_first: &[Turn], window: usize) -> DraftLookup {
    for turn in newest_first.iter().take(window) {
        if turn.role != Role::Assistant {
            continue;
        }

        if let Some(event @ (TurnEvent::OrderConfirmed | TurnEvent::OrderCancelled)) = turn.event()
        {
            return DraftLookup::Settled { event, at: turn.sequence_index };
        }

        if let Some(draft) = turn.order_proposal() {
            return DraftLookup::Pending { draft: draft.clone(), proposed_at: turn.sequence_index };
        }
    }

    DraftLookup::NoProposal
}

/// Most recent partial registration that has not been completed since.
pub fn find_pending_client_draft(newest_first: &[Turn], window: usize) -> Option<ClientDraft> {
    for turn in newest_first.iter().take(window) {
        if turn.event() == Some(TurnEvent::ClientRegistered) {
            return None;
        }
        if let Some(draft) = turn.client_draft() {
            return Some(draft.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use crate::domain::client::{ClientDraft, ClientId, SenderIdentity};
    use crate::domain::order::{OrderDraft, OrderItem};
    use crate::domain::product::ProductId;

    use super::{
        find_pending_client_draft, find_pending_order, AttachedDraft, DraftLookup, NewTurn, Role,
        ThreadId, Turn, TurnEvent, ORDER_CONFIRMATION_MARKER,
    };

    fn identity() -> SenderIdentity {
        SenderIdentity::new("sender-1", Some("+5491100".to_string()))
    }

    fn draft() -> OrderDraft {
        OrderDraft::new(
            ClientId(1),
            vec![OrderItem {
                product_id: ProductId(1),
                price_per_unit: Decimal::from(1000),
                quantity: 2,
            }],
        )
        .expect("valid draft")
    }

    fn proposal() -> NewTurn {
        NewTurn::assistant(format!("Order summary\n{ORDER_CONFIRMATION_MARKER}"), &identity())
            .with_draft(AttachedDraft::Order(draft()))
            .with_event(TurnEvent::OrderProposed)
    }

    /// Builds stored turns and returns them newest first.
    fn history(turns: Vec<NewTurn>) -> Vec<Turn> {
        let thread_id = ThreadId("sender-1".to_string());
        let mut stored = turns
            .into_iter()
            .enumerate()
            .map(|(index, turn)| Turn::from_new(thread_id.clone(), index as u64, turn))
            .collect::<Vec<_>>();
        stored.reverse();
        stored
    }

    #[test]
    fn empty_history_has_no_proposal() {
        assert_eq!(find_pending_order(&[], 50), DraftLookup::NoProposal);
    }

    #[test]
    fn latest_proposal_is_pending() {
        let turns = history(vec![
            NewTurn::user("2 cafes", &identity()),
            proposal(),
            NewTurn::user("what time do you open?", &identity()),
            NewTurn::assistant("Sorry, I did not understand that.", &identity()),
            NewTurn::user("confirm", &identity()),
        ]);

        assert_eq!(find_pending_order(&turns, 50), DraftLookup::Pending {
            draft: draft(),
            proposed_at: 1
        });
    }

    #[test]
    fn cancellation_after_proposal_settles_the_draft() {
        let turns = history(vec![
            proposal(),
            NewTurn::assistant("Order cancelled.", &identity()).with_event(TurnEvent::OrderCancelled),
            NewTurn::user("confirm", &identity()),
        ]);

        assert_eq!(find_pending_order(&turns, 50), DraftLookup::Settled {
            event: TurnEvent::OrderCancelled,
            at: 1
        });
    }

    #[test]
    fn confirmed_proposal_cannot_be_consumed_twice() {
        let turns = history(vec![
            proposal(),
            NewTurn::assistant("Order confirmed.", &identity()).with_event(TurnEvent::OrderConfirmed),
        ]);

        assert!(matches!(find_pending_order(&turns, 50), DraftLookup::Settled {
            event: TurnEvent::OrderConfirmed,
            ..
        }));
    }

    #[test]
    fn newer_proposal_after_cancellation_is_pending_again() {
        let turns = history(vec![
            proposal(),
            NewTurn::assistant("Order cancelled.", &identity()).with_event(TurnEvent::OrderCancelled),
            proposal(),
        ]);

        assert!(matches!(find_pending_order(&turns, 50), DraftLookup::Pending {
            proposed_at: 2,
            ..
        }));
    }

    #[test]
    fn draft_without_marker_phrase_is_not_a_proposal() {
        let turns = history(vec![NewTurn::assistant("Here is something", &identity())
            .with_draft(AttachedDraft::Order(draft()))]);
        assert_eq!(find_pending_order(&turns, 50), DraftLookup::NoProposal);
    }

    #[test]
    fn user_turn_quoting_the_marker_is_ignored() {
        let mut forged = NewTurn::user(ORDER_CONFIRMATION_MARKER, &identity());
        forged.metadata.attached_draft = Some(AttachedDraft::Order(draft()));
        assert_eq!(forged.role, Role::User);

        let turns = history(vec![forged]);
        assert_eq!(find_pending_order(&turns, 50), DraftLookup::NoProposal);
    }

    #[test]
    fn recovery_window_bounds_the_scan() {
        let mut turns = vec![proposal()];
        for index in 0..5 {
            turns.push(NewTurn::user(format!("noise {index}"), &identity()));
        }
        let turns = history(turns);

        assert_eq!(find_pending_order(&turns, 5), DraftLookup::NoProposal);
        assert!(matches!(find_pending_order(&turns, 6), DraftLookup::Pending { .. }));
    }

    #[test]
    fn pending_client_draft_stops_at_registration() {
        let partial = ClientDraft::new(Some("Ana".to_string()), None, None);
        let turns = history(vec![
            NewTurn::assistant("Please send your address", &identity())
                .with_draft(AttachedDraft::Client(partial.clone())),
        ]);
        assert_eq!(find_pending_client_draft(&turns, 50), Some(partial.clone()));

        let turns = history(vec![
            NewTurn::assistant("Please send your address", &identity())
                .with_draft(AttachedDraft::Client(partial)),
            NewTurn::assistant("Welcome!", &identity()).with_event(TurnEvent::ClientRegistered),
        ]);
        assert_eq!(find_pending_client_draft(&turns, 50), None);
    }
}
