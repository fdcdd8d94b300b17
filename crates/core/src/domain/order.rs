use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::client::ClientId;
use crate::domain::conversation::ThreadId;
use crate::domain::product::ProductId;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub i64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub price_per_unit: Decimal,
    pub quantity: u32,
}

impl OrderItem {
    pub fn line_total(&self) -> Decimal {
        self.price_per_unit * Decimal::from(self.quantity)
    }
}

/// An order proposed to the customer but not yet committed.
///
/// Prices are captured when the draft is built and travel unchanged into
/// submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDraft {
    pub client_id: ClientId,
    pub items: Vec<OrderItem>,
}

impl OrderDraft {
    pub fn new(client_id: ClientId, items: Vec<OrderItem>) -> Result<Self, DomainError> {
        if items.is_empty() {
            return Err(DomainError::InvariantViolation(
                "an order draft needs at least one item".to_string(),
            ));
        }
        if let Some(item) = items.iter().find(|item| item.quantity == 0) {
            return Err(DomainError::InvariantViolation(format!(
                "product {} has a non-positive quantity",
                item.product_id
            )));
        }

        Ok(Self { client_id, items })
    }

    pub fn total(&self) -> Decimal {
        self.items.iter().map(OrderItem::line_total).sum()
    }
}

/// The assistant turn that proposed a draft. An order is created at most
/// once per proposal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProposalRef {
    pub thread_id: ThreadId,
    pub sequence_index: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub client_id: ClientId,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn total(&self) -> Decimal {
        self.items.iter().map(OrderItem::line_total).sum()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use crate::domain::client::ClientId;
    use crate::domain::product::ProductId;
    use crate::errors::DomainError;

    use super::{OrderDraft, OrderItem};

    fn item(product_id: i64, price: i64, quantity: u32) -> OrderItem {
        OrderItem {
            product_id: ProductId(product_id),
            price_per_unit: Decimal::from(price),
            quantity,
        }
    }

    #[test]
    fn draft_total_sums_line_totals() {
        let draft = OrderDraft::new(ClientId(7), vec![item(1, 1000, 2), item(2, 800, 1)])
            .expect("valid draft");
        assert_eq!(draft.total(), Decimal::from(2800));
    }

    #[test]
    fn empty_draft_is_rejected() {
        let error = OrderDraft::new(ClientId(7), Vec::new()).expect_err("empty draft");
        assert!(matches!(error, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let error =
            OrderDraft::new(ClientId(7), vec![item(1, 1000, 0)]).expect_err("zero quantity");
        assert!(error.to_string().contains("product 1"));
    }
}
