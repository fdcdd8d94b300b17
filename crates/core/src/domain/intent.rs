use serde::{Deserialize, Serialize};

/// Closed classification of what a user turn asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    ListPrices,
    ListOrders,
    PlaceOrder,
    RegisterClient,
    ConfirmOrder,
    CancelOrder,
    NotRelated,
}

impl Intent {
    pub const ALL: [Intent; 7] = [
        Intent::ListPrices,
        Intent::ListOrders,
        Intent::PlaceOrder,
        Intent::RegisterClient,
        Intent::ConfirmOrder,
        Intent::CancelOrder,
        Intent::NotRelated,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::ListPrices => "list_prices",
            Self::ListOrders => "list_orders",
            Self::PlaceOrder => "place_order",
            Self::RegisterClient => "register_client",
            Self::ConfirmOrder => "confirm_order",
            Self::CancelOrder => "cancel_order",
            Self::NotRelated => "not_related",
        }
    }

    /// Exact label match; anything else is `NotRelated`.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        Self::ALL.into_iter().find(|intent| intent.label() == label).unwrap_or(Self::NotRelated)
    }
}
