use serde::{Deserialize, Serialize};

use crate::domain::intent::Intent;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowType {
    TurnRouting,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowState {
    Start,
    Classifying,
    ListPrices,
    ListOrders,
    RegisterClient,
    PlaceOrder,
    ConfirmOrder,
    CancelOrder,
    End,
}

impl FlowState {
    pub fn is_dispatch(&self) -> bool {
        !matches!(self, Self::Start | Self::Classifying | Self::End)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Classifying => "classifying",
            Self::ListPrices => "list_prices",
            Self::ListOrders => "list_orders",
            Self::RegisterClient => "register_client",
            Self::PlaceOrder => "place_order",
            Self::ConfirmOrder => "confirm_order",
            Self::CancelOrder => "cancel_order",
            Self::End => "end",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    MessageReceived,
    Classified(Intent),
    ClassificationFailed,
    HandlerCompleted,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    ClassifyUtterance,
    InvokeHandler,
    RespondNotUnderstood,
    PersistReplies,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: FlowState,
    pub to: FlowState,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
}
