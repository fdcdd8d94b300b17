pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod orders;

pub use domain::client::{Client, ClientDraft, ClientField, ClientId, NewClient, SenderIdentity};
pub use domain::conversation::{
    AttachedDraft, DraftLookup, HistoryOrder, NewTurn, Role, ThreadId, Turn, TurnEvent,
    TurnMetadata, ORDER_CONFIRMATION_MARKER,
};
pub use domain::intent::Intent;
pub use domain::order::{Order, OrderDraft, OrderId, OrderItem, ProposalRef};
pub use domain::product::{Product, ProductId};
pub use errors::{ApplicationError, DomainError, InterfaceError, TurnFailure};
pub use orders::{Catalog, MoneyFormat};
