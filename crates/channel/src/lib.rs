//! Messaging channel interface.
//!
//! - **Events** (`events`) - inbound messages, channel-level filters, and the
//!   `ConversationService` seam the core plugs into.
//! - **Runner** (`runner`) - transport loop with reconnection, acknowledgement,
//!   per-sender ordered queues and reply delivery.
//!
//! ```text
//! Transport → ChannelRunner → per-sender queue → ConversationService → reply → Transport
//! ```

pub mod events;
pub mod runner;

pub use events::{
    ChannelEnvelope, ChannelEvent, ChannelReply, ChatKind, ConversationService, EventContext,
    IgnoreReason, InboundMessage,
};
pub use runner::{ChannelRunner, ChannelTransport, NoopChannelTransport, ReconnectPolicy, TransportError};
