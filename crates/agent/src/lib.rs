//! Conversational order intake.
//!
//! Every inbound message is one pass through the turn router:
//! 1. **Classification** (`classifier`) maps the utterance to an [`Intent`].
//! 2. **Dispatch** (`runtime`) picks exactly one handler for that intent.
//! 3. **Handlers** (`handlers`) read the catalog, clients, orders and the
//!    conversation history, and answer with assistant turns.
//!
//! The NLU engine only translates text into labels and structured drafts.
//! Prices, totals and order submission are decided here, never by the model.
//!
//! [`Intent`]: pedido_core::Intent

pub mod classifier;
pub mod conversation;
pub mod extract;
pub mod handlers;
pub mod llm;
pub mod profiles;
pub mod runtime;

pub use classifier::IntentClassifier;
pub use conversation::ConversationLog;
pub use extract::{OrderExtraction, StructuredExtractor};
pub use handlers::{HandlerDeps, Handlers};
pub use llm::{HttpNluEngine, NluEngine, NluError, ScriptedNlu};
pub use profiles::InstructionProfile;
pub use runtime::{AgentRuntime, IncomingMessage, TurnOutcome};
