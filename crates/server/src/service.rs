use std::sync::Arc;

use async_trait::async_trait;

use pedido_agent::{AgentRuntime, IncomingMessage};
use pedido_channel::{ConversationService, EventContext, InboundMessage};
use pedido_core::SenderIdentity;

/// Plugs the turn router into the channel runner.
pub struct RouterService {
    runtime: Arc<AgentRuntime>,
}

impl RouterService {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl ConversationService for RouterService {
    async fn respond(&self, message: &InboundMessage, ctx: &EventContext) -> String {
        let identity =
            SenderIdentity::new(message.sender_id.clone(), message.phone().map(str::to_owned));
        let outcome = self
            .runtime
            .handle_message(IncomingMessage {
                correlation_id: ctx.correlation_id.clone(),
                identity,
                text: message.text.clone(),
            })
            .await;
        outcome.reply
    }
}
