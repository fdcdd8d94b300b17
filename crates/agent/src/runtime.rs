use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::Instrument;

use pedido_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use pedido_core::errors::NOT_UNDERSTOOD_MESSAGE;
use pedido_core::flows::{FlowEngine, FlowEvent, FlowState, TurnRoutingFlow};
use pedido_core::{Intent, NewTurn, SenderIdentity, ThreadId, Turn, TurnFailure};

use crate::classifier::IntentClassifier;
use crate::conversation::ConversationLog;
use crate::extract::StructuredExtractor;
use crate::handlers::{HandlerDeps, Handlers, TurnContext};
use crate::llm::NluEngine;

const ACTOR: &str = "turn-router";

#[derive(Clone, Debug)]
pub struct IncomingMessage {
    pub correlation_id: String,
    pub identity: SenderIdentity,
    pub text: String,
}

#[derive(Clone, Debug)]
pub struct TurnOutcome {
    pub thread_id: ThreadId,
    pub intent: Option<Intent>,
    pub reply: String,
    /// Assistant turns persisted for this message.
    pub turns: Vec<Turn>,
}

/// Turn router: classify, dispatch to one handler, persist the replies.
///
/// Messages from the same sender are handled one at a time; different
/// senders proceed concurrently.
pub struct AgentRuntime {
    engine: FlowEngine<TurnRoutingFlow>,
    classifier: IntentClassifier,
    handlers: Handlers,
    conversation: ConversationLog,
    audit: Arc<dyn AuditSink>,
    thread_locks: Mutex<HashMap<ThreadId, Arc<tokio::sync::Mutex<()>>>>,
}

impl AgentRuntime {
    pub fn new(nlu: Arc<dyn NluEngine>, deps: HandlerDeps, nlu_deadline: Duration) -> Self {
        let conversation = deps.conversation.clone();
        let audit = deps.audit.clone();
        Self {
            engine: FlowEngine::default(),
            classifier: IntentClassifier::new(nlu.clone(), nlu_deadline),
            handlers: Handlers::new(deps, StructuredExtractor::new(nlu, nlu_deadline)),
            conversation,
            audit,
            thread_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Never fails: every error ends up as a reply to the sender.
    pub async fn handle_message(&self, message: IncomingMessage) -> TurnOutcome {
        let thread_id = ThreadId::from(&message.identity);
        let span = tracing::info_span!(
            "turn",
            thread_id = %thread_id,
            correlation_id = %message.correlation_id
        );

        let lock = self.thread_lock(&thread_id);
        let outcome = {
            let _guard = lock.lock().await;
            self.route(thread_id.clone(), message).instrument(span).await
        };
        drop(lock);
        self.release_thread_lock(&thread_id);
        outcome
    }

    async fn route(&self, thread_id: ThreadId, message: IncomingMessage) -> TurnOutcome {
        let audit = AuditContext::new(
            Some(thread_id.to_string()),
            message.correlation_id.clone(),
            ACTOR,
        );
        self.audit.emit(audit.event("message.received", AuditCategory::Ingress, AuditOutcome::Success));

        if let Err(error) = self
            .conversation
            .append(&thread_id, NewTurn::user(message.text.clone(), &message.identity))
            .await
        {
            let failure = TurnFailure::Storage(error.to_string());
            self.record_failure(&audit, &failure);
            return TurnOutcome { thread_id, intent: None, reply: failure.user_message(), turns: Vec::new() };
        }

        let mut state = self.advance(FlowState::Start, FlowEvent::MessageReceived, &audit);
        let (intent, event) = match self.classifier.classify(&message.text).await {
            Ok(intent) => {
                self.audit.emit(
                    audit
                        .event("router.classified", AuditCategory::Routing, AuditOutcome::Success)
                        .with_metadata("intent", intent.label()),
                );
                (Some(intent), FlowEvent::Classified(intent))
            }
            Err(failure) => {
                self.record_failure(&audit, &failure);
                (None, FlowEvent::ClassificationFailed)
            }
        };
        state = self.advance(state, event, &audit);

        let replies = match intent.filter(|_| state.is_dispatch()) {
            Some(intent) => {
                self.audit.emit(
                    audit
                        .event("router.dispatched", AuditCategory::Routing, AuditOutcome::Success)
                        .with_metadata("intent", intent.label()),
                );
                tracing::info!(event_name = "router.dispatched", intent = intent.label(), "dispatching turn");

                let ctx = TurnContext {
                    thread_id: &thread_id,
                    identity: &message.identity,
                    text: &message.text,
                    audit: &audit,
                };
                let result = self.handlers.dispatch(intent, &ctx).await;
                self.advance(state, FlowEvent::HandlerCompleted, &audit);
                match result {
                    Ok(replies) if !replies.is_empty() => replies,
                    Ok(_) => vec![NewTurn::assistant(NOT_UNDERSTOOD_MESSAGE, &message.identity)],
                    Err(failure) => {
                        self.record_failure(&audit, &failure);
                        vec![NewTurn::assistant(failure.user_message(), &message.identity)]
                    }
                }
            }
            None => vec![NewTurn::assistant(NOT_UNDERSTOOD_MESSAGE, &message.identity)],
        };

        let reply = replies.last().map(|turn| turn.text.clone()).unwrap_or_default();
        let mut turns = Vec::with_capacity(replies.len());
        for new_turn in replies {
            match self.conversation.append(&thread_id, new_turn).await {
                Ok(turn) => turns.push(turn),
                Err(error) => {
                    self.record_failure(&audit, &TurnFailure::Storage(error.to_string()));
                    break;
                }
            }
        }

        TurnOutcome { thread_id, intent, reply, turns }
    }

    /// An invalid transition is a wiring bug; the turn still ends.
    fn advance(&self, current: FlowState, event: FlowEvent, audit: &AuditContext) -> FlowState {
        match self.engine.apply_with_audit(&current, &event, self.audit.as_ref(), audit) {
            Ok(outcome) => outcome.to,
            Err(error) => {
                tracing::error!(event_name = "router.invalid_transition", error = %error, "turn routing failed");
                FlowState::End
            }
        }
    }

    fn record_failure(&self, audit: &AuditContext, failure: &TurnFailure) {
        tracing::warn!(
            event_name = "turn.failed",
            kind = failure.kind(),
            error = %failure,
            "turn handled with a fallback reply"
        );
        self.audit.emit(
            audit
                .event("turn.failed", AuditCategory::Routing, AuditOutcome::Failed)
                .with_metadata("kind", failure.kind())
                .with_metadata("detail", failure.to_string()),
        );
    }

    fn thread_lock(&self, thread_id: &ThreadId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.thread_locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(thread_id.clone()).or_default().clone()
    }

    fn release_thread_lock(&self, thread_id: &ThreadId) {
        let mut locks = match self.thread_locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        if locks.get(thread_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(thread_id);
        }
    }

    #[cfg(test)]
    fn tracked_threads(&self) -> usize {
        match self.thread_locks.lock() {
            Ok(locks) => locks.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}
