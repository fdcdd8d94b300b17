use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::intent::Intent;
use crate::flows::states::{FlowAction, FlowEvent, FlowState, FlowType, TransitionOutcome};

pub trait FlowDefinition {
    fn flow_type(&self) -> FlowType;
    fn initial_state(&self) -> FlowState;
    fn transition(
        &self,
        current: &FlowState,
        event: &FlowEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// One traversal per inbound message: `start -> classifying -> <handler> -> end`.
#[derive(Clone, Debug, Default)]
pub struct TurnRoutingFlow;

impl FlowDefinition for TurnRoutingFlow {
    fn flow_type(&self) -> FlowType {
        FlowType::TurnRouting
    }

    fn initial_state(&self) -> FlowState {
        FlowState::Start
    }

    fn transition(
        &self,
        current: &FlowState,
        event: &FlowEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_turn_routing(current, event)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn flow_type(&self) -> FlowType {
        self.flow.flow_type()
    }

    pub fn initial_state(&self) -> FlowState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &FlowState,
        event: &FlowEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit.thread_id.clone(),
                        None,
                        audit.correlation_id.clone(),
                        "router.transition_applied",
                        AuditCategory::Routing,
                        audit.actor.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.label())
                    .with_metadata("to", outcome.to.label())
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit.thread_id.clone(),
                        None,
                        audit.correlation_id.clone(),
                        "router.transition_rejected",
                        AuditCategory::Routing,
                        audit.actor.clone(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<TurnRoutingFlow> {
    fn default() -> Self {
        Self::new(TurnRoutingFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: FlowState, event: FlowEvent },
}

fn dispatch_state(intent: Intent) -> Option<FlowState> {
    match intent {
        Intent::ListPrices => Some(FlowState::ListPrices),
        Intent::ListOrders => Some(FlowState::ListOrders),
        Intent::PlaceOrder => Some(FlowState::PlaceOrder),
        Intent::RegisterClient => Some(FlowState::RegisterClient),
        Intent::ConfirmOrder => Some(FlowState::ConfirmOrder),
        Intent::CancelOrder => Some(FlowState::CancelOrder),
        Intent::NotRelated => None,
    }
}

fn transition_turn_routing(
    current: &FlowState,
    event: &FlowEvent,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use FlowAction::{ClassifyUtterance, InvokeHandler, PersistReplies, RespondNotUnderstood};
    use FlowEvent::{ClassificationFailed, Classified, HandlerCompleted, MessageReceived};
    use FlowState::{Classifying, End, Start};

    let (to, actions) = match (current, event) {
        (Start, MessageReceived) => (Classifying, vec![ClassifyUtterance]),
        (Classifying, Classified(intent)) => match dispatch_state(*intent) {
            Some(state) => (state, vec![InvokeHandler]),
            None => (End, vec![RespondNotUnderstood, PersistReplies]),
        },
        (Classifying, ClassificationFailed) => (End, vec![RespondNotUnderstood, PersistReplies]),
        (state, HandlerCompleted) if state.is_dispatch() => (End, vec![PersistReplies]),
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                state: *current,
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: event.clone(), actions })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::intent::Intent;
    use crate::flows::engine::{FlowDefinition, FlowEngine, FlowTransitionError, TurnRoutingFlow};
    use crate::flows::states::{FlowAction, FlowEvent, FlowState, FlowType};

    #[test]
    fn every_actionable_intent_dispatches_once_then_ends() {
        let engine = FlowEngine::default();

        for intent in Intent::ALL.into_iter().filter(|intent| *intent != Intent::NotRelated) {
            let classifying = engine
                .apply(&engine.initial_state(), &FlowEvent::MessageReceived)
                .expect("start -> classifying");
            assert_eq!(classifying.to, FlowState::Classifying);
            assert_eq!(classifying.actions, vec![FlowAction::ClassifyUtterance]);

            let dispatched = engine
                .apply(&classifying.to, &FlowEvent::Classified(intent))
                .expect("classifying -> dispatch");
            assert!(dispatched.to.is_dispatch(), "{intent:?} should dispatch");
            assert_eq!(dispatched.to.label(), intent.label());

            let ended = engine
                .apply(&dispatched.to, &FlowEvent::HandlerCompleted)
                .expect("dispatch -> end");
            assert_eq!(ended.to, FlowState::End);
        }
    }

    #[test]
    fn not_related_and_failures_end_with_fallback() {
        let engine = FlowEngine::default();

        for event in [FlowEvent::Classified(Intent::NotRelated), FlowEvent::ClassificationFailed] {
            let outcome = engine.apply(&FlowState::Classifying, &event).expect("fallback");
            assert_eq!(outcome.to, FlowState::End);
            assert!(outcome.actions.contains(&FlowAction::RespondNotUnderstood));
        }
    }

    #[test]
    fn handlers_do_not_reenter_classification() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(&FlowState::PlaceOrder, &FlowEvent::Classified(Intent::ConfirmOrder))
            .expect_err("single hop");

        assert!(matches!(error, FlowTransitionError::InvalidTransition {
            state: FlowState::PlaceOrder,
            ..
        }));
    }

    #[test]
    fn end_is_terminal() {
        let engine = FlowEngine::default();
        assert!(engine.apply(&FlowState::End, &FlowEvent::MessageReceived).is_err());
        assert!(engine.apply(&FlowState::End, &FlowEvent::HandlerCompleted).is_err());
        assert_eq!(TurnRoutingFlow.flow_type(), FlowType::TurnRouting);
    }

    #[test]
    fn flow_transition_emits_audit_event() {
        let engine = FlowEngine::default();
        let sink = InMemoryAuditSink::default();

        let _ = engine
            .apply_with_audit(
                &FlowState::Start,
                &FlowEvent::MessageReceived,
                &sink,
                &AuditContext::new(Some("5491100".to_owned()), "msg-42", "turn-router"),
            )
            .expect("transition should succeed");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "msg-42");
        assert_eq!(events[0].thread_id.as_deref(), Some("5491100"));
        assert_eq!(events[0].event_type, "router.transition_applied");
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("classifying"));
    }
}
