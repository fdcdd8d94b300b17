pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, TurnRoutingFlow};
pub use states::{FlowAction, FlowEvent, FlowState, FlowType, TransitionOutcome};
