pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, QuoteFunnelFlow};
pub use states::{
    FieldIssue, FlowContext, SessionAction, SessionEvent, SessionStep, TransitionOutcome,
};
