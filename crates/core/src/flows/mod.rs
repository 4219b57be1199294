pub mod engine;
pub mod states;

pub use engine::{is_legal_edge, DocumentSessionFlow, FlowDefinition, FlowEngine, FlowTransitionError};
pub use states::{FlowAction, FlowContext, SessionEvent, SessionState, TransitionOutcome};
