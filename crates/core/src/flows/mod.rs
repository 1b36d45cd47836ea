pub mod engine;
pub mod states;

pub use engine::{DriverSearchFlow, FlowDefinition, FlowEngine, FlowTransitionError};
pub use states::{FlowAction, FlowContext, FlowEvent, FlowState, TransitionOutcome};
