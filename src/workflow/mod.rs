// Review workflow: an explicit node graph driven to a terminal node

pub mod advice;
pub mod deep;
mod engine;
pub mod integrate;
mod state;
pub mod transition;

pub use engine::{CycleOutcome, WorkflowEngine};
pub use state::WorkflowState;
pub use transition::{transition, Event, Node};
