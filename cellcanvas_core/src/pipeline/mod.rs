//! Asynchronous job pipeline.
//!
//! [`state::ControlState`] is the pure transition function; the
//! [`engine::Pipeline`] runs the effects it asks for and turns job
//! completions back into commands.

pub mod command;
pub mod engine;
pub mod state;
mod tasks;

pub use command::{Command, Completion, Effect, FitRequest, PaintEvent, PipelineEvent};
pub use engine::Pipeline;
pub use state::ControlState;
