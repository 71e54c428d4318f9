//! 对话编排层

pub mod orchestrator;

pub use orchestrator::{Orchestrator, TurnOutcome, TurnStatus};
