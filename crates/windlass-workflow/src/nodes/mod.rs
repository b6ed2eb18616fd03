pub mod decision;
pub mod finish;
pub mod message_summary;
pub mod tool_execution;

pub use tool_execution::PassOutcome;
