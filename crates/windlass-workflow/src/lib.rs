pub mod nodes;
pub mod prompts;
pub mod runner;
pub mod runtime;
pub mod scheduler;
pub mod state;

pub use prompts::Prompts;
pub use runner::WorkflowRunner;
pub use runtime::WorkflowRuntime;
pub use scheduler::{TaskExecutor, TaskQueue, TaskStore};
pub use state::WorkflowState;
