pub mod builtin;
pub mod registry;

pub use builtin::control::{StopWorkflowTool, STOP_WORKFLOW};
pub use builtin::scheduling::{DeleteTaskTool, ListTasksTool, ScheduleTaskTool};
pub use registry::ToolRegistry;
