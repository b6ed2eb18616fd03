pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::WorkflowConfig;
pub use error::{Result, WindlassError};
pub use event::EventBus;
pub use types::*;
