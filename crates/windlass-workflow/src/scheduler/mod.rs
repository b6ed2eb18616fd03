pub mod executor;
pub mod queue;
pub mod store;

pub use executor::TaskExecutor;
pub use queue::TaskQueue;
pub use store::TaskStore;
