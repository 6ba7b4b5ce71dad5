// Diagnostics orchestration: collectors, triggers and the run lifecycle

pub mod collector;
pub mod config;
pub mod process;
pub mod resource_manager;
pub mod session;
pub mod task;
pub mod threadpool;
pub mod tools;
pub mod trigger;
pub mod util;
pub mod validation;

// Re-export commonly used items
pub use collector::{Collector, CollectorResult, CollectorSpec, CollectorState};
pub use config::Config;
pub use process::{ProcessDescription, ProcessLister};
pub use resource_manager::ResourceManager;
pub use session::Session;
pub use task::{RunInfo, RunStatus, Task, TaskHandler};
pub use threadpool::ThreadPool;
pub use tools::ToolAvailabilityManager;
