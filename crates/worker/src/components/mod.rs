pub mod coordinator_client;
pub mod heartbeat_manager;
pub mod task_execution;

pub use coordinator_client::{CoordinatorApi, CoordinatorClient};
pub use heartbeat_manager::{advertise_address, resolve_advertise_address, HeartbeatManager};
pub use task_execution::{ExecutionStats, QueuedTask, StatusReporter, TaskExecutionManager};
