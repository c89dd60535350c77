//! TaskMesh Worker
//!
//! 接收协调器下发的任务，放入本地队列由固定大小的执行池处理，并向协调器上报状态和心跳。

pub mod components;
pub mod executors;
pub mod server;
pub mod service;

pub use components::{CoordinatorApi, CoordinatorClient, ExecutionStats, TaskExecutionManager};
pub use executors::{create_runner, ShellRunner, SimulatedRunner, TaskOutcome, TaskRunner};
pub use server::{create_routes, WorkerApiError, WorkerState};
pub use service::WorkerService;
