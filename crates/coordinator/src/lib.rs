//! TaskMesh 协调器
//!
//! 维护心跳驱动的Worker注册表，轮询分发直接提交和到期的存储任务，并记录Worker上报的状态。

pub mod dispatcher;
pub mod ledger;
pub mod registry;
pub mod scanner;
pub mod server;
pub mod service;
pub mod worker_client;

pub use dispatcher::{DispatchAck, TaskDispatcher};
pub use ledger::WorkerLedger;
pub use registry::{HeartbeatOutcome, SelectedWorker, WorkerRegistry, DEFAULT_MAX_MISSES};
pub use scanner::{DueTaskScanner, ScanReport};
pub use server::{create_routes, ApiError, AppState};
pub use service::{install_prometheus_recorder, CoordinatorService};
pub use worker_client::{HttpWorkerClient, HttpWorkerConnector};
