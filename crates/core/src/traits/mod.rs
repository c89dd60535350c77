pub mod store;
pub mod worker_endpoint;

pub use store::{ClaimBatch, TaskStore, WorkerStore};
pub use worker_endpoint::{WorkerConnector, WorkerEndpoint};
