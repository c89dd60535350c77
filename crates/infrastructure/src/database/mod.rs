pub mod manager;
pub mod memory;
pub mod postgres;

pub use manager::{DatabaseManager, DatabasePool, DatabaseType};
pub use memory::InMemoryStore;
pub use postgres::{PostgresClaimBatch, PostgresTaskStore, PostgresWorkerStore};
