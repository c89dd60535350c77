pub mod app_config;
pub mod coordinator_worker;
pub mod database;
pub mod logging;
pub mod validation;

pub use app_config::AppConfig;
pub use coordinator_worker::{CoordinatorConfig, ExecutionMode, WorkerConfig};
pub use database::{DatabaseConfig, MEMORY_DATABASE_URL};
pub use logging::LoggingConfig;
pub use validation::{ConfigValidator, ValidationUtils};
