pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use errors::{SchedulerError, SchedulerResult};
pub use logging::{init_logging, init_logging_from_config};
