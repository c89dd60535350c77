pub mod message;
pub mod task;
pub mod worker;

pub use message::*;
pub use task::*;
pub use worker::*;
