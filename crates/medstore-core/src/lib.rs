//! medstore core library
//!
//! Shared error taxonomy, configuration and logging setup for the local
//! structured store and its tools.

pub mod config;
pub mod error;
pub mod logging;
pub mod timeout;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use logging::{init_logging, LogConfig, LogFormat};
pub use timeout::with_timeout;
