//! # Runtime Infrastructure
//!
//! Ambient services shared by the sync engine and its embedders:
//!
//! - **Event Bus** ([`events`]): broadcast channel for progress and
//!   lifecycle events, decoupling the engine from any UI
//! - **Logging** ([`logging`]): `tracing-subscriber` initialization with
//!   format and filter configuration

pub mod error;
pub mod events;
pub mod logging;

pub use error::{Result, RuntimeError};
pub use events::{EventBus, SyncEvent};
pub use logging::{init_logging, LogFormat, LogLevel, LoggingConfig};
