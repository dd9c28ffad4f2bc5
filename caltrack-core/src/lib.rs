//! Caltrack Core - Shared data structures and trait definitions
//!
//! This module defines the error taxonomy, configuration, logging and clock
//! abstractions used by the session client and the CLI

pub mod async_utils;
pub mod config;
pub mod error;
pub mod logging;
pub mod traits;
pub mod types;

pub use async_utils::*;
pub use error::*;
pub use logging::*;
pub use traits::*;
pub use types::*;

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use tokio;
pub use tracing;
