// Library crate - market structure analysis and signal pipeline

pub mod types;
pub mod error;
pub mod config;
pub mod data;
pub mod synth;
pub mod trading_core;

// Re-export commonly used types
pub use error::{CoreError, CoreResult, LifecycleError};
pub use types::*;
