use thiserror::Error;
use uuid::Uuid;

/// Failures that mean the pipeline could not evaluate a cycle.
///
/// These are distinct from signal rejections: a rejection is an evaluated
/// business outcome, a `CoreError` means the inputs could not be trusted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Invalid input: {field} = {value}")]
    InvalidInput { field: &'static str, value: f64 },

    #[error("Non-finite bar at {timestamp}")]
    NonFiniteBar { timestamp: String },

    #[error("Malformed levels: {0}")]
    MalformedLevels(String),

    #[error("Bar out of order: {current} is not after {previous}")]
    OutOfOrder { previous: String, current: String },
}

/// Errors from explicit lifecycle calls (execute, cancel)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Unknown signal {0}")]
    UnknownSignal(Uuid),

    #[error("Illegal transition for {id}: {from} -> {to}")]
    IllegalTransition {
        id: Uuid,
        from: String,
        to: String,
    },
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
