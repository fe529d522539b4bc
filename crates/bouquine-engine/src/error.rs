use bouquine_shared::IdError;
use bouquine_store::StoreError;
use thiserror::Error;

/// Errors surfaced by engine commands.
///
/// Validation failures (`NotAuthenticated`, `InvalidArgument`) are raised
/// before any store call.  `NotFound` and `AlreadyInState` come out of
/// aborted store transactions.  `Transport` covers an unreachable store or
/// a dead subscription; one-shot commands failing with it are never
/// auto-retried — a silent retry of `send_message` would duplicate the
/// message.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No authenticated user")]
    NotAuthenticated,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Already in the requested state: {0}")]
    AlreadyInState(&'static str),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => EngineError::NotFound("record"),
            other => EngineError::Store(other),
        }
    }
}

impl From<IdError> for EngineError {
    fn from(e: IdError) -> Self {
        EngineError::InvalidArgument(e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;
