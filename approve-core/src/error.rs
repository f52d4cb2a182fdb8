//! Error taxonomy for the engine.
//!
//! Platform read and write failures belong to the caller that performs I/O;
//! the only failure the pure engine can observe is missing ownership data.

use thiserror::Error;

/// The ownership oracle could not answer a query.
#[derive(Debug, Error)]
pub enum OwnersError {
    #[error("ownership data unavailable for '{path}': {message}")]
    Unavailable { path: String, message: String },

    #[error("invalid ownership map: {message}")]
    Invalid { message: String },
}

impl OwnersError {
    pub fn unavailable(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot decide approval without ownership data: {0}")]
    Owners(#[from] OwnersError),
}
