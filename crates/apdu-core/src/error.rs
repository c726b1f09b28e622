//! Crate-wide error type.

use thiserror::Error;

use crate::response::StatusWord;

/// Errors that can occur anywhere in the APDU plumbing: transport,
/// processing, or response interpretation.
#[derive(Debug, Error)]
pub enum Error {
    /// The reader is unavailable, disconnected, or returned a driver error.
    #[error("reader unavailable: {0}")]
    ReaderUnavailable(String),

    /// The card answered with a non-success status word.
    #[error("card returned status {status}: {context}")]
    CardStatus {
        /// The status word returned by the card.
        status: StatusWord,
        /// What operation was being attempted.
        context: &'static str,
    },

    /// A response did not have the structure an operation required.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// Card cryptogram verification or EXTERNAL AUTHENTICATE failed.
    #[error("authentication failure: {0}")]
    AuthFailure(&'static str),

    /// A GET RESPONSE chain exceeded its configured maximum length.
    #[error("GET RESPONSE chain limit exceeded")]
    ChainLimitExceeded,

    /// Wraps a lower-level error with additional context, without discarding
    /// the original cause.
    #[error("{context}")]
    Context {
        /// Human readable description of what was being attempted.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<Self>,
    },
}

impl Error {
    /// Attach `context` to `self`, wrapping it as the source of a new error.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for turning any `Result<T, E>` into `Result<T, Error>`
/// with a context string attached.
pub trait ResultExt<T> {
    /// Attach context, converting the error through [`Into<Error>`] first.
    fn context(self, context: impl Into<String>) -> Result<T, Error>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<Error>,
{
    fn context(self, context: impl Into<String>) -> Result<T, Error> {
        self.map_err(|e| e.into().context(context))
    }
}
