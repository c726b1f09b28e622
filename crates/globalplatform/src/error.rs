//! Error kinds specific to content management, layered on top of
//! [`gp_apdu_core::Error`].

use gp_apdu_core::response::StatusWord;
use thiserror::Error;

/// Errors produced while driving GP content management.
#[derive(Debug, Error)]
pub enum GpError {
    /// The reader is unavailable, disconnected, or returned a driver error.
    #[error("reader unavailable: {0}")]
    ReaderUnavailable(String),

    /// The card answered with a non-success status word for `context`.
    #[error("card returned status {status} during {context}")]
    CardStatus {
        /// The status word returned by the card.
        status: StatusWord,
        /// What operation was being attempted.
        context: &'static str,
    },

    /// A response did not have the structure an operation required.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// Card cryptogram mismatch, or EXTERNAL AUTHENTICATE rejection.
    #[error("authentication failure: {0}")]
    AuthFailure(&'static str),

    /// A CAP component, archive, or export file failed to parse.
    #[error("malformed CAP data: {0}")]
    CapMalformed(String),

    /// The operation requires a mutually authenticated session.
    #[error("operation requires an authenticated session")]
    NotAuthenticated,

    /// The requested SCP variant or CAP feature is outside this driver's
    /// coverage.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(&'static str),

    /// Context wrapper, preserving the original cause.
    #[error("{context}")]
    Context {
        /// Human-readable description of what was being attempted.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<Self>,
    },
}

impl GpError {
    /// Attach `context`, wrapping `self` as the new error's source.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<gp_apdu_core::Error> for GpError {
    fn from(error: gp_apdu_core::Error) -> Self {
        match error {
            gp_apdu_core::Error::ReaderUnavailable(msg) => Self::ReaderUnavailable(msg),
            gp_apdu_core::Error::CardStatus { status, context } => {
                Self::CardStatus { status, context }
            }
            gp_apdu_core::Error::ProtocolViolation(msg) => Self::ProtocolViolation(msg),
            gp_apdu_core::Error::AuthFailure(msg) => Self::AuthFailure(msg),
            gp_apdu_core::Error::ChainLimitExceeded => {
                Self::ProtocolViolation("GET RESPONSE chain limit exceeded")
            }
            gp_apdu_core::Error::Context { context, source } => {
                Self::from(*source).context(context)
            }
        }
    }
}

/// Extension trait mirroring [`gp_apdu_core::ResultExt`] for [`GpError`].
pub trait ResultExt<T> {
    /// Attach context, converting the error through [`Into<GpError>`] first.
    fn gp_context(self, context: impl Into<String>) -> Result<T, GpError>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<GpError>,
{
    fn gp_context(self, context: impl Into<String>) -> Result<T, GpError> {
        self.map_err(|e| e.into().context(context))
    }
}
