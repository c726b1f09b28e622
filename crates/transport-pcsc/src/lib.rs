//! PC/SC-backed [`CardTransport`].
//!
//! This crate is the one piece of the workspace that actually talks to a
//! physical reader; everything above it only depends on the abstract
//! [`CardTransport`] shape.

use bytes::Bytes;
use gp_apdu_core::{CardTransport, Error};
use pcsc::{Card, Context, Protocols, Scope, ShareMode};
use std::ffi::CString;
use thiserror::Error;
use tracing::{debug, trace};

/// Errors specific to the PC/SC binding, before they are folded into
/// [`gp_apdu_core::Error::ReaderUnavailable`].
#[derive(Debug, Error)]
pub enum PcscError {
    /// The underlying `pcsc` crate returned an error.
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),
    /// No reader matched the requested name (or none were present at all).
    #[error("no matching reader found")]
    NoReaderFound,
}

impl From<PcscError> for Error {
    fn from(error: PcscError) -> Self {
        Self::ReaderUnavailable(error.to_string())
    }
}

/// Enumerates and connects to PC/SC readers visible to the local smart card
/// resource manager.
#[derive(Debug)]
pub struct ReaderManager {
    context: Context,
}

impl ReaderManager {
    /// Establish a connection to the PC/SC resource manager.
    pub fn establish() -> Result<Self, PcscError> {
        let context = Context::establish(Scope::User)?;
        Ok(Self { context })
    }

    /// List the names of all currently visible readers.
    pub fn list_readers(&self) -> Result<Vec<String>, PcscError> {
        let mut buffer = Vec::new();
        let names = self.context.list_readers(&mut buffer)?;
        Ok(names.map(|name| name.to_string_lossy().into_owned()).collect())
    }

    /// Connect to `reader_name`, or to the first available reader if `None`.
    pub fn connect(&self, reader_name: Option<&str>) -> Result<PcscTransport, PcscError> {
        let name = match reader_name {
            Some(name) => CString::new(name).map_err(|_| PcscError::NoReaderFound)?,
            None => {
                let mut buffer = Vec::new();
                let mut names = self.context.list_readers(&mut buffer)?;
                names.next().map(CString::from).ok_or(PcscError::NoReaderFound)?
            }
        };

        debug!(reader = %name.to_string_lossy(), "connecting to reader");
        let card = self
            .context
            .connect(&name, ShareMode::Shared, Protocols::ANY)?;
        Ok(PcscTransport { card })
    }
}

/// A connected PC/SC card handle, implementing [`CardTransport`].
///
/// Raw `transmit_raw` is the only operation: the `61xx`/`6Cxx` retry
/// policies applied on top of it live in `gp_apdu_core::transport`, not
/// here, so that callers who want to see the raw status (e.g. a secure
/// channel probing capabilities) can opt out per call.
pub struct PcscTransport {
    card: Card,
}

impl std::fmt::Debug for PcscTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcscTransport").finish_non_exhaustive()
    }
}

impl CardTransport for PcscTransport {
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        trace!(len = command.len(), "transmitting APDU");
        let mut response_buffer = [0u8; pcsc::MAX_BUFFER_SIZE];
        let response = self
            .card
            .transmit(command, &mut response_buffer)
            .map_err(PcscError::from)?;
        Ok(Bytes::copy_from_slice(response))
    }
}
