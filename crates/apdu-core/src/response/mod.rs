//! Parsed APDU responses.

pub mod status;
pub mod utils;

use bytes::Bytes;

pub use status::StatusWord;

/// A parsed response: payload bytes plus the terminating status word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    payload: Bytes,
    status: StatusWord,
}

impl Response {
    /// Build directly from a payload and status.
    pub fn new(payload: Bytes, status: impl Into<StatusWord>) -> Self {
        Self {
            payload,
            status: status.into(),
        }
    }

    /// Parse raw wire bytes (`data... SW1 SW2`).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, &'static str> {
        let ((sw1, sw2), payload) = utils::extract_response_parts(bytes)?;
        Ok(Self {
            payload: Bytes::copy_from_slice(payload),
            status: StatusWord::new(sw1, sw2),
        })
    }

    /// Response payload (without the status bytes).
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The status word.
    pub const fn status(&self) -> StatusWord {
        self.status
    }

    /// `true` if the status is `90 00`.
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// `true` if GET RESPONSE chaining is needed (`61 xx`).
    pub const fn more_data_available(&self) -> bool {
        self.status.is_more_data()
    }

    /// Number of additional bytes available via GET RESPONSE, if any.
    pub const fn bytes_available(&self) -> Option<u8> {
        if self.status.is_more_data() {
            Some(self.status.sw2)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_success() {
        let resp = Response::from_bytes(&[0x01, 0x02, 0x90, 0x00]).unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.payload(), &[0x01, 0x02]);
    }

    #[test]
    fn reports_more_data() {
        let resp = Response::from_bytes(&[0x61, 0x10]).unwrap();
        assert_eq!(resp.bytes_available(), Some(0x10));
    }
}
