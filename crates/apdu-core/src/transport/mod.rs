//! Reader transport abstraction and the default retry policies applied to
//! every exchange with the card.

use bytes::Bytes;
use core::fmt;
use tracing::trace;

use crate::command::Command;
use crate::error::Error;
use crate::response::Response;

/// Abstract synchronous reader connection: send a raw command APDU, get back
/// the raw response bytes (payload followed by `SW1 SW2`).
///
/// Implementations own a single exclusive connection to a card; see the
/// concurrency notes on [`crate::processor::secure::SecureChannel`] for why
/// this trait does not attempt to be `Clone`.
pub trait CardTransport: Send + fmt::Debug {
    /// Transmit `command` and return the raw response bytes.
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error>;
}

/// Which automatic retry behaviors [`transmit_with_policies`] applies.
///
/// Both are on by default, matching a typical PC/SC reader driver; either
/// can be disabled for a single call (e.g. secure-channel engines that want
/// to see a raw `61xx`/`6Cxx` status rather than have it handled for them).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitPolicy {
    /// Retry with `Le := SW2` on `6C xx`.
    pub auto_le: bool,
    /// Chase `61 xx` with `00 C0 00 00 SW2` (GET RESPONSE) until a terminal
    /// status, concatenating the returned data.
    pub auto_get_response: bool,
}

impl Default for TransmitPolicy {
    fn default() -> Self {
        Self {
            auto_le: true,
            auto_get_response: true,
        }
    }
}

/// Maximum number of GET RESPONSE round-trips chased before giving up.
const MAX_GET_RESPONSE_CHAIN: usize = 32;

/// Transmit `command` through `transport`, applying the `6Cxx` and `61xx`
/// retry policies described in [`TransmitPolicy`].
pub fn transmit_with_policies(
    transport: &mut dyn CardTransport,
    command: &Command,
    policy: TransmitPolicy,
) -> Result<Response, Error> {
    let bytes = command.to_bytes();
    let raw = transport.transmit_raw(&bytes)?;
    let mut response = Response::from_bytes(&raw)
        .map_err(Error::ProtocolViolation)?;

    if policy.auto_le && response.status().is_wrong_le() {
        trace!(le = response.status().sw2, "retrying with corrected Le");
        let retried = command.clone().with_le(response.status().sw2 as u32);
        let raw = transport.transmit_raw(&retried.to_bytes())?;
        response = Response::from_bytes(&raw).map_err(Error::ProtocolViolation)?;
    }

    if policy.auto_get_response && response.more_data_available() {
        let mut data = response.payload().to_vec();
        let mut chains = 0;
        while response.more_data_available() {
            if chains >= MAX_GET_RESPONSE_CHAIN {
                return Err(Error::ChainLimitExceeded);
            }
            let le = response.bytes_available().unwrap_or(0);
            let get_response = Command::new_with_le(0x00, 0xC0, 0x00, 0x00, le as u32);
            let raw = transport.transmit_raw(&get_response.to_bytes())?;
            response = Response::from_bytes(&raw).map_err(Error::ProtocolViolation)?;
            data.extend_from_slice(response.payload());
            chains += 1;
        }
        response = Response::new(Bytes::from(data), response.status());
    }

    Ok(response)
}

/// Trivial in-memory transport used by unit tests: returns queued responses
/// in order and records every command it was asked to transmit.
#[derive(Debug, Default)]
pub struct MockTransport {
    /// Commands observed, in order.
    pub commands: Vec<Vec<u8>>,
    /// Responses to hand back, in order.
    pub responses: Vec<Bytes>,
}

impl MockTransport {
    /// A mock that always returns `response` for every command.
    pub fn with_response(response: Bytes) -> Self {
        Self {
            commands: Vec::new(),
            responses: vec![response],
        }
    }

    /// A mock with a queue of canned `responses`.
    pub fn new(responses: Vec<Bytes>) -> Self {
        Self {
            commands: Vec::new(),
            responses,
        }
    }
}

impl CardTransport for MockTransport {
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        self.commands.push(command.to_vec());
        if self.responses.is_empty() {
            return Ok(Bytes::from_static(&[0x90, 0x00]));
        }
        Ok(self.responses.remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_on_wrong_le() {
        let mut transport = MockTransport::new(vec![
            Bytes::from_static(&[0x6C, 0x05]),
            Bytes::from_static(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x90, 0x00]),
        ]);
        let cmd = Command::new_with_le(0x00, 0xB0, 0x00, 0x00, 0x00);
        let resp = transmit_with_policies(&mut transport, &cmd, TransmitPolicy::default()).unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.payload(), &[0x01, 0x02, 0x03, 0x04, 0x05]);
        assert_eq!(transport.commands[1][4], 0x05);
    }

    #[test]
    fn chases_get_response() {
        let mut transport = MockTransport::new(vec![
            Bytes::from_static(&[0x61, 0x02]),
            Bytes::from_static(&[0xAA, 0xBB, 0x90, 0x00]),
        ]);
        let cmd = Command::new(0x00, 0xA4, 0x04, 0x00);
        let resp = transmit_with_policies(&mut transport, &cmd, TransmitPolicy::default()).unwrap();
        assert_eq!(resp.payload(), &[0xAA, 0xBB]);
        assert_eq!(transport.commands[1], vec![0x00, 0xC0, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn policies_can_be_disabled() {
        let mut transport = MockTransport::new(vec![Bytes::from_static(&[0x61, 0x02])]);
        let cmd = Command::new(0x00, 0xA4, 0x04, 0x00);
        let policy = TransmitPolicy {
            auto_le: false,
            auto_get_response: false,
        };
        let resp = transmit_with_policies(&mut transport, &cmd, policy).unwrap();
        assert_eq!(resp.status().to_u16(), 0x6102);
        assert_eq!(transport.commands.len(), 1);
    }
}
