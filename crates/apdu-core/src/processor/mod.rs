//! Command processors: pluggable transformations applied to a command
//! before it reaches the transport (and to the response on the way back).
//!
//! A secure channel is just a [`CommandProcessor`] that happens to encrypt
//! and MAC the command it is given; see [`secure`].

pub mod secure;

use core::fmt;
use dyn_clone::DynClone;
use tracing::{debug, trace};

use crate::command::Command;
use crate::error::Error;
use crate::response::Response;
use crate::transport::{CardTransport, TransmitPolicy, transmit_with_policies};
use secure::SecurityLevel;

/// A transformation applied to a command (and, symmetrically, to its
/// response) on its way through the reader.
pub trait CommandProcessor: Send + Sync + fmt::Debug + DynClone {
    /// Process `command`, sending it through `transport` and returning the
    /// (possibly decrypted/verified) response.
    fn process_command(
        &mut self,
        command: &Command,
        transport: &mut dyn CardTransport,
    ) -> Result<Response, Error> {
        trace!(command = ?command, "processing command");
        let result = self.do_process_command(command, transport);
        match &result {
            Ok(response) => trace!(response = ?response, "processed response"),
            Err(error) => debug!(?error, "command processing failed"),
        }
        result
    }

    /// Processor-specific implementation of [`Self::process_command`].
    fn do_process_command(
        &mut self,
        command: &Command,
        transport: &mut dyn CardTransport,
    ) -> Result<Response, Error>;

    /// The security level this processor currently provides.
    fn security_level(&self) -> SecurityLevel {
        SecurityLevel::none()
    }

    /// Whether this processor is ready to process commands.
    fn is_active(&self) -> bool {
        true
    }
}

dyn_clone::clone_trait_object!(CommandProcessor);

/// Passes commands through unchanged, applying only the transport's default
/// retry policies.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityProcessor;

impl CommandProcessor for IdentityProcessor {
    fn do_process_command(
        &mut self,
        command: &Command,
        transport: &mut dyn CardTransport,
    ) -> Result<Response, Error> {
        transmit_with_policies(transport, command, TransmitPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use bytes::Bytes;

    #[test]
    fn identity_processor_passes_through() {
        let mut transport = MockTransport::with_response(Bytes::from_static(&[0x90, 0x00]));
        let mut processor = IdentityProcessor;
        let command = Command::new(0x00, 0xA4, 0x04, 0x00);
        let response = processor.process_command(&command, &mut transport).unwrap();
        assert!(response.is_success());
        assert_eq!(transport.commands[0], command.to_bytes());
    }
}
