//! Ties a transport to a (possibly swappable) processor stack.

use core::fmt;
use tracing::instrument;

use crate::command::{ApduCommand, Command};
use crate::error::Error;
use crate::processor::{CommandProcessor, IdentityProcessor};
use crate::processor::secure::SecurityLevel;
use crate::response::Response;
use crate::transport::CardTransport;

/// Executes [`Command`]s (or typed [`ApduCommand`]s) against a card.
pub trait Executor {
    /// Send a raw [`Command`] and return its response.
    fn execute(&mut self, command: &Command) -> Result<Response, Error>;

    /// Send a strongly typed command and parse its response.
    fn execute_command<C: ApduCommand>(&mut self, command: &C) -> Result<C::Response, Error>
    where
        C::Error: Into<Error>,
    {
        let raw = command.to_command();
        let response = self.execute(&raw)?;
        command.parse_response(response).map_err(Into::into)
    }

    /// The security level currently in effect on this executor's channel.
    fn security_level(&self) -> SecurityLevel;
}

/// Binds one [`CardTransport`] to one active [`CommandProcessor`].
///
/// Swapping the processor (e.g. from [`IdentityProcessor`] to an established
/// secure channel) is how mutual authentication is reflected into the
/// executor: every command sent afterwards is transparently wrapped.
pub struct CardExecutor<T: CardTransport> {
    transport: T,
    processor: Box<dyn CommandProcessor>,
}

impl<T: CardTransport> fmt::Debug for CardExecutor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardExecutor")
            .field("transport", &self.transport)
            .field("processor", &self.processor)
            .finish()
    }
}

impl<T: CardTransport> CardExecutor<T> {
    /// Build an executor over `transport`, initially passing commands
    /// through unmodified.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            processor: Box::new(IdentityProcessor),
        }
    }

    /// Replace the active processor (e.g. install an established secure
    /// channel, or fall back to [`IdentityProcessor`] after a session
    /// reset).
    pub fn set_processor(&mut self, processor: Box<dyn CommandProcessor>) {
        self.processor = processor;
    }

    /// Drop the current processor and go back to unprotected passthrough.
    pub fn reset_processor(&mut self) {
        self.processor = Box::new(IdentityProcessor);
    }

    /// Borrow the underlying transport.
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the underlying transport.
    pub const fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

impl<T: CardTransport> Executor for CardExecutor<T> {
    #[instrument(skip(self, command), fields(ins = command.instruction()))]
    fn execute(&mut self, command: &Command) -> Result<Response, Error> {
        self.processor.process_command(command, &mut self.transport)
    }

    fn security_level(&self) -> SecurityLevel {
        self.processor.security_level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use bytes::Bytes;

    #[test]
    fn executes_through_identity_processor() {
        let transport = MockTransport::with_response(Bytes::from_static(&[0x90, 0x00]));
        let mut executor = CardExecutor::new(transport);
        let response = executor.execute(&Command::new(0x00, 0xA4, 0x04, 0x00)).unwrap();
        assert!(response.is_success());
        assert_eq!(executor.security_level(), SecurityLevel::none());
    }
}
