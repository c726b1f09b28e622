//! Transport-agnostic APDU plumbing shared by every card-management driver
//! in this workspace: command/response framing, a reader-transport
//! abstraction with its default retry policies, a pluggable processor
//! stack (of which secure channels are one instance), an executor that
//! ties the two together, and a small BER-TLV codec.

pub mod command;
pub mod error;
pub mod executor;
pub mod processor;
pub mod response;
pub mod tlv;
pub mod transport;

pub use command::{ApduCommand, Command, ExpectedLength};
pub use error::{Error, ResultExt};
pub use executor::{CardExecutor, Executor};
pub use processor::{CommandProcessor, IdentityProcessor};
pub use response::{Response, StatusWord};
pub use transport::{CardTransport, MockTransport, TransmitPolicy};
