//! GlobalPlatform content-management driver.
//!
//! Layered roughly bottom-up:
//! - [`crypto`] / [`constants`]: primitives and wire constants shared by both
//!   secure-channel engines.
//! - [`scp02`] / [`scp03`]: the two supported Secure Channel Protocols,
//!   each a [`gp_apdu_core::processor::CommandProcessor`].
//! - [`session`]: static key material and the secure-channel discriminated
//!   union tying the two engines together.
//! - [`capability`]: reads Card Recognition Data / Key Information and
//!   decides which SCP variant and key length a card expects.
//! - [`cap`] / [`archive`]: the Java Card CAP binary format and its ZIP
//!   container.
//! - [`exp`]: the companion EXP export-file format.
//! - [`registry`]: GET STATUS response decoding into application/package
//!   records.
//! - [`agent`]: top-level orchestration (mutual auth, LOAD/INSTALL/DELETE/
//!   GET STATUS sequencing).
//! - [`facade`]: a thin stateful wrapper over the agent for external
//!   callers (CLI, shell).
//! - [`config`]: the JSON shape of process configuration consumed by those
//!   external callers.

pub mod agent;
pub mod archive;
pub mod cap;
pub mod capability;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod exp;
pub mod facade;
pub mod registry;
pub mod scp02;
pub mod scp03;
pub mod session;

pub use agent::{CardSession, GpAgent, SessionState};
pub use error::GpError;
pub use facade::ContentManager;
pub use session::{SecureSession, StaticKeys};
