//! APDU command construction and encoding.

use bytes::Bytes;

/// Expected response length carried in the `Le` field of a command.
///
/// `0` is meaningful: it asks for up to 256 bytes under short APDU framing.
pub type ExpectedLength = u32;

/// A case class / instruction / parameter APDU command, with optional
/// command data and an optional expected response length.
///
/// Encoding is short-form only (1-byte `Lc`/`Le`), which is all that
/// GlobalPlatform's card-management commands require.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: Option<Bytes>,
    le: Option<ExpectedLength>,
}

impl Command {
    /// Create a new command header with no data and no `Le`.
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: None,
        }
    }

    /// Create a command that expects a response of up to `le` bytes.
    pub fn new_with_le(cla: u8, ins: u8, p1: u8, p2: u8, le: ExpectedLength) -> Self {
        Self::new(cla, ins, p1, p2).with_le(le)
    }

    /// Create a command carrying `data` and no `Le`.
    pub fn new_with_data(cla: u8, ins: u8, p1: u8, p2: u8, data: impl Into<Bytes>) -> Self {
        Self::new(cla, ins, p1, p2).with_data(data)
    }

    /// Attach command data, replacing any previously set data.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Attach an expected response length.
    #[must_use]
    pub const fn with_le(mut self, le: ExpectedLength) -> Self {
        self.le = Some(le);
        self
    }

    /// Class byte.
    pub const fn class(&self) -> u8 {
        self.cla
    }

    /// Instruction byte.
    pub const fn instruction(&self) -> u8 {
        self.ins
    }

    /// P1 parameter byte.
    pub const fn p1(&self) -> u8 {
        self.p1
    }

    /// P2 parameter byte.
    pub const fn p2(&self) -> u8 {
        self.p2
    }

    /// Command data, if any.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Expected response length, if any.
    pub const fn expected_length(&self) -> Option<ExpectedLength> {
        self.le
    }

    /// Set the class byte. Used by secure-messaging wrappers to flip the
    /// secure-messaging bit without reconstructing the whole command.
    pub const fn set_class(&mut self, cla: u8) {
        self.cla = cla;
    }

    /// Encode to wire bytes: `CLA INS P1 P2 [Lc data] [Le]`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 + self.data.as_ref().map_or(0, Bytes::len));
        out.push(self.cla);
        out.push(self.ins);
        out.push(self.p1);
        out.push(self.p2);

        if let Some(data) = &self.data {
            // Short-form Lc; GP never needs extended length.
            out.push(data.len() as u8);
            out.extend_from_slice(data);
        }

        if let Some(le) = self.le {
            out.push(le as u8);
        }

        out
    }
}

/// Trait for strongly typed commands that know how to build themselves and
/// how to interpret their own response.
pub trait ApduCommand: Sized {
    /// The class byte used by this command family (before secure-messaging
    /// bits are applied).
    const CLA: u8;
    /// The instruction byte for this command.
    const INS: u8;

    /// Parsed success/error type produced from a [`crate::response::Response`].
    type Response;
    /// Error produced while parsing the response.
    type Error;

    /// Build the wire-level [`Command`] for this request.
    fn to_command(&self) -> Command;

    /// Interpret a raw response into this command's response type.
    fn parse_response(
        &self,
        response: crate::response::Response,
    ) -> Result<Self::Response, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_header_only() {
        let cmd = Command::new(0x00, 0xA4, 0x04, 0x00);
        assert_eq!(cmd.to_bytes(), vec![0x00, 0xA4, 0x04, 0x00]);
    }

    #[test]
    fn encodes_data_and_le() {
        let cmd = Command::new(0x00, 0xA4, 0x04, 0x00)
            .with_data(vec![0xA0, 0x00])
            .with_le(0);
        assert_eq!(
            cmd.to_bytes(),
            vec![0x00, 0xA4, 0x04, 0x00, 0x02, 0xA0, 0x00, 0x00]
        );
    }

    #[test]
    fn set_class_flips_secure_messaging_bit() {
        let mut cmd = Command::new(0x00, 0xA4, 0x04, 0x00);
        cmd.set_class(0x00 | 0x04);
        assert_eq!(cmd.class(), 0x04);
    }
}
