//! Security-level accounting shared by every secure-channel implementation.

use core::cmp::Ordering;
use core::fmt;
use dyn_clone::DynClone;

use super::CommandProcessor;
use crate::error::Error;
use crate::transport::CardTransport;

/// The security properties a channel currently provides, as defined by
/// GlobalPlatform: no security, C-MAC only, or C-MAC with C-DECRYPTION.
///
/// Kept as an explicit small struct (not a bare integer) so a caller can ask
/// "does this satisfy what I need" without knowing which SCP variant is in
/// use underneath.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecurityLevel {
    authenticated: bool,
    mac_protection: bool,
    encrypted: bool,
}

impl SecurityLevel {
    /// No security: plaintext communication, not yet authenticated.
    pub const fn none() -> Self {
        Self {
            authenticated: false,
            mac_protection: false,
            encrypted: false,
        }
    }

    /// Mutual authentication completed, no per-command MAC.
    pub const fn authenticated() -> Self {
        Self {
            authenticated: true,
            mac_protection: false,
            encrypted: false,
        }
    }

    /// C-MAC: authenticated commands are integrity protected.
    pub const fn c_mac() -> Self {
        Self {
            authenticated: true,
            mac_protection: true,
            encrypted: false,
        }
    }

    /// C-MAC + C-DECRYPTION: commands are integrity protected and encrypted.
    pub const fn c_mac_and_decryption() -> Self {
        Self {
            authenticated: true,
            mac_protection: true,
            encrypted: true,
        }
    }

    /// Whether mutual authentication has completed.
    pub const fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Whether commands are MAC-protected (encryption implies this too).
    pub const fn has_mac_protection(&self) -> bool {
        self.mac_protection || self.encrypted
    }

    /// Whether commands are encrypted.
    pub const fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Whether this level satisfies everything `required` asks for.
    pub const fn satisfies(&self, required: &Self) -> bool {
        (!required.authenticated || self.authenticated)
            && (!required.mac_protection || self.has_mac_protection())
            && (!required.encrypted || self.encrypted)
    }

    /// The GlobalPlatform `sec_level` byte sent in EXTERNAL AUTHENTICATE:
    /// bit0 = C-MAC, bit1 = C-DECRYPTION (both GP SCP02 and SCP03 share this
    /// encoding).
    pub const fn to_gp_byte(&self) -> u8 {
        let mut byte = 0u8;
        if self.has_mac_protection() {
            byte |= 0x01;
        }
        if self.encrypted {
            byte |= 0x02;
        }
        byte
    }
}

impl PartialOrd for SecurityLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SecurityLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        // Authentication=1, MAC=2, encryption=4: a strict total order over
        // GP's three security levels.
        let weight = |s: &Self| {
            u8::from(s.authenticated) + u8::from(s.has_mac_protection()) * 2 + u8::from(s.encrypted) * 4
        };
        weight(self).cmp(&weight(other))
    }
}

/// A [`CommandProcessor`] that additionally knows how to manage its own
/// lifecycle: whether it has completed mutual authentication, and how to
/// tear its session material down.
pub trait SecureChannel: CommandProcessor + DynClone {
    /// Whether mutual authentication has completed and the channel can wrap
    /// commands.
    fn is_established(&self) -> bool;

    /// Zeroize session key material and return to the not-established state.
    fn reset_session(&mut self);
}

dyn_clone::clone_trait_object!(SecureChannel);

/// Establishes a [`SecureChannel`] against a connected transport.
pub trait SecureChannelProvider: Send + Sync + fmt::Debug {
    /// Perform capability discovery and mutual authentication, returning a
    /// ready-to-use secure channel.
    fn establish(
        &self,
        transport: &mut dyn CardTransport,
    ) -> Result<Box<dyn SecureChannel>, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_strength() {
        assert!(SecurityLevel::none() < SecurityLevel::authenticated());
        assert!(SecurityLevel::c_mac() < SecurityLevel::c_mac_and_decryption());
        assert!(SecurityLevel::authenticated() < SecurityLevel::c_mac());
    }

    #[test]
    fn satisfies_respects_each_axis() {
        let level = SecurityLevel::c_mac();
        assert!(level.satisfies(&SecurityLevel::authenticated()));
        assert!(level.satisfies(&SecurityLevel::c_mac()));
        assert!(!level.satisfies(&SecurityLevel::c_mac_and_decryption()));
    }

    #[test]
    fn gp_byte_encoding() {
        assert_eq!(SecurityLevel::none().to_gp_byte(), 0x00);
        assert_eq!(SecurityLevel::c_mac().to_gp_byte(), 0x01);
        assert_eq!(SecurityLevel::c_mac_and_decryption().to_gp_byte(), 0x03);
    }
}
