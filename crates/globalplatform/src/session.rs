//! Static key material and the secure-channel session discriminated union.

use zeroize::Zeroize;

use crate::constants::GP_TEST_KEY_16B;
use crate::scp02::Scp02Session;
use crate::scp03::Scp03Session;

/// The three static keys (ENC, MAC, DEK) a security domain is provisioned
/// with. Length depends on the protocol: 16 bytes for SCP02, 16/24/32 for
/// SCP03 depending on the negotiated AES key length.
#[derive(Clone, Zeroize)]
pub struct StaticKeys {
    /// Encryption key.
    pub enc: Vec<u8>,
    /// MAC key.
    pub mac: Vec<u8>,
    /// Data encryption key (used for key-management operations outside
    /// this driver's scope, kept here because it arrives with the other
    /// two).
    pub dek: Vec<u8>,
}

impl StaticKeys {
    /// Build a key set from three explicit key values.
    pub fn new(enc: Vec<u8>, mac: Vec<u8>, dek: Vec<u8>) -> Self {
        Self { enc, mac, dek }
    }

    /// A single key used for all three roles (the common case when a
    /// caller supplies one key and expects it diversified identically).
    pub fn single(key: Vec<u8>) -> Self {
        Self {
            enc: key.clone(),
            mac: key.clone(),
            dek: key,
        }
    }

    /// The well-known GlobalPlatform test key set `40..4F` for all three
    /// roles.
    pub fn gp_test_keys() -> Self {
        Self::single(GP_TEST_KEY_16B.to_vec())
    }

    /// Pad a supplied key up to `target_len` bytes by repeating it, as the
    /// GP agent does when a caller hands it a 16-byte key but the
    /// negotiated SCP03 key length is longer (e.g. AES-256).
    pub fn padded_to(&self, target_len: usize) -> Self {
        let pad = |key: &[u8]| -> Vec<u8> {
            if key.len() >= target_len {
                return key[..target_len].to_vec();
            }
            key.iter().cycle().take(target_len).copied().collect()
        };
        Self {
            enc: pad(&self.enc),
            mac: pad(&self.mac),
            dek: pad(&self.dek),
        }
    }
}

impl std::fmt::Debug for StaticKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticKeys").finish_non_exhaustive()
    }
}

/// The active secure-channel session, discriminated by SCP variant.
///
/// An explicit enum (rather than a pair of booleans) so the compiler
/// enforces that only one variant's derivation/wrap logic applies at a
/// time.
#[derive(Debug)]
pub enum SecureSession {
    /// SCP02: 3DES/CBC.
    Scp02(Scp02Session),
    /// SCP03: AES/CMAC.
    Scp03(Scp03Session),
}

impl SecureSession {
    /// Whether EXTERNAL AUTHENTICATE has completed successfully.
    pub fn is_authenticated(&self) -> bool {
        match self {
            Self::Scp02(session) => session.is_authenticated(),
            Self::Scp03(session) => session.is_authenticated(),
        }
    }
}
