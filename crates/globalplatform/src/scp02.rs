//! SCP02: the 3DES/CBC GlobalPlatform secure channel.

use gp_apdu_core::command::Command;
use gp_apdu_core::error::Error as CoreError;
use gp_apdu_core::processor::secure::{SecureChannel, SecurityLevel};
use gp_apdu_core::processor::CommandProcessor;
use gp_apdu_core::response::Response;
use gp_apdu_core::transport::{transmit_with_policies, CardTransport, TransmitPolicy};
use rand::RngCore;
use tracing::{debug, instrument};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::constants::{cla, ins};
use crate::crypto::{des_decrypt_block, des_encrypt_block, pad_80, resize_key_24, tdes_cbc_encrypt};
use crate::error::GpError;
use crate::session::StaticKeys;

/// Session-key derivation constants (first two bytes of the 16-byte
/// derivation data fed to 3DES-CBC under the matching static key).
const DERIVATION_ENC: [u8; 2] = [0x01, 0x82];
const DERIVATION_MAC: [u8; 2] = [0x01, 0x01];
const DERIVATION_DEK: [u8; 2] = [0x01, 0x81];

/// Derive one 16-byte session key `S` from a 16-byte static key, the
/// 2-byte sequence counter, and a derivation constant:
/// `S = 3DES-CBC(resize(static_key), 0^8, derivation_const ‖ seq ‖ 0^12)`.
pub fn derive_key(static_key: &[u8; 16], sequence_counter: [u8; 2], derivation_const: [u8; 2]) -> [u8; 16] {
    let static24 = resize_key_24(static_key);
    let mut derivation_data = [0u8; 16];
    derivation_data[0..2].copy_from_slice(&derivation_const);
    derivation_data[2..4].copy_from_slice(&sequence_counter);
    let cipher_out = tdes_cbc_encrypt(&static24, [0u8; 8], &derivation_data);
    cipher_out.try_into().expect("3DES-CBC of 16 bytes yields 16 bytes")
}

/// Compute a GP SCP02 cryptogram: `3DES-CBC-encrypt(key, 0^8, pad_80(parts))[-8:]`.
fn calculate_cryptogram(session_enc: &[u8; 16], parts: &[&[u8]]) -> [u8; 8] {
    let mut data = Vec::new();
    for part in parts {
        data.extend_from_slice(part);
    }
    let padded = pad_80(&data, 8);
    let key24 = resize_key_24(session_enc);
    let ciphertext = tdes_cbc_encrypt(&key24, [0u8; 8], &padded);
    let tail = &ciphertext[ciphertext.len() - 8..];
    tail.try_into().expect("8 bytes")
}

/// GP retail MAC (ISO/IEC 9797-1 MAC algorithm 3): single-DES CBC chaining
/// under `k1` over all padded blocks, with the final block additionally
/// decrypted under `k2` and re-encrypted under `k1`.
pub fn retail_mac(k1: &[u8; 8], k2: &[u8; 8], iv: [u8; 8], data: &[u8]) -> [u8; 8] {
    let padded = pad_80(data, 8);
    let mut prev = iv;
    for chunk in padded.chunks(8) {
        let mut block = [0u8; 8];
        for (b, (c, p)) in block.iter_mut().zip(chunk.iter().zip(prev.iter())) {
            *b = c ^ p;
        }
        prev = des_encrypt_block(k1, &block);
    }
    let step2 = des_decrypt_block(k2, &prev);
    des_encrypt_block(k1, &step2)
}

/// Session material and per-exchange state for an SCP02 channel.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Scp02Session {
    #[zeroize(skip)]
    pub(crate) keys: StaticKeys,
    session_enc: [u8; 16],
    session_mac: [u8; 16],
    session_dek: [u8; 16],
    sequence_counter: [u8; 2],
    #[zeroize(skip)]
    host_challenge: [u8; 8],
    #[zeroize(skip)]
    card_challenge: [u8; 6],
    last_mac: Option<[u8; 8]>,
    #[zeroize(skip)]
    security_level: SecurityLevel,
    #[zeroize(skip)]
    authenticated: bool,
}

impl std::fmt::Debug for Scp02Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scp02Session")
            .field("security_level", &self.security_level)
            .field("authenticated", &self.authenticated)
            .finish_non_exhaustive()
    }
}

impl Scp02Session {
    /// Generate a fresh, not-yet-authenticated session over `keys`.
    pub fn new(keys: StaticKeys) -> Self {
        Self {
            keys,
            session_enc: [0; 16],
            session_mac: [0; 16],
            session_dek: [0; 16],
            sequence_counter: [0; 2],
            host_challenge: [0; 8],
            card_challenge: [0; 6],
            last_mac: None,
            security_level: SecurityLevel::none(),
            authenticated: false,
        }
    }

    /// Build the `80 50 00 00 08 ‖ host_challenge` INITIALIZE UPDATE
    /// command, generating a fresh random host challenge.
    pub fn build_initialize_update(&mut self) -> Command {
        let mut host_challenge = [0u8; 8];
        rand::rng().fill_bytes(&mut host_challenge);
        self.host_challenge = host_challenge;
        Command::new_with_data(cla::GP, ins::INITIALIZE_UPDATE, 0x00, 0x00, host_challenge.to_vec())
    }

    /// Consume the INITIALIZE UPDATE response: derive session keys and
    /// verify the card cryptogram.
    ///
    /// Response layout: `diversification_data(10) ‖ key_info(2) ‖
    /// sequence_counter(2) ‖ card_challenge(6) ‖ card_cryptogram(8)`.
    pub fn process_initialize_update_response(&mut self, response: &Response) -> Result<(), GpError> {
        if !response.is_success() {
            return Err(GpError::CardStatus {
                status: response.status(),
                context: "INITIALIZE UPDATE",
            });
        }
        let data = response.payload();
        if data.len() != 28 {
            return Err(GpError::ProtocolViolation("INITIALIZE UPDATE response must be 28 bytes"));
        }

        let mut sequence_counter = [0u8; 2];
        sequence_counter.copy_from_slice(&data[12..14]);
        let mut card_challenge = [0u8; 6];
        card_challenge.copy_from_slice(&data[14..20]);
        let card_cryptogram: [u8; 8] = data[20..28].try_into().unwrap();

        self.sequence_counter = sequence_counter;
        self.card_challenge = card_challenge;

        let static_enc: [u8; 16] = self.keys.enc.clone().try_into().map_err(|_| {
            GpError::ProtocolViolation("SCP02 static keys must be 16 bytes")
        })?;
        let static_mac: [u8; 16] = self.keys.mac.clone().try_into().map_err(|_| {
            GpError::ProtocolViolation("SCP02 static keys must be 16 bytes")
        })?;
        let static_dek: [u8; 16] = self.keys.dek.clone().try_into().map_err(|_| {
            GpError::ProtocolViolation("SCP02 static keys must be 16 bytes")
        })?;

        self.session_enc = derive_key(&static_enc, sequence_counter, DERIVATION_ENC);
        self.session_mac = derive_key(&static_mac, sequence_counter, DERIVATION_MAC);
        self.session_dek = derive_key(&static_dek, sequence_counter, DERIVATION_DEK);

        let expected = calculate_cryptogram(
            &self.session_enc,
            &[&self.host_challenge, &sequence_counter, &card_challenge],
        );
        if expected != card_cryptogram {
            return Err(GpError::AuthFailure("card cryptogram mismatch"));
        }

        Ok(())
    }

    /// Build the EXTERNAL AUTHENTICATE command for the requested security
    /// level: `84 82 sec_level 00 10 ‖ host_cryptogram ‖ MAC`.
    pub fn build_external_authenticate(&mut self, security_level: SecurityLevel) -> Command {
        let host_cryptogram = calculate_cryptogram(
            &self.session_enc,
            &[&self.sequence_counter, &self.card_challenge, &self.host_challenge],
        );

        let mut body = vec![cla::MAC, ins::EXTERNAL_AUTHENTICATE, security_level.to_gp_byte(), 0x00, 0x10];
        body.extend_from_slice(&host_cryptogram);

        let k1: [u8; 8] = self.session_mac[0..8].try_into().unwrap();
        let k2: [u8; 8] = self.session_mac[8..16].try_into().unwrap();
        let mac = retail_mac(&k1, &k2, [0u8; 8], &body[..5 + 8]);
        self.last_mac = Some(mac);

        let mut data = host_cryptogram.to_vec();
        data.extend_from_slice(&mac);
        Command::new_with_data(cla::MAC, ins::EXTERNAL_AUTHENTICATE, security_level.to_gp_byte(), 0x00, data)
    }

    /// Record the result of EXTERNAL AUTHENTICATE.
    pub fn process_external_authenticate_response(
        &mut self,
        response: &Response,
        security_level: SecurityLevel,
    ) -> Result<(), GpError> {
        if !response.is_success() {
            return Err(GpError::AuthFailure("EXTERNAL AUTHENTICATE rejected"));
        }
        self.security_level = security_level;
        self.authenticated = true;
        Ok(())
    }

    /// Wrap `command` for transmission under the current security level.
    pub fn wrap(&mut self, command: &Command) -> Result<Command, GpError> {
        // A SELECT APDU always resets the session; the agent enforces this
        // by swapping the processor back to identity before this is
        // reached, so `wrap` never needs to special-case it.
        if self.security_level == SecurityLevel::none() {
            return Ok(command.clone());
        }

        let body = command.data().unwrap_or(&[]).to_vec();
        let mut cla_byte = command.class() | 0x04;

        let plain_header = [cla_byte, command.instruction(), command.p1(), command.p2()];

        let (enc_body, lc) = if self.security_level.is_encrypted() && !body.is_empty() {
            let padded = pad_80(&body, 8);
            let key24 = resize_key_24(&self.session_enc);
            let encrypted = tdes_cbc_encrypt(&key24, [0u8; 8], &padded);
            let lc = encrypted.len() + 8;
            (encrypted, lc)
        } else {
            let lc = body.len() + 8;
            (body, lc)
        };

        let mut mac_input = plain_header.to_vec();
        mac_input.push(lc as u8);
        mac_input.extend_from_slice(&enc_body);

        let k1: [u8; 8] = self.session_mac[0..8].try_into().unwrap();
        let k2: [u8; 8] = self.session_mac[8..16].try_into().unwrap();
        let iv = self.last_mac.map_or([0u8; 8], |last| des_encrypt_block(&k1, &last));
        let mac = retail_mac(&k1, &k2, iv, &mac_input);
        self.last_mac = Some(mac);

        let mut data = enc_body;
        data.extend_from_slice(&mac);

        cla_byte = plain_header[0];
        let mut wrapped = Command::new_with_data(cla_byte, command.instruction(), command.p1(), command.p2(), data);
        if let Some(le) = command.expected_length() {
            wrapped = wrapped.with_le(le);
        }
        Ok(wrapped)
    }

    /// Whether EXTERNAL AUTHENTICATE has completed successfully.
    pub const fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// The negotiated security level.
    pub const fn security_level(&self) -> SecurityLevel {
        self.security_level
    }

    /// Tear the session down: zeroize keys and forget all derived state.
    /// A subsequent SELECT APDU (or an explicit caller request) triggers
    /// this.
    pub fn reset(&mut self) {
        self.session_enc.zeroize();
        self.session_mac.zeroize();
        self.session_dek.zeroize();
        self.last_mac = None;
        self.security_level = SecurityLevel::none();
        self.authenticated = false;
    }
}

/// A [`CommandProcessor`]/[`SecureChannel`] wrapping commands under an
/// established SCP02 session.
#[derive(Clone)]
pub struct Scp02Channel {
    session: std::sync::Arc<std::sync::Mutex<Scp02Session>>,
}

impl std::fmt::Debug for Scp02Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scp02Channel").finish_non_exhaustive()
    }
}

impl Scp02Channel {
    /// Wrap an already-authenticated session for use as a command processor.
    pub fn new(session: Scp02Session) -> Self {
        Self {
            session: std::sync::Arc::new(std::sync::Mutex::new(session)),
        }
    }
}

impl CommandProcessor for Scp02Channel {
    #[instrument(skip(self, command, transport))]
    fn do_process_command(
        &mut self,
        command: &Command,
        transport: &mut dyn CardTransport,
    ) -> Result<Response, CoreError> {
        // A bare SELECT forces the session back to the unauthenticated
        // state, per the GP state machine.
        let is_select = command.instruction() == ins::SELECT;

        let wrapped = {
            let mut session = self.session.lock().expect("secure channel session poisoned");
            if is_select {
                debug!("SELECT observed on secure channel; resetting session");
                session.reset();
                command.clone()
            } else {
                session
                    .wrap(command)
                    .map_err(|e| CoreError::ProtocolViolation(Box::leak(e.to_string().into_boxed_str())))?
            }
        };

        transmit_with_policies(transport, &wrapped, TransmitPolicy::default())
    }

    fn security_level(&self) -> SecurityLevel {
        self.session.lock().map(|s| s.security_level()).unwrap_or_else(|_| SecurityLevel::none())
    }

    fn is_active(&self) -> bool {
        self.session.lock().map(|s| s.is_authenticated()).unwrap_or(false)
    }
}

impl SecureChannel for Scp02Channel {
    fn is_established(&self) -> bool {
        self.session.lock().map(|s| s.is_authenticated()).unwrap_or(false)
    }

    fn reset_session(&mut self) {
        if let Ok(mut session) = self.session.lock() {
            session.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_derive_key() {
        let card_key = hex!("404142434445464748494a4b4c4d4e4f");
        let seq = hex!("0065");
        let key = derive_key(&card_key, seq, DERIVATION_ENC);
        assert_eq!(key, hex!("85e72aaf47874218a202bf5ef891dd21"));
    }

    #[test]
    fn test_resize_key_24() {
        let key16 = hex!("404142434445464748494a4b4c4d4e4f");
        let resized = resize_key_24(&key16);
        assert_eq!(&resized[..16], &key16[..]);
        assert_eq!(&resized[16..], &key16[..8]);
    }

    #[test]
    fn test_cryptogram_against_gp_vector() {
        // GP test vector: static keys = 40..4F, sequence counter = 0060,
        // host challenge = 0001020304050607, card challenge = 0A0B0C0D0E0F.
        let static_enc = hex!("404142434445464748494a4b4c4d4e4f");
        let seq = hex!("0060");
        let host_challenge = hex!("0001020304050607");
        let card_challenge = hex!("0A0B0C0D0E0F");

        let session_enc = derive_key(&static_enc, seq, DERIVATION_ENC);
        let host_cryptogram = calculate_cryptogram(&session_enc, &[&seq, &card_challenge, &host_challenge]);
        assert_eq!(host_cryptogram, hex!("476617d8f582d30e"));
    }

    #[test]
    fn retail_mac_changes_with_chained_iv() {
        let k1 = [0x11u8; 8];
        let k2 = [0x22u8; 8];
        let mac_zero_iv = retail_mac(&k1, &k2, [0u8; 8], b"hello");
        let mac_other_iv = retail_mac(&k1, &k2, [0xFFu8; 8], b"hello");
        assert_ne!(mac_zero_iv, mac_other_iv);
    }

    #[test]
    fn select_resets_session_to_no_security() {
        let keys = StaticKeys::gp_test_keys();
        let mut session = Scp02Session::new(keys);
        session.security_level = SecurityLevel::c_mac();
        session.authenticated = true;
        session.last_mac = Some([0xAA; 8]);

        session.reset();

        assert_eq!(session.security_level(), SecurityLevel::none());
        assert!(!session.is_authenticated());
        assert!(session.last_mac.is_none());
    }
}
