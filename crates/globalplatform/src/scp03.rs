//! SCP03: the AES/CMAC GlobalPlatform secure channel.

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
use crate::crypto::{aes_cbc_encrypt, aes_cmac, aes_ecb_encrypt_block, pad_80};
use crate::error::GpError;
use crate::session::StaticKeys;

/// Session-key derivation labels, fed into the NIST SP 800-108 counter-mode
/// KDF realized as CMAC-AES.
const LABEL_CARD_CRYPTOGRAM: u8 = 0x00;
const LABEL_HOST_CRYPTOGRAM: u8 = 0x01;
const LABEL_SESSION_ENC: u8 = 0x04;
const LABEL_SESSION_MAC: u8 = 0x06;

/// Build one iteration's KDF input block:
/// `0^11 ‖ label ‖ 0x00 ‖ L(2B bit-length of output) ‖ counter(1B) ‖ context`.
fn kdf_block(label: u8, counter: u8, output_bit_len: u16, context: &[u8]) -> Vec<u8> {
    let mut block = vec![0u8; 11];
    block.push(label);
    block.push(0x00);
    block.extend_from_slice(&output_bit_len.to_be_bytes());
    block.push(counter);
    block.extend_from_slice(context);
    block
}

/// NIST SP 800-108 counter-mode KDF realized as CMAC-AES: derive `key_len`
/// bytes of key material from `kdf_key` under `label`, iterating a 1-byte
/// counter starting at 1 until enough CMAC blocks have been produced.
///
/// Per GlobalPlatform's SCP03 Amendment D, both the session ENC and session
/// MAC keys are derived under the *static ENC* key; the static MAC key plays
/// no role in key derivation, only in host/card cryptogram and command MAC
/// computation once the session keys exist.
fn derive_session_key(kdf_key: &[u8], label: u8, key_len: usize, host_challenge: &[u8], card_challenge: &[u8]) -> Vec<u8> {
    let mut context = Vec::with_capacity(host_challenge.len() + card_challenge.len());
    context.extend_from_slice(host_challenge);
    context.extend_from_slice(card_challenge);

    let blocks_needed = key_len.div_ceil(16);
    let mut material = Vec::with_capacity(blocks_needed * 16);
    for counter in 1..=blocks_needed as u8 {
        let block = kdf_block(label, counter, (key_len * 8) as u16, &context);
        material.extend_from_slice(&aes_cmac(kdf_key, &block));
    }
    material.truncate(key_len);
    material
}

/// Compute a cryptogram (card or host) under the session MAC key:
/// `CMAC-AES(session_mac, kdf_block(label, 1, mac_len*8, host_challenge ‖ card_challenge))[..mac_len]`.
fn compute_cryptogram(session_mac: &[u8], label: u8, mac_len: usize, host_challenge: &[u8], card_challenge: &[u8]) -> Vec<u8> {
    let mut context = Vec::with_capacity(host_challenge.len() + card_challenge.len());
    context.extend_from_slice(host_challenge);
    context.extend_from_slice(card_challenge);
    let block = kdf_block(label, 1, (mac_len * 8) as u16, &context);
    aes_cmac(session_mac, &block)[..mac_len].to_vec()
}

/// Render a 64-bit encryption counter as the 16-byte big-endian block SCP03
/// encrypts under the session ENC key to obtain the per-command IV.
fn counter_block(counter: u64) -> [u8; 16] {
    let mut block = [0u8; 16];
    block[8..].copy_from_slice(&counter.to_be_bytes());
    block
}

/// Session material and per-exchange state for an SCP03 channel.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Scp03Session {
    #[zeroize(skip)]
    pub(crate) keys: StaticKeys,
    session_enc: Vec<u8>,
    session_mac: Vec<u8>,
    #[zeroize(skip)]
    challenge_len: usize,
    #[zeroize(skip)]
    host_challenge: Vec<u8>,
    #[zeroize(skip)]
    card_challenge: Vec<u8>,
    mac_chain: [u8; 16],
    #[zeroize(skip)]
    encryption_counter: u64,
    #[zeroize(skip)]
    security_level: SecurityLevel,
    #[zeroize(skip)]
    authenticated: bool,
}

impl std::fmt::Debug for Scp03Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scp03Session")
            .field("challenge_len", &self.challenge_len)
            .field("security_level", &self.security_level)
            .field("authenticated", &self.authenticated)
            .finish_non_exhaustive()
    }
}

impl Scp03Session {
    /// Generate a fresh, not-yet-authenticated session over `keys`. `i_param`
    /// is the capability detector's `i` byte: bit 4 (`0x10`) selects S16
    /// (16-byte challenges) over the S8 default.
    pub fn new(keys: StaticKeys, i_param: u8) -> Self {
        let challenge_len = if i_param & 0x10 != 0 { 16 } else { 8 };
        Self {
            keys,
            session_enc: Vec::new(),
            session_mac: Vec::new(),
            challenge_len,
            host_challenge: Vec::new(),
            card_challenge: Vec::new(),
            mac_chain: [0u8; 16],
            encryption_counter: 0,
            security_level: SecurityLevel::none(),
            authenticated: false,
        }
    }

    /// Build `80 50 00 00 len ‖ host_challenge`, generating a fresh random
    /// challenge of the negotiated length.
    pub fn build_initialize_update(&mut self) -> Command {
        let mut host_challenge = vec![0u8; self.challenge_len];
        rand::rng().fill_bytes(&mut host_challenge);
        self.host_challenge = host_challenge.clone();
        Command::new_with_data(cla::GP, ins::INITIALIZE_UPDATE, 0x00, 0x00, host_challenge)
    }

    /// Consume the INITIALIZE UPDATE response: derive session keys and
    /// verify the card cryptogram.
    ///
    /// Response layout: `diversification_data(10) ‖ key_info(3) ‖
    /// card_challenge(len) ‖ card_cryptogram(len) [‖ sequence_counter(3)]`.
    pub fn process_initialize_update_response(&mut self, response: &Response) -> Result<(), GpError> {
        if !response.is_success() {
            return Err(GpError::CardStatus {
                status: response.status(),
                context: "INITIALIZE UPDATE",
            });
        }
        let data = response.payload();
        let len = self.challenge_len;
        let fixed_len = 13 + 2 * len;
        if data.len() != fixed_len && data.len() != fixed_len + 3 {
            return Err(GpError::ProtocolViolation("INITIALIZE UPDATE response has unexpected length"));
        }

        let card_challenge = data[13..13 + len].to_vec();
        let card_cryptogram = data[13 + len..13 + 2 * len].to_vec();
        self.card_challenge = card_challenge.clone();

        let key_len = self.keys.enc.len();
        self.session_enc = derive_session_key(&self.keys.enc, LABEL_SESSION_ENC, key_len, &self.host_challenge, &card_challenge);
        self.session_mac = derive_session_key(&self.keys.enc, LABEL_SESSION_MAC, key_len, &self.host_challenge, &card_challenge);

        let expected = compute_cryptogram(&self.session_mac, LABEL_CARD_CRYPTOGRAM, len, &self.host_challenge, &card_challenge);
        if expected != card_cryptogram {
            return Err(GpError::AuthFailure("card cryptogram mismatch"));
        }

        Ok(())
    }

    /// Build the EXTERNAL AUTHENTICATE command for the requested security
    /// level: `84 82 sec_level 00 (len+mac_len) ‖ host_cryptogram ‖ MAC`.
    pub fn build_external_authenticate(&mut self, security_level: SecurityLevel) -> Command {
        let mac_len = self.challenge_len;
        let host_cryptogram =
            compute_cryptogram(&self.session_mac, LABEL_HOST_CRYPTOGRAM, mac_len, &self.host_challenge, &self.card_challenge);

        let lc = (host_cryptogram.len() + mac_len) as u8;
        let header = [cla::MAC, ins::EXTERNAL_AUTHENTICATE, security_level.to_gp_byte(), 0x00, lc];

        let mut mac_input = self.mac_chain.to_vec();
        mac_input.extend_from_slice(&header);
        mac_input.extend_from_slice(&host_cryptogram);
        let tag = aes_cmac(&self.session_mac, &mac_input);
        self.mac_chain = tag;

        let mut data = host_cryptogram;
        data.extend_from_slice(&tag[..mac_len]);
        Command::new_with_data(cla::MAC, ins::EXTERNAL_AUTHENTICATE, security_level.to_gp_byte(), 0x00, data)
    }

    /// Record the result of EXTERNAL AUTHENTICATE: on success the
    /// encryption counter starts at 1.
    pub fn process_external_authenticate_response(
        &mut self,
        response: &Response,
        security_level: SecurityLevel,
    ) -> Result<(), GpError> {
        if !response.is_success() {
            return Err(GpError::AuthFailure("EXTERNAL AUTHENTICATE rejected"));
        }
        self.security_level = security_level;
        self.encryption_counter = 1;
        self.authenticated = true;
        Ok(())
    }

    /// Wrap `command` for transmission under the current security level.
    pub fn wrap(&mut self, command: &Command) -> Result<Command, GpError> {
        if self.security_level == SecurityLevel::none() {
            return Ok(command.clone());
        }

        let body = command.data().unwrap_or(&[]).to_vec();
        let mac_len = self.challenge_len;

        let enc_body = if self.security_level.is_encrypted() && !body.is_empty() {
            let iv = aes_ecb_encrypt_block(&self.session_enc, &counter_block(self.encryption_counter));
            aes_cbc_encrypt(&self.session_enc, iv, &pad_80(&body, 16))
        } else {
            body
        };

        let cla_byte = command.class() | cla::SECURE_MESSAGING;
        let lc = (enc_body.len() + mac_len) as u8;
        let header = [cla_byte, command.instruction(), command.p1(), command.p2(), lc];

        let mut mac_input = self.mac_chain.to_vec();
        mac_input.extend_from_slice(&header);
        mac_input.extend_from_slice(&enc_body);
        let tag = aes_cmac(&self.session_mac, &mac_input);
        self.mac_chain = tag;

        // The encryption counter advances for every authenticated command,
        // whether or not it carries data, and regardless of the eventual
        // status word.
        self.encryption_counter += 1;

        let mut data = enc_body;
        data.extend_from_slice(&tag[..mac_len]);

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
    pub fn reset(&mut self) {
        self.session_enc.zeroize();
        self.session_mac.zeroize();
        self.mac_chain = [0u8; 16];
        self.encryption_counter = 0;
        self.security_level = SecurityLevel::none();
        self.authenticated = false;
    }
}

/// A [`CommandProcessor`]/[`SecureChannel`] wrapping commands under an
/// established SCP03 session.
#[derive(Clone)]
pub struct Scp03Channel {
    session: std::sync::Arc<std::sync::Mutex<Scp03Session>>,
}

impl std::fmt::Debug for Scp03Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scp03Channel").finish_non_exhaustive()
    }
}

impl Scp03Channel {
    /// Wrap an already-authenticated session for use as a command processor.
    pub fn new(session: Scp03Session) -> Self {
        Self {
            session: std::sync::Arc::new(std::sync::Mutex::new(session)),
        }
    }
}

impl CommandProcessor for Scp03Channel {
    #[instrument(skip(self, command, transport))]
    fn do_process_command(
        &mut self,
        command: &Command,
        transport: &mut dyn CardTransport,
    ) -> Result<Response, CoreError> {
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

impl SecureChannel for Scp03Channel {
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

    #[test]
    fn kdf_block_layout() {
        let block = kdf_block(0x04, 1, 128, &[0xAA; 16]);
        assert_eq!(&block[0..11], &[0u8; 11]);
        assert_eq!(block[11], 0x04);
        assert_eq!(block[12], 0x00);
        assert_eq!(&block[13..15], &[0x00, 0x80]);
        assert_eq!(block[15], 1);
        assert_eq!(&block[16..], &[0xAA; 16]);
    }

    #[test]
    fn derive_session_key_is_deterministic_and_sized() {
        let static_enc = [0x11u8; 16];
        let host_challenge = [0x22u8; 8];
        let card_challenge = [0x33u8; 8];
        let enc = derive_session_key(&static_enc, LABEL_SESSION_ENC, 16, &host_challenge, &card_challenge);
        let mac = derive_session_key(&static_enc, LABEL_SESSION_MAC, 16, &host_challenge, &card_challenge);
        assert_eq!(enc.len(), 16);
        assert_eq!(mac.len(), 16);
        assert_ne!(enc, mac);

        let enc_again = derive_session_key(&static_enc, LABEL_SESSION_ENC, 16, &host_challenge, &card_challenge);
        assert_eq!(enc, enc_again);
    }

    #[test]
    fn derive_session_key_handles_multi_block_lengths() {
        let static_enc = [0x44u8; 32];
        let host_challenge = [0x55u8; 16];
        let card_challenge = [0x66u8; 16];
        let enc = derive_session_key(&static_enc, LABEL_SESSION_ENC, 32, &host_challenge, &card_challenge);
        assert_eq!(enc.len(), 32);
    }

    #[test]
    fn counter_block_places_value_in_trailing_bytes() {
        let block = counter_block(1);
        assert_eq!(&block[..8], &[0u8; 8]);
        assert_eq!(&block[8..], &1u64.to_be_bytes());
    }

    #[test]
    fn select_resets_session_to_no_security() {
        let keys = StaticKeys::gp_test_keys();
        let mut session = Scp03Session::new(keys, 0x00);
        session.security_level = SecurityLevel::c_mac();
        session.authenticated = true;
        session.encryption_counter = 7;

        session.reset();

        assert_eq!(session.security_level(), SecurityLevel::none());
        assert!(!session.is_authenticated());
        assert_eq!(session.encryption_counter, 0);
    }

    #[test]
    fn i_param_selects_challenge_length() {
        let keys = StaticKeys::gp_test_keys();
        assert_eq!(Scp03Session::new(keys.clone(), 0x70).challenge_len, 16);
        assert_eq!(Scp03Session::new(keys, 0x00).challenge_len, 8);
    }
}
