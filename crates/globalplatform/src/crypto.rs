//! Low-level block-cipher primitives shared by the SCP02 and SCP03 engines.
//!
//! Plain CBC encryption and padding go through `cbc::Encryptor` and
//! `block_padding::Iso7816`, same as the teacher's stack. The one thing
//! that stays a hand-rolled loop is GP's retail-MAC chaining in
//! [`crate::scp02::retail_mac`], which mixes two different keys mid-chain
//! and so doesn't fit a single `cbc`/`cbc-mac` call.

use aes::{Aes128, Aes192, Aes256};
use block_padding::{Iso7816, RawPadding};
use cbc_mac::CbcMac;
use cipher::{BlockDecrypt, BlockEncrypt, BlockEncryptMut, BlockSizeUser, KeyInit, KeyIvInit, generic_array::GenericArray};
use cmac::{Cmac, Mac};
use des::{Des, TdesEde3};

/// ISO/IEC 7816-4 padding: append `0x80`, then zero bytes, up to the next
/// multiple of `block_size`. If `data` is already block-aligned a full
/// extra block of padding is added, matching the GP spec's own examples
/// (`host_challenge ‖ ... ‖ 80 00 00 00 00 00 00 00`).
pub fn pad_80(data: &[u8], block_size: usize) -> Vec<u8> {
    let full_blocks = data.len() / block_size;
    let remainder = data.len() - full_blocks * block_size;
    let mut padded = vec![0u8; (full_blocks + 1) * block_size];
    padded[..data.len()].copy_from_slice(data);
    Iso7816::raw_pad(&mut padded[full_blocks * block_size..], remainder);
    padded
}

/// Single-DES ECB encrypt of one 8-byte block, via a one-block CBC-MAC
/// with a zero IV (equivalent to a bare encrypt since there's nothing to
/// chain with), the same construction the teacher uses for its ICV step.
pub fn des_encrypt_block(key: &[u8; 8], block: &[u8; 8]) -> [u8; 8] {
    let key = GenericArray::from_slice(key);
    let mut mac = <CbcMac<Des> as Mac>::new(key);
    mac.update(block);
    mac.finalize().into_bytes().as_slice().try_into().expect("8-byte block")
}

/// Single-DES ECB decrypt of one 8-byte block.
pub fn des_decrypt_block(key: &[u8; 8], block: &[u8; 8]) -> [u8; 8] {
    let cipher = Des::new_from_slice(key).expect("8-byte DES key");
    let mut buf = GenericArray::clone_from_slice(block);
    cipher.decrypt_block(&mut buf);
    buf.as_slice().try_into().expect("8-byte block")
}

/// Triple-DES (3-key, EDE) ECB encrypt of one 8-byte block.
pub fn tdes_encrypt_block(key: &[u8; 24], block: &[u8; 8]) -> [u8; 8] {
    let cipher = TdesEde3::new_from_slice(key).expect("24-byte 3DES key");
    let mut buf = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut buf);
    buf.as_slice().try_into().expect("8-byte block")
}

/// Triple-DES (3-key, EDE) ECB decrypt of one 8-byte block.
pub fn tdes_decrypt_block(key: &[u8; 24], block: &[u8; 8]) -> [u8; 8] {
    let cipher = TdesEde3::new_from_slice(key).expect("24-byte 3DES key");
    let mut buf = GenericArray::clone_from_slice(block);
    cipher.decrypt_block(&mut buf);
    buf.as_slice().try_into().expect("8-byte block")
}

fn cbc_encrypt_blocks<C: BlockEncryptMut + BlockSizeUser>(mut encryptor: C, data: &mut [u8]) {
    let block_size = C::block_size();
    for chunk in data.chunks_mut(block_size) {
        encryptor.encrypt_block_mut(GenericArray::from_mut_slice(chunk));
    }
}

/// Triple-DES CBC encrypt over `data`, which must already be a multiple of
/// 8 bytes. Returns the full chain of ciphertext blocks.
pub fn tdes_cbc_encrypt(key: &[u8; 24], iv: [u8; 8], data: &[u8]) -> Vec<u8> {
    assert_eq!(data.len() % 8, 0, "3DES-CBC input must be block-aligned");
    let mut out = data.to_vec();
    let encryptor =
        cbc::Encryptor::<TdesEde3>::new_from_slices(key, &iv).expect("valid 3DES key/iv");
    cbc_encrypt_blocks(encryptor, &mut out);
    out
}

/// Expand a 16-byte double-length 3DES key to its explicit 24-byte 3-key
/// form `K1 ‖ K2 ‖ K1`, as GlobalPlatform's session-key derivation requires.
pub fn resize_key_24(key16: &[u8; 16]) -> [u8; 24] {
    let mut out = [0u8; 24];
    out[..16].copy_from_slice(key16);
    out[16..].copy_from_slice(&key16[..8]);
    out
}

/// XOR two equal-length byte slices.
pub fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
}

/// AES-CMAC (NIST SP 800-38B) over `data` under `key`, whose length selects
/// AES-128/192/256. Returns the full 16-byte tag; SCP03 truncates it to the
/// negotiated challenge length itself.
pub fn aes_cmac(key: &[u8], data: &[u8]) -> [u8; 16] {
    fn tag(mut mac: impl Mac, data: &[u8]) -> [u8; 16] {
        mac.update(data);
        mac.finalize().into_bytes().as_slice().try_into().expect("16-byte CMAC tag")
    }

    match key.len() {
        16 => tag(Cmac::<Aes128>::new_from_slice(key).expect("valid AES-128 key"), data),
        24 => tag(Cmac::<Aes192>::new_from_slice(key).expect("valid AES-192 key"), data),
        32 => tag(Cmac::<Aes256>::new_from_slice(key).expect("valid AES-256 key"), data),
        other => panic!("unsupported AES key length: {other}"),
    }
}

/// AES-ECB encrypt of one block, used as the "CBC with a single block and a
/// fresh IV" construction SCP03 uses to derive its per-command encryption
/// IV from the counter.
pub fn aes_ecb_encrypt_block(key: &[u8], block: &[u8; 16]) -> [u8; 16] {
    let mut buf = GenericArray::clone_from_slice(block);
    match key.len() {
        16 => Aes128::new_from_slice(key).expect("valid AES-128 key").encrypt_block(&mut buf),
        24 => Aes192::new_from_slice(key).expect("valid AES-192 key").encrypt_block(&mut buf),
        32 => Aes256::new_from_slice(key).expect("valid AES-256 key").encrypt_block(&mut buf),
        other => panic!("unsupported AES key length: {other}"),
    }
    buf.as_slice().try_into().expect("16-byte block")
}

/// AES-CBC encrypt over `data`, which must already be a multiple of 16
/// bytes.
pub fn aes_cbc_encrypt(key: &[u8], iv: [u8; 16], data: &[u8]) -> Vec<u8> {
    assert_eq!(data.len() % 16, 0, "AES-CBC input must be block-aligned");
    let mut out = data.to_vec();
    match key.len() {
        16 => cbc_encrypt_blocks(
            cbc::Encryptor::<Aes128>::new_from_slices(key, &iv).expect("valid AES-128 key/iv"),
            &mut out,
        ),
        24 => cbc_encrypt_blocks(
            cbc::Encryptor::<Aes192>::new_from_slices(key, &iv).expect("valid AES-192 key/iv"),
            &mut out,
        ),
        32 => cbc_encrypt_blocks(
            cbc::Encryptor::<Aes256>::new_from_slices(key, &iv).expect("valid AES-256 key/iv"),
            &mut out,
        ),
        other => panic!("unsupported AES key length: {other}"),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_to_next_block() {
        assert_eq!(pad_80(&[1, 2, 3], 8), vec![1, 2, 3, 0x80, 0, 0, 0, 0]);
        assert_eq!(
            pad_80(&[0; 8], 8),
            vec![0, 0, 0, 0, 0, 0, 0, 0, 0x80, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn resize_key_repeats_first_half() {
        let key = [0xAAu8; 16];
        let resized = resize_key_24(&key);
        assert_eq!(&resized[16..], &key[..8]);
    }
}
