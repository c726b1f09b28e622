//! Capability detection (§4.H): works out which Secure Channel Protocol,
//! `i` parameter, and key length a card expects before mutual
//! authentication begins.
//!
//! Two data sources are tried, in order. First, the passive route: GET DATA
//! for Card Recognition Data (tag `66`) and the Key Information Template
//! (tag `E0`) are read and cross-referenced. If that's inconclusive -
//! either object missing, or both protocols advertised with no usable key -
//! an active probe falls back to sending a redundant INITIALIZE UPDATE and
//! inspecting the card's reply.

use gp_apdu_core::command::Command;
use gp_apdu_core::executor::Executor;
use gp_apdu_core::tlv;
use tracing::{debug, instrument};

use crate::constants::{cla, get_data_p2, ins};
use crate::error::GpError;

/// Which Secure Channel Protocol a card negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScpVariant {
    /// SCP02: 3DES/CBC.
    Scp02,
    /// SCP03: AES/CMAC.
    Scp03,
}

/// The outcome of capability detection: enough to build the right
/// [`crate::session::SecureSession`] variant and size its keys.
#[derive(Debug, Clone, Copy)]
pub struct CapabilityDecision {
    /// The negotiated protocol.
    pub variant: ScpVariant,
    /// SCP02's `i` parameter, or SCP03's `i` parameter byte.
    pub i_param: u8,
    /// The key length this variant expects, in bytes (16 for SCP02's
    /// 2-key 3DES, 16/24/32 for SCP03's AES key sizes).
    pub key_length: usize,
}

/// One key-type/length component of a Key Information Template entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyComponent {
    /// The GP key type byte (`0x80` DES, `0x88` AES, ...).
    pub key_type: u8,
    /// Declared key length, in bytes.
    pub length: usize,
}

impl KeyComponent {
    fn is_aes(&self) -> bool {
        self.key_type == 0x88
    }

    fn is_des(&self) -> bool {
        !self.is_aes()
    }
}

/// One decoded Key Information Template entry (`E0` -> `C0`).
#[derive(Debug, Clone)]
pub struct KeyInfoEntry {
    /// Key identifier.
    pub key_id: u8,
    /// Key version number.
    pub key_version: u8,
    /// Key type/length components (more than one for composite keys).
    pub components: Vec<KeyComponent>,
}

fn parse_key_info_entry(value: &[u8]) -> Option<KeyInfoEntry> {
    if value.len() < 3 {
        return None;
    }
    let key_id = value[0];
    let key_version = value[1];
    let extended = value[2] == 0xFF;
    let mut components = Vec::new();
    let mut pos = 2;

    if extended {
        // `FF` marker already consumed conceptually; components repeat as
        // 2-byte type / 2-byte length until a non-`FF` type byte appears.
        pos += 1;
        while pos + 4 <= value.len() && value[pos] == 0xFF {
            let key_type = value[pos + 1];
            let length = u16::from_be_bytes([value[pos + 2], value[pos + 3]]) as usize;
            components.push(KeyComponent { key_type, length });
            pos += 4;
        }
    } else {
        while pos + 2 <= value.len() {
            let key_type = value[pos];
            let length = value[pos + 1] as usize;
            components.push(KeyComponent { key_type, length });
            pos += 2;
            // A trailing usage/access pair (when present) isn't a
            // type/length component; stop once nothing sane remains.
            if pos >= value.len() {
                break;
            }
        }
    }

    Some(KeyInfoEntry {
        key_id,
        key_version,
        components,
    })
}

/// Parse every `C0` entry nested under the `E0` Key Information Template.
pub fn parse_key_information(bytes: &[u8]) -> Result<Vec<KeyInfoEntry>, GpError> {
    let tree = tlv::parse(bytes)
        .map_err(|e| GpError::ProtocolViolation("malformed key information TLV").context(e.to_string()))?;
    Ok(tlv::find_all(&tree, &[&[0xE0], &[0xC0]])
        .into_iter()
        .filter_map(|node| node.as_bytes())
        .filter_map(parse_key_info_entry)
        .collect())
}

/// Parse the `scp_proto -> i_param` map out of Card Recognition Data, by
/// walking every OID nested under `66 -> 73 -> 64 -> 06`.
pub fn parse_scp_protocols(bytes: &[u8]) -> Result<Vec<(u8, u8)>, GpError> {
    let tree = tlv::parse(bytes).map_err(|e| {
        GpError::ProtocolViolation("malformed card recognition data").context(e.to_string())
    })?;
    Ok(tlv::find_all(&tree, &[&[0x66], &[0x73], &[0x64], &[0x06]])
        .into_iter()
        .filter_map(|node| node.as_bytes())
        .filter_map(|oid| {
            if oid.len() < 2 {
                return None;
            }
            Some((oid[oid.len() - 2], oid[oid.len() - 1]))
        })
        .collect())
}

fn get_data<E: Executor>(executor: &mut E, p2: u8) -> Result<Vec<u8>, GpError> {
    let cmd = Command::new_with_le(cla::GP, ins::GET_DATA, 0x00, p2, 0x00);
    let resp = executor.execute(&cmd)?;
    if !resp.is_success() {
        return Err(GpError::CardStatus {
            status: resp.status(),
            context: "GET DATA",
        });
    }
    Ok(resp.payload().to_vec())
}

fn key_for_id(entries: &[KeyInfoEntry], key_id: u8) -> Vec<&KeyInfoEntry> {
    entries.iter().filter(|e| e.key_id == key_id).collect()
}

fn first_component(entries: &[&KeyInfoEntry], is_match: impl Fn(&KeyComponent) -> bool) -> Option<KeyComponent> {
    entries
        .iter()
        .flat_map(|e| e.components.iter())
        .find(|c| is_match(c))
        .copied()
}

/// Send a redundant INITIALIZE UPDATE and infer the protocol from the
/// response shape, for cards whose Card Recognition Data or Key
/// Information don't resolve the decision on their own.
fn active_probe<E: Executor>(executor: &mut E, key_entries: &[KeyInfoEntry]) -> Result<CapabilityDecision, GpError> {
    let mut challenge = vec![0u8; 8];
    let cmd = Command::new_with_data(cla::GP, ins::INITIALIZE_UPDATE, 0x00, 0x00, challenge.clone());
    let mut resp = executor.execute(&cmd)?;

    if resp.status().is_wrong_le() {
        challenge = vec![0u8; 16];
        let retry = Command::new_with_data(cla::GP, ins::INITIALIZE_UPDATE, 0x00, 0x00, challenge);
        resp = executor.execute(&retry)?;
    }

    if !resp.is_success() {
        return Err(GpError::AuthFailure(
            "active capability probe: INITIALIZE UPDATE rejected",
        ));
    }

    let data = resp.payload();
    if data.len() < 13 {
        return Err(GpError::ProtocolViolation(
            "active capability probe: INITIALIZE UPDATE response too short",
        ));
    }

    let key_version = data[10];
    let scp_proto = data[11];

    match scp_proto {
        0x02 => Ok(CapabilityDecision {
            variant: ScpVariant::Scp02,
            i_param: 0x15,
            key_length: 16,
        }),
        0x03 => {
            let i_param = data[12];
            let key_length = key_entries
                .iter()
                .filter(|e| e.key_id == 0x01 && e.key_version == key_version)
                .flat_map(|e| e.components.iter())
                .next()
                .map(|c| c.length)
                .unwrap_or(16);
            Ok(CapabilityDecision {
                variant: ScpVariant::Scp03,
                i_param,
                key_length,
            })
        }
        _ => Err(GpError::UnsupportedFeature(
            "active capability probe: unrecognized SCP protocol byte",
        )),
    }
}

/// Decide which SCP variant, `i` parameter, and key length a card expects.
///
/// Reads Card Recognition Data and the Key Information Template; if the
/// card advertises only one protocol, that one wins outright. If it
/// advertises both, the first AES key with `key_id == 1` selects SCP03 and
/// the first DES-family key with `key_id == 1` selects SCP02 (in that
/// preference order); any other key-typed entry with `key_id == 1` is
/// tried next. If nothing resolves, falls back to an active probe.
#[instrument(skip(executor))]
pub fn detect<E: Executor>(executor: &mut E) -> Result<CapabilityDecision, GpError> {
    let crd = get_data(executor, get_data_p2::CARD_RECOGNITION_DATA).unwrap_or_default();
    let scp_protocols = if crd.is_empty() {
        Vec::new()
    } else {
        parse_scp_protocols(&crd)?
    };

    let key_info_bytes = get_data(executor, get_data_p2::KEY_INFORMATION).unwrap_or_default();
    let key_entries = if key_info_bytes.is_empty() {
        Vec::new()
    } else {
        parse_key_information(&key_info_bytes)?
    };

    let scp02_i_param = scp_protocols.iter().find(|(p, _)| *p == 0x02).map(|(_, i)| *i);
    let scp03_i_param = scp_protocols.iter().find(|(p, _)| *p == 0x03).map(|(_, i)| *i);

    debug!(?scp02_i_param, ?scp03_i_param, "parsed card recognition data");

    match (scp02_i_param, scp03_i_param) {
        (Some(i_param), None) => Ok(CapabilityDecision {
            variant: ScpVariant::Scp02,
            i_param,
            key_length: 16,
        }),
        (None, Some(i_param)) => {
            let id01 = key_for_id(&key_entries, 0x01);
            let length = first_component(&id01, KeyComponent::is_aes)
                .map(|c| c.length)
                .unwrap_or(16);
            Ok(CapabilityDecision {
                variant: ScpVariant::Scp03,
                i_param,
                key_length: length,
            })
        }
        (Some(scp02_i), Some(scp03_i)) => {
            let id01 = key_for_id(&key_entries, 0x01);
            if let Some(aes) = first_component(&id01, KeyComponent::is_aes) {
                return Ok(CapabilityDecision {
                    variant: ScpVariant::Scp03,
                    i_param: scp03_i,
                    key_length: aes.length,
                });
            }
            if let Some(des) = first_component(&id01, KeyComponent::is_des) {
                return Ok(CapabilityDecision {
                    variant: ScpVariant::Scp02,
                    i_param: scp02_i,
                    key_length: des.length,
                });
            }
            active_probe(executor, &key_entries)
        }
        (None, None) => active_probe(executor, &key_entries),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use gp_apdu_core::executor::CardExecutor;
    use gp_apdu_core::transport::MockTransport;

    /// `66 -> 73 -> 64 -> 06`, one OID ending `03 70` (SCP03, i=0x70).
    fn crd_scp03_only() -> Vec<u8> {
        let oid = [0x01, 0x02, 0x03, 0x70];
        let mut tag06 = vec![0x06, oid.len() as u8];
        tag06.extend_from_slice(&oid);
        let mut tag64 = vec![0x64, tag06.len() as u8];
        tag64.extend_from_slice(&tag06);
        let mut tag73 = vec![0x73, tag64.len() as u8];
        tag73.extend_from_slice(&tag64);
        let mut tag66 = vec![0x66, tag73.len() as u8];
        tag66.extend_from_slice(&tag73);
        tag66
    }

    /// `66 -> 73 -> 64 -> 06`, one OID ending `02 15` (SCP02, i=0x15).
    fn crd_scp02_only() -> Vec<u8> {
        let oid = [0x01, 0x02, 0x02, 0x15];
        let mut tag06 = vec![0x06, oid.len() as u8];
        tag06.extend_from_slice(&oid);
        let mut tag64 = vec![0x64, tag06.len() as u8];
        tag64.extend_from_slice(&tag06);
        let mut tag73 = vec![0x73, tag64.len() as u8];
        tag73.extend_from_slice(&tag64);
        let mut tag66 = vec![0x66, tag73.len() as u8];
        tag66.extend_from_slice(&tag73);
        tag66
    }

    /// `66 -> 73 -> 64 -> 06 06`, both an SCP02 and an SCP03 OID present.
    fn crd_both() -> Vec<u8> {
        let oid02 = [0x01, 0x02, 0x02, 0x15];
        let oid03 = [0x01, 0x02, 0x03, 0x70];
        let mut tag06a = vec![0x06, oid02.len() as u8];
        tag06a.extend_from_slice(&oid02);
        let mut tag06b = vec![0x06, oid03.len() as u8];
        tag06b.extend_from_slice(&oid03);
        let mut tag64 = vec![0x64, (tag06a.len() + tag06b.len()) as u8];
        tag64.extend_from_slice(&tag06a);
        tag64.extend_from_slice(&tag06b);
        let mut tag73 = vec![0x73, tag64.len() as u8];
        tag73.extend_from_slice(&tag64);
        let mut tag66 = vec![0x66, tag73.len() as u8];
        tag66.extend_from_slice(&tag73);
        tag66
    }

    /// `E0 -> C0`, one entry: key_id=1, key_version=0x30, AES-128.
    fn key_info_aes_128() -> Vec<u8> {
        let entry = [0x01, 0x30, 0x88, 0x10];
        let mut tag_c0 = vec![0xC0, entry.len() as u8];
        tag_c0.extend_from_slice(&entry);
        let mut tag_e0 = vec![0xE0, tag_c0.len() as u8];
        tag_e0.extend_from_slice(&tag_c0);
        tag_e0
    }

    /// `E0 -> C0`, one entry: key_id=1, key_version=0x20, DES-16.
    fn key_info_des_16() -> Vec<u8> {
        let entry = [0x01, 0x20, 0x80, 0x10];
        let mut tag_c0 = vec![0xC0, entry.len() as u8];
        tag_c0.extend_from_slice(&entry);
        let mut tag_e0 = vec![0xE0, tag_c0.len() as u8];
        tag_e0.extend_from_slice(&tag_c0);
        tag_e0
    }

    fn ok_response(mut payload: Vec<u8>) -> Bytes {
        payload.extend_from_slice(&[0x90, 0x00]);
        Bytes::from(payload)
    }

    #[test]
    fn scenario_1_parses_scp03_s16_oid() {
        let protocols = parse_scp_protocols(&crd_scp03_only()).unwrap();
        assert_eq!(protocols, vec![(0x03, 0x70)]);
    }

    #[test]
    fn parses_aes_128_key_info_entry() {
        let entries = parse_key_information(&key_info_aes_128()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key_id, 0x01);
        assert_eq!(entries[0].key_version, 0x30);
        assert_eq!(entries[0].components, vec![KeyComponent { key_type: 0x88, length: 16 }]);
    }

    /// §8 scenario 1: CRD advertises only SCP03 with i=0x70, key info has a
    /// single AES-128 key with key_id=1; the decision must be SCP03/0x70/16.
    #[test]
    fn detect_scp03_s16_only() {
        let transport = MockTransport::new(vec![ok_response(crd_scp03_only()), ok_response(key_info_aes_128())]);
        let mut executor = CardExecutor::new(transport);
        let decision = detect(&mut executor).unwrap();
        assert_eq!(decision.variant, ScpVariant::Scp03);
        assert_eq!(decision.i_param, 0x70);
        assert_eq!(decision.key_length, 16);
    }

    #[test]
    fn detect_scp02_only() {
        let transport = MockTransport::new(vec![ok_response(crd_scp02_only()), ok_response(key_info_des_16())]);
        let mut executor = CardExecutor::new(transport);
        let decision = detect(&mut executor).unwrap();
        assert_eq!(decision.variant, ScpVariant::Scp02);
        assert_eq!(decision.i_param, 0x15);
        assert_eq!(decision.key_length, 16);
    }

    #[test]
    fn detect_prefers_scp03_aes_when_both_advertised() {
        let transport = MockTransport::new(vec![ok_response(crd_both()), ok_response(key_info_aes_128())]);
        let mut executor = CardExecutor::new(transport);
        let decision = detect(&mut executor).unwrap();
        assert_eq!(decision.variant, ScpVariant::Scp03);
        assert_eq!(decision.i_param, 0x70);
        assert_eq!(decision.key_length, 16);
    }

    #[test]
    fn detect_falls_back_to_scp02_des_when_both_advertised_but_no_aes_key() {
        let transport = MockTransport::new(vec![ok_response(crd_both()), ok_response(key_info_des_16())]);
        let mut executor = CardExecutor::new(transport);
        let decision = detect(&mut executor).unwrap();
        assert_eq!(decision.variant, ScpVariant::Scp02);
        assert_eq!(decision.i_param, 0x15);
        assert_eq!(decision.key_length, 16);
    }

    /// Neither GET DATA object resolves anything: falls back to the active
    /// probe, which sends a redundant INITIALIZE UPDATE and reads the SCP
    /// protocol byte (0x03 = SCP03) out of its response.
    #[test]
    fn detect_falls_back_to_active_probe_when_crd_and_key_info_absent() {
        let mut probe_response = vec![0u8; 10];
        probe_response.push(0x30); // key_version
        probe_response.push(0x03); // scp_proto = SCP03
        probe_response.push(0x70); // i_param
        let transport = MockTransport::new(vec![
            Bytes::from_static(&[0x6A, 0x88]), // GET DATA (CRD): not found
            Bytes::from_static(&[0x6A, 0x88]), // GET DATA (key info): not found
            ok_response(probe_response),
        ]);
        let mut executor = CardExecutor::new(transport);
        let decision = detect(&mut executor).unwrap();
        assert_eq!(decision.variant, ScpVariant::Scp03);
        assert_eq!(decision.i_param, 0x70);
    }
}
