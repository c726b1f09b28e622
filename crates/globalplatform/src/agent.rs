//! Top-level GP orchestration (§4.I): mutual authentication, LOAD/INSTALL/
//! DELETE/GET STATUS command sequencing, driven over a generic
//! [`CardTransport`].
//!
//! [`GpAgent`] owns a [`CardExecutor`] and an explicit [`SessionState`],
//! mirroring the way [`crate::scp02::Scp02Channel`]/[`crate::scp03::Scp03Channel`]
//! each own one [`gp_apdu_core::processor::secure::SecurityLevel`]: state is
//! a small enum, not a pair of booleans, so a caller can't observe
//! "authenticated but not connected".

use gp_apdu_core::command::Command;
use gp_apdu_core::executor::{CardExecutor, Executor};
use gp_apdu_core::tlv;
use gp_apdu_core::transport::CardTransport;
use tracing::{info, instrument};

use crate::archive::CapComponents;
use crate::cap::ComponentKind;
use crate::capability::{self, ScpVariant};
use crate::constants::{cla, delete_p2, get_status_p1, get_status_p2, install_p1, ins, load_p1, select_p1, tags, SECURITY_DOMAIN_AID};
use crate::error::GpError;
use crate::registry::{self, ApplicationRecord, PackageRecord};
use crate::scp02::{Scp02Channel, Scp02Session};
use crate::scp03::{Scp03Channel, Scp03Session};
use crate::session::StaticKeys;

pub use gp_apdu_core::processor::secure::SecurityLevel;

/// Transient state bound to one reader connection: the AID currently
/// selected on-card, if any.
#[derive(Debug, Clone, Default)]
pub struct CardSession {
    /// The AID of the application (or security domain) last SELECTed.
    pub selected_aid: Option<Vec<u8>>,
}

/// The GP session state machine. A bare SELECT, or an explicit
/// [`GpAgent::reset_session`], always drops back to `Connected`; only
/// [`GpAgent::mutual_auth`] can advance to `Authenticated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No transport activity has happened yet.
    #[default]
    Disconnected,
    /// A card is selected but no secure channel is established.
    Connected,
    /// Mutual authentication has completed; content-management operations
    /// are permitted.
    Authenticated,
}

/// Where a caller's explicit component ordering pins components, relative
/// to the default install order.
#[derive(Debug, Clone, Default)]
pub struct ComponentOrder {
    /// Components pinned to the front, in the given order.
    pub head: Vec<ComponentKind>,
    /// Components pinned to the back, in the given order.
    pub tail: Vec<ComponentKind>,
}

/// Caller-supplied LOAD chunk sizes, applied to either the leading or
/// trailing chunks of the load file data block; everything else uses the
/// default chunk size.
#[derive(Debug, Clone)]
pub struct ChunkHints {
    /// Requested chunk sizes, in the order they apply.
    pub sizes: Vec<usize>,
    /// If `true`, sizes pin the trailing chunks; otherwise the leading ones.
    pub apply_to_tail: bool,
}

/// The result of [`GpAgent::list_content`]: the registry split into ISD,
/// applications/SSDs, and packages, matching the three GET STATUS sweeps.
#[derive(Debug, Clone, Default)]
pub struct RegistryListing {
    /// The Issuer Security Domain's own registry entry (usually exactly
    /// one record).
    pub isd: Vec<ApplicationRecord>,
    /// Installed applications and Supplementary Security Domains.
    pub applications: Vec<ApplicationRecord>,
    /// Loaded executable load files (packages).
    pub packages: Vec<PackageRecord>,
}

/// Default CAP component load order, per §4.I. Note `export` precedes
/// `constantpool` here even though the constant pool component has a lower
/// CAP tag number - this is the order real install tooling sends them in,
/// not declaration order.
const DEFAULT_COMPONENT_ORDER: &[ComponentKind] = &[
    ComponentKind::Header,
    ComponentKind::Directory,
    ComponentKind::Import,
    ComponentKind::Applet,
    ComponentKind::Class,
    ComponentKind::Method,
    ComponentKind::StaticField,
    ComponentKind::Export,
    ComponentKind::ConstantPool,
    ComponentKind::ReferenceLocation,
    ComponentKind::StaticResources,
    ComponentKind::Descriptor,
];

const DEFAULT_CHUNK_SIZE: usize = 100;

fn component_stem(components: &CapComponents, stem: &str) -> Option<&[u8]> {
    components
        .get(&format!("{stem}.cap"))
        .or_else(|| components.get(&format!("{stem}.capx")))
}

fn known_stems() -> &'static [&'static str] {
    &[
        "header",
        "directory",
        "applet",
        "import",
        "constantpool",
        "class",
        "method",
        "staticfield",
        "reflocation",
        "export",
        "descriptor",
        "debug",
        "staticresources",
    ]
}

fn custom_component_names(components: &CapComponents) -> Vec<String> {
    let mut names: Vec<String> = components
        .names()
        .filter(|name| {
            let stem = name
                .rsplit_once('.')
                .map(|(s, _)| s)
                .unwrap_or(name)
                .to_ascii_lowercase();
            !known_stems().contains(&stem.as_str())
        })
        .map(str::to_string)
        .collect();
    names.sort();
    names
}

fn ordered_component_stems(order_hints: &ComponentOrder) -> Vec<ComponentKind> {
    let mut order = Vec::new();
    for kind in &order_hints.head {
        if !order.contains(kind) {
            order.push(*kind);
        }
    }
    for kind in DEFAULT_COMPONENT_ORDER {
        if !order_hints.head.contains(kind) && !order_hints.tail.contains(kind) && !order.contains(kind) {
            order.push(*kind);
        }
    }
    for kind in &order_hints.tail {
        if !order.contains(kind) {
            order.push(*kind);
        }
    }
    order
}

/// Concatenate a CAP archive's components (debug already stripped) in the
/// order `order_hints` implies, skipping any component not present.
pub fn build_load_file_data(components: &CapComponents, order_hints: &ComponentOrder) -> Vec<u8> {
    let mut data = Vec::new();
    for kind in ordered_component_stems(order_hints) {
        if let Some(stem) = kind.filename_stem() {
            if let Some(bytes) = component_stem(components, stem) {
                data.extend_from_slice(bytes);
            }
        }
    }
    for name in custom_component_names(components) {
        if let Some(bytes) = components.get(&name) {
            data.extend_from_slice(bytes);
        }
    }
    data
}

fn ber_length_prefix(n: usize) -> Vec<u8> {
    if n <= 0x7F {
        return vec![n as u8];
    }
    let mut be = Vec::new();
    let mut v = n;
    while v > 0 {
        be.insert(0, (v & 0xFF) as u8);
        v >>= 8;
    }
    let mut out = vec![0x80 | be.len() as u8];
    out.extend(be);
    out
}

fn chunk_from_front(data: &[u8], hints: &[usize], default_size: usize) -> Vec<Vec<u8>> {
    let mut chunks = Vec::new();
    let mut offset = 0;
    let mut hint_idx = 0;
    let mut consuming_hints = true;
    while offset < data.len() {
        let remaining = data.len() - offset;
        let size = if consuming_hints && hint_idx < hints.len() {
            let h = hints[hint_idx];
            if h > 0 && h <= remaining {
                hint_idx += 1;
                h
            } else {
                consuming_hints = false;
                default_size.min(remaining)
            }
        } else {
            default_size.min(remaining)
        };
        chunks.push(data[offset..offset + size].to_vec());
        offset += size;
    }
    chunks
}

/// Split `data` into LOAD APDU chunks, honoring `hints` (a subset of
/// leading or trailing chunk sizes) before falling back to
/// [`DEFAULT_CHUNK_SIZE`] for the rest. A hint that doesn't fit in the
/// remaining bytes stops all further hint consumption.
fn chunk_load_file_data(data: &[u8], hints: &[usize], apply_to_tail: bool, default_size: usize) -> Vec<Vec<u8>> {
    if !apply_to_tail {
        return chunk_from_front(data, hints, default_size);
    }

    let mut accepted = Vec::new();
    let mut used = 0usize;
    for &h in hints {
        if h == 0 || used + h > data.len() {
            break;
        }
        used += h;
        accepted.push(h);
    }

    let prefix_len = data.len() - used;
    let mut chunks = chunk_from_front(&data[..prefix_len], &[], default_size);
    let mut offset = prefix_len;
    for h in accepted {
        chunks.push(data[offset..offset + h].to_vec());
        offset += h;
    }
    chunks
}

/// Drives a single card session end to end: capability detection, mutual
/// authentication, and the content-management commands that require it.
pub struct GpAgent<T: CardTransport> {
    executor: CardExecutor<T>,
    state: SessionState,
    session: CardSession,
}

impl<T: CardTransport> GpAgent<T> {
    /// Wrap an already-connected transport. The caller is responsible for
    /// reader connect/disconnect; this agent only drives APDU exchanges.
    pub fn new(transport: T) -> Self {
        Self {
            executor: CardExecutor::new(transport),
            state: SessionState::Connected,
            session: CardSession::default(),
        }
    }

    /// The current session state.
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// The AID last selected, if any.
    pub fn selected_aid(&self) -> Option<&[u8]> {
        self.session.selected_aid.as_deref()
    }

    /// Borrow the underlying executor, e.g. to send commands this agent
    /// doesn't model directly.
    pub fn executor_mut(&mut self) -> &mut CardExecutor<T> {
        &mut self.executor
    }

    fn require_authenticated(&self) -> Result<(), GpError> {
        if self.state == SessionState::Authenticated {
            Ok(())
        } else {
            Err(GpError::NotAuthenticated)
        }
    }

    fn refresh_state_from_channel(&mut self) {
        self.state = if self.executor.security_level().is_authenticated() {
            SessionState::Authenticated
        } else {
            SessionState::Connected
        };
    }

    /// SELECT `aid` explicitly. If a secure channel is installed, its own
    /// SELECT-resets-session logic fires first; this just reflects the
    /// resulting state.
    #[instrument(skip(self))]
    pub fn select_application(&mut self, aid: &[u8]) -> Result<(), GpError> {
        let cmd = Command::new_with_data(cla::ISO7816, ins::SELECT, select_p1::BY_AID, 0x00, aid.to_vec())
            .with_le(0);
        let resp = self.executor.execute(&cmd)?;
        if !resp.is_success() {
            return Err(GpError::CardStatus {
                status: resp.status(),
                context: "SELECT",
            });
        }
        self.session.selected_aid = Some(aid.to_vec());
        self.refresh_state_from_channel();
        Ok(())
    }

    fn select_security_domain(&mut self, sd_aid: Option<&[u8]>) -> Result<Vec<u8>, GpError> {
        if let Some(aid) = sd_aid {
            self.select_application(aid)?;
            return Ok(aid.to_vec());
        }

        let cmd = Command::new_with_data(cla::ISO7816, ins::SELECT, select_p1::BY_AID, 0x00, Vec::new())
            .with_le(0);
        let resp = self.executor.execute(&cmd)?;
        if !resp.is_success() {
            return Err(GpError::CardStatus {
                status: resp.status(),
                context: "SELECT",
            });
        }

        let tree = tlv::parse(resp.payload())
            .map_err(|e| GpError::ProtocolViolation("malformed FCI template").context(e.to_string()))?;
        let aid = tlv::find_all(&tree, &[&[tags::FCI_TEMPLATE], &[tags::DF_NAME]])
            .first()
            .and_then(|t| t.as_bytes())
            .map(<[u8]>::to_vec)
            .or_else(|| {
                tlv::find_all(&tree, &[&[tags::FCI_TEMPLATE], &[tags::AID]])
                    .first()
                    .and_then(|t| t.as_bytes())
                    .map(<[u8]>::to_vec)
            })
            .unwrap_or_else(|| SECURITY_DOMAIN_AID.to_vec());

        self.select_application(&aid)?;
        Ok(aid)
    }

    /// Perform capability detection and mutual authentication against the
    /// security domain named by `sd_aid` (or the card's default ISD if
    /// `None`), installing the resulting secure channel as this agent's
    /// command processor.
    #[instrument(skip(self, keys))]
    pub fn mutual_auth(
        &mut self,
        security_level: SecurityLevel,
        keys: StaticKeys,
        sd_aid: Option<&[u8]>,
    ) -> Result<(), GpError> {
        self.select_security_domain(sd_aid)?;

        let decision = capability::detect(&mut self.executor)?;
        let padded = keys.padded_to(decision.key_length);

        match decision.variant {
            ScpVariant::Scp02 => {
                let mut session = Scp02Session::new(padded);
                let init_cmd = session.build_initialize_update();
                let resp = self.executor.execute(&init_cmd)?;
                session.process_initialize_update_response(&resp)?;
                let auth_cmd = session.build_external_authenticate(security_level);
                let auth_resp = self.executor.execute(&auth_cmd)?;
                session.process_external_authenticate_response(&auth_resp, security_level)?;
                self.executor.set_processor(Box::new(Scp02Channel::new(session)));
            }
            ScpVariant::Scp03 => {
                let mut session = Scp03Session::new(padded, decision.i_param);
                let init_cmd = session.build_initialize_update();
                let resp = self.executor.execute(&init_cmd)?;
                session.process_initialize_update_response(&resp)?;
                let auth_cmd = session.build_external_authenticate(security_level);
                let auth_resp = self.executor.execute(&auth_cmd)?;
                session.process_external_authenticate_response(&auth_resp, security_level)?;
                self.executor.set_processor(Box::new(Scp03Channel::new(session)));
            }
        }

        self.state = SessionState::Authenticated;
        info!(variant = ?decision.variant, "mutual authentication established");
        Ok(())
    }

    /// Drop the active secure channel and fall back to unprotected
    /// passthrough. A subsequent privileged call requires [`Self::mutual_auth`]
    /// again.
    pub fn reset_session(&mut self) {
        self.executor.reset_processor();
        self.state = SessionState::Connected;
        self.session.selected_aid = None;
    }

    /// `INSTALL [for load]`: `80 E6 02 00`.
    #[instrument(skip(self, load_params))]
    pub fn install_for_load(&mut self, cap_aid: &[u8], sd_aid: &[u8], load_params: &[u8]) -> Result<(), GpError> {
        self.require_authenticated()?;

        let mut body = Vec::new();
        body.push(cap_aid.len() as u8);
        body.extend_from_slice(cap_aid);
        body.push(sd_aid.len() as u8);
        body.extend_from_slice(sd_aid);
        body.push(0x00); // load file data block hash: none
        body.push(load_params.len() as u8);
        body.extend_from_slice(load_params);
        body.push(0x00); // load token: none

        let cmd = Command::new_with_data(cla::GP, ins::INSTALL, install_p1::FOR_LOAD, 0x00, body).with_le(0);
        let resp = self.executor.execute(&cmd)?;
        if !resp.is_success() {
            return Err(GpError::CardStatus {
                status: resp.status(),
                context: "INSTALL [for load]",
            });
        }
        Ok(())
    }

    /// Load a CAP archive: runs `INSTALL [for load]` for `cap_aid`/`sd_aid`/
    /// `load_params`, then concatenates the archive's components (ordered
    /// per `order_hints`) into a LOAD FILE DATA BLOCK and streams it as a
    /// chunked sequence of LOAD commands.
    #[instrument(skip(self, cap_bytes, load_params, order_hints, chunk_hints))]
    pub fn load_cap(
        &mut self,
        cap_bytes: &[u8],
        cap_aid: &[u8],
        sd_aid: &[u8],
        load_params: &[u8],
        order_hints: &ComponentOrder,
        chunk_hints: Option<&ChunkHints>,
    ) -> Result<(), GpError> {
        self.install_for_load(cap_aid, sd_aid, load_params)?;

        let components = CapComponents::read(cap_bytes)?.without_debug();
        let load_file_data = build_load_file_data(&components, order_hints);

        let mut block = vec![tags::LOAD_FILE_DATA_BLOCK];
        block.extend_from_slice(&ber_length_prefix(load_file_data.len()));
        block.extend_from_slice(&load_file_data);

        let (hints, apply_to_tail): (&[usize], bool) = match chunk_hints {
            Some(h) => (&h.sizes, h.apply_to_tail),
            None => (&[], false),
        };
        let chunks = chunk_load_file_data(&block, hints, apply_to_tail, DEFAULT_CHUNK_SIZE);

        for (index, chunk) in chunks.iter().enumerate() {
            let is_last = index == chunks.len() - 1;
            let p1 = if is_last { load_p1::LAST_BLOCK } else { load_p1::MORE_BLOCKS };
            let chunk_id = (index % 256) as u8;
            let cmd = Command::new_with_data(cla::GP, ins::LOAD, p1, chunk_id, chunk.clone());
            let resp = self.executor.execute(&cmd)?;
            if !resp.is_success() {
                return Err(GpError::CardStatus {
                    status: resp.status(),
                    context: "LOAD",
                });
            }
        }
        Ok(())
    }

    /// `INSTALL [for install] [for make selectable]`: `80 E6 0C 00`.
    #[instrument(skip(self, privileges, install_params))]
    pub fn install_applet(
        &mut self,
        cap_aid: &[u8],
        class_aid: &[u8],
        instance_aid: &[u8],
        privileges: &[u8],
        install_params: &[u8],
    ) -> Result<(), GpError> {
        self.require_authenticated()?;

        let mut body = Vec::new();
        body.push(cap_aid.len() as u8);
        body.extend_from_slice(cap_aid);
        body.push(class_aid.len() as u8);
        body.extend_from_slice(class_aid);
        body.push(instance_aid.len() as u8);
        body.extend_from_slice(instance_aid);
        body.push(privileges.len() as u8);
        body.extend_from_slice(privileges);
        body.push(install_params.len() as u8);
        body.extend_from_slice(install_params);
        body.push(0x00); // install token: none

        let cmd = Command::new_with_data(
            cla::GP,
            ins::INSTALL,
            install_p1::FOR_INSTALL_AND_MAKE_SELECTABLE,
            0x00,
            body,
        )
        .with_le(0);
        let resp = self.executor.execute(&cmd)?;
        if !resp.is_success() {
            return Err(GpError::CardStatus {
                status: resp.status(),
                context: "INSTALL [for install] [for make selectable]",
            });
        }
        Ok(())
    }

    /// `DELETE` an object (application, package, or both).
    #[instrument(skip(self))]
    pub fn delete_content(&mut self, aid: &[u8]) -> Result<(), GpError> {
        self.require_authenticated()?;

        let mut body = vec![tags::AID, aid.len() as u8];
        body.extend_from_slice(aid);

        let cmd = Command::new_with_data(cla::GP, ins::DELETE, 0x00, delete_p2::OBJECT_AND_RELATED, body);
        let resp = self.executor.execute(&cmd)?;
        if !resp.is_success() {
            return Err(GpError::CardStatus {
                status: resp.status(),
                context: "DELETE",
            });
        }
        Ok(())
    }

    fn get_status_records(&mut self, p1: u8, deprecated: bool) -> Result<Vec<u8>, GpError> {
        let mut p2 = if deprecated { 0x00 } else { get_status_p2::TLV_DATA };
        let mut data = Vec::new();
        loop {
            let body = vec![tags::AID, 0x00];
            let cmd = Command::new_with_data(cla::GP, ins::GET_STATUS, p1, p2, body).with_le(0);
            let resp = self.executor.execute(&cmd)?;
            if resp.is_success() {
                data.extend_from_slice(resp.payload());
                break;
            } else if resp.status().is_more_records() {
                data.extend_from_slice(resp.payload());
                p2 |= get_status_p2::NEXT_OCCURRENCE;
            } else {
                return Err(GpError::CardStatus {
                    status: resp.status(),
                    context: "GET STATUS",
                });
            }
        }
        Ok(data)
    }

    /// List the registry: three `GET STATUS` sweeps (ISD, applications and
    /// SSDs, packages), looping on `6310` continuation, then decoded with
    /// [`crate::registry`].
    #[instrument(skip(self))]
    pub fn list_content(&mut self, deprecated: bool) -> Result<RegistryListing, GpError> {
        self.require_authenticated()?;

        let isd_bytes = self.get_status_records(get_status_p1::ISSUER_SECURITY_DOMAIN, deprecated)?;
        let app_bytes = self.get_status_records(get_status_p1::APPLICATIONS, deprecated)?;
        let pkg_bytes = self.get_status_records(get_status_p1::EXEC_LOAD_FILES_AND_MODULES, deprecated)?;

        Ok(RegistryListing {
            isd: registry::decode_applications(&isd_bytes)?,
            applications: registry::decode_applications(&app_bytes)?,
            packages: registry::decode_packages(&pkg_bytes)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_order_places_export_before_constant_pool() {
        let hints = ComponentOrder::default();
        let order = ordered_component_stems(&hints);
        let export_pos = order.iter().position(|k| *k == ComponentKind::Export).unwrap();
        let cp_pos = order.iter().position(|k| *k == ComponentKind::ConstantPool).unwrap();
        assert!(export_pos < cp_pos);
    }

    #[test]
    fn head_hint_pins_requested_components_first() {
        let hints = ComponentOrder {
            head: vec![ComponentKind::Applet, ComponentKind::Header],
            tail: Vec::new(),
        };
        let order = ordered_component_stems(&hints);
        assert_eq!(order[0], ComponentKind::Applet);
        assert_eq!(order[1], ComponentKind::Header);
    }

    #[test]
    fn ber_length_prefix_uses_short_form_under_128() {
        assert_eq!(ber_length_prefix(0x7F), vec![0x7F]);
    }

    #[test]
    fn ber_length_prefix_uses_long_form_at_128() {
        assert_eq!(ber_length_prefix(0x80), vec![0x81, 0x80]);
        assert_eq!(ber_length_prefix(0x1_0000), vec![0x83, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn chunking_without_hints_uses_default_size() {
        let data = vec![0u8; 250];
        let chunks = chunk_load_file_data(&data, &[], false, 100);
        assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![100, 100, 50]);
    }

    #[test]
    fn head_hints_apply_then_fall_back_to_default() {
        let data = vec![0u8; 120];
        let chunks = chunk_load_file_data(&data, &[7, 5], false, 100);
        assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![7, 5, 100, 8]);
    }

    #[test]
    fn tail_hints_pin_the_last_chunks() {
        let data = vec![0u8; 200];
        let chunks = chunk_load_file_data(&data, &[7, 5], true, 100);
        assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![100, 88, 7, 5]);
    }

    #[test]
    fn oversized_hint_stops_all_hint_consumption() {
        // A hint larger than the whole buffer can never fit; every chunk
        // should fall back to the default size.
        let data = vec![0u8; 50];
        let chunks = chunk_load_file_data(&data, &[1000, 5], false, 100);
        assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![50]);
    }

    #[test]
    fn initial_state_is_connected() {
        let transport = gp_apdu_core::transport::MockTransport::with_response(bytes::Bytes::from_static(&[0x90, 0x00]));
        let agent = GpAgent::new(transport);
        assert_eq!(agent.state(), SessionState::Connected);
    }
}
