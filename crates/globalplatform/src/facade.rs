//! Content manager facade (§4.J): a thin, stateful wrapper over [`GpAgent`]
//! bundling the convenience operations an external caller (CLI, shell) wants
//! without re-deriving the mutual-auth/session-reset dance each time.
//!
//! Grounded in the teacher's `operations` module (`connect_and_setup`,
//! `list_applications`, `list_packages`, `delete_package`,
//! `install_cap_file`): each free function there becomes a method here that
//! also remembers the keys/security level used to authenticate, so a reset
//! (e.g. after a SELECT unrelated to this session) can silently reauthenticate.

use gp_apdu_core::transport::CardTransport;
use tracing::instrument;

use crate::agent::{ChunkHints, ComponentOrder, GpAgent, RegistryListing, SecurityLevel, SessionState};
use crate::error::GpError;
use crate::session::StaticKeys;

/// Authentication parameters remembered across a reset, so operations that
/// require a live secure channel can reauthenticate transparently.
#[derive(Debug, Clone)]
struct AuthParams {
    security_level: SecurityLevel,
    keys: StaticKeys,
    sd_aid: Option<Vec<u8>>,
}

/// A stateful facade over [`GpAgent`] for content-management callers that
/// don't want to manage mutual-auth bookkeeping themselves.
pub struct ContentManager<T: CardTransport> {
    agent: GpAgent<T>,
    auth: Option<AuthParams>,
}

impl<T: CardTransport> ContentManager<T> {
    /// Wrap a connected transport. No authentication happens until
    /// [`Self::connect_and_setup`] (or [`Self::ensure_authenticated`]) runs.
    pub fn new(transport: T) -> Self {
        Self {
            agent: GpAgent::new(transport),
            auth: None,
        }
    }

    /// Authenticate against `sd_aid` (or the card's default ISD) with
    /// `keys`, remembering the parameters for transparent reauthentication.
    #[instrument(skip(self, keys))]
    pub fn connect_and_setup(
        &mut self,
        security_level: SecurityLevel,
        keys: StaticKeys,
        sd_aid: Option<&[u8]>,
    ) -> Result<(), GpError> {
        self.agent.mutual_auth(security_level, keys.clone(), sd_aid)?;
        self.auth = Some(AuthParams {
            security_level,
            keys,
            sd_aid: sd_aid.map(<[u8]>::to_vec),
        });
        Ok(())
    }

    /// Re-establish the secure channel with the last-used parameters, if the
    /// session has dropped back to `Connected` (e.g. after an unrelated
    /// SELECT or an explicit [`GpAgent::reset_session`]).
    fn ensure_authenticated(&mut self) -> Result<(), GpError> {
        if self.agent.state() == SessionState::Authenticated {
            return Ok(());
        }
        let auth = self.auth.clone().ok_or(GpError::NotAuthenticated)?;
        self.agent
            .mutual_auth(auth.security_level, auth.keys, auth.sd_aid.as_deref())
    }

    /// List all applications and security domains on the card.
    #[instrument(skip(self))]
    pub fn list_applications(&mut self) -> Result<Vec<crate::registry::ApplicationRecord>, GpError> {
        self.ensure_authenticated()?;
        Ok(self.agent.list_content(false)?.applications)
    }

    /// List all loaded packages (executable load files) on the card.
    #[instrument(skip(self))]
    pub fn list_packages(&mut self) -> Result<Vec<crate::registry::PackageRecord>, GpError> {
        self.ensure_authenticated()?;
        Ok(self.agent.list_content(false)?.packages)
    }

    /// The full registry: ISD, applications, and packages in one call.
    #[instrument(skip(self))]
    pub fn list_content(&mut self, deprecated: bool) -> Result<RegistryListing, GpError> {
        self.ensure_authenticated()?;
        self.agent.list_content(deprecated)
    }

    /// Delete a package and everything associated with it (its applets).
    #[instrument(skip(self))]
    pub fn delete_package(&mut self, aid: &[u8]) -> Result<(), GpError> {
        self.ensure_authenticated()?;
        self.agent.delete_content(aid)
    }

    /// Load a CAP archive and, if `make_selectable`, install and make
    /// selectable one applet instance per applet AID the archive declares.
    #[instrument(skip(self, cap_bytes, install_params))]
    pub fn install_cap_file(
        &mut self,
        cap_bytes: &[u8],
        cap_aid: &[u8],
        sd_aid: &[u8],
        applet_aids: &[Vec<u8>],
        make_selectable: bool,
        install_params: &[u8],
    ) -> Result<(), GpError> {
        self.ensure_authenticated()?;

        self.agent.load_cap(
            cap_bytes,
            cap_aid,
            sd_aid,
            &[],
            &ComponentOrder::default(),
            None::<&ChunkHints>,
        )?;

        if make_selectable {
            for applet_aid in applet_aids {
                self.agent
                    .install_applet(cap_aid, applet_aid, applet_aid, &[], install_params)?;
            }
        }

        Ok(())
    }

    /// Drop the secure channel, forgetting nothing: the next privileged
    /// call reauthenticates automatically with the same parameters.
    pub fn reset_session(&mut self) {
        self.agent.reset_session();
    }

    /// Borrow the underlying agent for operations this facade doesn't wrap.
    pub fn agent_mut(&mut self) -> &mut GpAgent<T> {
        &mut self.agent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use gp_apdu_core::transport::MockTransport;

    #[test]
    fn fresh_facade_requires_auth_before_listing() {
        let transport = MockTransport::with_response(Bytes::from_static(&[0x90, 0x00]));
        let mut manager = ContentManager::new(transport);
        let err = manager.list_applications().unwrap_err();
        assert!(matches!(err, GpError::NotAuthenticated));
    }
}
