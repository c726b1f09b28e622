//! Process configuration shape (§6): the JSON document external callers
//! (CLI, shell) load to avoid repeating reader name, security level, key
//! material, and security domain AID on every invocation.
//!
//! This module only defines the shape and its defaults; reading the file
//! from disk, locating it, and merging it with CLI flags are left to the
//! caller (out of scope, per the content-management driver's Non-goals).
//! Unknown keys are ignored rather than rejected, the way a config format
//! tolerant of newer/older versions of itself should behave.

use serde::Deserialize;

use crate::agent::SecurityLevel;
use crate::constants::SECURITY_DOMAIN_AID;
use crate::error::GpError;
use crate::session::StaticKeys;

fn default_security_level() -> String {
    "c_mac".to_string()
}

fn default_key_hex() -> String {
    hex::encode(crate::constants::GP_TEST_KEY_16B)
}

fn default_sd_aid_hex() -> String {
    hex::encode(SECURITY_DOMAIN_AID)
}

/// The on-disk JSON configuration shape. Every field has a default, so a
/// config file may supply any subset of keys (or none at all).
#[derive(Debug, Clone, Deserialize)]
pub struct GpConfig {
    /// PC/SC reader name substring to connect through, or `None` to use
    /// the first available reader.
    #[serde(default)]
    pub reader_name: Option<String>,

    /// One of `"none"`, `"authenticated"`, `"c_mac"`, `"c_mac_and_decryption"`.
    #[serde(default = "default_security_level")]
    pub security_level: String,

    /// Hex-encoded static ENC key. Defaults to the GlobalPlatform test key.
    #[serde(default = "default_key_hex")]
    pub key_enc: String,

    /// Hex-encoded static MAC key. Defaults to the GlobalPlatform test key.
    #[serde(default = "default_key_hex")]
    pub key_mac: String,

    /// Hex-encoded static DEK key. Defaults to the GlobalPlatform test key.
    #[serde(default = "default_key_hex")]
    pub key_dek: String,

    /// Hex-encoded security domain AID to authenticate against. Defaults to
    /// the well-known Issuer Security Domain AID prefix.
    #[serde(default = "default_sd_aid_hex")]
    pub sd_aid: String,
}

impl Default for GpConfig {
    fn default() -> Self {
        Self {
            reader_name: None,
            security_level: default_security_level(),
            key_enc: default_key_hex(),
            key_mac: default_key_hex(),
            key_dek: default_key_hex(),
            sd_aid: default_sd_aid_hex(),
        }
    }
}

impl GpConfig {
    /// Parse a configuration document from its JSON text.
    pub fn from_json(text: &str) -> Result<Self, GpError> {
        serde_json::from_str(text)
            .map_err(|e| GpError::ProtocolViolation("malformed config JSON").context(e.to_string()))
    }

    /// Resolve `security_level` into the typed [`SecurityLevel`] it names.
    pub fn security_level(&self) -> Result<SecurityLevel, GpError> {
        match self.security_level.as_str() {
            "none" => Ok(SecurityLevel::none()),
            "authenticated" => Ok(SecurityLevel::authenticated()),
            "c_mac" => Ok(SecurityLevel::c_mac()),
            "c_mac_and_decryption" => Ok(SecurityLevel::c_mac_and_decryption()),
            _ => Err(GpError::ProtocolViolation(
                "unrecognized security_level in config",
            )),
        }
    }

    /// Decode the three hex-encoded static keys into [`StaticKeys`].
    pub fn static_keys(&self) -> Result<StaticKeys, GpError> {
        let decode = |name: &'static str, value: &str| -> Result<Vec<u8>, GpError> {
            hex::decode(value).map_err(|e| {
                GpError::ProtocolViolation("malformed config key hex").context(format!("{name}: {e}"))
            })
        };
        Ok(StaticKeys::new(
            decode("key_enc", &self.key_enc)?,
            decode("key_mac", &self.key_mac)?,
            decode("key_dek", &self.key_dek)?,
        ))
    }

    /// Decode `sd_aid` into raw bytes.
    pub fn sd_aid_bytes(&self) -> Result<Vec<u8>, GpError> {
        hex::decode(&self.sd_aid)
            .map_err(|e| GpError::ProtocolViolation("malformed config sd_aid hex").context(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_empty_object() {
        let config = GpConfig::from_json("{}").unwrap();
        assert_eq!(config.security_level, "c_mac");
        assert!(config.reader_name.is_none());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config = GpConfig::from_json(r#"{"totally_unknown_field": 42}"#).unwrap();
        assert_eq!(config.security_level, default_security_level());
    }

    #[test]
    fn explicit_fields_override_defaults() {
        let config = GpConfig::from_json(r#"{"reader_name": "ACS", "security_level": "none"}"#).unwrap();
        assert_eq!(config.reader_name.as_deref(), Some("ACS"));
        assert_eq!(config.security_level().unwrap(), SecurityLevel::none());
    }

    #[test]
    fn rejects_unrecognized_security_level() {
        let config = GpConfig::from_json(r#"{"security_level": "bogus"}"#).unwrap();
        assert!(config.security_level().is_err());
    }

    #[test]
    fn static_keys_decode_default_test_keys() {
        let config = GpConfig::default();
        let keys = config.static_keys().unwrap();
        assert_eq!(keys.enc.len(), 16);
        assert_eq!(keys.enc, keys.mac);
    }
}
