//! Responder configuration.
//!
//! Loaded from a small JSON document (for instance a blob linked into the
//! firmware); every field is optional.

use heapless::{String, Vec};
use serde::Deserialize;
use thiserror::Error;

use crate::mtp_handler::consts::{FORMAT_ASSOCIATION, FORMAT_TEXT, FORMAT_UNDEFINED};

pub const MAX_IDENTITY_BYTES: usize = 32;
pub const MAX_ADVERTISED_FORMATS: usize = 16;

/// What to do with a transaction still waiting for its data phase when a new
/// command arrives.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StalePolicy {
    /// Drop the pending transaction and process the new command.
    #[default]
    Discard,
    /// Keep the pending transaction and answer the new command with DeviceBusy.
    Reject,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid responder configuration: {0}")]
    Parse(serde_json_core::de::Error),
    #[error("max packet size {0} is not one of 8, 16, 32, 64 or 512")]
    PacketSize(u16),
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    pub manufacturer: String<MAX_IDENTITY_BYTES>,
    pub model: String<MAX_IDENTITY_BYTES>,
    pub device_version: String<MAX_IDENTITY_BYTES>,
    pub serial_number: String<MAX_IDENTITY_BYTES>,
    pub vendor_extension_desc: String<MAX_IDENTITY_BYTES>,
    /// Object formats advertised in DeviceInfo.
    pub playback_formats: Vec<u16, MAX_ADVERTISED_FORMATS>,
    pub stale_transaction: StalePolicy,
    /// Bulk endpoint packet size used by `MtpClass::from_config`.
    pub max_packet_size: u16,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        ResponderConfig {
            manufacturer: text("Embassy"),
            model: text("MTP Responder"),
            device_version: text("1.0"),
            serial_number: text("12345678"),
            vendor_extension_desc: text("microsoft.com: 1.0"),
            playback_formats: [FORMAT_UNDEFINED, FORMAT_ASSOCIATION, FORMAT_TEXT]
                .into_iter()
                .collect(),
            stale_transaction: StalePolicy::Discard,
            max_packet_size: 64,
        }
    }
}

impl ResponderConfig {
    pub fn from_json(json: &[u8]) -> Result<Self, ConfigError> {
        let (config, _) =
            serde_json_core::from_slice::<ResponderConfig>(json).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.max_packet_size {
            8 | 16 | 32 | 64 | 512 => Ok(()),
            other => Err(ConfigError::PacketSize(other)),
        }
    }
}

fn text(value: &str) -> String<MAX_IDENTITY_BYTES> {
    let mut out = String::new();
    // defaults are short literals
    let _ = out.push_str(value);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ResponderConfig::default();
        assert_eq!(config.stale_transaction, StalePolicy::Discard);
        assert_eq!(config.max_packet_size, 64);
        assert!(config.playback_formats.contains(&FORMAT_TEXT));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ResponderConfig::from_json(
            br#"{"model":"Cartridge Dumper","stale_transaction":"reject","max_packet_size":512}"#,
        )
        .unwrap();
        assert_eq!(config.model.as_str(), "Cartridge Dumper");
        assert_eq!(config.manufacturer.as_str(), "Embassy");
        assert_eq!(config.stale_transaction, StalePolicy::Reject);
        assert_eq!(config.max_packet_size, 512);
    }

    #[test]
    fn test_playback_formats_from_json() {
        let config = ResponderConfig::from_json(br#"{"playback_formats":[12288,12292]}"#).unwrap();
        assert_eq!(config.playback_formats.as_slice(), &[0x3000, 0x3004]);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            ResponderConfig::from_json(br#"{"max_packet_size":100}"#),
            Err(ConfigError::PacketSize(100))
        ));
        assert!(matches!(
            ResponderConfig::from_json(br#"{"stale_transaction":"queue"}"#),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            ResponderConfig::from_json(b"not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
