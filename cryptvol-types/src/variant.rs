// SPDX-License-Identifier: GPL-3.0-only

//! Header format variants
//!
//! Variants form a closed set: each carries only the parameters that make
//! sense for it, and the device handle dispatches on the enum instead of
//! exposing one method per variant.

use serde::{Deserialize, Serialize};

/// Hash substituted when a variant is formatted without one
pub const DEFAULT_HASH: &str = "sha256";

/// Number of key slots in a LUKS1 header
pub const LUKS1_KEYSLOTS: u32 = 8;

/// Number of key slots in a LUKS2 header
pub const LUKS2_KEYSLOTS: u32 = 32;

/// Header family established on a device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariantKind {
    /// No header has been formatted or loaded yet
    #[default]
    Unknown,

    /// LUKS version 1
    Luks1,

    /// LUKS version 2
    Luks2,
}

impl VariantKind {
    /// Stable type tag ("LUKS1", "LUKS2", or "" when unknown)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "",
            Self::Luks1 => "LUKS1",
            Self::Luks2 => "LUKS2",
        }
    }

    /// Value passed to `cryptsetup --type`
    pub fn cryptsetup_type(&self) -> Option<&'static str> {
        match self {
            Self::Unknown => None,
            Self::Luks1 => Some("luks1"),
            Self::Luks2 => Some("luks2"),
        }
    }

    /// Map a header version number to a variant
    pub fn from_version(version: u32) -> Self {
        match version {
            1 => Self::Luks1,
            2 => Self::Luks2,
            _ => Self::Unknown,
        }
    }

    pub fn keyslot_count(&self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::Luks1 => LUKS1_KEYSLOTS,
            Self::Luks2 => LUKS2_KEYSLOTS,
        }
    }
}

impl std::fmt::Display for VariantKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// LUKS1 format-time parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Luks1Params {
    /// Hash used for PBKDF2 and the header digest (e.g. "sha256")
    pub hash: String,

    /// Key derivation time budget in milliseconds (engine default if unset)
    pub iteration_time_ms: Option<u32>,

    /// Payload alignment in 512-byte sectors (engine default if unset)
    pub data_alignment: Option<u64>,
}

/// LUKS2 format-time parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Luks2Params {
    /// Hash used for the key-slot digest (e.g. "sha256")
    pub hash: String,

    /// Key derivation time budget in milliseconds
    pub iteration_time_ms: Option<u32>,

    /// PBKDF algorithm ("argon2id", "argon2i" or "pbkdf2")
    pub pbkdf: Option<String>,

    /// Header label
    pub label: Option<String>,

    /// Header subsystem
    pub subsystem: Option<String>,

    /// Encryption sector size in bytes
    pub sector_size: Option<u32>,
}

/// Variant selector plus its variant-specific parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FormatVariant {
    Luks1(Luks1Params),
    Luks2(Luks2Params),
}

impl FormatVariant {
    /// LUKS1 with the given hash and engine defaults for everything else
    pub fn luks1(hash: impl Into<String>) -> Self {
        Self::Luks1(Luks1Params {
            hash: hash.into(),
            ..Luks1Params::default()
        })
    }

    /// LUKS2 with the given hash and engine defaults for everything else
    pub fn luks2(hash: impl Into<String>) -> Self {
        Self::Luks2(Luks2Params {
            hash: hash.into(),
            ..Luks2Params::default()
        })
    }

    pub fn kind(&self) -> VariantKind {
        match self {
            Self::Luks1(_) => VariantKind::Luks1,
            Self::Luks2(_) => VariantKind::Luks2,
        }
    }

    pub fn hash(&self) -> &str {
        match self {
            Self::Luks1(params) => &params.hash,
            Self::Luks2(params) => &params.hash,
        }
    }

    pub fn iteration_time_ms(&self) -> Option<u32> {
        match self {
            Self::Luks1(params) => params.iteration_time_ms,
            Self::Luks2(params) => params.iteration_time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tags_are_stable() {
        assert_eq!(VariantKind::Unknown.as_str(), "");
        assert_eq!(VariantKind::Luks1.as_str(), "LUKS1");
        assert_eq!(VariantKind::Luks2.to_string(), "LUKS2");
        assert_eq!(VariantKind::from_version(1), VariantKind::Luks1);
        assert_eq!(VariantKind::from_version(7), VariantKind::Unknown);
    }

    #[test]
    fn variant_reads_from_tagged_json() {
        let variant: FormatVariant =
            serde_json::from_str(r#"{"type":"luks1","hash":"sha512"}"#).expect("parse variant");
        assert_eq!(variant.kind(), VariantKind::Luks1);
        assert_eq!(variant.hash(), "sha512");
        assert_eq!(variant.iteration_time_ms(), None);
    }
}
