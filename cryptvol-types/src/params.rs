// SPDX-License-Identifier: GPL-3.0-only

//! Variant-independent format parameters

use uuid::Uuid;
use zeroize::Zeroizing;

use crate::variant::FormatVariant;

/// Master key that encrypts the payload
///
/// The bytes are wiped when the value is dropped and never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct VolumeKey(Zeroizing<Vec<u8>>);

impl VolumeKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for VolumeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VolumeKey({} bytes)", self.0.len())
    }
}

/// Parameters shared by every variant, supplied at format time
#[derive(Debug, Clone, Default)]
pub struct GenericParams {
    /// Cipher name (e.g. "aes")
    pub cipher: String,

    /// Cipher mode (e.g. "xts-plain64")
    pub cipher_mode: String,

    /// Header UUID; the engine picks one if unset
    pub uuid: Option<Uuid>,

    /// Explicit volume key; the engine generates one if unset
    pub volume_key: Option<VolumeKey>,

    /// Volume key size in bytes
    pub volume_key_size: usize,

    /// Passphrase provisioned into the first free key slot after format
    pub passphrase: Option<Zeroizing<Vec<u8>>>,
}

impl GenericParams {
    pub fn new(cipher: impl Into<String>, cipher_mode: impl Into<String>, key_size: usize) -> Self {
        Self {
            cipher: cipher.into(),
            cipher_mode: cipher_mode.into(),
            volume_key_size: key_size,
            ..Self::default()
        }
    }

    pub fn with_volume_key(mut self, key: VolumeKey) -> Self {
        self.volume_key = Some(key);
        self
    }

    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = Some(uuid);
        self
    }

    pub fn with_passphrase(mut self, passphrase: &[u8]) -> Self {
        self.passphrase = Some(Zeroizing::new(passphrase.to_vec()));
        self
    }
}

/// Normalized argument set handed to an engine's format call
#[derive(Debug, Clone)]
pub struct FormatRequest {
    pub variant: FormatVariant,
    pub cipher: String,
    pub cipher_mode: String,
    pub uuid: Option<Uuid>,
    pub volume_key: Option<VolumeKey>,
    pub volume_key_size: usize,
}

impl FormatRequest {
    /// Cipher specification as cryptsetup expects it ("aes-xts-plain64")
    pub fn cipher_spec(&self) -> String {
        if self.cipher_mode.is_empty() {
            self.cipher.clone()
        } else {
            format!("{}-{}", self.cipher, self.cipher_mode)
        }
    }

    pub fn key_bits(&self) -> usize {
        self.volume_key_size * 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_key_debug_hides_bytes() {
        let key = VolumeKey::from_slice(&[0xAA; 32]);
        assert_eq!(format!("{key:?}"), "VolumeKey(32 bytes)");
    }
}
