// SPDX-License-Identifier: GPL-3.0-only

//! Format-time parameter normalization
//!
//! Runs before anything reaches the engine. Rejections here never touch
//! the device.

use cryptvol_sys::{CryptError, Operation, Status, translate};
use cryptvol_types::{DEFAULT_HASH, FormatRequest, FormatVariant, GenericParams};
use nix::errno::Errno;

fn invalid() -> CryptError {
    translate(Status::from_errno(Errno::EINVAL).code(), Operation::Format)
}

/// Substitute the default hash when the variant carries none
pub fn normalize_variant(variant: FormatVariant) -> FormatVariant {
    match variant {
        FormatVariant::Luks1(mut params) => {
            if params.hash.is_empty() {
                params.hash = DEFAULT_HASH.to_string();
            }
            FormatVariant::Luks1(params)
        }
        FormatVariant::Luks2(mut params) => {
            if params.hash.is_empty() {
                params.hash = DEFAULT_HASH.to_string();
            }
            FormatVariant::Luks2(params)
        }
    }
}

/// Validate `params` and build the argument set for the engine's format
///
/// Fails with code `-22` when the key size is zero or an explicit volume
/// key does not have exactly `volume_key_size` bytes. Cipher, mode and hash
/// are passed through unchecked.
pub fn prepare(variant: FormatVariant, params: &GenericParams) -> Result<FormatRequest, CryptError> {
    if params.volume_key_size == 0 {
        return Err(invalid());
    }
    if let Some(key) = &params.volume_key {
        if key.len() != params.volume_key_size {
            return Err(invalid());
        }
    }

    Ok(FormatRequest {
        variant: normalize_variant(variant),
        cipher: params.cipher.clone(),
        cipher_mode: params.cipher_mode.clone(),
        uuid: params.uuid,
        volume_key: params.volume_key.clone(),
        volume_key_size: params.volume_key_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptvol_sys::ErrorKind;
    use cryptvol_types::{Luks2Params, VolumeKey};

    #[test]
    fn empty_hash_defaults_to_sha256() {
        let params = GenericParams::new("aes", "xts-plain64", 64);
        let request = prepare(FormatVariant::luks1(""), &params).expect("prepare");
        assert_eq!(request.variant.hash(), "sha256");

        let request = prepare(
            FormatVariant::Luks2(Luks2Params {
                hash: String::new(),
                label: Some("backup".into()),
                ..Luks2Params::default()
            }),
            &params,
        )
        .expect("prepare");
        assert_eq!(request.variant.hash(), "sha256");
    }

    #[test]
    fn explicit_hash_is_not_whitelisted() {
        let params = GenericParams::new("aes", "xts-plain64", 64);
        let request = prepare(FormatVariant::luks1("whirlpool-9000"), &params).expect("prepare");
        assert_eq!(request.variant.hash(), "whirlpool-9000");
    }

    #[test]
    fn key_length_must_match_size() {
        let params =
            GenericParams::new("aes", "xts-plain64", 64).with_volume_key(VolumeKey::new(vec![7; 32]));
        let err = prepare(FormatVariant::luks1("sha256"), &params).unwrap_err();
        assert_eq!(err.code(), -22);
        assert_eq!(err.kind(), ErrorKind::Format);
        assert_eq!(err.operation(), Operation::Format);
    }

    #[test]
    fn key_size_is_mandatory() {
        let params = GenericParams::new("aes", "xts-plain64", 0);
        assert!(prepare(FormatVariant::luks1("sha256"), &params)
            .unwrap_err()
            .is_invalid_argument());
    }

    #[test]
    fn matching_key_is_forwarded() {
        let key = VolumeKey::new(vec![9; 32]);
        let params = GenericParams::new("serpent", "cbc-essiv:sha256", 32).with_volume_key(key.clone());
        let request = prepare(FormatVariant::luks1("sha1"), &params).expect("prepare");
        assert_eq!(request.volume_key, Some(key));
        assert_eq!(request.cipher_spec(), "serpent-cbc-essiv:sha256");
        assert_eq!(request.key_bits(), 256);
    }
}
