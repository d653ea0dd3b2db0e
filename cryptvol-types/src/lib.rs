// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for cryptvol
//!
//! These types are shared by every layer of the stack:
//!
//! - **cryptvol-sys**: engines accept and return these types
//! - **cryptvol**: the device handle validates and forwards them
//!
//! Secret material (`VolumeKey`, passphrases) is never serialized and is
//! zeroed when dropped.

pub mod activation;
pub mod header;
pub mod keyslot;
pub mod params;
pub mod variant;

pub use activation::{ActivationFlag, ActivationFlags, MappingStatus};
pub use header::HeaderInfo;
pub use keyslot::{KeyMaterial, KeyslotIndex, KeyslotStatus};
pub use params::{FormatRequest, GenericParams, VolumeKey};
pub use variant::{
    DEFAULT_HASH, FormatVariant, LUKS1_KEYSLOTS, LUKS2_KEYSLOTS, Luks1Params, Luks2Params,
    VariantKind,
};
