// SPDX-License-Identifier: GPL-3.0-only

//! LUKS volume lifecycle
//!
//! A [`DeviceHandle`] binds one device path to an engine context and
//! enforces the header state machine:
//!
//! ```text
//! init ──> Uninitialized ──format──> Formatted
//!                │                      ▲
//!                └──────load──> Loaded  └── format (from any state)
//! ```
//!
//! Key slot and activation operations are reached through
//! [`DeviceHandle::keyslots`] and [`DeviceHandle::activation`] and require a
//! formatted or loaded header. Every failure is a [`CryptError`] carrying
//! the engine's status code and the attempted operation.
//!
//! # Example
//!
//! ```no_run
//! use cryptvol::{ActivationFlag, DeviceHandle, FormatVariant, GenericParams, KeyslotIndex};
//!
//! # fn main() -> Result<(), cryptvol::CryptError> {
//! let mut device = DeviceHandle::init("/dev/sdb1")?;
//! device.format(
//!     FormatVariant::luks1("sha256"),
//!     GenericParams::new("aes", "xts-plain64", 64),
//! )?;
//! device.keyslots().add_by_volume_key(KeyslotIndex::Any, &[], b"correct horse")?;
//! device.activation().activate_by_passphrase(
//!     "vault",
//!     KeyslotIndex::Slot(0),
//!     b"correct horse",
//!     ActivationFlag::ReadOnly.into(),
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod activation;
pub mod device;
pub mod format;
pub mod keyslot;
#[cfg(feature = "cli")]
pub mod logging;

pub use activation::ActivationController;
pub use device::{DeviceHandle, DeviceState};
pub use keyslot::KeyslotManager;

pub use cryptvol_sys::{CryptError, Engine, EngineConfig, ErrorKind, Operation};
pub use cryptvol_types::{
    ActivationFlag, ActivationFlags, FormatVariant, GenericParams, HeaderInfo, KeyslotIndex,
    KeyslotStatus, Luks1Params, Luks2Params, MappingStatus, VariantKind, VolumeKey,
};
