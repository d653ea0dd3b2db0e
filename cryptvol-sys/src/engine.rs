// SPDX-License-Identifier: GPL-3.0-only

//! Disk-encryption engine contract
//!
//! The engine owns everything cryptographic: key derivation, key-slot
//! wrapping, the on-disk header and the kernel mapping. Callers only see
//! success or a negative [`Status`](crate::Status).

use std::path::Path;

use cryptvol_types::{
    ActivationFlags, FormatRequest, HeaderInfo, KeyMaterial, KeyslotIndex, KeyslotStatus,
    MappingStatus, VariantKind, VolumeKey,
};

use crate::error::EngineResult;

/// Factory for per-device engine contexts
pub trait Engine: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Bind a context to `path`; fails when the path cannot be resolved
    fn open(&self, path: &Path) -> EngineResult<Box<dyn EngineContext>>;
}

/// Engine state bound to one device path
///
/// Dropping the context releases every resource it holds.
pub trait EngineContext: Send {
    fn path(&self) -> &Path;

    /// Write a fresh header with no key slots; returns the volume key used,
    /// generated by the engine when the request carries none
    fn format(&mut self, request: &FormatRequest) -> EngineResult<VolumeKey>;

    /// Parse the on-disk header; `expected` restricts the accepted variant
    fn load(&mut self, expected: Option<VariantKind>) -> EngineResult<VariantKind>;

    fn header_info(&mut self) -> EngineResult<HeaderInfo>;

    fn keyslot_status(&mut self, slot: u32) -> EngineResult<KeyslotStatus> {
        Ok(self.header_info()?.keyslot(slot))
    }

    /// Provision `new_passphrase` into `slot` after proving access with
    /// `auth`; returns the slot written
    fn keyslot_add(
        &mut self,
        slot: KeyslotIndex,
        auth: KeyMaterial<'_>,
        new_passphrase: &[u8],
    ) -> EngineResult<u32>;

    /// Replace the passphrase in `old_slot` with `new_passphrase` stored in
    /// `new_slot`; returns the slot written
    fn keyslot_change(
        &mut self,
        old_slot: KeyslotIndex,
        new_slot: KeyslotIndex,
        old_passphrase: &[u8],
        new_passphrase: &[u8],
    ) -> EngineResult<u32>;

    fn keyslot_destroy(&mut self, slot: u32) -> EngineResult<()>;

    /// Map the cleartext device under `name`; returns the key slot that
    /// unlocked it when the authorization was a passphrase
    fn activate(
        &mut self,
        name: &str,
        slot: KeyslotIndex,
        auth: KeyMaterial<'_>,
        flags: ActivationFlags,
    ) -> EngineResult<Option<u32>>;

    fn deactivate(&mut self, name: &str) -> EngineResult<()>;

    fn mapping_status(&mut self, name: &str) -> EngineResult<MappingStatus>;
}
