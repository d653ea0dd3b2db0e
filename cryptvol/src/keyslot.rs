// SPDX-License-Identifier: GPL-3.0-only

//! Key slot management on an established header
//!
//! Occupancy is never cached: every call asks the engine, and "any slot"
//! selection is resolved by the engine at call time.

use cryptvol_sys::{CryptError, Operation};
use cryptvol_types::{KeyMaterial, KeyslotIndex, KeyslotStatus};
use tracing::info;

use crate::device::DeviceHandle;

/// Key slot operations borrowed from a [`DeviceHandle`]
#[derive(Debug)]
pub struct KeyslotManager<'a> {
    device: &'a mut DeviceHandle,
}

impl<'a> KeyslotManager<'a> {
    pub(crate) fn new(device: &'a mut DeviceHandle) -> Self {
        Self { device }
    }

    /// Number of key slots the current header variant has
    pub fn max_slots(&self) -> u32 {
        self.device.variant.keyslot_count()
    }

    /// Add `new_passphrase` authorized by the volume key
    ///
    /// An empty `volume_key` means the key remembered from this handle's
    /// last format. A handle that never formatted has none, and the call
    /// fails with `-22` without reaching the engine. Returns the slot
    /// written.
    pub fn add_by_volume_key(
        &mut self,
        slot: KeyslotIndex,
        volume_key: &[u8],
        new_passphrase: &[u8],
    ) -> Result<u32, CryptError> {
        let op = Operation::KeyslotAddByVolumeKey;
        self.device.require_established(op)?;

        let device = &mut *self.device;
        let key = if volume_key.is_empty() {
            match &device.volume_key {
                Some(remembered) => remembered.as_bytes(),
                None => return Err(device.violation(op)),
            }
        } else {
            volume_key
        };

        let written = device
            .context
            .keyslot_add(slot, KeyMaterial::VolumeKey(key), new_passphrase)
            .map_err(|status| device.failed(status, op))?;
        info!("Added key slot {} to {:?}", written, device.path());
        Ok(written)
    }

    /// Add `new_passphrase` authorized by an existing passphrase
    pub fn add_by_passphrase(
        &mut self,
        slot: KeyslotIndex,
        passphrase: &[u8],
        new_passphrase: &[u8],
    ) -> Result<u32, CryptError> {
        let op = Operation::KeyslotAddByPassphrase;
        self.device.require_established(op)?;

        let written = self
            .device
            .context
            .keyslot_add(slot, KeyMaterial::Passphrase(passphrase), new_passphrase)
            .map_err(|status| self.device.failed(status, op))?;
        info!("Added key slot {} to {:?}", written, self.device.path());
        Ok(written)
    }

    /// Replace the passphrase in `old_slot`, storing `new_passphrase` in
    /// `new_slot`
    ///
    /// When both slots are the same the old passphrase stops working. A
    /// wrong `passphrase` leaves the header untouched.
    pub fn change_by_passphrase(
        &mut self,
        old_slot: KeyslotIndex,
        new_slot: KeyslotIndex,
        passphrase: &[u8],
        new_passphrase: &[u8],
    ) -> Result<u32, CryptError> {
        let op = Operation::KeyslotChangeByPassphrase;
        self.device.require_established(op)?;

        let written = self
            .device
            .context
            .keyslot_change(old_slot, new_slot, passphrase, new_passphrase)
            .map_err(|status| self.device.failed(status, op))?;
        info!(
            "Changed key slot {} -> {} on {:?}",
            old_slot,
            written,
            self.device.path()
        );
        Ok(written)
    }

    /// Destroy the key material in `slot`; the slot becomes free
    pub fn wipe(&mut self, slot: u32) -> Result<(), CryptError> {
        let op = Operation::KeyslotDestroy;
        self.device.require_established(op)?;

        self.device
            .context
            .keyslot_destroy(slot)
            .map_err(|status| self.device.failed(status, op))?;
        info!("Wiped key slot {} on {:?}", slot, self.device.path());
        Ok(())
    }

    pub fn status(&mut self, slot: u32) -> Result<KeyslotStatus, CryptError> {
        let op = Operation::KeyslotStatus;
        self.device.require_established(op)?;

        self.device
            .context
            .keyslot_status(slot)
            .map_err(|status| self.device.failed(status, op))
    }
}
