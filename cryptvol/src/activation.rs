// SPDX-License-Identifier: GPL-3.0-only

//! Mapping the cleartext view of a device under a name

use cryptvol_sys::{CryptError, Operation};
use cryptvol_types::{ActivationFlags, KeyMaterial, KeyslotIndex, MappingStatus};
use tracing::info;

use crate::device::DeviceHandle;

/// Activation operations borrowed from a [`DeviceHandle`]
///
/// Mapping names are unique host-wide. The handle tracks the names it
/// mapped itself; mappings outlive the handle unless deactivated.
#[derive(Debug)]
pub struct ActivationController<'a> {
    device: &'a mut DeviceHandle,
}

impl<'a> ActivationController<'a> {
    pub(crate) fn new(device: &'a mut DeviceHandle) -> Self {
        Self { device }
    }

    /// Map the device under `name`, unlocking it with `passphrase`
    ///
    /// Returns the key slot that opened the header when the engine reports
    /// it.
    pub fn activate_by_passphrase(
        &mut self,
        name: &str,
        slot: KeyslotIndex,
        passphrase: &[u8],
        flags: ActivationFlags,
    ) -> Result<Option<u32>, CryptError> {
        let op = Operation::ActivateByPassphrase;
        self.device.require_established(op)?;

        let unlocked = self
            .device
            .context
            .activate(name, slot, KeyMaterial::Passphrase(passphrase), flags)
            .map_err(|status| self.device.failed(status, op))?;

        self.device.mapped.insert(name.to_string());
        info!(
            "Activated {:?} as {} (slot {:?}, flags {:?})",
            self.device.path(),
            name,
            unlocked,
            flags
        );
        Ok(unlocked)
    }

    /// Map the device under `name` using the raw volume key
    ///
    /// An empty `volume_key` means the key remembered from this handle's
    /// last format. The key must be exactly `volume_key_size` bytes long;
    /// either violation fails with `-22` before the engine is called.
    pub fn activate_by_volume_key(
        &mut self,
        name: &str,
        volume_key: &[u8],
        volume_key_size: usize,
        flags: ActivationFlags,
    ) -> Result<(), CryptError> {
        let op = Operation::ActivateByVolumeKey;
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
        if key.len() != volume_key_size {
            return Err(device.violation(op));
        }

        device
            .context
            .activate(name, KeyslotIndex::Any, KeyMaterial::VolumeKey(key), flags)
            .map_err(|status| device.failed(status, op))?;

        device.mapped.insert(name.to_string());
        info!(
            "Activated {:?} as {} by volume key (flags {:?})",
            device.path(),
            name,
            flags
        );
        Ok(())
    }

    /// Remove the mapping `name`
    pub fn deactivate(&mut self, name: &str) -> Result<(), CryptError> {
        let op = Operation::Deactivate;
        self.device.require_established(op)?;

        self.device
            .context
            .deactivate(name)
            .map_err(|status| self.device.failed(status, op))?;

        self.device.mapped.remove(name);
        info!("Deactivated {}", name);
        Ok(())
    }

    /// Host-wide state of the mapping `name`
    pub fn status(&mut self, name: &str) -> Result<MappingStatus, CryptError> {
        let op = Operation::Status;
        self.device.require_established(op)?;

        self.device
            .context
            .mapping_status(name)
            .map_err(|status| self.device.failed(status, op))
    }

    /// Names mapped through this handle that are still active
    pub fn active_names(&self) -> Vec<String> {
        self.device.mapped.iter().cloned().collect()
    }
}
