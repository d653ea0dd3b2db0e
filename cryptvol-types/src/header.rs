// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

use crate::keyslot::KeyslotStatus;
use crate::variant::VariantKind;

/// Header summary as reported by the engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderInfo {
    pub variant: VariantKind,

    /// Cipher name (e.g. "aes")
    pub cipher: String,

    /// Cipher mode (e.g. "xts-plain64")
    pub cipher_mode: String,

    /// Hash spec (LUKS1) or key-slot digest hash (LUKS2)
    pub hash: String,

    /// Volume key size in bits
    pub key_bits: u32,

    pub uuid: String,

    /// Occupancy of every slot the header defines, in slot order
    pub keyslots: Vec<KeyslotStatus>,
}

impl HeaderInfo {
    pub fn keyslot(&self, slot: u32) -> KeyslotStatus {
        self.keyslots
            .get(slot as usize)
            .copied()
            .unwrap_or(KeyslotStatus::Invalid)
    }

    pub fn first_free_keyslot(&self) -> Option<u32> {
        self.keyslots
            .iter()
            .position(|status| *status == KeyslotStatus::Inactive)
            .map(|idx| idx as u32)
    }

    pub fn active_keyslots(&self) -> Vec<u32> {
        self.keyslots
            .iter()
            .enumerate()
            .filter(|(_, status)| status.is_occupied())
            .map(|(idx, _)| idx as u32)
            .collect()
    }

    /// Rewrite `Active`/`ActiveLast` so the last remaining slot is marked
    pub fn normalize_last_slot(&mut self) {
        let active = self.active_keyslots();
        for slot in &active {
            self.keyslots[*slot as usize] = if active.len() == 1 {
                KeyslotStatus::ActiveLast
            } else {
                KeyslotStatus::Active
            };
        }
    }
}
