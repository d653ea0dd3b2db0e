// SPDX-License-Identifier: GPL-3.0-only

//! Key slot addressing and occupancy

use serde::{Deserialize, Serialize};

/// Key slot selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyslotIndex {
    /// Let the engine choose (first free slot, or any matching slot)
    Any,

    /// A specific slot number
    Slot(u32),
}

impl KeyslotIndex {
    /// Convert the conventional integer form, where `-1` means "any"
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            -1 => Some(Self::Any),
            n if n >= 0 => Some(Self::Slot(n as u32)),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> i32 {
        match self {
            Self::Any => -1,
            Self::Slot(n) => *n as i32,
        }
    }

    pub fn slot(&self) -> Option<u32> {
        match self {
            Self::Any => None,
            Self::Slot(n) => Some(*n),
        }
    }
}

impl From<u32> for KeyslotIndex {
    fn from(slot: u32) -> Self {
        Self::Slot(slot)
    }
}

impl std::fmt::Display for KeyslotIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Slot(n) => write!(f, "{n}"),
        }
    }
}

/// Occupancy of one key slot as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyslotStatus {
    /// Slot index outside the header's range
    Invalid,

    /// Free
    Inactive,

    /// Occupied
    Active,

    /// Occupied, and the only occupied slot left
    ActiveLast,
}

impl KeyslotStatus {
    pub fn is_occupied(&self) -> bool {
        matches!(self, Self::Active | Self::ActiveLast)
    }
}

/// Proof of authorization presented to the engine
#[derive(Clone, Copy)]
pub enum KeyMaterial<'a> {
    /// Passphrase bound to some occupied key slot
    Passphrase(&'a [u8]),

    /// The raw volume key
    VolumeKey(&'a [u8]),
}

impl KeyMaterial<'_> {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Passphrase(bytes) | Self::VolumeKey(bytes) => bytes,
        }
    }
}

impl std::fmt::Debug for KeyMaterial<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passphrase(_) => f.write_str("Passphrase(..)"),
            Self::VolumeKey(bytes) => write!(f, "VolumeKey({} bytes)", bytes.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_minus_one_means_any() {
        assert_eq!(KeyslotIndex::from_raw(-1), Some(KeyslotIndex::Any));
        assert_eq!(KeyslotIndex::from_raw(3), Some(KeyslotIndex::Slot(3)));
        assert_eq!(KeyslotIndex::from_raw(-5), None);
        assert_eq!(KeyslotIndex::Any.as_raw(), -1);
    }

    #[test]
    fn occupancy() {
        assert!(KeyslotStatus::ActiveLast.is_occupied());
        assert!(!KeyslotStatus::Inactive.is_occupied());
        assert!(!KeyslotStatus::Invalid.is_occupied());
    }
}
