// SPDX-License-Identifier: GPL-3.0-only

//! Activation flags and mapping state

use enumflags2::{BitFlags, bitflags};
use serde::{Deserialize, Serialize};

/// Activation options; bit values follow libcryptsetup's `CRYPT_ACTIVATE_*`
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationFlag {
    /// The mapped device rejects writes
    ReadOnly = 1 << 0,
    AllowDiscards = 1 << 3,
    SameCpuCrypt = 1 << 6,
    SubmitFromCryptCpus = 1 << 7,
    NoReadWorkqueue = 1 << 24,
    NoWriteWorkqueue = 1 << 25,
}

pub type ActivationFlags = BitFlags<ActivationFlag>;

impl ActivationFlag {
    /// cryptsetup option enabling this flag
    pub fn cryptsetup_arg(&self) -> &'static str {
        match self {
            Self::ReadOnly => "--readonly",
            Self::AllowDiscards => "--allow-discards",
            Self::SameCpuCrypt => "--perf-same_cpu_crypt",
            Self::SubmitFromCryptCpus => "--perf-submit_from_crypt_cpus",
            Self::NoReadWorkqueue => "--perf-no_read_workqueue",
            Self::NoWriteWorkqueue => "--perf-no_write_workqueue",
        }
    }
}

/// State of a named mapping on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappingStatus {
    Inactive,
    Active {
        /// Backing device of the mapping, when the engine reports it
        device: Option<String>,
        read_only: bool,
    },
}

impl MappingStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_is_bit_zero() {
        let flags: ActivationFlags = ActivationFlag::ReadOnly.into();
        assert_eq!(flags.bits(), 1);
        assert_eq!(
            ActivationFlags::from_bits_truncate(1 | 1 << 3),
            ActivationFlag::ReadOnly | ActivationFlag::AllowDiscards
        );
    }
}
