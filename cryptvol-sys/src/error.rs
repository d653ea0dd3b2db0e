// SPDX-License-Identifier: GPL-3.0-only

//! Engine status codes and the caller-facing error taxonomy
//!
//! Engines report failures as negated errno values. [`translate`] pairs the
//! code with the attempted operation and classifies it; the code itself is
//! never altered, so callers can match on `-22` or `-1` directly.

use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Non-zero signed status reported by an engine call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(i32);

impl Status {
    /// Wrap a raw code; zero is success and yields `None`
    pub fn new(code: i32) -> Option<Self> {
        (code != 0).then_some(Self(code))
    }

    /// Negated errno status (e.g. `EINVAL` becomes `-22`)
    pub fn from_errno(errno: Errno) -> Self {
        Self(-(errno as i32))
    }

    pub fn code(&self) -> i32 {
        self.0
    }
}

impl From<Errno> for Status {
    fn from(errno: Errno) -> Self {
        Self::from_errno(errno)
    }
}

impl From<std::io::Error> for Status {
    fn from(err: std::io::Error) -> Self {
        match err.raw_os_error() {
            Some(raw) if raw > 0 => Self(-raw),
            _ => Self::from_errno(Errno::EIO),
        }
    }
}

/// Result of an engine call
pub type EngineResult<T> = std::result::Result<T, Status>;

/// Operation attempted when a failure occurred
///
/// Names follow the libcryptsetup entry points the operations correspond to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Init,
    Format,
    Load,
    KeyslotAddByVolumeKey,
    KeyslotAddByPassphrase,
    KeyslotChangeByPassphrase,
    KeyslotDestroy,
    KeyslotStatus,
    ActivateByPassphrase,
    ActivateByVolumeKey,
    Deactivate,
    Status,
    Dump,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "crypt_init",
            Self::Format => "crypt_format",
            Self::Load => "crypt_load",
            Self::KeyslotAddByVolumeKey => "crypt_keyslot_add_by_volume_key",
            Self::KeyslotAddByPassphrase => "crypt_keyslot_add_by_passphrase",
            Self::KeyslotChangeByPassphrase => "crypt_keyslot_change_by_passphrase",
            Self::KeyslotDestroy => "crypt_keyslot_destroy",
            Self::KeyslotStatus => "crypt_keyslot_status",
            Self::ActivateByPassphrase => "crypt_activate_by_passphrase",
            Self::ActivateByVolumeKey => "crypt_activate_by_volume_key",
            Self::Deactivate => "crypt_deactivate",
            Self::Status => "crypt_status",
            Self::Dump => "crypt_dump",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-facing error classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The path could not be opened by the engine
    DeviceOpen,
    /// Format was rejected
    Format,
    /// No valid header, or the header variant differs from the expected one
    Load,
    /// Wrong passphrase or volume key
    Authentication,
    /// Slot occupied or invalid key-slot arguments
    KeyslotAdd,
    /// The mapping name is already in use
    ActivationConflict,
    /// Nothing is mapped under the name
    NotActive,
    /// Any other engine failure
    Engine,
}

/// Failure of an engine-backed operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Function '{operation}' returned error with code '{code}'.")]
pub struct CryptError {
    kind: ErrorKind,
    code: i32,
    operation: Operation,
}

impl CryptError {
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Raw status exactly as the engine reported it
    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Code as an errno, when it is a negated errno value
    pub fn errno(&self) -> Option<Errno> {
        if self.code < 0 {
            Some(Errno::from_raw(-self.code))
        } else {
            None
        }
    }

    pub fn is_invalid_argument(&self) -> bool {
        self.code == -(Errno::EINVAL as i32)
    }
}

/// Build the error for a failed `operation`
pub fn translate(code: i32, operation: Operation) -> CryptError {
    debug_assert_ne!(code, 0, "success codes never reach the translator");
    CryptError {
        kind: classify(code, operation),
        code,
        operation,
    }
}

impl Status {
    pub fn into_error(self, operation: Operation) -> CryptError {
        translate(self.0, operation)
    }
}

fn classify(code: i32, operation: Operation) -> ErrorKind {
    let errno = if code < 0 {
        Errno::from_raw(-code)
    } else {
        Errno::UnknownErrno
    };

    match operation {
        Operation::Init => ErrorKind::DeviceOpen,
        Operation::Format => ErrorKind::Format,
        Operation::Load => ErrorKind::Load,
        Operation::KeyslotAddByVolumeKey | Operation::KeyslotAddByPassphrase => match errno {
            Errno::EPERM => ErrorKind::Authentication,
            _ => ErrorKind::KeyslotAdd,
        },
        Operation::KeyslotChangeByPassphrase => match errno {
            Errno::EPERM => ErrorKind::Authentication,
            _ => ErrorKind::Engine,
        },
        Operation::ActivateByPassphrase | Operation::ActivateByVolumeKey => match errno {
            Errno::EPERM => ErrorKind::Authentication,
            Errno::EEXIST | Errno::EBUSY => ErrorKind::ActivationConflict,
            _ => ErrorKind::Engine,
        },
        Operation::Deactivate => match errno {
            Errno::ENODEV | Errno::ENOENT => ErrorKind::NotActive,
            _ => ErrorKind::Engine,
        },
        Operation::KeyslotDestroy | Operation::KeyslotStatus | Operation::Status | Operation::Dump => {
            ErrorKind::Engine
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_names_function_and_code() {
        let err = translate(-22, Operation::KeyslotAddByVolumeKey);
        assert_eq!(
            err.to_string(),
            "Function 'crypt_keyslot_add_by_volume_key' returned error with code '-22'."
        );
        assert_eq!(err.code(), -22);
        assert_eq!(err.kind(), ErrorKind::KeyslotAdd);
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn codes_pass_through_unchanged() {
        for code in [-1, -2, -5, -16, -17, -19, -22, -110, 42] {
            assert_eq!(translate(code, Operation::Format).code(), code);
        }
    }

    #[test]
    fn classification_depends_on_operation() {
        assert_eq!(translate(-1, Operation::ActivateByPassphrase).kind(), ErrorKind::Authentication);
        assert_eq!(translate(-17, Operation::ActivateByVolumeKey).kind(), ErrorKind::ActivationConflict);
        assert_eq!(translate(-19, Operation::Deactivate).kind(), ErrorKind::NotActive);
        assert_eq!(translate(-16, Operation::Deactivate).kind(), ErrorKind::Engine);
        assert_eq!(translate(-1, Operation::KeyslotAddByPassphrase).kind(), ErrorKind::Authentication);
        assert_eq!(translate(-2, Operation::Init).kind(), ErrorKind::DeviceOpen);
        assert_eq!(translate(-22, Operation::Load).kind(), ErrorKind::Load);
        assert_eq!(translate(-5, Operation::Dump).kind(), ErrorKind::Engine);
    }

    #[test]
    fn errno_view() {
        assert_eq!(translate(-1, Operation::Load).errno(), Some(Errno::EPERM));
        assert_eq!(translate(3, Operation::Load).errno(), None);
        assert_eq!(Status::from_errno(Errno::EINVAL).code(), -22);
        assert_eq!(Status::new(0), None);
    }
}
