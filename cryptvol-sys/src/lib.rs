// SPDX-License-Identifier: GPL-3.0-only

//! Engines and error translation for cryptvol
//!
//! An [`Engine`] opens one [`EngineContext`] per device path. Contexts
//! report failures as a negative [`Status`]; the device layer pairs it with
//! the attempted [`Operation`] through [`translate`].
//!
//! - [`CryptsetupEngine`] drives the `cryptsetup(8)` tool
//! - `MemoryEngine` (feature `memory-engine`) keeps a JSON header inside a
//!   regular file and is meant for tests

pub mod config;
pub mod cryptsetup;
pub mod engine;
pub mod error;
#[cfg(feature = "memory-engine")]
pub mod memory;

pub use config::{ConfigError, EngineConfig};
pub use cryptsetup::CryptsetupEngine;
pub use engine::{Engine, EngineContext};
pub use error::{CryptError, EngineResult, ErrorKind, Operation, Status, translate};
#[cfg(feature = "memory-engine")]
pub use memory::MemoryEngine;
