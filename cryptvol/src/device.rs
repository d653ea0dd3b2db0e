// SPDX-License-Identifier: GPL-3.0-only

//! Device handle and its lifecycle state machine

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, PoisonError};

use cryptvol_sys::{
    CryptError, CryptsetupEngine, Engine, EngineConfig, EngineContext, Operation, Status,
    translate,
};
use cryptvol_types::{FormatVariant, GenericParams, HeaderInfo, KeyslotIndex, VariantKind, VolumeKey};
use nix::errno::Errno;
use tracing::{debug, info, warn};

use crate::activation::ActivationController;
use crate::format;
use crate::keyslot::KeyslotManager;

/// Header state of a [`DeviceHandle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Bound to a path, no header established through this handle
    Uninitialized,
    /// A new header was written by this handle
    Formatted,
    /// An existing header was parsed by this handle
    Loaded,
}

impl DeviceState {
    pub fn is_established(&self) -> bool {
        matches!(self, Self::Formatted | Self::Loaded)
    }
}

/// Paths with a live engine context in this process
static CLAIMED_PATHS: LazyLock<Mutex<BTreeSet<PathBuf>>> =
    LazyLock::new(|| Mutex::new(BTreeSet::new()));

/// Exclusive claim on a canonical device path, released on drop
struct PathClaim(PathBuf);

impl PathClaim {
    fn acquire(path: &Path) -> Result<Self, CryptError> {
        let canonical = path
            .canonicalize()
            .map_err(|e| Status::from(e).into_error(Operation::Init))?;

        let mut claimed = CLAIMED_PATHS.lock().unwrap_or_else(PoisonError::into_inner);
        if !claimed.insert(canonical.clone()) {
            warn!("{:?} is already held by another handle", canonical);
            return Err(translate(
                Status::from_errno(Errno::EBUSY).code(),
                Operation::Init,
            ));
        }
        Ok(Self(canonical))
    }
}

impl Drop for PathClaim {
    fn drop(&mut self) {
        CLAIMED_PATHS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.0);
    }
}

/// Encryption context bound to one block device path
///
/// At most one handle per path is alive in a process at a time. The engine
/// context is released exactly once, when the handle is dropped.
pub struct DeviceHandle {
    // Dropped before `claim` so the path is only released once the
    // context is gone.
    pub(crate) context: Box<dyn EngineContext>,
    claim: PathClaim,
    path: PathBuf,
    engine: &'static str,
    pub(crate) variant: VariantKind,
    state: DeviceState,
    /// Volume key from the last successful format through this handle
    pub(crate) volume_key: Option<VolumeKey>,
    /// Names this handle mapped and has not unmapped yet
    pub(crate) mapped: BTreeSet<String>,
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("path", &self.path)
            .field("engine", &self.engine)
            .field("variant", &self.variant)
            .field("state", &self.state)
            .field("volume_key", &self.volume_key)
            .field("mapped", &self.mapped)
            .finish_non_exhaustive()
    }
}

impl DeviceHandle {
    /// Bind a handle to `path` using the cryptsetup engine
    ///
    /// Engine settings come from [`EngineConfig::load`]; an unreadable
    /// config falls back to the defaults.
    pub fn init(path: impl AsRef<Path>) -> Result<Self, CryptError> {
        let config = EngineConfig::load().unwrap_or_else(|e| {
            warn!("Ignoring engine config: {}", e);
            EngineConfig::default()
        });
        let engine = CryptsetupEngine::new(&config).map_err(|s| s.into_error(Operation::Init))?;
        Self::init_with(&engine, path)
    }

    /// Bind a handle to `path` using an explicit engine
    pub fn init_with(engine: &dyn Engine, path: impl AsRef<Path>) -> Result<Self, CryptError> {
        let path = path.as_ref();
        let claim = PathClaim::acquire(path)?;
        let context = engine.open(path).map_err(|status| {
            warn!(
                "{} engine could not open {:?}: {}",
                engine.name(),
                path,
                status.code()
            );
            status.into_error(Operation::Init)
        })?;

        debug!("Opened {:?} with the {} engine", path, engine.name());
        Ok(Self {
            context,
            claim,
            path: path.to_path_buf(),
            engine: engine.name(),
            variant: VariantKind::Unknown,
            state: DeviceState::Uninitialized,
            volume_key: None,
            mapped: BTreeSet::new(),
        })
    }

    /// Path the handle was bound to, as given to `init`
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn kind(&self) -> VariantKind {
        self.variant
    }

    /// `"LUKS1"`, `"LUKS2"`, or `""` before a header is established
    pub fn type_name(&self) -> &'static str {
        self.variant.as_str()
    }

    /// Write a new header, destroying whatever the device held
    ///
    /// Valid from any state. The volume key used is remembered for the
    /// lifetime of the handle. When `params` carries a passphrase it is
    /// provisioned into the first free key slot; otherwise the header has
    /// no key slots.
    ///
    /// A failure to provision that passphrase is still reported as a
    /// [`Operation::Format`] error, but the new header is already written
    /// at that point: the handle stays `Formatted` with no key slot and the
    /// remembered key can still add one.
    pub fn format(&mut self, variant: FormatVariant, params: GenericParams) -> Result<(), CryptError> {
        let request = format::prepare(variant, &params)?;
        let kind = request.variant.kind();

        info!(
            "Formatting {:?} as {} ({}, {} bits)",
            self.path,
            kind,
            request.cipher_spec(),
            request.key_bits()
        );
        let volume_key = self
            .context
            .format(&request)
            .map_err(|status| self.failed(status, Operation::Format))?;

        self.variant = kind;
        self.state = DeviceState::Formatted;
        self.volume_key = Some(volume_key);

        if let Some(passphrase) = &params.passphrase {
            self.keyslots()
                .add_by_volume_key(KeyslotIndex::Any, &[], passphrase)
                .map_err(|e| translate(e.code(), Operation::Format))?;
        }
        Ok(())
    }

    /// Parse the existing header, which must be of variant `expected`
    pub fn load(&mut self, expected: VariantKind) -> Result<VariantKind, CryptError> {
        self.load_header(Some(expected).filter(|kind| *kind != VariantKind::Unknown))
    }

    /// Parse the existing header, accepting any variant
    pub fn load_any(&mut self) -> Result<VariantKind, CryptError> {
        self.load_header(None)
    }

    fn load_header(&mut self, expected: Option<VariantKind>) -> Result<VariantKind, CryptError> {
        if self.state != DeviceState::Uninitialized {
            warn!("{:?} already has an established header", self.path);
            return Err(self.violation(Operation::Load));
        }

        let kind = self
            .context
            .load(expected)
            .map_err(|status| self.failed(status, Operation::Load))?;

        self.variant = kind;
        self.state = DeviceState::Loaded;
        info!("Loaded {} header from {:?}", kind, self.path);
        Ok(kind)
    }

    /// Header summary read fresh from the engine
    pub fn header_info(&mut self) -> Result<HeaderInfo, CryptError> {
        self.require_established(Operation::Dump)?;
        self.context
            .header_info()
            .map_err(|status| self.failed(status, Operation::Dump))
    }

    pub fn uuid(&mut self) -> Result<String, CryptError> {
        Ok(self.header_info()?.uuid)
    }

    pub fn keyslots(&mut self) -> KeyslotManager<'_> {
        KeyslotManager::new(self)
    }

    pub fn activation(&mut self) -> ActivationController<'_> {
        ActivationController::new(self)
    }

    /// Reject operations that need a formatted or loaded header
    pub(crate) fn require_established(&self, operation: Operation) -> Result<(), CryptError> {
        if self.state.is_established() {
            Ok(())
        } else {
            debug!("{} on {:?} before format or load", operation, self.path);
            Err(self.violation(operation))
        }
    }

    pub(crate) fn violation(&self, operation: Operation) -> CryptError {
        translate(Status::from_errno(Errno::EINVAL).code(), operation)
    }

    /// Translate an engine failure and log it
    pub(crate) fn failed(&self, status: Status, operation: Operation) -> CryptError {
        let err = status.into_error(operation);
        warn!(
            "{} failed on {:?} with {} ({:?})",
            operation,
            self.path,
            err.code(),
            err.errno()
        );
        err
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if !self.mapped.is_empty() {
            debug!(
                "Releasing {:?} with mappings still active: {:?}",
                self.path, self.mapped
            );
        }
        debug!("Releasing {} context for {:?}", self.engine, self.claim.0);
    }
}
