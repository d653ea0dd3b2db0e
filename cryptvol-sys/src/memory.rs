// SPDX-License-Identifier: GPL-3.0-only

//! In-process engine for tests and dry runs
//!
//! The header is stored as a single JSON line after a magic line at the
//! start of the target file, so it survives across handles and processes
//! the same way a real header does. Only SHA-256 digests of passphrases and
//! of the volume key are stored; nothing here is a cryptographic engine.
//! Active mappings live in a process-wide table standing in for the host's
//! device-mapper namespace.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, PoisonError};

use cryptvol_types::{
    ActivationFlag, ActivationFlags, FormatRequest, HeaderInfo, KeyMaterial, KeyslotIndex,
    KeyslotStatus, MappingStatus, VariantKind, VolumeKey,
};
use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::engine::{Engine, EngineContext};
use crate::error::{EngineResult, Status};

const MAGIC: &[u8] = b"CRYPTVOL-MEMORY-HEADER v1\n";

/// Largest header line accepted on load
const MAX_HEADER_BYTES: u64 = 64 * 1024;

#[derive(Debug, Clone)]
struct Mapping {
    device: PathBuf,
    read_only: bool,
}

static MAPPINGS: LazyLock<Mutex<BTreeMap<String, Mapping>>> =
    LazyLock::new(|| Mutex::new(BTreeMap::new()));

fn mappings() -> std::sync::MutexGuard<'static, BTreeMap<String, Mapping>> {
    MAPPINGS.lock().unwrap_or_else(PoisonError::into_inner)
}

fn fail(errno: Errno) -> Status {
    Status::from_errno(errno)
}

fn random_hex(len: usize) -> EngineResult<String> {
    let mut bytes = vec![0u8; len];
    getrandom::fill(&mut bytes).map_err(|_| fail(Errno::EIO))?;
    Ok(hex::encode(bytes))
}

fn digest(salt: &str, secret: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(secret);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredKeyslot {
    salt: String,
    digest: String,
}

impl StoredKeyslot {
    fn seal(passphrase: &[u8]) -> EngineResult<Self> {
        let salt = random_hex(16)?;
        let digest = digest(&salt, passphrase);
        Ok(Self { salt, digest })
    }

    fn opens_with(&self, passphrase: &[u8]) -> bool {
        digest(&self.salt, passphrase) == self.digest
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredHeader {
    variant: VariantKind,
    cipher: String,
    cipher_mode: String,
    hash: String,
    key_bytes: usize,
    uuid: String,
    key_salt: String,
    key_digest: String,
    keyslots: Vec<Option<StoredKeyslot>>,
}

impl StoredHeader {
    fn info(&self) -> HeaderInfo {
        let mut info = HeaderInfo {
            variant: self.variant,
            cipher: self.cipher.clone(),
            cipher_mode: self.cipher_mode.clone(),
            hash: self.hash.clone(),
            key_bits: (self.key_bytes * 8) as u32,
            uuid: self.uuid.clone(),
            keyslots: self
                .keyslots
                .iter()
                .map(|slot| match slot {
                    Some(_) => KeyslotStatus::Active,
                    None => KeyslotStatus::Inactive,
                })
                .collect(),
        };
        info.normalize_last_slot();
        info
    }

    fn verify_volume_key(&self, key: &[u8]) -> EngineResult<()> {
        if key.len() != self.key_bytes {
            return Err(fail(Errno::EINVAL));
        }
        if digest(&self.key_salt, key) != self.key_digest {
            return Err(fail(Errno::EPERM));
        }
        Ok(())
    }

    /// Slot opened by `passphrase`, restricted to `slot` when specific
    fn unlock(&self, slot: KeyslotIndex, passphrase: &[u8]) -> EngineResult<u32> {
        match slot {
            KeyslotIndex::Slot(n) => match self.keyslots.get(n as usize) {
                None => Err(fail(Errno::EINVAL)),
                Some(None) => Err(fail(Errno::ENOENT)),
                Some(Some(stored)) if stored.opens_with(passphrase) => Ok(n),
                Some(Some(_)) => Err(fail(Errno::EPERM)),
            },
            KeyslotIndex::Any => self
                .keyslots
                .iter()
                .position(|stored| {
                    stored
                        .as_ref()
                        .is_some_and(|stored| stored.opens_with(passphrase))
                })
                .map(|idx| idx as u32)
                .ok_or_else(|| fail(Errno::EPERM)),
        }
    }

    fn authorize(&self, auth: KeyMaterial<'_>) -> EngineResult<()> {
        match auth {
            KeyMaterial::VolumeKey(key) => self.verify_volume_key(key),
            KeyMaterial::Passphrase(passphrase) => {
                self.unlock(KeyslotIndex::Any, passphrase).map(|_| ())
            }
        }
    }

    /// Free slot to write into; `-EINVAL` if occupied, out of range or full
    fn free_slot(&self, slot: KeyslotIndex) -> EngineResult<u32> {
        match slot {
            KeyslotIndex::Slot(n) => match self.keyslots.get(n as usize) {
                Some(None) => Ok(n),
                _ => Err(fail(Errno::EINVAL)),
            },
            KeyslotIndex::Any => self
                .keyslots
                .iter()
                .position(Option::is_none)
                .map(|idx| idx as u32)
                .ok_or_else(|| fail(Errno::EINVAL)),
        }
    }
}

/// Engine keeping headers as JSON inside the target file
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryEngine;

impl MemoryEngine {
    pub fn new() -> Self {
        Self
    }

    /// Names currently mapped by any memory engine context in this process
    pub fn active_mappings() -> Vec<String> {
        mappings().keys().cloned().collect()
    }
}

impl Engine for MemoryEngine {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn open(&self, path: &Path) -> EngineResult<Box<dyn EngineContext>> {
        let metadata = std::fs::metadata(path)?;
        if metadata.is_dir() {
            return Err(fail(Errno::ENOTBLK));
        }
        File::open(path)?;
        Ok(Box::new(MemoryContext {
            path: path.to_path_buf(),
        }))
    }
}

/// Context of the memory engine; holds no header state between calls
pub struct MemoryContext {
    path: PathBuf,
}

impl MemoryContext {
    fn read_header(&self) -> EngineResult<StoredHeader> {
        let file = File::open(&self.path)?;
        let mut buf = Vec::new();
        file.take(MAX_HEADER_BYTES).read_to_end(&mut buf)?;

        let Some(body) = buf.strip_prefix(MAGIC) else {
            debug!("No memory header on {:?}", self.path);
            return Err(fail(Errno::EINVAL));
        };
        let line = body.split(|b| *b == b'\n').next().unwrap_or_default();
        serde_json::from_slice(line).map_err(|e| {
            debug!("Corrupt memory header on {:?}: {}", self.path, e);
            fail(Errno::EINVAL)
        })
    }

    fn write_header(&self, header: &StoredHeader) -> EngineResult<()> {
        let mut bytes = MAGIC.to_vec();
        serde_json::to_writer(&mut bytes, header).map_err(|_| fail(Errno::EIO))?;
        bytes.push(b'\n');

        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.write_all_at(&bytes, 0)?;
        file.sync_all()?;
        Ok(())
    }
}

impl EngineContext for MemoryContext {
    fn path(&self) -> &Path {
        &self.path
    }

    fn format(&mut self, request: &FormatRequest) -> EngineResult<VolumeKey> {
        if request.volume_key_size == 0 || request.cipher.is_empty() {
            return Err(fail(Errno::EINVAL));
        }
        if mappings().values().any(|m| m.device == self.path) {
            debug!("Refusing to format {:?} while it is mapped", self.path);
            return Err(fail(Errno::EBUSY));
        }
        let volume_key = match &request.volume_key {
            Some(key) if key.len() != request.volume_key_size => return Err(fail(Errno::EINVAL)),
            Some(key) => key.clone(),
            None => {
                let mut bytes = vec![0u8; request.volume_key_size];
                getrandom::fill(&mut bytes).map_err(|_| fail(Errno::EIO))?;
                VolumeKey::new(bytes)
            }
        };

        let key_salt = random_hex(16)?;
        let header = StoredHeader {
            variant: request.variant.kind(),
            cipher: request.cipher.clone(),
            cipher_mode: request.cipher_mode.clone(),
            hash: request.variant.hash().to_string(),
            key_bytes: request.volume_key_size,
            uuid: request.uuid.unwrap_or_else(Uuid::new_v4).to_string(),
            key_digest: digest(&key_salt, volume_key.as_bytes()),
            key_salt,
            keyslots: vec![None; request.variant.kind().keyslot_count() as usize],
        };
        self.write_header(&header)?;
        Ok(volume_key)
    }

    fn load(&mut self, expected: Option<VariantKind>) -> EngineResult<VariantKind> {
        let header = self.read_header()?;
        match expected {
            Some(expected) if expected != header.variant => Err(fail(Errno::EINVAL)),
            _ => Ok(header.variant),
        }
    }

    fn header_info(&mut self) -> EngineResult<HeaderInfo> {
        Ok(self.read_header()?.info())
    }

    fn keyslot_add(
        &mut self,
        slot: KeyslotIndex,
        auth: KeyMaterial<'_>,
        new_passphrase: &[u8],
    ) -> EngineResult<u32> {
        let mut header = self.read_header()?;
        let target = header.free_slot(slot)?;
        header.authorize(auth)?;

        header.keyslots[target as usize] = Some(StoredKeyslot::seal(new_passphrase)?);
        self.write_header(&header)?;
        Ok(target)
    }

    fn keyslot_change(
        &mut self,
        old_slot: KeyslotIndex,
        new_slot: KeyslotIndex,
        old_passphrase: &[u8],
        new_passphrase: &[u8],
    ) -> EngineResult<u32> {
        let mut header = self.read_header()?;
        let old = match header.unlock(old_slot, old_passphrase) {
            Err(status) if status.code() == -(Errno::ENOENT as i32) => {
                return Err(fail(Errno::EPERM));
            }
            other => other?,
        };

        let target = match new_slot {
            KeyslotIndex::Slot(n) if n != old => {
                let target = header.free_slot(new_slot)?;
                header.keyslots[old as usize] = None;
                target
            }
            _ => old,
        };

        header.keyslots[target as usize] = Some(StoredKeyslot::seal(new_passphrase)?);
        self.write_header(&header)?;
        Ok(target)
    }

    fn keyslot_destroy(&mut self, slot: u32) -> EngineResult<()> {
        let mut header = self.read_header()?;
        match header.keyslots.get_mut(slot as usize) {
            Some(stored) if stored.is_some() => *stored = None,
            _ => return Err(fail(Errno::EINVAL)),
        }
        self.write_header(&header)
    }

    fn activate(
        &mut self,
        name: &str,
        slot: KeyslotIndex,
        auth: KeyMaterial<'_>,
        flags: ActivationFlags,
    ) -> EngineResult<Option<u32>> {
        if name.is_empty() {
            return Err(fail(Errno::EINVAL));
        }
        let header = self.read_header()?;
        let unlocked = match auth {
            KeyMaterial::Passphrase(passphrase) => Some(header.unlock(slot, passphrase)?),
            KeyMaterial::VolumeKey(key) => {
                header.verify_volume_key(key)?;
                None
            }
        };

        let mut table = mappings();
        if table.contains_key(name) {
            return Err(fail(Errno::EEXIST));
        }
        table.insert(
            name.to_string(),
            Mapping {
                device: self.path.clone(),
                read_only: flags.contains(ActivationFlag::ReadOnly),
            },
        );
        Ok(unlocked)
    }

    fn deactivate(&mut self, name: &str) -> EngineResult<()> {
        mappings()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| fail(Errno::ENODEV))
    }

    fn mapping_status(&mut self, name: &str) -> EngineResult<MappingStatus> {
        Ok(match mappings().get(name) {
            Some(mapping) => MappingStatus::Active {
                device: Some(mapping.device.display().to_string()),
                read_only: mapping.read_only,
            },
            None => MappingStatus::Inactive,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptvol_types::FormatVariant;

    fn request() -> FormatRequest {
        FormatRequest {
            variant: FormatVariant::luks1("sha256"),
            cipher: "aes".into(),
            cipher_mode: "xts-plain64".into(),
            uuid: None,
            volume_key: None,
            volume_key_size: 32,
        }
    }

    fn context() -> (tempfile::NamedTempFile, Box<dyn EngineContext>) {
        let file = tempfile::NamedTempFile::new().expect("tempfile");
        file.as_file().set_len(1 << 20).expect("size image");
        let ctx = MemoryEngine.open(file.path()).expect("open");
        (file, ctx)
    }

    #[test]
    fn header_survives_reopen() {
        let (file, mut ctx) = context();
        let key = ctx.format(&request()).expect("format");
        assert_eq!(key.len(), 32);
        ctx.keyslot_add(KeyslotIndex::Any, KeyMaterial::VolumeKey(key.as_bytes()), b"pw")
            .expect("add");

        let mut reopened = MemoryEngine.open(file.path()).expect("reopen");
        assert_eq!(reopened.load(None), Ok(VariantKind::Luks1));
        let info = reopened.header_info().expect("info");
        assert_eq!(info.keyslot(0), KeyslotStatus::ActiveLast);
        assert_eq!(info.key_bits, 256);
    }

    #[test]
    fn unformatted_file_has_no_header() {
        let (_file, mut ctx) = context();
        assert_eq!(ctx.load(None), Err(Status::from_errno(Errno::EINVAL)));
    }

    #[test]
    fn occupied_slot_is_invalid_argument() {
        let (_file, mut ctx) = context();
        let key = ctx.format(&request()).expect("format");
        let auth = KeyMaterial::VolumeKey(key.as_bytes());
        ctx.keyslot_add(KeyslotIndex::Slot(2), auth, b"pw").expect("add");
        assert_eq!(
            ctx.keyslot_add(KeyslotIndex::Slot(2), auth, b"other"),
            Err(Status::from_errno(Errno::EINVAL))
        );
    }

    #[test]
    fn wrong_volume_key_is_rejected() {
        let (_file, mut ctx) = context();
        ctx.format(&request()).expect("format");
        assert_eq!(
            ctx.keyslot_add(KeyslotIndex::Any, KeyMaterial::VolumeKey(&[0u8; 32]), b"pw"),
            Err(Status::from_errno(Errno::EPERM))
        );
    }
}
