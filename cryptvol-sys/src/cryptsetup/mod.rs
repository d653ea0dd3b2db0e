// SPDX-License-Identifier: GPL-3.0-only

//! Engine backed by the `cryptsetup(8)` command-line tool
//!
//! Every call spawns cryptsetup in batch mode. Passphrases travel on stdin
//! where cryptsetup accepts them there, key material otherwise goes through
//! [`SecretFile`]s that are wiped when the call returns.

mod command;
mod dump;
mod secret;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use cryptvol_types::{
    ActivationFlags, FormatRequest, FormatVariant, HeaderInfo, KeyMaterial, KeyslotIndex,
    KeyslotStatus, MappingStatus, VariantKind, VolumeKey,
};
use nix::errno::Errno;
use tracing::{debug, info, warn};
use which::which;
use zeroize::Zeroizing;

use crate::config::EngineConfig;
use crate::engine::{Engine, EngineContext};
use crate::error::{EngineResult, Status};

use command::{CryptsetupCommand, Output};
use secret::SecretFile;

/// Length of the random passphrase used to satisfy `luksFormat`
const THROWAWAY_PASSPHRASE_LEN: usize = 32;

fn os(s: impl Into<OsString>) -> OsString {
    s.into()
}

/// cryptsetup-backed [`Engine`]
#[derive(Debug, Clone)]
pub struct CryptsetupEngine {
    command: CryptsetupCommand,
    secret_dir: PathBuf,
}

impl CryptsetupEngine {
    /// Locate cryptsetup per `config`
    ///
    /// Fails with `-ENOENT` when no binary can be found.
    pub fn new(config: &EngineConfig) -> EngineResult<Self> {
        let binary = match &config.cryptsetup_path {
            Some(path) => path.clone(),
            None => Self::find_cryptsetup_binary()?,
        };
        info!("Using cryptsetup binary at {:?}", binary);
        Ok(Self {
            command: CryptsetupCommand::new(binary, config.timeout()),
            secret_dir: config.secret_dir(),
        })
    }

    /// Find the cryptsetup binary in PATH
    pub fn find_cryptsetup_binary() -> EngineResult<PathBuf> {
        which("cryptsetup").map_err(|_| Status::from_errno(Errno::ENOENT))
    }

    pub fn binary(&self) -> &Path {
        self.command.binary()
    }
}

impl Engine for CryptsetupEngine {
    fn name(&self) -> &'static str {
        "cryptsetup"
    }

    fn open(&self, path: &Path) -> EngineResult<Box<dyn EngineContext>> {
        let metadata = std::fs::metadata(path)?;
        if metadata.is_dir() {
            return Err(Status::from_errno(Errno::ENOTBLK));
        }
        // Writability is only checked when a call needs it, like libcryptsetup
        std::fs::File::open(path)?;

        Ok(Box::new(CryptsetupContext {
            command: self.command.clone(),
            secret_dir: self.secret_dir.clone(),
            path: path.to_path_buf(),
            variant: VariantKind::Unknown,
        }))
    }
}

/// Per-device state of the cryptsetup engine
pub struct CryptsetupContext {
    command: CryptsetupCommand,
    secret_dir: PathBuf,
    path: PathBuf,
    variant: VariantKind,
}

impl CryptsetupContext {
    fn device_arg(&self) -> OsString {
        self.path.as_os_str().to_os_string()
    }

    fn run(&self, args: Vec<OsString>, input: Option<&[u8]>) -> EngineResult<Output> {
        self.command.run(&args, input)
    }

    fn secret(&self, bytes: &[u8]) -> EngineResult<SecretFile> {
        SecretFile::create(&self.secret_dir, bytes)
    }

    fn dump(&self) -> EngineResult<HeaderInfo> {
        let out = self
            .run(vec![os("luksDump"), self.device_arg()], None)?
            .check()?;
        dump::parse_luks_dump(&out.stdout).ok_or_else(|| {
            warn!("Unrecognised luksDump output for {:?}", self.path);
            Status::from_errno(Errno::EINVAL)
        })
    }

    /// Slot unlocked by `passphrase`, verified without activating anything
    fn test_passphrase(&self, slot: KeyslotIndex, passphrase: &[u8]) -> EngineResult<u32> {
        let mut args = vec![
            os("open"),
            os("--test-passphrase"),
            os("--batch-mode"),
            os("--verbose"),
            os("--key-file"),
            os("-"),
        ];
        if let KeyslotIndex::Slot(n) = slot {
            args.extend([os("--key-slot"), os(n.to_string())]);
        }
        args.push(self.device_arg());

        let out = self.run(args, Some(passphrase))?.check()?;
        dump::parse_keyslot_message(&out.stdout)
            .or(slot.slot())
            .ok_or_else(|| Status::from_errno(Errno::EINVAL))
    }

    fn kill_slot(&self, slot: u32) -> EngineResult<()> {
        self.run(
            vec![
                os("luksKillSlot"),
                os("--batch-mode"),
                self.device_arg(),
                os(slot.to_string()),
            ],
            None,
        )?
        .check()?;
        Ok(())
    }

    fn format_args(
        &self,
        request: &FormatRequest,
        volume_key_file: &SecretFile,
    ) -> Vec<OsString> {
        let mut args = vec![
            os("luksFormat"),
            os("--batch-mode"),
            os("--type"),
            os(request.variant.kind().cryptsetup_type().unwrap_or("luks1")),
            os("--cipher"),
            os(request.cipher_spec()),
            os("--key-size"),
            os(request.key_bits().to_string()),
            os("--hash"),
            os(request.variant.hash()),
            os("--volume-key-file"),
            volume_key_file.path_arg(),
            os("--key-file"),
            os("-"),
        ];

        if let Some(ms) = request.variant.iteration_time_ms() {
            args.extend([os("--iter-time"), os(ms.to_string())]);
        }
        if let Some(uuid) = request.uuid {
            args.extend([os("--uuid"), os(uuid.to_string())]);
        }

        match &request.variant {
            FormatVariant::Luks1(params) => {
                if let Some(alignment) = params.data_alignment {
                    args.extend([os("--align-payload"), os(alignment.to_string())]);
                }
            }
            FormatVariant::Luks2(params) => {
                if let Some(pbkdf) = &params.pbkdf {
                    args.extend([os("--pbkdf"), os(pbkdf)]);
                }
                if let Some(label) = &params.label {
                    args.extend([os("--label"), os(label)]);
                }
                if let Some(subsystem) = &params.subsystem {
                    args.extend([os("--subsystem"), os(subsystem)]);
                }
                if let Some(sector_size) = params.sector_size {
                    args.extend([os("--sector-size"), os(sector_size.to_string())]);
                }
            }
        }

        args.push(self.device_arg());
        args
    }
}

impl EngineContext for CryptsetupContext {
    fn path(&self) -> &Path {
        &self.path
    }

    fn format(&mut self, request: &FormatRequest) -> EngineResult<VolumeKey> {
        let volume_key = match &request.volume_key {
            Some(key) => key.clone(),
            None => {
                let mut bytes = vec![0u8; request.volume_key_size];
                getrandom::fill(&mut bytes).map_err(|_| Status::from_errno(Errno::EIO))?;
                VolumeKey::new(bytes)
            }
        };
        let key_file = self.secret(volume_key.as_bytes())?;

        // luksFormat insists on a first passphrase. Use a random one and
        // erase the slot so the header ends up with no key slots at all.
        let mut throwaway = Zeroizing::new(vec![0u8; THROWAWAY_PASSPHRASE_LEN]);
        getrandom::fill(&mut throwaway).map_err(|_| Status::from_errno(Errno::EIO))?;

        let args = self.format_args(request, &key_file);
        self.run(args, Some(throwaway.as_slice()))?.check()?;
        self.run(
            vec![os("erase"), os("--batch-mode"), self.device_arg()],
            None,
        )?
        .check()?;

        self.variant = request.variant.kind();
        info!("Formatted {:?} as {}", self.path, self.variant);
        Ok(volume_key)
    }

    fn load(&mut self, expected: Option<VariantKind>) -> EngineResult<VariantKind> {
        let info = self.dump()?;
        if let Some(expected) = expected {
            if expected != info.variant {
                debug!(
                    "Header on {:?} is {}, expected {}",
                    self.path, info.variant, expected
                );
                return Err(Status::from_errno(Errno::EINVAL));
            }
        }
        self.variant = info.variant;
        Ok(info.variant)
    }

    fn header_info(&mut self) -> EngineResult<HeaderInfo> {
        self.dump()
    }

    fn keyslot_add(
        &mut self,
        slot: KeyslotIndex,
        auth: KeyMaterial<'_>,
        new_passphrase: &[u8],
    ) -> EngineResult<u32> {
        let new_key_file = self.secret(new_passphrase)?;
        let auth_file = self.secret(auth.bytes())?;

        let mut args = vec![os("luksAddKey"), os("--batch-mode"), os("--verbose")];
        match auth {
            KeyMaterial::VolumeKey(_) => args.push(os("--volume-key-file")),
            KeyMaterial::Passphrase(_) => args.push(os("--key-file")),
        }
        args.push(auth_file.path_arg());
        if let KeyslotIndex::Slot(n) = slot {
            args.extend([os("--key-slot"), os(n.to_string())]);
        }

        // Needed to name the slot if cryptsetup stays quiet about it
        let before = match slot {
            KeyslotIndex::Any => Some(self.dump()?),
            KeyslotIndex::Slot(_) => None,
        };

        args.extend([self.device_arg(), new_key_file.path_arg()]);
        let out = self.run(args, None)?.check()?;

        if let Some(created) = dump::parse_keyslot_message(&out.stdout).or(slot.slot()) {
            return Ok(created);
        }
        let after = self.dump()?;
        before
            .and_then(|before| {
                (0..after.keyslots.len() as u32)
                    .find(|n| !before.keyslot(*n).is_occupied() && after.keyslot(*n).is_occupied())
            })
            .ok_or_else(|| Status::from_errno(Errno::EIO))
    }

    fn keyslot_change(
        &mut self,
        old_slot: KeyslotIndex,
        new_slot: KeyslotIndex,
        old_passphrase: &[u8],
        new_passphrase: &[u8],
    ) -> EngineResult<u32> {
        // Authenticate first so a bad passphrase never touches the header
        let unlocked = self.test_passphrase(old_slot, old_passphrase)?;

        match new_slot {
            KeyslotIndex::Slot(n) if n != unlocked => {
                let written =
                    self.keyslot_add(new_slot, KeyMaterial::Passphrase(old_passphrase), new_passphrase)?;
                self.kill_slot(unlocked)?;
                Ok(written)
            }
            _ => {
                let old_file = self.secret(old_passphrase)?;
                let new_file = self.secret(new_passphrase)?;
                self.run(
                    vec![
                        os("luksChangeKey"),
                        os("--batch-mode"),
                        os("--key-file"),
                        old_file.path_arg(),
                        os("--key-slot"),
                        os(unlocked.to_string()),
                        self.device_arg(),
                        new_file.path_arg(),
                    ],
                    None,
                )?
                .check()?;
                Ok(unlocked)
            }
        }
    }

    fn keyslot_destroy(&mut self, slot: u32) -> EngineResult<()> {
        if !self.keyslot_status(slot)?.is_occupied() {
            return Err(Status::from_errno(Errno::EINVAL));
        }
        self.kill_slot(slot)
    }

    fn keyslot_status(&mut self, slot: u32) -> EngineResult<KeyslotStatus> {
        Ok(self.dump()?.keyslot(slot))
    }

    fn activate(
        &mut self,
        name: &str,
        slot: KeyslotIndex,
        auth: KeyMaterial<'_>,
        flags: ActivationFlags,
    ) -> EngineResult<Option<u32>> {
        let mut args = vec![
            os("open"),
            os("--type"),
            os(self.variant.cryptsetup_type().unwrap_or("luks")),
            os("--batch-mode"),
            os("--verbose"),
        ];
        args.extend(flags.iter().map(|flag| os(flag.cryptsetup_arg())));

        let out = match auth {
            KeyMaterial::Passphrase(passphrase) => {
                args.extend([os("--key-file"), os("-")]);
                if let KeyslotIndex::Slot(n) = slot {
                    args.extend([os("--key-slot"), os(n.to_string())]);
                }
                args.extend([self.device_arg(), os(name)]);
                self.run(args, Some(passphrase))?.check()?
            }
            KeyMaterial::VolumeKey(key) => {
                let key_file = self.secret(key)?;
                args.extend([
                    os("--volume-key-file"),
                    key_file.path_arg(),
                    self.device_arg(),
                    os(name),
                ]);
                self.run(args, None)?.check()?
            }
        };

        Ok(match auth {
            KeyMaterial::Passphrase(_) => dump::parse_keyslot_message(&out.stdout).or(slot.slot()),
            KeyMaterial::VolumeKey(_) => None,
        })
    }

    fn deactivate(&mut self, name: &str) -> EngineResult<()> {
        self.run(vec![os("close"), os(name)], None)?.check()?;
        Ok(())
    }

    fn mapping_status(&mut self, name: &str) -> EngineResult<MappingStatus> {
        let out = self.run(vec![os("status"), os(name)], None)?;
        match out.status {
            0 => Ok(dump::parse_status(&out.stdout)),
            4 => Ok(MappingStatus::Inactive),
            _ => Err(out.failure()),
        }
    }
}
