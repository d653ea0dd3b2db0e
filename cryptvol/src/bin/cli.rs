// SPDX-License-Identifier: GPL-3.0-only

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use cryptvol::{
    ActivationFlag, ActivationFlags, DeviceHandle, EngineConfig, FormatVariant, GenericParams,
    KeyslotIndex, Luks1Params, Luks2Params, MappingStatus, Operation, VariantKind, VolumeKey,
};
use cryptvol_sys::CryptsetupEngine;
use zeroize::Zeroizing;

/// Manage LUKS encrypted volumes
#[derive(Parser)]
#[command(name = "cryptvol")]
#[command(about = "Format, unlock and manage key slots of LUKS volumes", long_about = None)]
struct Cli {
    /// Engine config file (defaults to $CRYPTVOL_CONFIG or /etc/cryptvol.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum HeaderType {
    Luks1,
    Luks2,
}

/// Where a secret is read from
#[derive(Args)]
struct KeySource {
    /// Read the passphrase from this file ("-" for stdin, the default)
    #[arg(long)]
    key_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a new header, destroying the device's content
    Format {
        device: PathBuf,
        #[arg(long = "type", value_enum, default_value = "luks1")]
        header_type: HeaderType,
        #[arg(long, default_value = "aes")]
        cipher: String,
        #[arg(long, default_value = "xts-plain64")]
        cipher_mode: String,
        /// Volume key size in bits
        #[arg(long, default_value_t = 512)]
        key_size: usize,
        /// Hash for key derivation (sha256 when empty)
        #[arg(long, default_value = "")]
        hash: String,
        /// Key derivation time in milliseconds
        #[arg(long)]
        iter_time: Option<u32>,
        #[arg(long)]
        uuid: Option<String>,
        /// LUKS2 label
        #[arg(long)]
        label: Option<String>,
        /// Use this volume key instead of a random one
        #[arg(long)]
        volume_key_file: Option<PathBuf>,
        /// Leave the header without any key slot
        #[arg(long)]
        no_passphrase: bool,
        #[command(flatten)]
        key: KeySource,
    },
    /// Add a passphrase to a key slot
    AddKey {
        device: PathBuf,
        /// File holding the passphrase to add
        new_key_file: PathBuf,
        /// Slot to write; first free slot when omitted
        #[arg(long)]
        slot: Option<u32>,
        /// Authorize with the volume key in this file instead of a passphrase
        #[arg(long, conflicts_with = "key_file")]
        volume_key_file: Option<PathBuf>,
        #[command(flatten)]
        key: KeySource,
    },
    /// Replace a passphrase
    ChangeKey {
        device: PathBuf,
        /// File holding the replacement passphrase
        new_key_file: PathBuf,
        /// Slot holding the current passphrase
        #[arg(long)]
        slot: Option<u32>,
        /// Slot to store the replacement in; same slot when omitted
        #[arg(long)]
        new_slot: Option<u32>,
        #[command(flatten)]
        key: KeySource,
    },
    /// Destroy the key material in a slot
    KillSlot { device: PathBuf, slot: u32 },
    /// Map the cleartext device under a name
    Open {
        device: PathBuf,
        name: String,
        #[arg(long)]
        slot: Option<u32>,
        #[arg(long)]
        readonly: bool,
        #[arg(long)]
        allow_discards: bool,
        /// Unlock with the volume key in this file instead of a passphrase
        #[arg(long, conflicts_with = "key_file")]
        volume_key_file: Option<PathBuf>,
        #[command(flatten)]
        key: KeySource,
    },
    /// Remove a mapping
    Close { device: PathBuf, name: String },
    /// Show whether a mapping is active
    Status { device: PathBuf, name: String },
    /// Print the header type
    Type { device: PathBuf },
    /// Print the header summary as JSON
    Dump { device: PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    cryptvol::logging::init(cli.verbose);

    let config = match &cli.config {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load()?,
    };
    let engine = CryptsetupEngine::new(&config).map_err(|s| s.into_error(Operation::Init))?;

    match cli.command {
        Commands::Format {
            device,
            header_type,
            cipher,
            cipher_mode,
            key_size,
            hash,
            iter_time,
            uuid,
            label,
            volume_key_file,
            no_passphrase,
            key,
        } => {
            if key_size == 0 || key_size % 8 != 0 {
                bail!("key size must be a positive multiple of 8 bits");
            }
            let variant = match header_type {
                HeaderType::Luks1 => FormatVariant::Luks1(Luks1Params {
                    hash,
                    iteration_time_ms: iter_time,
                    ..Luks1Params::default()
                }),
                HeaderType::Luks2 => FormatVariant::Luks2(Luks2Params {
                    hash,
                    iteration_time_ms: iter_time,
                    label,
                    ..Luks2Params::default()
                }),
            };

            let mut params = GenericParams::new(cipher, cipher_mode, key_size / 8);
            if let Some(uuid) = uuid {
                params = params.with_uuid(uuid.parse().context("invalid --uuid")?);
            }
            if let Some(path) = volume_key_file {
                params = params.with_volume_key(VolumeKey::new(read_file(&path)?.to_vec()));
            }
            if !no_passphrase {
                params = params.with_passphrase(&read_secret(&key)?);
            }

            let mut handle = DeviceHandle::init_with(&engine, &device)?;
            handle.format(variant, params)?;
            println!("{}", handle.type_name());
        }
        Commands::AddKey {
            device,
            new_key_file,
            slot,
            volume_key_file,
            key,
        } => {
            let new_passphrase = read_file(&new_key_file)?;
            let mut handle = open_loaded(&engine, &device)?;
            let slot = slot.map_or(KeyslotIndex::Any, KeyslotIndex::Slot);

            let written = match volume_key_file {
                Some(path) => {
                    let volume_key = read_file(&path)?;
                    if volume_key.is_empty() {
                        bail!("volume key file {} is empty", path.display());
                    }
                    handle
                        .keyslots()
                        .add_by_volume_key(slot, &volume_key, &new_passphrase)?
                }
                None => handle.keyslots().add_by_passphrase(
                    slot,
                    &read_secret(&key)?,
                    &new_passphrase,
                )?,
            };
            println!("Key slot {written} created.");
        }
        Commands::ChangeKey {
            device,
            new_key_file,
            slot,
            new_slot,
            key,
        } => {
            let new_passphrase = read_file(&new_key_file)?;
            let passphrase = read_secret(&key)?;
            let mut handle = open_loaded(&engine, &device)?;

            let old_slot = slot.map_or(KeyslotIndex::Any, KeyslotIndex::Slot);
            let new_slot = new_slot.map_or(old_slot, KeyslotIndex::Slot);
            let written =
                handle
                    .keyslots()
                    .change_by_passphrase(old_slot, new_slot, &passphrase, &new_passphrase)?;
            println!("Key slot {written} changed.");
        }
        Commands::KillSlot { device, slot } => {
            let mut handle = open_loaded(&engine, &device)?;
            handle.keyslots().wipe(slot)?;
            println!("Key slot {slot} wiped.");
        }
        Commands::Open {
            device,
            name,
            slot,
            readonly,
            allow_discards,
            volume_key_file,
            key,
        } => {
            let mut flags = ActivationFlags::empty();
            if readonly {
                flags |= ActivationFlag::ReadOnly;
            }
            if allow_discards {
                flags |= ActivationFlag::AllowDiscards;
            }

            let mut handle = open_loaded(&engine, &device)?;
            match volume_key_file {
                Some(path) => {
                    let volume_key = read_file(&path)?;
                    if volume_key.is_empty() {
                        bail!("volume key file {} is empty", path.display());
                    }
                    handle.activation().activate_by_volume_key(
                        &name,
                        &volume_key,
                        volume_key.len(),
                        flags,
                    )?;
                }
                None => {
                    let slot = slot.map_or(KeyslotIndex::Any, KeyslotIndex::Slot);
                    handle.activation().activate_by_passphrase(
                        &name,
                        slot,
                        &read_secret(&key)?,
                        flags,
                    )?;
                }
            }
            println!("/dev/mapper/{name}");
        }
        Commands::Close { device, name } => {
            let mut handle = open_loaded(&engine, &device)?;
            handle.activation().deactivate(&name)?;
        }
        Commands::Status { device, name } => {
            let mut handle = open_loaded(&engine, &device)?;
            match handle.activation().status(&name)? {
                MappingStatus::Inactive => println!("{name} is inactive."),
                MappingStatus::Active { device, read_only } => {
                    let mode = if read_only { "readonly" } else { "read/write" };
                    println!(
                        "{name} is active on {} ({mode}).",
                        device.as_deref().unwrap_or("unknown device")
                    );
                }
            }
        }
        Commands::Type { device } => {
            let mut handle = DeviceHandle::init_with(&engine, &device)?;
            // An unformatted device prints an empty type, like an unset header
            if let Err(e) = handle.load_any() {
                tracing::debug!("No header on {}: {}", device.display(), e);
            }
            println!("{}", handle.type_name());
        }
        Commands::Dump { device } => {
            let mut handle = open_loaded(&engine, &device)?;
            let info = handle.header_info()?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
    }

    Ok(())
}

fn open_loaded(engine: &CryptsetupEngine, device: &Path) -> Result<DeviceHandle> {
    let mut handle = DeviceHandle::init_with(engine, device)?;
    let kind = handle.load_any()?;
    if kind == VariantKind::Unknown {
        bail!("{} has no recognised header", device.display());
    }
    Ok(handle)
}

fn read_file(path: &Path) -> Result<Zeroizing<Vec<u8>>> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(Zeroizing::new(bytes))
}

/// Passphrase from `--key-file`, or one line from stdin
fn read_secret(source: &KeySource) -> Result<Zeroizing<Vec<u8>>> {
    match &source.key_file {
        Some(path) if path.as_os_str() != "-" => read_file(path),
        _ => {
            let mut buf = Zeroizing::new(Vec::new());
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("failed to read passphrase from stdin")?;
            if buf.last() == Some(&b'\n') {
                buf.pop();
            }
            Ok(buf)
        }
    }
}
