// SPDX-License-Identifier: GPL-3.0-only

//! Lifecycle against the real cryptsetup on a file-backed image
//!
//! Needs root and `CRYPTVOL_TESTING_ENABLE_DESTRUCTIVE=1`; skipped otherwise.

use cryptvol::{
    ActivationFlag, DeviceHandle, EngineConfig, ErrorKind, FormatVariant, GenericParams,
    KeyslotIndex, Luks1Params, VariantKind,
};
use cryptvol_sys::CryptsetupEngine;
use tempfile::NamedTempFile;

const IMAGE_SIZE: u64 = 32 << 20;

fn destructive_enabled() -> bool {
    std::env::var("CRYPTVOL_TESTING_ENABLE_DESTRUCTIVE")
        .ok()
        .as_deref()
        == Some("1")
}

fn engine() -> Option<CryptsetupEngine> {
    if !destructive_enabled() {
        eprintln!("SKIP: set CRYPTVOL_TESTING_ENABLE_DESTRUCTIVE=1 to run");
        return None;
    }
    if !nix::unistd::geteuid().is_root() {
        eprintln!("SKIP: cryptsetup activation needs root");
        return None;
    }
    match CryptsetupEngine::new(&EngineConfig::default()) {
        Ok(engine) => Some(engine),
        Err(status) => {
            eprintln!("SKIP: cryptsetup unavailable ({})", status.code());
            None
        }
    }
}

fn image() -> NamedTempFile {
    let file = NamedTempFile::new().expect("create image");
    file.as_file().set_len(IMAGE_SIZE).expect("size image");
    file
}

fn fast_luks1() -> FormatVariant {
    FormatVariant::Luks1(Luks1Params {
        hash: "sha256".into(),
        iteration_time_ms: Some(10),
        ..Luks1Params::default()
    })
}

#[test]
fn format_add_activate_deactivate() {
    let Some(engine) = engine() else { return };
    let image = image();
    let name = format!("cryptvol-loop-{}", std::process::id());

    let mut device = DeviceHandle::init_with(&engine, image.path()).expect("init");
    device
        .format(fast_luks1(), GenericParams::new("aes", "xts-plain64", 64))
        .expect("format");
    assert_eq!(device.type_name(), "LUKS1");
    assert!(device.header_info().expect("dump").active_keyslots().is_empty());

    let slot = device
        .keyslots()
        .add_by_volume_key(KeyslotIndex::Slot(0), &[], b"first")
        .expect("add");
    assert_eq!(slot, 0);

    let err = device
        .keyslots()
        .add_by_volume_key(KeyslotIndex::Slot(0), &[], b"second")
        .unwrap_err();
    assert_eq!(err.code(), -22);

    device
        .activation()
        .activate_by_passphrase(&name, KeyslotIndex::Slot(0), b"first", ActivationFlag::ReadOnly.into())
        .expect("activate");
    assert!(device.activation().status(&name).expect("status").is_active());
    device.activation().deactivate(&name).expect("deactivate");

    let err = device.activation().deactivate(&name).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotActive);
}

#[test]
fn change_and_reload() {
    let Some(engine) = engine() else { return };
    let image = image();
    let name = format!("cryptvol-change-{}", std::process::id());

    let mut device = DeviceHandle::init_with(&engine, image.path()).expect("init");
    device
        .format(
            fast_luks1(),
            GenericParams::new("aes", "xts-plain64", 64).with_passphrase(b"old"),
        )
        .expect("format");
    device
        .keyslots()
        .change_by_passphrase(KeyslotIndex::Slot(0), KeyslotIndex::Slot(0), b"old", b"new")
        .expect("change");
    drop(device);

    let mut device = DeviceHandle::init_with(&engine, image.path()).expect("re-init");
    assert_eq!(device.load(VariantKind::Luks1), Ok(VariantKind::Luks1));

    let err = device
        .activation()
        .activate_by_passphrase(&name, KeyslotIndex::Slot(0), b"old", ActivationFlag::ReadOnly.into())
        .unwrap_err();
    assert_eq!(err.code(), -1);

    device
        .activation()
        .activate_by_passphrase(&name, KeyslotIndex::Slot(0), b"new", ActivationFlag::ReadOnly.into())
        .expect("activate with new passphrase");
    device.activation().deactivate(&name).expect("deactivate");

    let err = device
        .keyslots()
        .add_by_volume_key(KeyslotIndex::Any, &[], b"another")
        .unwrap_err();
    assert!(err.is_invalid_argument());
}
