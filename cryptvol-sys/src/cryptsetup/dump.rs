// SPDX-License-Identifier: GPL-3.0-only

//! Parsers for `cryptsetup luksDump` and `--verbose` output

use cryptvol_types::{HeaderInfo, KeyslotStatus, MappingStatus, VariantKind};

fn field<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let (key, value) = line.split_once(':')?;
    if key.trim().eq_ignore_ascii_case(name) {
        Some(value.trim())
    } else {
        None
    }
}

fn split_cipher(spec: &str) -> (String, String) {
    match spec.split_once('-') {
        Some((cipher, mode)) => (cipher.to_string(), mode.to_string()),
        None => (spec.to_string(), String::new()),
    }
}

/// Parse `luksDump` output; `None` when no header version is present
pub(crate) fn parse_luks_dump(output: &str) -> Option<HeaderInfo> {
    let version = output
        .lines()
        .find_map(|line| field(line, "Version"))
        .and_then(|v| v.parse::<u32>().ok())?;

    let mut info = match VariantKind::from_version(version) {
        VariantKind::Luks1 => parse_luks1(output),
        VariantKind::Luks2 => parse_luks2(output),
        VariantKind::Unknown => return None,
    };
    info.normalize_last_slot();
    Some(info)
}

fn parse_luks1(output: &str) -> HeaderInfo {
    let mut info = HeaderInfo {
        variant: VariantKind::Luks1,
        keyslots: vec![KeyslotStatus::Inactive; VariantKind::Luks1.keyslot_count() as usize],
        ..HeaderInfo::default()
    };

    for line in output.lines() {
        if let Some(value) = field(line, "Cipher name") {
            info.cipher = value.to_string();
        } else if let Some(value) = field(line, "Cipher mode") {
            info.cipher_mode = value.to_string();
        } else if let Some(value) = field(line, "Hash spec") {
            info.hash = value.to_string();
        } else if let Some(value) = field(line, "MK bits") {
            info.key_bits = value.parse().unwrap_or(0);
        } else if let Some(value) = field(line, "UUID") {
            info.uuid = value.to_string();
        } else if let Some(rest) = line.trim().strip_prefix("Key Slot ") {
            // "Key Slot 3: ENABLED"
            let Some((slot, state)) = rest.split_once(':') else {
                continue;
            };
            let Ok(slot) = slot.trim().parse::<usize>() else {
                continue;
            };
            if let Some(status) = info.keyslots.get_mut(slot) {
                *status = if state.trim() == "ENABLED" {
                    KeyslotStatus::Active
                } else {
                    KeyslotStatus::Inactive
                };
            }
        }
    }

    info
}

#[derive(PartialEq)]
enum Section {
    Header,
    Segments,
    Keyslots,
    Other,
    Digests,
}

fn parse_luks2(output: &str) -> HeaderInfo {
    let mut info = HeaderInfo {
        variant: VariantKind::Luks2,
        keyslots: vec![KeyslotStatus::Inactive; VariantKind::Luks2.keyslot_count() as usize],
        ..HeaderInfo::default()
    };
    let mut section = Section::Header;

    for line in output.lines() {
        if !line.starts_with(char::is_whitespace) && line.trim_end().ends_with(':') {
            section = match line.trim_end() {
                "Data segments:" => Section::Segments,
                "Keyslots:" => Section::Keyslots,
                "Digests:" => Section::Digests,
                _ => Section::Other,
            };
            continue;
        }

        match section {
            Section::Header => {
                if let Some(value) = field(line, "UUID") {
                    info.uuid = value.to_string();
                }
            }
            Section::Segments => {
                if let Some(value) = field(line, "cipher") {
                    if info.cipher.is_empty() {
                        (info.cipher, info.cipher_mode) = split_cipher(value);
                    }
                }
            }
            Section::Keyslots => {
                // "  1: luks2" opens a slot entry
                if let Some((slot, _)) = line.trim().split_once(':') {
                    if line.starts_with("  ") && !line.starts_with("\t") {
                        if let Ok(slot) = slot.parse::<usize>() {
                            if let Some(status) = info.keyslots.get_mut(slot) {
                                *status = KeyslotStatus::Active;
                            }
                            continue;
                        }
                    }
                }
                if let Some(value) = field(line, "Key") {
                    if info.key_bits == 0 {
                        info.key_bits = value
                            .split_whitespace()
                            .next()
                            .and_then(|bits| bits.parse().ok())
                            .unwrap_or(0);
                    }
                }
            }
            Section::Digests => {
                if let Some(value) = field(line, "Hash") {
                    if info.hash.is_empty() {
                        info.hash = value.to_string();
                    }
                }
            }
            Section::Other => {}
        }
    }

    info
}

/// Slot number from a `--verbose` line such as "Key slot 1 created."
pub(crate) fn parse_keyslot_message(output: &str) -> Option<u32> {
    output.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("Key slot ")?;
        let (slot, verb) = rest.split_once(' ')?;
        let verb = verb.trim_end_matches('.');
        matches!(verb, "created" | "unlocked" | "changed" | "verified")
            .then(|| slot.parse().ok())
            .flatten()
    })
}

/// Mapping state from `cryptsetup status <name>` on exit code 0
pub(crate) fn parse_status(output: &str) -> MappingStatus {
    let mut device = None;
    let mut read_only = false;

    for line in output.lines() {
        if let Some(value) = field(line, "device") {
            device = Some(value.to_string());
        } else if let Some(value) = field(line, "mode") {
            read_only = value.contains("readonly");
        }
    }

    MappingStatus::Active { device, read_only }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LUKS1_DUMP: &str = "LUKS header information for /tmp/disk.img

Version:       \t1
Cipher name:   \taes
Cipher mode:   \txts-plain64
Hash spec:     \tsha256
Payload offset:\t4096
MK bits:       \t256
MK digest:     \t6b 2c 8a 8d 3f 51 d9 4a 58 79 7a 97 47 74 1f 2c 32 68 63 3c
MK iterations: \t60235
UUID:          \t1d0a2c4e-8c43-4b4b-8d8b-2f1c58f3a9e1

Key Slot 0: ENABLED
\tIterations:         \t963764
\tSalt:               \t8d 9a
\tKey material offset:\t8
\tAF stripes:            \t4000
Key Slot 1: DISABLED
Key Slot 2: ENABLED
Key Slot 3: DISABLED
Key Slot 4: DISABLED
Key Slot 5: DISABLED
Key Slot 6: DISABLED
Key Slot 7: DISABLED
";

    const LUKS2_DUMP: &str = "LUKS header information
Version:       \t2
Epoch:         \t3
Metadata area: \t16384 [bytes]
Keyslots area: \t16744448 [bytes]
UUID:          \t5f3c0d0e-2d8a-4c7f-9a51-7a6ad2b9c1f0
Label:         \t(no label)
Subsystem:     \t(no subsystem)
Flags:       \t(no flags)

Data segments:
  0: crypt
\toffset: 16777216 [bytes]
\tlength: (whole device)
\tcipher: aes-xts-plain64
\tsector: 512 [bytes]

Keyslots:
  1: luks2
\tKey:        512 bits
\tPriority:   normal
\tCipher:     aes-xts-plain64
\tPBKDF:      argon2id
\tAF hash:    sha256
Tokens:
Digests:
  0: pbkdf2
\tHash:       sha256
\tIterations: 129774
";

    #[test]
    fn parses_luks1_header() {
        let info = parse_luks_dump(LUKS1_DUMP).expect("luks1 header");
        assert_eq!(info.variant, VariantKind::Luks1);
        assert_eq!(info.cipher, "aes");
        assert_eq!(info.cipher_mode, "xts-plain64");
        assert_eq!(info.hash, "sha256");
        assert_eq!(info.key_bits, 256);
        assert_eq!(info.uuid, "1d0a2c4e-8c43-4b4b-8d8b-2f1c58f3a9e1");
        assert_eq!(info.active_keyslots(), vec![0, 2]);
        assert_eq!(info.keyslot(1), KeyslotStatus::Inactive);
        assert_eq!(info.keyslot(8), KeyslotStatus::Invalid);
    }

    #[test]
    fn parses_luks2_header() {
        let info = parse_luks_dump(LUKS2_DUMP).expect("luks2 header");
        assert_eq!(info.variant, VariantKind::Luks2);
        assert_eq!(info.cipher, "aes");
        assert_eq!(info.cipher_mode, "xts-plain64");
        assert_eq!(info.hash, "sha256");
        assert_eq!(info.key_bits, 512);
        assert_eq!(info.keyslots.len(), 32);
        assert_eq!(info.keyslot(1), KeyslotStatus::ActiveLast);
        assert_eq!(info.first_free_keyslot(), Some(0));
    }

    #[test]
    fn rejects_non_luks_output() {
        assert!(parse_luks_dump("Device /tmp/x is not a valid LUKS device.").is_none());
    }

    #[test]
    fn parses_verbose_keyslot_lines() {
        assert_eq!(parse_keyslot_message("Key slot 3 created.\nCommand successful.\n"), Some(3));
        assert_eq!(parse_keyslot_message("Key slot 0 unlocked.\n"), Some(0));
        assert_eq!(parse_keyslot_message("Command successful.\n"), None);
    }

    #[test]
    fn parses_mapping_status() {
        let status = parse_status(
            "/dev/mapper/vault is active.\n  type:    LUKS1\n  device:  /dev/loop0\n  mode:    readonly\n",
        );
        assert_eq!(
            status,
            MappingStatus::Active {
                device: Some("/dev/loop0".into()),
                read_only: true,
            }
        );
    }
}
