// SPDX-License-Identifier: GPL-3.0-only

//! Short-lived key files handed to cryptsetup

use std::ffi::OsString;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::warn;
use zeroize::Zeroizing;

use crate::error::EngineResult;

/// Private temporary file holding key material
///
/// Created with mode 0600. On drop the content is overwritten with zeros
/// before the file is unlinked.
pub(crate) struct SecretFile {
    file: NamedTempFile,
    len: usize,
}

impl SecretFile {
    pub(crate) fn create(dir: &Path, bytes: &[u8]) -> EngineResult<Self> {
        let mut file = tempfile::Builder::new()
            .prefix(".cryptvol-key-")
            .tempfile_in(dir)?;
        file.write_all(bytes)?;
        file.as_file().sync_all()?;
        Ok(Self {
            file,
            len: bytes.len(),
        })
    }

    pub(crate) fn path_arg(&self) -> OsString {
        self.file.path().as_os_str().to_os_string()
    }
}

impl Drop for SecretFile {
    fn drop(&mut self) {
        let zeros = Zeroizing::new(vec![0u8; self.len]);
        let handle = self.file.as_file_mut();
        let wiped = handle
            .seek(SeekFrom::Start(0))
            .and_then(|_| handle.write_all(&zeros))
            .and_then(|_| handle.sync_all());
        if let Err(e) = wiped {
            warn!("Failed to wipe key file {:?}: {}", self.file.path(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_file_is_private_and_removed() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let secret = SecretFile::create(dir.path(), b"hunter2").expect("create");
        let path = std::path::PathBuf::from(secret.path_arg());

        assert_eq!(std::fs::read(&path).expect("read"), b"hunter2");
        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        drop(secret);
        assert!(!path.exists());
    }
}
