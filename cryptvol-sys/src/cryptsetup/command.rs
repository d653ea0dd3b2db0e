// SPDX-License-Identifier: GPL-3.0-only

//! Execution wrapper for invoking `cryptsetup`
//!
//! Shell integration stays isolated here so the engine logic can be tested
//! against fake binaries with deterministic output.

use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use tracing::{debug, warn};

use crate::error::{EngineResult, Status};

#[derive(Debug, Clone)]
pub(crate) struct CryptsetupCommand {
    binary: PathBuf,
    timeout: Duration,
}

#[derive(Debug)]
pub(crate) struct Output {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl Output {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// stderr if it has content, stdout otherwise
    pub fn diagnostic(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }

    /// Engine status for a failed invocation
    pub fn failure(&self) -> Status {
        exit_status(self.status, self.diagnostic())
    }

    /// Fail unless the invocation exited with 0
    pub fn check(self) -> EngineResult<Output> {
        if self.success() {
            Ok(self)
        } else {
            Err(self.failure())
        }
    }
}

/// Map a cryptsetup exit code back to the errno it was derived from
///
/// cryptsetup folds libcryptsetup's negative errno returns into exit codes
/// 1-5; this is the inverse of that table.
pub(crate) fn exit_status(code: i32, diagnostic: &str) -> Status {
    let errno = match code {
        1 => Errno::EINVAL,
        2 => Errno::EPERM,
        3 => Errno::ENOMEM,
        4 => Errno::ENODEV,
        5 if diagnostic.to_ascii_lowercase().contains("already exists") => Errno::EEXIST,
        5 => Errno::EBUSY,
        _ => Errno::EIO,
    };
    Status::from_errno(errno)
}

impl CryptsetupCommand {
    pub(crate) fn new(binary: PathBuf, timeout: Duration) -> Self {
        Self { binary, timeout }
    }

    pub(crate) fn binary(&self) -> &Path {
        &self.binary
    }

    pub(crate) fn run(&self, args: &[OsString], input: Option<&[u8]>) -> EngineResult<Output> {
        debug!(
            "Running {} {}",
            self.binary.display(),
            args.first().map(|a| a.to_string_lossy()).unwrap_or_default()
        );

        let mut command = Command::new(&self.binary);
        command.args(args);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = command.spawn().map_err(|e| {
            warn!("Failed to spawn {}: {}", self.binary.display(), e);
            Status::from(e)
        })?;

        if let Some(payload) = input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(payload)?;
                stdin.flush().ok();
            }
        }

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        self.wait_with_timeout(child, stdout_pipe, stderr_pipe)
    }

    fn wait_with_timeout(
        &self,
        mut child: Child,
        stdout_pipe: Option<ChildStdout>,
        stderr_pipe: Option<ChildStderr>,
    ) -> EngineResult<Output> {
        let start = Instant::now();
        let stdout_handle = spawn_output_reader(stdout_pipe);
        let stderr_handle = spawn_output_reader(stderr_pipe);
        let mut exit_status = None;

        while start.elapsed() <= self.timeout {
            if let Some(status) = child.try_wait()? {
                exit_status = Some(status);
                break;
            }
            thread::sleep(Duration::from_millis(25));
        }

        let Some(exit_status) = exit_status else {
            let _ = child.kill();
            let _ = child.wait();
            warn!(
                "{} timed out after {:?}",
                self.binary.display(),
                self.timeout
            );
            return Err(Status::from_errno(Errno::ETIMEDOUT));
        };

        let stdout = stdout_handle
            .join()
            .map_err(|_| Status::from_errno(Errno::EIO))??;
        let stderr = stderr_handle
            .join()
            .map_err(|_| Status::from_errno(Errno::EIO))??;

        // Killed by a signal: no exit code to map
        let status = exit_status.code().unwrap_or(-1);

        Ok(Output {
            stdout,
            stderr,
            status,
        })
    }
}

fn spawn_output_reader<R>(pipe: Option<R>) -> thread::JoinHandle<EngineResult<String>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || -> EngineResult<String> {
        if let Some(mut reader) = pipe {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf)?;
            Ok(String::from_utf8_lossy(&buf).to_string())
        } else {
            Ok(String::new())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_map_to_negated_errno() {
        assert_eq!(exit_status(1, "").code(), -22);
        assert_eq!(exit_status(2, "No key available with this passphrase.").code(), -1);
        assert_eq!(exit_status(3, "").code(), -12);
        assert_eq!(exit_status(4, "Device vault is not active.").code(), -19);
        assert_eq!(exit_status(5, "Device vault already exists.").code(), -17);
        assert_eq!(exit_status(5, "Device vault is still in use.").code(), -16);
        assert_eq!(exit_status(-1, "").code(), -5);
    }

    #[test]
    fn diagnostic_prefers_stderr() {
        let out = Output {
            stdout: "stdout text\n".into(),
            stderr: "  \n".into(),
            status: 1,
        };
        assert_eq!(out.diagnostic(), "stdout text");

        let out = Output {
            stdout: "stdout text".into(),
            stderr: "Key slot 0 is full, please select another one.\n".into(),
            status: 1,
        };
        assert_eq!(out.diagnostic(), "Key slot 0 is full, please select another one.");
        assert_eq!(out.check().map(|_| ()), Err(Status::from_errno(Errno::EINVAL)));
    }
}
