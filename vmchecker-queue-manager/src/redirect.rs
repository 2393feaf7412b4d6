//! Standard stream redirection
//!
//! Implements the `-0`/`-1`/`-2` command-line options: standard input is
//! reopened for reading, standard output and error are appended to their
//! target files. Applied once at startup, before logging is initialised, so
//! every later line lands in the redirected streams.

use anyhow::{Context, Result};
use nix::unistd::dup2;
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;

const STDIN_FD: RawFd = 0;
const STDOUT_FD: RawFd = 1;
const STDERR_FD: RawFd = 2;

/// Applies the requested redirections
pub fn apply(stdin: Option<&Path>, stdout: Option<&Path>, stderr: Option<&Path>) -> Result<()> {
    if let Some(path) = stdin {
        let file = File::open(path)
            .with_context(|| format!("Failed to open {} for stdin", path.display()))?;
        dup2(file.as_raw_fd(), STDIN_FD)
            .with_context(|| format!("Failed to redirect stdin to {}", path.display()))?;
    }

    if let Some(path) = stdout {
        let file = open_for_append(path)?;
        dup2(file.as_raw_fd(), STDOUT_FD)
            .with_context(|| format!("Failed to redirect stdout to {}", path.display()))?;
    }

    if let Some(path) = stderr {
        let file = open_for_append(path)?;
        dup2(file.as_raw_fd(), STDERR_FD)
            .with_context(|| format!("Failed to redirect stderr to {}", path.display()))?;
    }

    Ok(())
}

fn open_for_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {} for append", path.display()))
}
