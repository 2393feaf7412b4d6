//! Per-job status artifacts
//!
//! The supervisor records the outcome of every executor run in two files
//! under the unpack directory, both shipped to the upstream service by the
//! `DONE` callback:
//! - `grade.vmr`: a single status word, `done` or `error`
//! - `vmchecker-stderr.vmr`: an append-only diagnostic log, one message per
//!   line, created on first write

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use vmchecker_core::domain::grade::Grade;

/// File holding the single grade status word
pub const GRADE_FILE: &str = "grade.vmr";

/// Append-only diagnostic log shown to the student
pub const STDERR_FILE: &str = "vmchecker-stderr.vmr";

/// Writers for the status artifacts of one job
///
/// Write failures are logged and swallowed: a full disk must not take the
/// whole queue manager down with it.
pub struct JobReport {
    dir: PathBuf,
}

impl JobReport {
    /// Creates a report rooted at the job's unpack directory
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    /// Writes the grade status word, replacing any previous grade
    pub fn write_grade(&self, grade: Grade) {
        let path = self.dir.join(GRADE_FILE);
        if let Err(e) = std::fs::write(&path, format!("{}\n", grade)) {
            warn!("Failed to write {}: {}", path.display(), e);
        }
    }

    /// Appends one diagnostic message line
    pub fn log_stderr(&self, message: &str) {
        let path = self.dir.join(STDERR_FILE);
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| writeln!(file, "{}", message));
        if let Err(e) = result {
            warn!("Failed to append to {}: {}", path.display(), e);
        }
    }
}
