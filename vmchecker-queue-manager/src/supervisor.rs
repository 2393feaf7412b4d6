//! Executor supervision
//!
//! Spawns the external executor that runs a submission's tests inside the
//! target VM, enforces the course's wall-clock deadline on it, and records
//! the outcome in the job's status artifacts. Every control path writes
//! `grade.vmr` exactly once, and no path returns an error to the processor:
//! an executor problem is the submission's problem, never the queue's.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::results::JobReport;
use vmchecker_core::domain::grade::Grade;

/// Name of the external executor binary, resolved via `PATH`
pub const EXECUTOR_BIN: &str = "vmchecker-vm-executor";

/// Grace period between the interrupt and termination signals
///
/// The interrupt gives the executor a chance to run its own cleanup: it owns
/// VM handles that must not leak.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Supervises one executor run per job
pub struct ExecutorSupervisor {
    program: PathBuf,
    timeout: Duration,
}

impl ExecutorSupervisor {
    /// Creates a supervisor enforcing the given deadline
    pub fn new(timeout: Duration) -> Self {
        Self::with_program(PathBuf::from(EXECUTOR_BIN), timeout)
    }

    /// Creates a supervisor running an explicit program
    ///
    /// Tests point this at a fake executor script.
    pub fn with_program(program: PathBuf, timeout: Duration) -> Self {
        Self { program, timeout }
    }

    /// Runs the executor on an unpack directory, to completion or deadline
    ///
    /// The unpack directory is the executor's sole argument. Exit code 0
    /// grades `done`; any other exit, a spawn failure, or the deadline grade
    /// `error` with an explanatory line in the stderr artifact.
    pub async fn run(&self, job_id: Uuid, unpack_dir: &Path) {
        let report = JobReport::new(unpack_dir);

        let child = Command::new(&self.program).arg(unpack_dir).spawn();
        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                error!(
                    "Cannot run {} for job {}: {}",
                    self.program.display(),
                    job_id,
                    e
                );
                report.log_stderr(&format!("Cannot run {}: {}", EXECUTOR_BIN, e));
                report.log_stderr("Please contact the administrators of the testing system.");
                report.write_grade(Grade::Error);
                return;
            }
        };

        debug!(
            "Job {} spawned {} for {} (deadline {}s)",
            job_id,
            self.program.display(),
            unpack_dir.display(),
            self.timeout.as_secs()
        );

        match timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => {
                let code = status.code().unwrap_or(-1);
                let outcome = if status.success() { "success" } else { "error" };
                info!("Executor for job {} exited with code {}", job_id, code);
                report.log_stderr(&format!("vmexecutor exitcode {} ({})", code, outcome));
                report.write_grade(Grade::from_exit_code(code));
            }
            Ok(Err(e)) => {
                error!("Failed to wait for executor (job {}): {}", job_id, e);
                report.log_stderr(&format!("Cannot wait for {}: {}", EXECUTOR_BIN, e));
                report.write_grade(Grade::Error);
            }
            Err(_) => {
                warn!(
                    "Executor for job {} still running after {}s, killing it",
                    job_id,
                    self.timeout.as_secs()
                );
                report.log_stderr(&format!(
                    "VM executor taking too long to finish (over {} seconds), aborting",
                    self.timeout.as_secs()
                ));
                report.write_grade(Grade::Error);
                kill_gracefully(job_id, child).await;
            }
        }
    }
}

/// Interrupt, wait out the grace period, then terminate
///
/// Both kill attempts are best-effort; a kill failure is logged and the queue
/// moves on. Whatever remains of the child is reaped in a detached task.
async fn kill_gracefully(job_id: Uuid, mut child: Child) {
    let Some(raw_pid) = child.id() else {
        debug!("Executor for job {} already reaped before kill", job_id);
        return;
    };
    let pid = Pid::from_raw(raw_pid as i32);

    if let Err(e) = signal::kill(pid, Signal::SIGINT) {
        warn!(
            "Failed to interrupt executor for job {} (pid {}): {}",
            job_id, pid, e
        );
    }

    match timeout(KILL_GRACE, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(
                "Executor for job {} exited with {} after interrupt",
                job_id, status
            );
            return;
        }
        Ok(Err(e)) => {
            warn!(
                "Failed to wait for interrupted executor (job {}): {}",
                job_id, e
            );
        }
        Err(_) => {
            warn!(
                "Executor for job {} (pid {}) survived the interrupt, terminating it",
                job_id, pid
            );
            if let Err(e) = signal::kill(pid, Signal::SIGTERM) {
                warn!(
                    "Failed to terminate executor for job {} (pid {}): {}",
                    job_id, pid, e
                );
            }
        }
    }

    tokio::spawn(async move {
        let _ = child.wait().await;
    });
}
