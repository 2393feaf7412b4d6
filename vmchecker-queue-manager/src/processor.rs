//! Per-job processing pipeline
//!
//! Runs one submission end to end: unpack, fetch external files, reserve a
//! VM slot, announce, execute, release, report, clean up. No step may take
//! the worker down with it. A failure is logged, the scoped resources
//! (unpack directory, slot token) are released by their guards, and the
//! bundle is removed from the spool so it cannot wedge the queue forever.
//!
//! The bundle file in the spool is the durable representation of the job;
//! unlinking it is the commit point. A crash anywhere before the unlink
//! leaves the bundle behind for the stale scan to recover on next startup.

use anyhow::{Context, Result};
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::callback::Callback;
use crate::config::CourseConfig;
use crate::slots::SlotRegistry;
use crate::spool::Job;
use crate::supervisor::ExecutorSupervisor;
use crate::unpack;
use vmchecker_core::domain::submission::SubmissionStatus;
use vmchecker_core::dto::report::Artifact;

/// Configuration file expected inside every bundle
pub const SUBMISSION_CONFIG: &str = "submission-config";

/// Suffix of the result files attached to the `DONE` callback
pub const RESULT_SUFFIX: &str = ".vmr";

/// Advisory helper fetching assignment prerequisites, resolved via `PATH`
pub const DOWNLOAD_HELPER: &str = "vmchecker-download-external-files";

/// Processes one job to completion
///
/// Never returns an error: per-job failures are logged and the job is
/// finalized regardless, so the worker loop stays alive.
pub async fn process(
    job: Job,
    config: &CourseConfig,
    slots: &SlotRegistry,
    supervisor: &ExecutorSupervisor,
    callback: &dyn Callback,
) {
    info!("Processing job {} (bundle {})", job.id, job.bundle_name);

    match run_pipeline(&job, config, slots, supervisor, callback).await {
        Ok(true) => {}
        Ok(false) => {
            // Duplicate enqueue of an already-consumed bundle; nothing to
            // finalize.
            return;
        }
        Err(e) => {
            error!("Job {} failed: {:#}", job.id, e);
        }
    }

    // The commit point: the bundle leaves the spool only after the job has
    // been fully processed.
    match std::fs::remove_file(job.bundle_path()) {
        Ok(()) => info!(
            "Job {} finished, bundle {} removed from spool",
            job.id, job.bundle_name
        ),
        Err(e) => warn!(
            "Failed to remove bundle {} from spool: {}",
            job.bundle_name, e
        ),
    }
}

/// Runs the pipeline up to the report step
///
/// Returns `Ok(false)` when the bundle is already gone (the tolerated
/// double-enqueue race between the watcher and the stale scan).
async fn run_pipeline(
    job: &Job,
    config: &CourseConfig,
    slots: &SlotRegistry,
    supervisor: &ExecutorSupervisor,
    callback: &dyn Callback,
) -> Result<bool> {
    let bundle = job.bundle_path();
    if !bundle.exists() {
        debug!(
            "Bundle {} already consumed, dropping duplicate job {}",
            job.bundle_name, job.id
        );
        return Ok(false);
    }

    // Unpack; the TempDir guard removes the directory on every exit path
    let unpack_dir = tempfile::Builder::new()
        .prefix("vmchecker-")
        .tempdir_in(&config.unzip_dir)
        .context("Failed to create unpack directory")?;
    unpack::extract_bundle(&bundle, unpack_dir.path())
        .with_context(|| format!("Failed to unpack bundle {}", job.bundle_name))?;

    download_external_files(unpack_dir.path()).await;

    let reservation = slots
        .reserve(job.id, &unpack_dir.path().join(SUBMISSION_CONFIG))
        .await?;
    info!(
        "Job {} running on VM {} (slot {})",
        job.id,
        reservation.vm(),
        reservation.worker_id()
    );

    if let Err(e) = callback
        .notify(&job.bundle_name, SubmissionStatus::Processing, Vec::new())
        .await
    {
        warn!("PROCESSING callback for job {} failed: {:#}", job.id, e);
    }

    supervisor.run(job.id, unpack_dir.path()).await;

    // Return the slot before reporting so the next submission for this VM
    // can start while artifacts upload.
    drop(reservation);

    let artifacts = collect_artifacts(unpack_dir.path());
    if let Err(e) = callback
        .notify(&job.bundle_name, SubmissionStatus::Done, artifacts)
        .await
    {
        warn!("DONE callback for job {} failed: {:#}", job.id, e);
    }

    Ok(true)
}

/// Runs the advisory external-files helper on the unpack directory
///
/// A missing or failing helper is logged and ignored; most assignments have
/// no external prerequisites.
async fn download_external_files(dir: &Path) {
    match Command::new(DOWNLOAD_HELPER).arg(dir).output().await {
        Ok(output) if output.status.success() => {
            debug!("External files downloaded for {}", dir.display());
        }
        Ok(output) => {
            warn!(
                "{} exited with {} for {}",
                DOWNLOAD_HELPER,
                output.status,
                dir.display()
            );
        }
        Err(e) => {
            warn!(
                "Cannot run {}: {} (continuing without external files)",
                DOWNLOAD_HELPER, e
            );
        }
    }
}

/// Gathers every `.vmr` file under the unpack directory
///
/// Unreadable files are logged and skipped; the names are sorted so the
/// upstream service sees a stable artifact order.
fn collect_artifacts(dir: &Path) -> Vec<Artifact> {
    let mut artifacts = Vec::new();
    collect_into(dir, &mut artifacts);
    artifacts.sort_by(|a, b| a.name.cmp(&b.name));
    artifacts
}

fn collect_into(dir: &Path, artifacts: &mut Vec<Artifact>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to list {}: {}", dir.display(), e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_into(&path, artifacts);
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.ends_with(RESULT_SUFFIX) {
            continue;
        }
        match std::fs::read(&path) {
            Ok(bytes) => artifacts.push(Artifact {
                name: name.to_string(),
                content: String::from_utf8_lossy(&bytes).into_owned(),
            }),
            Err(e) => warn!("Failed to read artifact {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::testing::RecordingCallback;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::time::Duration;

    fn build_bundle(dest: &Path, files: &[(&str, &str)]) {
        let file = std::fs::File::create(dest).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, contents.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-executor");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    struct Fixture {
        _spool: tempfile::TempDir,
        _unzip: tempfile::TempDir,
        _scripts: tempfile::TempDir,
        config: CourseConfig,
        slots: SlotRegistry,
        supervisor: ExecutorSupervisor,
    }

    impl Fixture {
        fn new(executor_body: &str) -> Self {
            let spool = tempfile::tempdir().unwrap();
            let unzip = tempfile::tempdir().unwrap();
            let scripts = tempfile::tempdir().unwrap();
            let program = write_script(scripts.path(), executor_body);

            let raw = format!(
                r#"
num_workers = 1
executor_timeout_secs = 30
spool_dir = "{}"
unzip_dir = "{}"
callback_url = "http://localhost:8080"
"#,
                spool.path().display(),
                unzip.path().display()
            );
            let config: CourseConfig = toml::from_str(&raw).unwrap();
            let slots = SlotRegistry::new(&config);
            let supervisor = ExecutorSupervisor::with_program(program, Duration::from_secs(30));

            Self {
                _spool: spool,
                _unzip: unzip,
                _scripts: scripts,
                config,
                slots,
                supervisor,
            }
        }

        fn drop_bundle(&self, name: &str) -> Job {
            let path = self.config.spool_dir.join(name);
            build_bundle(
                &path,
                &[(
                    "submission-config",
                    "[assignment]\nmachine = \"deb1\"\n\n[machine]\nhostname = \"deb1.lab\"\n",
                )],
            );
            Job::new(self.config.spool_dir.clone(), name.to_string())
        }

        fn unpack_dirs(&self) -> usize {
            std::fs::read_dir(&self.config.unzip_dir).unwrap().count()
        }
    }

    #[tokio::test]
    async fn test_happy_path_reports_and_finalizes() {
        let fixture = Fixture::new("echo ok > \"$1/result.vmr\"; exit 0");
        let job = fixture.drop_bundle("student42.tar.gz");
        let bundle_path = job.bundle_path();
        let callback = RecordingCallback::new();

        process(
            job,
            &fixture.config,
            &fixture.slots,
            &fixture.supervisor,
            &callback,
        )
        .await;

        let events = callback.events();
        assert_eq!(events.len(), 2);

        let (bundle, status, artifacts) = &events[0];
        assert_eq!(bundle, "student42.tar.gz");
        assert_eq!(*status, SubmissionStatus::Processing);
        assert!(artifacts.is_empty());

        let (_, status, artifacts) = &events[1];
        assert_eq!(*status, SubmissionStatus::Done);
        let names: Vec<&str> = artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["grade.vmr", "result.vmr", "vmchecker-stderr.vmr"]);
        let grade = artifacts.iter().find(|a| a.name == "grade.vmr").unwrap();
        assert_eq!(grade.content, "done\n");

        // commit point reached and scratch space reclaimed
        assert!(!bundle_path.exists());
        assert_eq!(fixture.unpack_dirs(), 0);
    }

    #[tokio::test]
    async fn test_failing_executor_still_reports_done() {
        let fixture = Fixture::new("exit 9");
        let job = fixture.drop_bundle("student42.tar.gz");
        let bundle_path = job.bundle_path();
        let callback = RecordingCallback::new();

        process(
            job,
            &fixture.config,
            &fixture.slots,
            &fixture.supervisor,
            &callback,
        )
        .await;

        let events = callback.events();
        assert_eq!(events.len(), 2);
        let (_, status, artifacts) = &events[1];
        assert_eq!(*status, SubmissionStatus::Done);
        let grade = artifacts.iter().find(|a| a.name == "grade.vmr").unwrap();
        assert_eq!(grade.content, "error\n");
        assert!(!bundle_path.exists());
    }

    #[tokio::test]
    async fn test_corrupt_bundle_is_unlinked_without_callbacks() {
        let fixture = Fixture::new("exit 0");
        let bundle_path = fixture.config.spool_dir.join("garbage.tar.gz");
        std::fs::write(&bundle_path, b"this is not an archive").unwrap();
        let job = Job::new(fixture.config.spool_dir.clone(), "garbage.tar.gz".to_string());
        let callback = RecordingCallback::new();

        process(
            job,
            &fixture.config,
            &fixture.slots,
            &fixture.supervisor,
            &callback,
        )
        .await;

        assert!(callback.events().is_empty());
        // poison-pill removal keeps the spool clean
        assert!(!bundle_path.exists());
        assert_eq!(fixture.unpack_dirs(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_job_for_consumed_bundle_is_dropped() {
        let fixture = Fixture::new("exit 0");
        let job = Job::new(fixture.config.spool_dir.clone(), "gone.tar.gz".to_string());
        let callback = RecordingCallback::new();

        process(
            job,
            &fixture.config,
            &fixture.slots,
            &fixture.supervisor,
            &callback,
        )
        .await;

        assert!(callback.events().is_empty());
    }

    #[test]
    fn test_collect_artifacts_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("zeta.vmr"), "z").unwrap();
        std::fs::write(dir.path().join("alpha.vmr"), "a").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/deep.vmr"), "d").unwrap();

        let artifacts = collect_artifacts(dir.path());
        let names: Vec<&str> = artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["alpha.vmr", "deep.vmr", "zeta.vmr"]);
    }
}
