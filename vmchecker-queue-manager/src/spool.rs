//! Spool directory watching and stale-job recovery
//!
//! The upstream submission service deposits each bundle into the spool by
//! writing a fresh file and closing it; the close-write notification is the
//! signal that the bundle is complete. The watcher turns those notifications
//! into jobs on the assignment queue. On startup, every bundle already
//! sitting in the spool (left there by a previous run) is enqueued by the
//! stale scan before any event is processed.
//!
//! The watch is armed before the scan runs, so a bundle arriving in between
//! can be enqueued by both paths. That race is tolerated downstream: the
//! second job finds its bundle already gone and is dropped.

use anyhow::{Context, Result};
use notify::event::{AccessKind, AccessMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};
use uuid::Uuid;

/// One pending submission bundle
#[derive(Debug, Clone)]
pub struct Job {
    /// Correlation id threaded through every log line for this job
    pub id: Uuid,
    pub spool_dir: PathBuf,
    /// Bundle file name, unique within the spool
    pub bundle_name: String,
}

impl Job {
    pub fn new(spool_dir: PathBuf, bundle_name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            spool_dir,
            bundle_name,
        }
    }

    /// Full path of the bundle in the spool
    pub fn bundle_path(&self) -> PathBuf {
        self.spool_dir.join(&self.bundle_name)
    }
}

/// Extracts the bundle name from an event, if it is a completed arrival
///
/// Only close-write events directly under the spool directory count; open
/// and modify events mean an upload is still in progress, and dotfiles are
/// upstream scratch files.
fn bundle_arrival(event: &Event, spool_dir: &Path) -> Option<String> {
    if !matches!(
        event.kind,
        EventKind::Access(AccessKind::Close(AccessMode::Write))
    ) {
        return None;
    }

    event.paths.iter().find_map(|path| {
        if path.parent() != Some(spool_dir) {
            return None;
        }
        let name = path.file_name()?.to_str()?;
        if name.starts_with('.') {
            return None;
        }
        Some(name.to_string())
    })
}

/// Arms the spool watcher
///
/// Events are forwarded onto the assignment queue from the watcher's own
/// thread; the queue is unbounded, so the watcher never blocks. The returned
/// watcher must be kept alive for the life of the process.
pub fn watch(spool_dir: &Path, queue: UnboundedSender<Job>) -> Result<RecommendedWatcher> {
    let spool_dir = spool_dir
        .canonicalize()
        .with_context(|| format!("Failed to resolve spool dir {}", spool_dir.display()))?;
    let dir = spool_dir.clone();

    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        match result {
            Ok(event) => {
                if let Some(bundle_name) = bundle_arrival(&event, &dir) {
                    let job = Job::new(dir.clone(), bundle_name);
                    info!("Bundle {} arrived in spool (job {})", job.bundle_name, job.id);
                    if queue.send(job).is_err() {
                        warn!("Assignment queue closed, dropping spool event");
                    }
                }
            }
            Err(e) => warn!("Spool watch error: {}", e),
        }
    })?;

    watcher
        .watch(&spool_dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch spool dir {}", spool_dir.display()))?;

    info!("Watching spool {}", spool_dir.display());
    Ok(watcher)
}

/// Enqueues every bundle already present in the spool
///
/// Called once at startup, after the watch is armed. Returns the number of
/// stale bundles recovered.
pub fn enqueue_stale(spool_dir: &Path, queue: &UnboundedSender<Job>) -> Result<usize> {
    let spool_dir = spool_dir
        .canonicalize()
        .with_context(|| format!("Failed to resolve spool dir {}", spool_dir.display()))?;

    let mut recovered = 0;
    for entry in std::fs::read_dir(&spool_dir)
        .with_context(|| format!("Failed to list spool dir {}", spool_dir.display()))?
    {
        let entry = entry.context("Failed to read spool dir entry")?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            warn!("Skipping spool entry with non-UTF-8 name");
            continue;
        };
        if name.starts_with('.') {
            continue;
        }

        let job = Job::new(spool_dir.clone(), name);
        info!(
            "Recovered stale bundle {} from spool (job {})",
            job.bundle_name, job.id
        );
        if queue.send(job).is_err() {
            break;
        }
        recovered += 1;
    }

    Ok(recovered)
}
