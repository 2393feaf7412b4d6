//! Worker pool consuming the assignment queue
//!
//! A fixed set of workers shares one unbounded FIFO of jobs. Workers are not
//! specialized: any worker takes any job, and a slow job blocks exactly one
//! worker. Handout order is FIFO; completion order is whatever the jobs make
//! of it. Per-VM concurrency is bounded separately by the slot registry,
//! inside the job processor.

use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::callback::Callback;
use crate::config::CourseConfig;
use crate::processor;
use crate::slots::SlotRegistry;
use crate::spool::Job;
use crate::supervisor::ExecutorSupervisor;

/// Worker pool driving the job processor
pub struct Dispatcher {
    config: Arc<CourseConfig>,
    slots: Arc<SlotRegistry>,
    supervisor: Arc<ExecutorSupervisor>,
    callback: Arc<dyn Callback>,
}

impl Dispatcher {
    /// Creates a new dispatcher
    pub fn new(
        config: CourseConfig,
        slots: Arc<SlotRegistry>,
        supervisor: Arc<ExecutorSupervisor>,
        callback: Arc<dyn Callback>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            slots,
            supervisor,
            callback,
        }
    }

    /// Runs the worker pool until the assignment queue closes
    ///
    /// In production the queue never closes (the watcher holds the sender for
    /// the life of the process), so this only returns in tests.
    pub async fn run(self, queue: UnboundedReceiver<Job>) {
        info!("Starting {} worker(s)", self.config.num_workers);

        let queue = Arc::new(Mutex::new(queue));
        let mut handles = Vec::new();

        for worker in 0..self.config.num_workers {
            let queue = Arc::clone(&queue);
            let config = Arc::clone(&self.config);
            let slots = Arc::clone(&self.slots);
            let supervisor = Arc::clone(&self.supervisor);
            let callback = Arc::clone(&self.callback);

            handles.push(tokio::spawn(async move {
                worker_loop(worker, queue, config, slots, supervisor, callback).await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Worker task panicked: {}", e);
            }
        }
    }
}

/// One worker: dequeue, process, repeat
async fn worker_loop(
    worker: usize,
    queue: Arc<Mutex<UnboundedReceiver<Job>>>,
    config: Arc<CourseConfig>,
    slots: Arc<SlotRegistry>,
    supervisor: Arc<ExecutorSupervisor>,
    callback: Arc<dyn Callback>,
) {
    loop {
        // The dequeue lock is held only while waiting for a job, never while
        // processing one.
        let job = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };

        let Some(job) = job else {
            debug!("Worker {} exiting, assignment queue closed", worker);
            break;
        };

        debug!(
            "Worker {} picked job {} (bundle {})",
            worker, job.id, job.bundle_name
        );
        processor::process(job, &config, &slots, &supervisor, callback.as_ref()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::testing::RecordingCallback;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use vmchecker_core::domain::submission::SubmissionStatus;

    fn build_bundle(dest: &Path) {
        let file = std::fs::File::create(dest).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        let contents = b"[assignment]\nmachine = \"deb1\"\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "submission-config", &contents[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    fn write_script(dir: &Path) -> PathBuf {
        let path = dir.join("fake-executor");
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[tokio::test]
    async fn test_workers_drain_queue_and_exit_on_close() {
        let spool = tempfile::tempdir().unwrap();
        let unzip = tempfile::tempdir().unwrap();
        let scripts = tempfile::tempdir().unwrap();
        let program = write_script(scripts.path());

        let raw = format!(
            r#"
num_workers = 2
executor_timeout_secs = 30
spool_dir = "{}"
unzip_dir = "{}"
callback_url = "http://localhost:8080"
"#,
            spool.path().display(),
            unzip.path().display()
        );
        let config: CourseConfig = toml::from_str(&raw).unwrap();
        let slots = Arc::new(SlotRegistry::new(&config));
        let supervisor = Arc::new(ExecutorSupervisor::with_program(
            program,
            Duration::from_secs(30),
        ));
        let callback = Arc::new(RecordingCallback::new());

        let (tx, rx) = mpsc::unbounded_channel();
        for name in ["a.tar.gz", "b.tar.gz", "c.tar.gz"] {
            let path = spool.path().join(name);
            build_bundle(&path);
            tx.send(Job::new(spool.path().to_path_buf(), name.to_string()))
                .unwrap();
        }
        // closing the queue lets the workers exit once it drains
        drop(tx);

        let dispatcher = Dispatcher::new(
            config,
            Arc::clone(&slots),
            supervisor,
            Arc::clone(&callback) as Arc<dyn Callback>,
        );
        dispatcher.run(rx).await;

        // every bundle was processed exactly once and committed
        for name in ["a.tar.gz", "b.tar.gz", "c.tar.gz"] {
            assert!(!spool.path().join(name).exists());
        }

        let events = callback.events();
        assert_eq!(events.len(), 6);
        for name in ["a.tar.gz", "b.tar.gz", "c.tar.gz"] {
            let statuses: Vec<SubmissionStatus> = events
                .iter()
                .filter(|(bundle, _, _)| bundle == name)
                .map(|(_, status, _)| *status)
                .collect();
            assert_eq!(
                statuses,
                vec![SubmissionStatus::Processing, SubmissionStatus::Done]
            );
        }
    }
}
