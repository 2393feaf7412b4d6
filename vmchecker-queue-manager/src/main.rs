//! Vmchecker Queue Manager
//!
//! Watches a course's spool directory for submission bundles deposited by
//! the upstream service and grades each one end to end.
//!
//! Architecture:
//! - Configuration: course file loaded at startup, validated before any
//!   worker starts
//! - Spool: close-write watcher plus stale-bundle recovery feeding the
//!   assignment queue
//! - Scheduler: fixed worker pool consuming the unbounded queue
//! - Slots: per-VM token pools bounding concurrency against each VM
//! - Supervisor: deadline-enforced runs of the external VM executor
//!
//! The queue manager keeps no state of its own: the bundles in the spool are
//! the state, and a bundle is unlinked only once its job is fully reported.

mod callback;
mod config;
mod processor;
mod redirect;
mod results;
mod scheduler;
mod slots;
mod spool;
mod supervisor;
mod unpack;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::callback::{Callback, HttpCallback};
use crate::config::CourseConfig;
use crate::scheduler::Dispatcher;
use crate::slots::SlotRegistry;
use crate::supervisor::ExecutorSupervisor;

#[derive(Parser, Debug)]
#[command(name = "vmchecker-queue-manager")]
#[command(about = "Queue manager for the vmchecker autograding pipeline")]
struct Args {
    /// Course whose configuration to load
    #[arg(short = 'c', long = "course-id")]
    course_id: Option<String>,

    /// Redirect standard input from FILE
    #[arg(short = '0', long = "stdin", value_name = "FILE")]
    stdin: Option<PathBuf>,

    /// Redirect standard output to FILE (append)
    #[arg(short = '1', long = "stdout", value_name = "FILE")]
    stdout: Option<PathBuf>,

    /// Redirect standard error to FILE (append)
    #[arg(short = '2', long = "stderr", value_name = "FILE")]
    stderr: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let Some(course_id) = args.course_id else {
        eprintln!("course_id parameter required");
        std::process::exit(1);
    };

    if let Err(e) = redirect::apply(
        args.stdin.as_deref(),
        args.stdout.as_deref(),
        args.stderr.as_deref(),
    ) {
        eprintln!("{e:#}");
        std::process::exit(1);
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("vmchecker_queue_manager=info")),
        )
        .init();

    info!("Starting vmchecker queue manager for course {}", course_id);

    // Load configuration; an unusable configuration aborts before any worker
    // starts
    let config = match load_config(&course_id) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid course configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Loaded configuration: {} workers, {}s executor timeout, spool {}",
        config.num_workers,
        config.executor_timeout_secs,
        config.spool_dir.display()
    );

    let slots = Arc::new(SlotRegistry::new(&config));
    let supervisor = Arc::new(ExecutorSupervisor::new(config.executor_timeout()));
    let callback: Arc<dyn Callback> = Arc::new(HttpCallback::new(&config.callback_url));

    let (queue_tx, queue_rx) = mpsc::unbounded_channel();

    // Arm the watch before scanning so a bundle arriving in between is seen
    // by at least one of the two paths; one seen by both is dropped on its
    // second processing.
    let _watcher = spool::watch(&config.spool_dir, queue_tx.clone())?;
    let recovered = spool::enqueue_stale(&config.spool_dir, &queue_tx)?;
    if recovered > 0 {
        info!("Recovered {} stale bundle(s) from a previous run", recovered);
    }

    let dispatcher = Dispatcher::new(config, slots, supervisor, callback);
    dispatcher.run(queue_rx).await;

    Ok(())
}

/// Loads and validates the course configuration
fn load_config(course_id: &str) -> Result<CourseConfig> {
    let config = CourseConfig::load(course_id)?;
    config.validate()?;
    Ok(config)
}
