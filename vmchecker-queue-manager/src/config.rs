//! Course configuration
//!
//! Defines all configurable parameters for the queue manager: worker pool
//! size, executor deadline, the spool and unzip directories, the upstream
//! callback URL, and the duplicated VM declarations that seed the slot
//! registry.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use vmchecker_core::domain::machine::MachineOverrides;

/// Directory searched for course configuration files when `VMCHECKER_ROOT`
/// is not set.
pub const DEFAULT_CONFIG_ROOT: &str = "/etc/vmchecker";

/// Course configuration
///
/// Loaded once at startup from `<root>/<course_id>.toml` and shared read-only
/// by every worker.
#[derive(Debug, Clone, Deserialize)]
pub struct CourseConfig {
    /// Number of workers consuming the assignment queue
    pub num_workers: usize,

    /// Wall-clock limit for one executor run, in seconds
    pub executor_timeout_secs: u64,

    /// Directory the upstream service deposits bundles into
    pub spool_dir: PathBuf,

    /// Scratch area submissions are unpacked into
    pub unzip_dir: PathBuf,

    /// Base URL of the upstream submission service
    pub callback_url: String,

    /// Duplicated VM declarations, keyed by VM identity
    #[serde(default)]
    pub vms: HashMap<String, VmConfig>,
}

/// Declaration of one duplicated VM identity
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VmConfig {
    /// One entry per duplicate instance. The key becomes the duplicate's
    /// worker id; the value is the override set applied to submissions it
    /// runs (distinct MAC, distinct disk image, ...).
    #[serde(default)]
    pub duplicates: BTreeMap<String, MachineOverrides>,
}

impl CourseConfig {
    /// Loads the configuration for a course id
    ///
    /// The file is looked up under `$VMCHECKER_ROOT` (default
    /// `/etc/vmchecker`) as `<course_id>.toml`.
    pub fn load(course_id: &str) -> Result<Self> {
        let root =
            std::env::var("VMCHECKER_ROOT").unwrap_or_else(|_| DEFAULT_CONFIG_ROOT.to_string());
        Self::load_from(&Path::new(&root).join(format!("{course_id}.toml")))
    }

    /// Loads the configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read course config {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse course config {}", path.display()))
    }

    /// Validates the configuration
    ///
    /// Run before any worker starts; a failure here aborts startup.
    pub fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            anyhow::bail!("num_workers must be greater than 0");
        }

        if self.executor_timeout_secs == 0 {
            anyhow::bail!("executor_timeout_secs must be greater than 0");
        }

        if !self.spool_dir.is_dir() {
            anyhow::bail!("spool_dir {} is not a directory", self.spool_dir.display());
        }

        if !self.unzip_dir.is_dir() {
            anyhow::bail!("unzip_dir {} is not a directory", self.unzip_dir.display());
        }

        if !self.callback_url.starts_with("http://") && !self.callback_url.starts_with("https://") {
            anyhow::bail!("callback_url must start with http:// or https://");
        }

        for (vm, vm_config) in &self.vms {
            if vm_config.duplicates.is_empty() {
                anyhow::bail!("duplicated VM {} declares no duplicates", vm);
            }
        }

        Ok(())
    }

    /// Executor deadline as a [`Duration`]
    pub fn executor_timeout(&self) -> Duration {
        Duration::from_secs(self.executor_timeout_secs)
    }
}
