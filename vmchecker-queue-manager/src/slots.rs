//! VM slot registry
//!
//! Maintains, for each VM identity, a bounded FIFO pool of interchangeable
//! worker-slot tokens. Duplicated VMs get one token per declared duplicate,
//! populated at startup from the course configuration; every other VM gets a
//! single `"default"` token, created lazily on first reservation.
//!
//! Holding a token is what entitles a worker to launch the executor, so the
//! pool size bounds how many submissions run against one VM concurrently.
//! Tokens are returned by dropping the reservation guard, which makes the
//! release run exactly once on every control path.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::CourseConfig;
use vmchecker_core::domain::machine::MachineOverrides;
use vmchecker_core::domain::submission::SubmissionConfig;

/// One unit of concurrent capacity against a VM identity
#[derive(Debug, Clone)]
pub struct WorkerSlot {
    pub worker_id: String,
    pub overrides: MachineOverrides,
}

impl WorkerSlot {
    /// The single token backing a VM with no duplicate declarations
    fn default_slot() -> Self {
        Self {
            worker_id: "default".to_string(),
            overrides: MachineOverrides::default(),
        }
    }
}

/// FIFO pool of the tokens minted for one VM identity
///
/// The sender half recycles released tokens; the receiver half is shared by
/// every worker waiting on this VM. Only the tokens minted at creation ever
/// circulate, so the pool size is fixed for the life of the process.
struct SlotPool {
    tx: mpsc::UnboundedSender<WorkerSlot>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<WorkerSlot>>,
}

impl SlotPool {
    fn with_tokens(tokens: Vec<WorkerSlot>) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        for token in tokens {
            tx.send(token).expect("freshly created pool cannot be closed");
        }
        Arc::new(Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        })
    }
}

/// Registry mapping VM identities to their slot pools
pub struct SlotRegistry {
    /// Guards only the lazy insertion of new pools; reservations go through
    /// the per-pool channel, never through this lock.
    pools: Mutex<HashMap<String, Arc<SlotPool>>>,
}

impl SlotRegistry {
    /// Creates the registry, minting one token per declared duplicate
    pub fn new(config: &CourseConfig) -> Self {
        let mut pools = HashMap::new();
        for (vm, vm_config) in &config.vms {
            let tokens: Vec<WorkerSlot> = vm_config
                .duplicates
                .iter()
                .map(|(worker_id, overrides)| WorkerSlot {
                    worker_id: worker_id.clone(),
                    overrides: overrides.clone(),
                })
                .collect();
            info!(
                "VM {} configured with {} duplicate slot(s)",
                vm,
                tokens.len()
            );
            pools.insert(vm.clone(), SlotPool::with_tokens(tokens));
        }
        Self {
            pools: Mutex::new(pools),
        }
    }

    /// Get-or-create the pool for a VM identity
    fn pool(&self, vm: &str) -> Arc<SlotPool> {
        let mut pools = self.pools.lock().unwrap();
        pools
            .entry(vm.to_string())
            .or_insert_with(|| {
                debug!("Creating default slot pool for VM {}", vm);
                SlotPool::with_tokens(vec![WorkerSlot::default_slot()])
            })
            .clone()
    }

    /// Reserves a slot for the submission described by `submission_config`
    ///
    /// Reads the VM identity from the file and awaits a token from that VM's
    /// pool (blocking while the pool is drained). A token that carries
    /// overrides patches the submission's machine table and rewrites the
    /// file, so the executor sees the duplicate's parameters.
    pub async fn reserve(
        &self,
        job_id: Uuid,
        submission_config: &Path,
    ) -> Result<SlotReservation> {
        let mut config = read_submission_config(submission_config)?;
        let vm = config.vm_identity().to_string();
        let pool = self.pool(&vm);

        let slot = {
            let mut rx = pool.rx.lock().await;
            rx.recv()
                .await
                .ok_or_else(|| anyhow!("Slot pool for VM {} closed", vm))?
        };

        // Guard the token before touching the submission config again: a
        // failed rewrite must return it to the pool, not leak it.
        let reservation = SlotReservation {
            job_id,
            vm: vm.clone(),
            slot: Some(slot),
            pool,
        };

        if let Some(slot) = reservation.slot.as_ref() {
            if !slot.overrides.is_empty() {
                config.apply_overrides(&slot.overrides);
                write_submission_config(submission_config, &config)?;
            }
        }

        info!(
            "Job {} reserved slot {} on VM {}",
            job_id,
            reservation.worker_id(),
            vm
        );

        Ok(reservation)
    }
}

/// Scoped slot reservation
///
/// The token is returned to its pool when the reservation is dropped, so a
/// panicking or erroring pipeline can never leak capacity.
pub struct SlotReservation {
    job_id: Uuid,
    vm: String,
    slot: Option<WorkerSlot>,
    pool: Arc<SlotPool>,
}

impl SlotReservation {
    /// The VM identity this reservation is against
    pub fn vm(&self) -> &str {
        &self.vm
    }

    /// The worker id of the held token
    pub fn worker_id(&self) -> &str {
        self.slot
            .as_ref()
            .map(|slot| slot.worker_id.as_str())
            .unwrap_or("released")
    }
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            debug!(
                "Job {} released slot {} on VM {}",
                self.job_id, slot.worker_id, self.vm
            );
            let _ = self.pool.tx.send(slot);
        }
    }
}

fn read_submission_config(path: &Path) -> Result<SubmissionConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read submission config {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("Failed to parse submission config {}", path.display()))
}

fn write_submission_config(path: &Path, config: &SubmissionConfig) -> Result<()> {
    let contents = toml::to_string(config)
        .with_context(|| format!("Failed to serialize submission config {}", path.display()))?;
    std::fs::write(path, contents)
        .with_context(|| format!("Failed to rewrite submission config {}", path.display()))
}
