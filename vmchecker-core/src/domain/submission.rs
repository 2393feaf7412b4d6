//! Submission domain types

use serde::{Deserialize, Serialize};

use crate::domain::machine::MachineOverrides;

/// Lifecycle status of a submission, as reported to the upstream service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    Processing,
    Done,
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionStatus::Processing => write!(f, "PROCESSING"),
            SubmissionStatus::Done => write!(f, "DONE"),
        }
    }
}

/// Parsed `submission-config` file found inside an unpacked bundle.
///
/// The assignment table names the VM identity the submission must run on;
/// the machine table carries the connection parameters the executor reads,
/// which a worker-slot token may override before execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionConfig {
    pub assignment: AssignmentSection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<MachineSection>,
}

/// The `[assignment]` table of a submission config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentSection {
    /// VM identity the tests must run on
    pub machine: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
}

/// The `[machine]` table of a submission config.
///
/// Fields mirror the override-eligible set of [`MachineOverrides`]; an
/// override only replaces a field the submission itself sets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_image: Option<String>,
}

impl SubmissionConfig {
    /// The VM identity this submission targets.
    pub fn vm_identity(&self) -> &str {
        &self.assignment.machine
    }

    /// Applies a worker-slot token's overrides to the machine table.
    ///
    /// A field is only replaced when the submission already sets it; a
    /// submission without a machine table is left untouched.
    pub fn apply_overrides(&mut self, overrides: &MachineOverrides) {
        let Some(machine) = self.machine.as_mut() else {
            return;
        };
        if machine.hostname.is_some() {
            if let Some(hostname) = &overrides.hostname {
                machine.hostname = Some(hostname.clone());
            }
        }
        if machine.mac.is_some() {
            if let Some(mac) = &overrides.mac {
                machine.mac = Some(mac.clone());
            }
        }
        if machine.disk_image.is_some() {
            if let Some(disk_image) = &overrides.disk_image {
                machine.disk_image = Some(disk_image.clone());
            }
        }
    }
}
