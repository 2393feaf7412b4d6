//! Callback report payloads

use serde::{Deserialize, Serialize};

use crate::domain::submission::SubmissionStatus;

/// One result file attached to a `DONE` notification.
///
/// The executor writes its results as `*.vmr` files in the unpack directory;
/// each one is shipped to the upstream service by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub content: String,
}

/// Status update POSTed to the upstream service.
///
/// `PROCESSING` updates carry no artifacts; `DONE` updates attach every
/// `.vmr` file produced for the submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Bundle file name, unique within the spool
    pub bundle: String,
    pub status: SubmissionStatus,
    pub reported_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}
