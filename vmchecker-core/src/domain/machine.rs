//! Machine override record

use serde::{Deserialize, Serialize};

/// Configuration overrides carried by one worker-slot token.
///
/// The set of override-eligible fields is fixed. Unknown keys in a duplicate
/// declaration are a configuration error and are rejected when the course
/// configuration is loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MachineOverrides {
    /// Hostname the executor should contact for this duplicate
    pub hostname: Option<String>,
    /// MAC address assigned to this duplicate
    pub mac: Option<String>,
    /// Path to the disk image backing this duplicate
    pub disk_image: Option<String>,
}

impl MachineOverrides {
    /// True when no field is overridden (the `"default"` token).
    pub fn is_empty(&self) -> bool {
        self.hostname.is_none() && self.mac.is_none() && self.disk_image.is_none()
    }
}
