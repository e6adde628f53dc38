//! Device models

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// Unique device identifier
pub type DeviceId = String;

/// A networked camera device known to the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Unique device ID
    pub id: DeviceId,

    /// Network address (host or host:port)
    pub address: String,

    /// Device model (e.g., "AXIS P3265-LV")
    pub model: String,

    /// Firmware version (dotted, e.g., "10.12.4")
    pub firmware_version: String,

    /// Capability ids this device advertises
    #[serde(default)]
    pub capabilities: BTreeSet<String>,

    /// Last known configuration parameter values, keyed by parameter name
    #[serde(default)]
    pub parameters: HashMap<String, String>,

    /// Current status
    pub status: DeviceStatus,
}

impl Device {
    /// Create a device in the `Unknown` state
    pub fn new(id: impl Into<DeviceId>, address: impl Into<String>, model: impl Into<String>, firmware_version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            model: model.into(),
            firmware_version: firmware_version.into(),
            capabilities: BTreeSet::new(),
            parameters: HashMap::new(),
            status: DeviceStatus::Unknown,
        }
    }

    /// Check whether the device advertises a capability
    pub fn has_capability(&self, capability_id: &str) -> bool {
        self.capabilities.contains(capability_id)
    }
}

/// Device status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Never probed
    Unknown,

    /// Responded to the last probe
    Reachable,

    /// Did not respond to the last probe
    Unreachable,

    /// Currently receiving configuration operations
    Configuring,

    /// All planned operations applied
    Configured,

    /// Configuration failed past the failure threshold
    Failed,
}
