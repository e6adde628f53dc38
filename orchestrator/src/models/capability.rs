//! Capability models

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Unique capability identifier
pub type CapabilityId = String;

/// A named device feature with its configurable parameters.
///
/// Immutable once loaded from the capability source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    /// Unique capability ID (e.g., "motion_detection")
    pub id: CapabilityId,

    /// Human-readable name
    pub name: String,

    /// Minimum firmware version required, if any
    pub required_firmware_min: Option<String>,

    /// Configurable parameters, name -> type
    #[serde(default)]
    pub parameters: HashMap<String, ParameterType>,

    /// Pairs of parameters that may not be set together
    #[serde(default)]
    pub exclusive_parameters: Vec<(String, String)>,
}

impl Capability {
    /// Create a capability with no parameters
    pub fn new(id: impl Into<CapabilityId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            required_firmware_min: None,
            parameters: HashMap::new(),
            exclusive_parameters: Vec::new(),
        }
    }

    /// Check whether the capability declares a parameter
    pub fn has_parameter(&self, name: &str) -> bool {
        self.parameters.contains_key(name)
    }
}

/// Type of a capability parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    Bool,
    Int,
    Float,
    String,
    Enum,
}
