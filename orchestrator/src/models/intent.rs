//! Intent models
//!
//! An intent is the already-parsed, typed form of an operator request.
//! The orchestrator validates intent shape only and never re-parses
//! free text.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::device::Device;

/// A structured operator intent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    /// What the operator wants done
    pub goal: IntentGoal,

    /// Which devices the intent targets
    pub target: TargetSelector,

    /// Goal parameters, name -> value
    #[serde(default)]
    pub parameters: HashMap<String, String>,

    /// Request staged (cohort-by-cohort) execution
    #[serde(default)]
    pub staged: bool,
}

/// Fixed goal vocabulary.
///
/// New device models extend the fleet through registry data, not by
/// widening this enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentGoal {
    /// Enable a capability and apply its parameters
    EnableFeature {
        /// Capability to enable
        capability_id: String,
    },

    /// Disable a capability
    DisableFeature {
        /// Capability to disable
        capability_id: String,
    },

    /// Set configuration parameters belonging to a capability
    ConfigureFeature {
        /// Capability owning the parameters
        capability_id: String,
    },
}

impl IntentGoal {
    /// Capability the goal operates on
    pub fn capability_id(&self) -> &str {
        match self {
            IntentGoal::EnableFeature { capability_id }
            | IntentGoal::DisableFeature { capability_id }
            | IntentGoal::ConfigureFeature { capability_id } => capability_id,
        }
    }
}

/// Predicate selecting target devices out of the inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSelector {
    /// Every device in the inventory
    All,

    /// Explicit device ids
    Ids(Vec<String>),

    /// Devices of a given model
    Model(String),
}

impl TargetSelector {
    /// Check whether a device matches the selector
    pub fn matches(&self, device: &Device) -> bool {
        match self {
            TargetSelector::All => true,
            TargetSelector::Ids(ids) => ids.iter().any(|id| id == &device.id),
            TargetSelector::Model(model) => &device.model == model,
        }
    }
}
