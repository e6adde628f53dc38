//! Task plan builder
//!
//! Expands a structured intent over the resolved target devices into a
//! dependency-aware task graph, consulting the capability registry.
//! Ordering edges exist only where an operation has a declared
//! prerequisite on the same device; tasks on different devices are never
//! ordered relative to each other, staging happens in the rollout
//! controller instead.

use std::sync::Arc;

use tracing::{debug, info};

use crate::errors::{OrchestratorError, PlanError};
use crate::inventory::DeviceInventory;
use crate::models::capability::Capability;
use crate::models::device::Device;
use crate::models::intent::{Intent, IntentGoal};
use crate::models::task::{Operation, Task, TaskGraph};
use crate::registry::CapabilityRegistry;
use crate::utils::firmware_at_least;

/// Planner options
#[derive(Debug, Clone)]
pub struct PlannerOptions {
    /// In strict mode a single unsupported target fails the whole plan;
    /// in lenient mode the device is excluded and recorded on the graph.
    pub strict: bool,

    /// Force a registry refresh instead of accepting cached snapshots
    pub force_refresh: bool,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            strict: true,
            force_refresh: false,
        }
    }
}

/// Builds task graphs from intents
pub struct PlanBuilder {
    registry: Arc<CapabilityRegistry>,
    options: PlannerOptions,
}

impl PlanBuilder {
    /// Create a plan builder
    pub fn new(registry: Arc<CapabilityRegistry>, options: PlannerOptions) -> Self {
        Self { registry, options }
    }

    /// Build a task graph for the intent against the current inventory.
    ///
    /// Fails before anything executes: `AmbiguousTarget` when the
    /// selector matches no device, `UnsupportedCapability` /
    /// `ConflictingParameters` per the capability metadata, and
    /// `InvalidPlan` when the produced graph is malformed.
    pub async fn build(
        &self,
        intent: &Intent,
        inventory: &DeviceInventory,
    ) -> Result<TaskGraph, OrchestratorError> {
        let mut targets: Vec<Device> = inventory
            .all()
            .await
            .into_iter()
            .filter(|d| intent.target.matches(d))
            .collect();
        targets.sort_by(|a, b| a.id.cmp(&b.id));

        if targets.is_empty() {
            return Err(PlanError::AmbiguousTarget(format!(
                "selector {:?} matches no device",
                intent.target
            ))
            .into());
        }

        let mut graph = TaskGraph::default();

        for device in &targets {
            match self.expand_for_device(intent, device).await {
                Ok(tasks) => {
                    debug!(device_id = %device.id, tasks = tasks.len(), "expanded intent");
                    graph.tasks.extend(tasks);
                }
                Err(OrchestratorError::PlanError(plan_err)) if !self.options.strict => {
                    info!(device_id = %device.id, "excluding device from plan: {}", plan_err);
                    graph.excluded.push((device.id.clone(), plan_err.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        graph.validate()?;

        info!(
            tasks = graph.len(),
            devices = graph.device_ids().len(),
            excluded = graph.excluded.len(),
            "plan built"
        );
        Ok(graph)
    }

    /// Expand the intent's goal into primitive operations for one device
    async fn expand_for_device(
        &self,
        intent: &Intent,
        device: &Device,
    ) -> Result<Vec<Task>, OrchestratorError> {
        let capability_id = intent.goal.capability_id();
        let cached = self
            .registry
            .get_or_refresh(device, self.options.force_refresh)
            .await?;

        let capability = self
            .supported_capability(device, cached.snapshot.capability(capability_id), capability_id)?;

        self.check_conflicts(intent, capability)?;

        let mut tasks = Vec::new();

        match &intent.goal {
            IntentGoal::EnableFeature { capability_id } => {
                let mut enable = Task::new(
                    device.id.clone(),
                    Operation::EnableFeature {
                        capability_id: capability_id.clone(),
                    },
                );
                enable.rollback_op = Some(Operation::DisableFeature {
                    capability_id: capability_id.clone(),
                });
                let enable_id = enable.id.clone();
                tasks.push(enable);

                // Sub-parameters configure only after the feature exists
                for task in self.parameter_tasks(intent, device, capability)? {
                    let mut task = task;
                    task.depends_on.insert(enable_id.clone());
                    tasks.push(task);
                }
            }
            IntentGoal::DisableFeature { capability_id } => {
                let mut disable = Task::new(
                    device.id.clone(),
                    Operation::DisableFeature {
                        capability_id: capability_id.clone(),
                    },
                );
                disable.rollback_op = Some(Operation::EnableFeature {
                    capability_id: capability_id.clone(),
                });
                tasks.push(disable);
            }
            IntentGoal::ConfigureFeature { .. } => {
                tasks.extend(self.parameter_tasks(intent, device, capability)?);
            }
        }

        Ok(tasks)
    }

    /// Check the device really supports the capability, including the
    /// firmware floor.
    fn supported_capability<'a>(
        &self,
        device: &Device,
        capability: Option<&'a Capability>,
        capability_id: &str,
    ) -> Result<&'a Capability, OrchestratorError> {
        let unsupported = || {
            OrchestratorError::from(PlanError::UnsupportedCapability {
                device_id: device.id.clone(),
                capability_id: capability_id.to_string(),
            })
        };

        let capability = capability.ok_or_else(unsupported)?;

        if !device.has_capability(capability_id) {
            return Err(unsupported());
        }

        if let Some(minimum) = &capability.required_firmware_min {
            if !firmware_at_least(&device.firmware_version, minimum) {
                return Err(unsupported());
            }
        }

        Ok(capability)
    }

    /// Reject intents setting mutually exclusive parameters
    fn check_conflicts(&self, intent: &Intent, capability: &Capability) -> Result<(), OrchestratorError> {
        for (first, second) in &capability.exclusive_parameters {
            if intent.parameters.contains_key(first) && intent.parameters.contains_key(second) {
                return Err(PlanError::ConflictingParameters {
                    capability_id: capability.id.clone(),
                    first: first.clone(),
                    second: second.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// One `SetParameter` task per intent parameter, in name order.
    ///
    /// The rollback restores the device's last known value; with no
    /// known prior value the write is not reversible and carries no
    /// rollback operation.
    fn parameter_tasks(
        &self,
        intent: &Intent,
        device: &Device,
        capability: &Capability,
    ) -> Result<Vec<Task>, OrchestratorError> {
        let mut names: Vec<&String> = intent.parameters.keys().collect();
        names.sort();

        let mut tasks = Vec::new();
        for name in names {
            if !capability.has_parameter(name) {
                return Err(PlanError::InvalidPlan(format!(
                    "parameter {} is not declared by capability {}",
                    name, capability.id
                ))
                .into());
            }

            let value = &intent.parameters[name];
            let mut task = Task::new(
                device.id.clone(),
                Operation::SetParameter {
                    name: name.clone(),
                    value: value.clone(),
                },
            );
            task.rollback_op = device.parameters.get(name).map(|prior| Operation::SetParameter {
                name: name.clone(),
                value: prior.clone(),
            });
            tasks.push(task);
        }

        Ok(tasks)
    }
}
