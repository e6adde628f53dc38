//! Task and task graph models

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::errors::PlanError;
use crate::models::device::DeviceId;

/// Unique task identifier
pub type TaskId = String;

/// A primitive device operation.
///
/// The vocabulary is closed; device heterogeneity is expressed through
/// capability metadata, not new operation kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Enable a capability on the device
    EnableFeature {
        capability_id: String,
    },

    /// Disable a capability on the device
    DisableFeature {
        capability_id: String,
    },

    /// Set one configuration parameter
    SetParameter {
        name: String,
        value: String,
    },
}

impl Operation {
    /// Short operation name for logs and audit records
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::EnableFeature { .. } => "enable_feature",
            Operation::DisableFeature { .. } => "disable_feature",
            Operation::SetParameter { .. } => "set_parameter",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::EnableFeature { capability_id } => write!(f, "enable {}", capability_id),
            Operation::DisableFeature { capability_id } => write!(f, "disable {}", capability_id),
            Operation::SetParameter { name, value } => write!(f, "set {}={}", name, value),
        }
    }
}

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Not yet dispatched
    Pending,

    /// Dispatched to the device adapter
    Running,

    /// Operation applied
    Succeeded,

    /// Operation failed past its retry budget, or permanently
    Failed,

    /// Succeeded earlier, then reverted by rollback
    RolledBack,

    /// Never attempted (dependency failed or device cancelled)
    Skipped,
}

impl TaskStatus {
    /// True for states the engine never leaves
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::RolledBack | TaskStatus::Skipped
        )
    }
}

/// A single device operation within a task graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID
    pub id: TaskId,

    /// Device the operation targets
    pub device_id: DeviceId,

    /// Operation to perform
    pub operation: Operation,

    /// Operation reverting this task, when it is reversible
    pub rollback_op: Option<Operation>,

    /// Task ids that must succeed before this task runs
    #[serde(default)]
    pub depends_on: BTreeSet<TaskId>,

    /// Current status
    pub status: TaskStatus,
}

impl Task {
    /// Create a pending task with a fresh id
    pub fn new(device_id: impl Into<DeviceId>, operation: Operation) -> Self {
        Self {
            id: crate::utils::generate_uuid(),
            device_id: device_id.into(),
            operation,
            rollback_op: None,
            depends_on: BTreeSet::new(),
            status: TaskStatus::Pending,
        }
    }

    /// Apply a status transition, rejecting anything the task state
    /// machine does not allow.
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), String> {
        let ok = matches!(
            (self.status, next),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Pending, TaskStatus::Skipped)
                | (TaskStatus::Running, TaskStatus::Succeeded)
                | (TaskStatus::Running, TaskStatus::Failed)
                | (TaskStatus::Succeeded, TaskStatus::RolledBack)
                | (TaskStatus::Failed, TaskStatus::RolledBack)
        );

        if !ok {
            return Err(format!(
                "Invalid task transition: {:?} -> {:?}",
                self.status, next
            ));
        }

        self.status = next;
        Ok(())
    }
}

/// An acyclic set of tasks with dependency edges.
///
/// Tasks keep their insertion order; the engine uses it as the dispatch
/// tie-break.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskGraph {
    /// Tasks in insertion order
    pub tasks: Vec<Task>,

    /// Devices excluded during planning (lenient mode), with the reason
    #[serde(default)]
    pub excluded: Vec<(DeviceId, String)>,
}

impl TaskGraph {
    /// Number of tasks in the graph
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True when the graph holds no tasks
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Look up a task by id
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Device ids with at least one task in the graph
    pub fn device_ids(&self) -> BTreeSet<DeviceId> {
        self.tasks.iter().map(|t| t.device_id.clone()).collect()
    }

    /// Slice the graph down to tasks for the given devices.
    ///
    /// Safe because the builder never creates cross-device edges.
    pub fn for_devices(&self, device_ids: &BTreeSet<DeviceId>) -> TaskGraph {
        TaskGraph {
            tasks: self
                .tasks
                .iter()
                .filter(|t| device_ids.contains(&t.device_id))
                .cloned()
                .collect(),
            excluded: self
                .excluded
                .iter()
                .filter(|(id, _)| device_ids.contains(id))
                .cloned()
                .collect(),
        }
    }

    /// Validate structural invariants: every dependency references a task
    /// in this graph, only within the same device, and the edge set is
    /// acyclic (Kahn's algorithm).
    pub fn validate(&self) -> Result<(), PlanError> {
        let by_id: HashMap<&str, &Task> = self.tasks.iter().map(|t| (t.id.as_str(), t)).collect();

        for task in &self.tasks {
            for dep in &task.depends_on {
                match by_id.get(dep.as_str()) {
                    None => {
                        return Err(PlanError::InvalidPlan(format!(
                            "task {} depends on unknown task {}",
                            task.id, dep
                        )));
                    }
                    Some(dep_task) if dep_task.device_id != task.device_id => {
                        return Err(PlanError::InvalidPlan(format!(
                            "task {} has a cross-device dependency on {}",
                            task.id, dep
                        )));
                    }
                    Some(_) => {}
                }
            }
        }

        // Kahn's algorithm over the dependency edges
        let mut indegree: HashMap<&str, usize> = self
            .tasks
            .iter()
            .map(|t| (t.id.as_str(), t.depends_on.len()))
            .collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for task in &self.tasks {
            for dep in &task.depends_on {
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(task.id.as_str());
            }
        }

        let mut queue: VecDeque<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited: HashSet<&str> = HashSet::new();

        while let Some(id) = queue.pop_front() {
            visited.insert(id);
            if let Some(next) = dependents.get(id) {
                for dependent in next {
                    let d = indegree
                        .get_mut(dependent)
                        .ok_or_else(|| PlanError::InvalidPlan("indegree bookkeeping".into()))?;
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if visited.len() != self.tasks.len() {
            return Err(PlanError::InvalidPlan(
                "dependency cycle detected".to_string(),
            ));
        }

        Ok(())
    }
}
