//! Execution results, cohorts and deployment reports

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::device::DeviceId;
use crate::models::task::{Operation, TaskId};

/// Terminal outcome of one task attempt sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Succeeded,
    Failed,
    Skipped,
    RolledBack,
}

/// One record in the append-only execution result stream.
///
/// A task normally produces exactly one record. A task rolled back after
/// succeeding produces a second record with outcome `RolledBack`;
/// consumers fold by last-outcome-per-task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Task this record belongs to
    pub task_id: TaskId,

    /// Device the task targeted
    pub device_id: DeviceId,

    /// Operation that was (or would have been) invoked
    pub operation: Operation,

    /// Terminal outcome
    pub outcome: Outcome,

    /// Error detail for failed outcomes, or the rollback failure for a
    /// `RolledBack` record whose rollback operation itself failed
    pub error: Option<String>,

    /// Number of adapter invocations, including retries
    pub attempts: u32,

    /// Wall-clock time spent on the task
    pub latency: Duration,

    /// When the first attempt started
    pub started_at: DateTime<Utc>,

    /// When the terminal outcome was reached
    pub finished_at: DateTime<Utc>,
}

/// A batch of devices deployed together in one rollout stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cohort {
    /// Unique cohort ID
    pub id: String,

    /// Devices in this cohort
    pub device_ids: BTreeSet<DeviceId>,

    /// Position in the rollout, ascending
    pub stage_order: u32,
}

/// Per-cohort outcome summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortSummary {
    /// Cohort ID
    pub cohort_id: String,

    /// Position in the rollout
    pub stage_order: u32,

    /// Whether the cohort was dispatched at all
    pub dispatched: bool,

    /// Total tasks planned for the cohort
    pub total: usize,

    /// Tasks that succeeded and stayed succeeded
    pub succeeded: usize,

    /// Tasks that failed
    pub failed: usize,

    /// Tasks never attempted
    pub skipped: usize,

    /// Tasks reverted by rollback
    pub rolled_back: usize,

    /// succeeded / (total - skipped); 1.0 when nothing was attempted
    pub success_ratio: f64,
}

/// One entry in the report's failure list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureDetail {
    pub task_id: TaskId,
    pub device_id: DeviceId,
    pub operation: Operation,
    pub outcome: Outcome,
    pub error: Option<String>,
}

/// Final artifact of a rollout; immutable once produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentReport {
    /// Per-cohort summaries, in stage order
    pub cohorts: Vec<CohortSummary>,

    /// Success ratio over every dispatched cohort
    pub overall_success_ratio: f64,

    /// Every task that failed or was rolled back, with context
    pub failures: Vec<FailureDetail>,

    /// Whether the rollout ran every cohort to completion
    pub completed: bool,
}
