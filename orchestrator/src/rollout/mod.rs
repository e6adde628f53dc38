//! Rollout controller
//!
//! Stages a task graph across device cohorts (canary, wave, full). The
//! next cohort dispatches only when the previous one met the success
//! gate and the approval gate said to proceed. A halt surfaces the
//! partial report; earlier cohorts are rolled back only when explicitly
//! requested.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::engine::ExecutionEngine;
use crate::errors::OrchestratorError;
use crate::models::device::DeviceId;
use crate::models::intent::Intent;
use crate::models::report::{Cohort, DeploymentReport, ExecutionResult};
use crate::models::task::TaskGraph;
use crate::report::aggregate;

/// Rollout options
#[derive(Debug, Clone)]
pub struct RolloutOptions {
    /// Success ratio a cohort must reach before the next one dispatches
    pub gate: f64,

    /// Devices in the canary cohort
    pub canary_size: usize,

    /// Fraction of the target set in the wave cohort
    pub wave_fraction: f64,

    /// Roll back succeeded tasks of completed cohorts when the rollout
    /// halts
    pub rollback_on_halt: bool,
}

impl Default for RolloutOptions {
    fn default() -> Self {
        Self {
            gate: 1.0,
            canary_size: 1,
            wave_fraction: 0.25,
            rollback_on_halt: false,
        }
    }
}

/// Human-in-the-loop decision at the pause point between cohorts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    Proceed,
    Abort,
}

/// Approval boundary; consulted after each cohort, before the next one
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn approve(&self, next: &Cohort, report_so_far: &DeploymentReport) -> Approval;
}

/// Gate that always proceeds
#[derive(Debug, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalGate for AutoApprove {
    async fn approve(&self, _next: &Cohort, _report_so_far: &DeploymentReport) -> Approval {
        Approval::Proceed
    }
}

/// Partition target devices into canary / wave / full cohorts.
///
/// Devices are taken in id order; empty stages are dropped, so small
/// fleets produce fewer cohorts.
pub fn plan_cohorts(device_ids: &BTreeSet<DeviceId>, options: &RolloutOptions) -> Vec<Cohort> {
    let ordered: Vec<&DeviceId> = device_ids.iter().collect();
    let total = ordered.len();

    let canary_end = options.canary_size.min(total);
    let wave_len = ((total as f64) * options.wave_fraction).ceil() as usize;
    let wave_end = (canary_end + wave_len).min(total);

    let stages = [
        ("canary", &ordered[..canary_end]),
        ("wave", &ordered[canary_end..wave_end]),
        ("full", &ordered[wave_end..]),
    ];

    let mut cohorts = Vec::new();
    for (name, devices) in stages {
        if devices.is_empty() {
            continue;
        }
        cohorts.push(Cohort {
            id: name.to_string(),
            device_ids: devices.iter().map(|d| (*d).clone()).collect(),
            stage_order: cohorts.len() as u32,
        });
    }
    cohorts
}

/// Check that cohorts partition the graph's devices with no overlap
fn validate_cohorts(graph: &TaskGraph, cohorts: &[Cohort]) -> Result<(), OrchestratorError> {
    let mut seen: HashSet<&DeviceId> = HashSet::new();
    for cohort in cohorts {
        for device_id in &cohort.device_ids {
            if !seen.insert(device_id) {
                return Err(OrchestratorError::RolloutError(format!(
                    "device {} appears in more than one cohort",
                    device_id
                )));
            }
        }
    }

    for device_id in graph.device_ids() {
        if !seen.contains(&device_id) {
            return Err(OrchestratorError::RolloutError(format!(
                "device {} has tasks but belongs to no cohort",
                device_id
            )));
        }
    }

    Ok(())
}

/// Drives the execution engine cohort by cohort
pub struct RolloutController {
    engine: Arc<ExecutionEngine>,
    approval: Arc<dyn ApprovalGate>,
    options: RolloutOptions,
}

impl RolloutController {
    /// Create a rollout controller
    pub fn new(
        engine: Arc<ExecutionEngine>,
        approval: Arc<dyn ApprovalGate>,
        options: RolloutOptions,
    ) -> Self {
        Self {
            engine,
            approval,
            options,
        }
    }

    /// Execute a plan the way its intent asked for.
    ///
    /// A staged intent partitions the graph's devices into
    /// canary/wave/full cohorts and walks them through [`stage`];
    /// anything else runs the whole graph in one engine pass, reported
    /// as a single cohort.
    ///
    /// [`stage`]: RolloutController::stage
    pub async fn execute(
        &self,
        intent: &Intent,
        graph: &TaskGraph,
        abort: Option<watch::Receiver<bool>>,
    ) -> Result<DeploymentReport, OrchestratorError> {
        if intent.staged {
            let cohorts = plan_cohorts(&graph.device_ids(), &self.options);
            return self.stage(graph, &cohorts, abort).await;
        }

        info!(devices = graph.device_ids().len(), "dispatching unstaged plan");
        let results = self.engine.run(graph.clone(), abort).await?;
        let all = Cohort {
            id: "all".to_string(),
            device_ids: graph.device_ids(),
            stage_order: 0,
        };
        Ok(aggregate(&results, &[all]))
    }

    /// Stage the graph across the given cohorts and return the report.
    ///
    /// Cohorts run in `stage_order`. A cohort below the gate, an abort
    /// signal, or an approval rejection halts the rollout; the report
    /// then covers what actually ran.
    pub async fn stage(
        &self,
        graph: &TaskGraph,
        cohorts: &[Cohort],
        abort: Option<watch::Receiver<bool>>,
    ) -> Result<DeploymentReport, OrchestratorError> {
        validate_cohorts(graph, cohorts)?;

        let mut ordered: Vec<&Cohort> = cohorts.iter().collect();
        ordered.sort_by_key(|c| c.stage_order);

        let mut all_results: Vec<ExecutionResult> = Vec::new();
        let mut executed: Vec<TaskGraph> = Vec::new();

        for (pos, cohort) in ordered.iter().enumerate() {
            if let Some(rx) = &abort {
                if *rx.borrow() {
                    info!(cohort = %cohort.id, "rollout aborted before cohort");
                    return self.halt(cohorts, &mut all_results, &executed).await;
                }
            }

            info!(cohort = %cohort.id, devices = cohort.device_ids.len(), "dispatching cohort");
            let sub = graph.for_devices(&cohort.device_ids);
            executed.push(sub.clone());
            let results = self.engine.run(sub, abort.clone()).await?;
            all_results.extend(results);

            let report = aggregate(&all_results, cohorts);
            let ratio = report
                .cohorts
                .iter()
                .find(|c| c.cohort_id == cohort.id)
                .map(|c| c.success_ratio)
                .unwrap_or(1.0);

            if ratio < self.options.gate {
                warn!(
                    cohort = %cohort.id,
                    ratio,
                    gate = self.options.gate,
                    "cohort missed the gate, halting rollout"
                );
                return self.halt(cohorts, &mut all_results, &executed).await;
            }

            // Pause point: approval happens between cohorts, never
            // mid-cohort
            if let Some(next) = ordered.get(pos + 1) {
                if self.approval.approve(next, &report).await == Approval::Abort {
                    info!(cohort = %next.id, "approval gate aborted the rollout");
                    return self.halt(cohorts, &mut all_results, &executed).await;
                }
            }
        }

        Ok(aggregate(&all_results, cohorts))
    }

    /// Produce the halted partial report, rolling back completed work
    /// first when configured to.
    async fn halt(
        &self,
        cohorts: &[Cohort],
        all_results: &mut Vec<ExecutionResult>,
        executed: &[TaskGraph],
    ) -> Result<DeploymentReport, OrchestratorError> {
        if self.options.rollback_on_halt {
            for sub in executed.iter().rev() {
                let reverted = self.engine.rollback_results(sub, all_results).await;
                all_results.extend(reverted);
            }
        }
        Ok(aggregate(all_results, cohorts))
    }
}
