//! Rollout controller tests

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use camfleet::engine::adapter::InvokeError;
use camfleet::models::intent::{Intent, IntentGoal, TargetSelector};
use camfleet::models::report::{Cohort, DeploymentReport, Outcome};
use camfleet::models::task::Operation;
use camfleet::rollout::{
    plan_cohorts, Approval, ApprovalGate, AutoApprove, RolloutController, RolloutOptions,
};

use crate::helpers::*;

/// Approval gate that aborts right before one named cohort
struct AbortBefore {
    cohort_id: String,
}

#[async_trait]
impl ApprovalGate for AbortBefore {
    async fn approve(&self, next: &Cohort, _report_so_far: &DeploymentReport) -> Approval {
        if next.id == self.cohort_id {
            Approval::Abort
        } else {
            Approval::Proceed
        }
    }
}

fn ids(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn enable_intent(staged: bool) -> Intent {
    Intent {
        goal: IntentGoal::EnableFeature {
            capability_id: "motion_detection".to_string(),
        },
        target: TargetSelector::All,
        parameters: Default::default(),
        staged,
    }
}

async fn controller(
    adapter: Arc<MockAdapter>,
    devices: &[&str],
    approval: Arc<dyn ApprovalGate>,
    options: RolloutOptions,
) -> RolloutController {
    let inventory = seeded_inventory(devices).await;
    let engine = Arc::new(engine_for(adapter, inventory, fast_options()));
    RolloutController::new(engine, approval, options)
}

#[test]
fn test_plan_cohorts_partitions_in_id_order() {
    let devices = ids(&["d0", "d1", "d2", "d3", "d4", "d5", "d6", "d7", "d8", "d9"]);
    let cohorts = plan_cohorts(&devices, &RolloutOptions::default());

    assert_eq!(cohorts.len(), 3);
    assert_eq!(cohorts[0].id, "canary");
    assert_eq!(cohorts[0].device_ids, ids(&["d0"]));
    assert_eq!(cohorts[1].id, "wave");
    assert_eq!(cohorts[1].device_ids, ids(&["d1", "d2", "d3"]));
    assert_eq!(cohorts[2].id, "full");
    assert_eq!(cohorts[2].device_ids.len(), 6);
    assert_eq!(
        cohorts.iter().map(|c| c.stage_order).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
}

#[test]
fn test_plan_cohorts_drops_empty_stages() {
    let cohorts = plan_cohorts(&ids(&["d0"]), &RolloutOptions::default());
    assert_eq!(cohorts.len(), 1);
    assert_eq!(cohorts[0].id, "canary");
}

#[tokio::test]
async fn test_all_cohorts_pass() {
    let devices = ["cam-1", "cam-2", "cam-3"];
    let adapter = Arc::new(MockAdapter::new(Duration::ZERO));
    let controller = controller(
        adapter.clone(),
        &devices,
        Arc::new(AutoApprove),
        RolloutOptions::default(),
    )
    .await;

    let graph = graph(devices.iter().map(|d| enable_task(d, "motion_detection")).collect());
    let cohorts = plan_cohorts(&graph.device_ids(), &RolloutOptions::default());
    assert_eq!(cohorts.len(), 3);

    let report = controller.stage(&graph, &cohorts, None).await.unwrap();

    assert!(report.completed);
    assert_eq!(report.overall_success_ratio, 1.0);
    assert!(report.cohorts.iter().all(|c| c.dispatched));
    assert!(report.failures.is_empty());
    for device in devices {
        assert_eq!(adapter.invocations_for(device), 1);
    }
}

#[tokio::test]
async fn test_canary_failure_halts_before_later_cohorts() {
    let devices = ["cam-1", "cam-2", "cam-3"];
    let adapter = Arc::new(MockAdapter::new(Duration::ZERO));
    adapter.fail_next(
        "cam-1",
        &Operation::EnableFeature {
            capability_id: "motion_detection".to_string(),
        },
        vec![InvokeError::rejected("bad value")],
    );

    let controller = controller(
        adapter.clone(),
        &devices,
        Arc::new(AutoApprove),
        RolloutOptions::default(),
    )
    .await;

    let graph = graph(devices.iter().map(|d| enable_task(d, "motion_detection")).collect());
    let cohorts = plan_cohorts(&graph.device_ids(), &RolloutOptions::default());

    let report = controller.stage(&graph, &cohorts, None).await.unwrap();

    assert!(!report.completed);
    assert!(report.cohorts[0].dispatched);
    assert!(!report.cohorts[1].dispatched);
    assert!(!report.cohorts[2].dispatched);
    assert_eq!(report.cohorts[0].failed, 1);
    // Only the canary device was ever touched
    assert_eq!(adapter.invocations_for("cam-2"), 0);
    assert_eq!(adapter.invocations_for("cam-3"), 0);
}

#[tokio::test]
async fn test_approval_abort_halts_rollout() {
    let devices = ["cam-1", "cam-2", "cam-3"];
    let adapter = Arc::new(MockAdapter::new(Duration::ZERO));
    let controller = controller(
        adapter.clone(),
        &devices,
        Arc::new(AbortBefore {
            cohort_id: "wave".to_string(),
        }),
        RolloutOptions::default(),
    )
    .await;

    let graph = graph(devices.iter().map(|d| enable_task(d, "motion_detection")).collect());
    let cohorts = plan_cohorts(&graph.device_ids(), &RolloutOptions::default());

    let report = controller.stage(&graph, &cohorts, None).await.unwrap();

    assert!(!report.completed);
    assert!(report.cohorts[0].dispatched);
    assert!(!report.cohorts[1].dispatched);
    assert_eq!(adapter.invocations_for("cam-1"), 1);
    assert_eq!(adapter.invocations_for("cam-2"), 0);
}

#[tokio::test]
async fn test_rollback_on_halt_reverts_completed_cohorts() {
    let devices = ["cam-1", "cam-2", "cam-3"];
    let adapter = Arc::new(MockAdapter::new(Duration::ZERO));
    adapter.fail_next(
        "cam-2",
        &Operation::EnableFeature {
            capability_id: "motion_detection".to_string(),
        },
        vec![InvokeError::rejected("bad value")],
    );

    let options = RolloutOptions {
        rollback_on_halt: true,
        ..RolloutOptions::default()
    };
    let controller = controller(adapter.clone(), &devices, Arc::new(AutoApprove), options.clone()).await;

    let graph = graph(devices.iter().map(|d| enable_task(d, "motion_detection")).collect());
    let cohorts = plan_cohorts(&graph.device_ids(), &options);

    let report = controller.stage(&graph, &cohorts, None).await.unwrap();

    assert!(!report.completed);
    // The canary device's enable was reverted
    assert_eq!(
        adapter.invoked_ops("cam-1"),
        vec!["enable motion_detection", "disable motion_detection"]
    );
    assert_eq!(report.cohorts[0].rolled_back, 1);
    assert_eq!(report.cohorts[1].failed, 1);
    assert_eq!(adapter.invocations_for("cam-3"), 0);

    let rolled_back = report
        .failures
        .iter()
        .filter(|f| f.outcome == Outcome::RolledBack)
        .count();
    assert_eq!(rolled_back, 1);
}

#[tokio::test]
async fn test_staged_intent_routes_through_cohorts() {
    let devices = ["cam-1", "cam-2", "cam-3"];
    let adapter = Arc::new(MockAdapter::new(Duration::ZERO));
    adapter.fail_next(
        "cam-1",
        &Operation::EnableFeature {
            capability_id: "motion_detection".to_string(),
        },
        vec![InvokeError::rejected("bad value")],
    );

    let controller = controller(
        adapter.clone(),
        &devices,
        Arc::new(AutoApprove),
        RolloutOptions::default(),
    )
    .await;

    let graph = graph(devices.iter().map(|d| enable_task(d, "motion_detection")).collect());
    let report = controller
        .execute(&enable_intent(true), &graph, None)
        .await
        .unwrap();

    // The canary failure keeps the later cohorts from ever dispatching
    assert_eq!(report.cohorts.len(), 3);
    assert_eq!(report.cohorts[0].cohort_id, "canary");
    assert!(!report.completed);
    assert_eq!(adapter.invocations_for("cam-2"), 0);
    assert_eq!(adapter.invocations_for("cam-3"), 0);
}

#[tokio::test]
async fn test_unstaged_intent_runs_whole_graph_at_once() {
    let devices = ["cam-1", "cam-2", "cam-3"];
    let adapter = Arc::new(MockAdapter::new(Duration::ZERO));
    adapter.fail_next(
        "cam-1",
        &Operation::EnableFeature {
            capability_id: "motion_detection".to_string(),
        },
        vec![InvokeError::rejected("bad value")],
    );

    let controller = controller(
        adapter.clone(),
        &devices,
        Arc::new(AutoApprove),
        RolloutOptions::default(),
    )
    .await;

    let graph = graph(devices.iter().map(|d| enable_task(d, "motion_detection")).collect());
    let report = controller
        .execute(&enable_intent(false), &graph, None)
        .await
        .unwrap();

    // One cohort covering everything; a failing device never gates the
    // others
    assert_eq!(report.cohorts.len(), 1);
    assert_eq!(report.cohorts[0].cohort_id, "all");
    assert!(report.completed);
    assert_eq!(report.cohorts[0].failed, 1);
    assert_eq!(report.cohorts[0].succeeded, 2);
    for device in ["cam-2", "cam-3"] {
        assert_eq!(adapter.invocations_for(device), 1);
    }
}

#[tokio::test]
async fn test_overlapping_cohorts_rejected() {
    let devices = ["cam-1", "cam-2"];
    let adapter = Arc::new(MockAdapter::new(Duration::ZERO));
    let controller = controller(
        adapter.clone(),
        &devices,
        Arc::new(AutoApprove),
        RolloutOptions::default(),
    )
    .await;

    let graph = graph(devices.iter().map(|d| enable_task(d, "motion_detection")).collect());
    let cohorts = vec![
        Cohort {
            id: "canary".to_string(),
            device_ids: ids(&["cam-1", "cam-2"]),
            stage_order: 0,
        },
        Cohort {
            id: "full".to_string(),
            device_ids: ids(&["cam-2"]),
            stage_order: 1,
        },
    ];

    assert!(controller.stage(&graph, &cohorts, None).await.is_err());
    assert_eq!(adapter.invocations.lock().unwrap().len(), 0);
}
