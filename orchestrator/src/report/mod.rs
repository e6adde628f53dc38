//! Result aggregation
//!
//! Pure fold over the execution result stream. Calling it twice on the
//! same stream produces the same report; it never mutates task or
//! device state.

use std::collections::HashMap;

use crate::models::report::{
    Cohort, CohortSummary, DeploymentReport, ExecutionResult, FailureDetail, Outcome,
};

/// Fold a result stream and cohort metadata into a deployment report.
///
/// The stream is append-only; a task appearing more than once (rolled
/// back after succeeding) counts by its last outcome.
pub fn aggregate(results: &[ExecutionResult], cohorts: &[Cohort]) -> DeploymentReport {
    let mut last: HashMap<&str, &ExecutionResult> = HashMap::new();
    for result in results {
        last.insert(result.task_id.as_str(), result);
    }

    let mut device_cohort: HashMap<&str, &str> = HashMap::new();
    for cohort in cohorts {
        for device_id in &cohort.device_ids {
            device_cohort.insert(device_id.as_str(), cohort.id.as_str());
        }
    }

    let mut ordered: Vec<&Cohort> = cohorts.iter().collect();
    ordered.sort_by_key(|c| c.stage_order);

    let mut summaries = Vec::with_capacity(ordered.len());
    for cohort in &ordered {
        let mut summary = CohortSummary {
            cohort_id: cohort.id.clone(),
            stage_order: cohort.stage_order,
            dispatched: false,
            total: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            rolled_back: 0,
            success_ratio: 1.0,
        };

        for result in last.values() {
            if device_cohort.get(result.device_id.as_str()) != Some(&cohort.id.as_str()) {
                continue;
            }
            summary.dispatched = true;
            summary.total += 1;
            match result.outcome {
                Outcome::Succeeded => summary.succeeded += 1,
                Outcome::Failed => summary.failed += 1,
                Outcome::Skipped => summary.skipped += 1,
                Outcome::RolledBack => summary.rolled_back += 1,
            }
        }

        summary.success_ratio = success_ratio(summary.succeeded, summary.total, summary.skipped);
        summaries.push(summary);
    }

    let (succeeded, total, skipped) = summaries.iter().fold((0, 0, 0), |(s, t, k), c| {
        (s + c.succeeded, t + c.total, k + c.skipped)
    });

    let mut failures: Vec<FailureDetail> = last
        .values()
        .filter(|r| matches!(r.outcome, Outcome::Failed | Outcome::RolledBack))
        .map(|r| FailureDetail {
            task_id: r.task_id.clone(),
            device_id: r.device_id.clone(),
            operation: r.operation.clone(),
            outcome: r.outcome,
            error: r.error.clone(),
        })
        .collect();
    failures.sort_by(|a, b| a.task_id.cmp(&b.task_id));

    DeploymentReport {
        overall_success_ratio: success_ratio(succeeded, total, skipped),
        completed: summaries.iter().all(|c| c.dispatched),
        cohorts: summaries,
        failures,
    }
}

/// succeeded / (total - skipped); 1.0 when nothing was attempted
fn success_ratio(succeeded: usize, total: usize, skipped: usize) -> f64 {
    let attempted = total.saturating_sub(skipped);
    if attempted == 0 {
        1.0
    } else {
        succeeded as f64 / attempted as f64
    }
}
