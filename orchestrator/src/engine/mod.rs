//! Execution engine
//!
//! Walks a task graph and dispatches operations through the device
//! adapter. Tasks become eligible once every dependency has succeeded;
//! eligible tasks run concurrently up to the configured limit, but a
//! device never has two operations in flight at once. Transient
//! failures retry with exponential backoff. A device that fails past
//! the configured threshold has its remaining tasks cancelled and its
//! succeeded tasks rolled back in reverse completion order.

pub mod adapter;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::audit::{AuditRecord, AuditSink};
use crate::engine::adapter::{DeviceAdapter, ErrorClass, ErrorClassifier, InvokeError};
use crate::errors::OrchestratorError;
use crate::inventory::DeviceInventory;
use crate::models::device::{DeviceId, DeviceStatus};
use crate::models::report::{ExecutionResult, Outcome};
use crate::models::task::{Operation, Task, TaskGraph, TaskStatus};
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Engine options
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Maximum tasks in flight across all devices
    pub concurrency_limit: usize,

    /// Retries allowed per task on top of the first attempt
    pub max_retries: u32,

    /// Backoff between retries
    pub backoff: CooldownOptions,

    /// Per-device failed-task fraction that triggers cancellation and
    /// rollback; strictly-greater comparison
    pub failure_threshold: f64,

    /// Upper bound on a single adapter invocation
    pub invoke_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            concurrency_limit: 4,
            max_retries: 3,
            backoff: CooldownOptions::default(),
            failure_threshold: 0.5,
            invoke_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of one spawned attempt sequence
struct Completion {
    idx: usize,
    attempts: u32,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    latency: Duration,
    result: Result<(), InvokeError>,
}

/// Per-run scheduler state
struct RunState {
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
    ready_tick: Vec<Option<u64>>,
    tick: u64,
    running: usize,
    device_total: HashMap<DeviceId, usize>,
    device_failed: HashMap<DeviceId, usize>,
    device_succeeded: HashMap<DeviceId, Vec<usize>>,
    device_busy: HashSet<DeviceId>,
    device_cancelled: HashSet<DeviceId>,
    device_started: HashSet<DeviceId>,
}

impl RunState {
    fn new(graph: TaskGraph) -> Result<Self, OrchestratorError> {
        for task in &graph.tasks {
            if task.status != TaskStatus::Pending {
                return Err(OrchestratorError::ValidationError(format!(
                    "task {} is {:?}, expected pending",
                    task.id, task.status
                )));
            }
        }

        let index = graph
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect();
        let mut device_total: HashMap<DeviceId, usize> = HashMap::new();
        for task in &graph.tasks {
            *device_total.entry(task.device_id.clone()).or_default() += 1;
        }
        let len = graph.tasks.len();

        Ok(Self {
            tasks: graph.tasks,
            index,
            ready_tick: vec![None; len],
            tick: 0,
            running: 0,
            device_total,
            device_failed: HashMap::new(),
            device_succeeded: HashMap::new(),
            device_busy: HashSet::new(),
            device_cancelled: HashSet::new(),
            device_started: HashSet::new(),
        })
    }

    fn all_terminal(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    fn deps_succeeded(&self, idx: usize) -> bool {
        self.tasks[idx].depends_on.iter().all(|dep| {
            self.index
                .get(dep)
                .map(|&d| self.tasks[d].status == TaskStatus::Succeeded)
                .unwrap_or(false)
        })
    }

    fn dep_blocked(&self, idx: usize) -> bool {
        self.tasks[idx].depends_on.iter().any(|dep| {
            self.index
                .get(dep)
                .map(|&d| {
                    matches!(
                        self.tasks[d].status,
                        TaskStatus::Failed | TaskStatus::Skipped | TaskStatus::RolledBack
                    )
                })
                .unwrap_or(true)
        })
    }
}

/// Walks task graphs against the device adapter
pub struct ExecutionEngine {
    adapter: Arc<dyn DeviceAdapter>,
    classifier: ErrorClassifier,
    audit: Arc<dyn AuditSink>,
    inventory: Arc<DeviceInventory>,
    options: EngineOptions,
}

impl ExecutionEngine {
    /// Create an engine
    pub fn new(
        adapter: Arc<dyn DeviceAdapter>,
        classifier: ErrorClassifier,
        audit: Arc<dyn AuditSink>,
        inventory: Arc<DeviceInventory>,
        options: EngineOptions,
    ) -> Self {
        Self {
            adapter,
            classifier,
            audit,
            inventory,
            options,
        }
    }

    /// Run a graph to completion and collect the result stream.
    ///
    /// Every task reaches exactly one terminal state before this
    /// returns; rolled-back tasks contribute a second, superseding
    /// record.
    pub async fn run(
        &self,
        graph: TaskGraph,
        abort: Option<watch::Receiver<bool>>,
    ) -> Result<Vec<ExecutionResult>, OrchestratorError> {
        let (tx, mut rx) = mpsc::channel(64);
        let run_fut = self.run_streamed(graph, tx, abort);
        let collect_fut = async move {
            let mut results = Vec::new();
            while let Some(result) = rx.recv().await {
                results.push(result);
            }
            results
        };

        let (run_res, results) = tokio::join!(run_fut, collect_fut);
        run_res?;
        Ok(results)
    }

    /// Run a graph, emitting each result on `results_tx` as it becomes
    /// terminal.
    pub async fn run_streamed(
        &self,
        graph: TaskGraph,
        results_tx: mpsc::Sender<ExecutionResult>,
        abort: Option<watch::Receiver<bool>>,
    ) -> Result<(), OrchestratorError> {
        graph.validate()?;

        let mut st = RunState::new(graph)?;
        info!(tasks = st.tasks.len(), devices = st.device_total.len(), "execution run starting");

        let (completion_tx, mut completion_rx) = mpsc::channel::<Completion>(st.tasks.len().max(1));

        // Keep a sender alive when the caller passed no abort handle, so
        // the watch never reports closed
        let (_abort_guard, mut abort_rx) = match abort {
            Some(rx) => (None, rx),
            None => {
                let (tx, rx) = watch::channel(false);
                (Some(tx), rx)
            }
        };

        let mut aborted = *abort_rx.borrow();
        let mut watch_open = true;

        loop {
            self.mark_skips(&mut st, aborted, &results_tx).await?;
            if !aborted {
                self.dispatch(&mut st, &completion_tx, &abort_rx).await?;
            }
            st.tick += 1;

            if st.running == 0 {
                if st.all_terminal() {
                    break;
                }
                if aborted {
                    continue;
                }
                return Err(OrchestratorError::ExecutionError(
                    "scheduler stalled with non-terminal tasks".to_string(),
                ));
            }

            tokio::select! {
                changed = abort_rx.changed(), if watch_open && !aborted => {
                    match changed {
                        Ok(()) => {
                            if *abort_rx.borrow() {
                                info!("abort requested; in-flight tasks run to completion");
                                aborted = true;
                            }
                        }
                        Err(_) => watch_open = false,
                    }
                }
                completion = completion_rx.recv() => {
                    match completion {
                        Some(c) => self.handle_completion(&mut st, c, &results_tx).await?,
                        None => {
                            return Err(OrchestratorError::Internal(
                                "completion channel closed".to_string(),
                            ));
                        }
                    }
                }
            }
        }

        // An aborted run reverts what already succeeded, per device in
        // reverse completion order
        if aborted {
            let device_ids: Vec<DeviceId> = st.device_succeeded.keys().cloned().collect();
            for device_id in device_ids {
                self.rollback_device(&mut st, &device_id, &results_tx).await?;
            }
        }

        self.finalize_device_statuses(&st).await;
        info!("execution run finished");
        Ok(())
    }

    /// Mark pending tasks whose dependency failed, whose device was
    /// cancelled, or that belong to an aborted run. Runs to fixpoint so
    /// skip chains propagate.
    async fn mark_skips(
        &self,
        st: &mut RunState,
        aborted: bool,
        results_tx: &mpsc::Sender<ExecutionResult>,
    ) -> Result<(), OrchestratorError> {
        loop {
            let mut to_skip = Vec::new();
            for idx in 0..st.tasks.len() {
                if st.tasks[idx].status != TaskStatus::Pending {
                    continue;
                }
                let blocked = aborted
                    || st.device_cancelled.contains(&st.tasks[idx].device_id)
                    || st.dep_blocked(idx);
                if blocked {
                    to_skip.push(idx);
                }
            }
            if to_skip.is_empty() {
                return Ok(());
            }
            for idx in to_skip {
                st.tasks[idx]
                    .transition(TaskStatus::Skipped)
                    .map_err(OrchestratorError::Internal)?;
                let result = instant_result(&st.tasks[idx], Outcome::Skipped, None);
                self.emit(results_tx, result).await;
            }
        }
    }

    /// Dispatch eligible tasks, earliest-eligible first, insertion order
    /// as the tie-break.
    async fn dispatch(
        &self,
        st: &mut RunState,
        completion_tx: &mpsc::Sender<Completion>,
        abort_rx: &watch::Receiver<bool>,
    ) -> Result<(), OrchestratorError> {
        for idx in 0..st.tasks.len() {
            if st.tasks[idx].status == TaskStatus::Pending
                && st.ready_tick[idx].is_none()
                && st.deps_succeeded(idx)
            {
                st.ready_tick[idx] = Some(st.tick);
            }
        }

        let mut candidates: Vec<usize> = (0..st.tasks.len())
            .filter(|&idx| {
                st.tasks[idx].status == TaskStatus::Pending
                    && st.ready_tick[idx].is_some()
                    && !st.device_cancelled.contains(&st.tasks[idx].device_id)
            })
            .collect();
        candidates.sort_by_key(|&idx| (st.ready_tick[idx], idx));

        for idx in candidates {
            if st.running >= self.options.concurrency_limit {
                break;
            }
            let device_id = st.tasks[idx].device_id.clone();
            if st.device_busy.contains(&device_id) {
                continue;
            }

            if st.device_started.insert(device_id.clone()) {
                self.mark_device(&device_id, DeviceStatus::Configuring).await;
            }

            st.tasks[idx]
                .transition(TaskStatus::Running)
                .map_err(OrchestratorError::Internal)?;
            st.device_busy.insert(device_id.clone());
            st.running += 1;

            debug!(task_id = %st.tasks[idx].id, device_id = %device_id, op = %st.tasks[idx].operation, "dispatching task");

            let adapter = Arc::clone(&self.adapter);
            let classifier = self.classifier.clone();
            let backoff = self.options.backoff.clone();
            let invoke_timeout = self.options.invoke_timeout;
            let max_retries = self.options.max_retries;
            let operation = st.tasks[idx].operation.clone();
            let abort = abort_rx.clone();
            let tx = completion_tx.clone();

            tokio::spawn(async move {
                let completion = run_attempts(
                    adapter,
                    classifier,
                    backoff,
                    invoke_timeout,
                    max_retries,
                    idx,
                    device_id,
                    operation,
                    abort,
                )
                .await;
                let _ = tx.send(completion).await;
            });
        }

        Ok(())
    }

    /// Fold one completion back into the scheduler state
    async fn handle_completion(
        &self,
        st: &mut RunState,
        c: Completion,
        results_tx: &mpsc::Sender<ExecutionResult>,
    ) -> Result<(), OrchestratorError> {
        st.running -= 1;
        let device_id = st.tasks[c.idx].device_id.clone();
        st.device_busy.remove(&device_id);

        match c.result {
            Ok(()) => {
                st.tasks[c.idx]
                    .transition(TaskStatus::Succeeded)
                    .map_err(OrchestratorError::Internal)?;
                if let Operation::SetParameter { name, value } = &st.tasks[c.idx].operation {
                    if let Err(e) = self.inventory.record_parameter(&device_id, name, value).await {
                        debug!(device_id = %device_id, "parameter not recorded: {}", e);
                    }
                }
                st.device_succeeded
                    .entry(device_id.clone())
                    .or_default()
                    .push(c.idx);
                let result = completion_result(&st.tasks[c.idx], Outcome::Succeeded, None, &c);
                self.emit(results_tx, result).await;
            }
            Err(ref e) => {
                st.tasks[c.idx]
                    .transition(TaskStatus::Failed)
                    .map_err(OrchestratorError::Internal)?;
                *st.device_failed.entry(device_id.clone()).or_default() += 1;
                let result =
                    completion_result(&st.tasks[c.idx], Outcome::Failed, Some(e.to_string()), &c);
                self.emit(results_tx, result).await;

                let failed = st.device_failed[&device_id] as f64;
                let total = st.device_total[&device_id] as f64;
                if failed / total > self.options.failure_threshold
                    && !st.device_cancelled.contains(&device_id)
                {
                    warn!(
                        device_id = %device_id,
                        failed,
                        total,
                        "failure threshold exceeded, cancelling device and rolling back"
                    );
                    st.device_cancelled.insert(device_id.clone());
                    self.rollback_device(st, &device_id, results_tx).await?;
                }
            }
        }

        Ok(())
    }

    /// Best-effort rollback of a device's succeeded tasks, newest first.
    /// A rollback failure is recorded on the emitted record and never
    /// re-triggers rollback.
    async fn rollback_device(
        &self,
        st: &mut RunState,
        device_id: &DeviceId,
        results_tx: &mpsc::Sender<ExecutionResult>,
    ) -> Result<(), OrchestratorError> {
        let stack = st.device_succeeded.remove(device_id).unwrap_or_default();
        for idx in stack.into_iter().rev() {
            let error = match st.tasks[idx].rollback_op.clone() {
                Some(op) => {
                    debug!(task_id = %st.tasks[idx].id, device_id = %device_id, op = %op, "rolling back");
                    match timeout(self.options.invoke_timeout, self.adapter.invoke(device_id, &op))
                        .await
                    {
                        Ok(Ok(())) => None,
                        Ok(Err(e)) => Some(e.to_string()),
                        Err(_) => Some("network-timeout: rollback timed out".to_string()),
                    }
                }
                None => Some("no rollback operation".to_string()),
            };

            if let Some(ref e) = error {
                warn!(task_id = %st.tasks[idx].id, device_id = %device_id, "rollback failure: {}", e);
            }

            st.tasks[idx]
                .transition(TaskStatus::RolledBack)
                .map_err(OrchestratorError::Internal)?;
            let result = instant_result(&st.tasks[idx], Outcome::RolledBack, error);
            self.emit(results_tx, result).await;
        }
        Ok(())
    }

    /// Revert succeeded tasks of an already-finished run.
    ///
    /// Used by the rollout controller when a halt explicitly requests
    /// rolling back completed cohorts. Returns the superseding records.
    pub async fn rollback_results(
        &self,
        graph: &TaskGraph,
        results: &[ExecutionResult],
    ) -> Vec<ExecutionResult> {
        let mut last: HashMap<&str, &ExecutionResult> = HashMap::new();
        for result in results {
            last.insert(result.task_id.as_str(), result);
        }

        let mut by_device: HashMap<&str, Vec<&ExecutionResult>> = HashMap::new();
        for result in last.values().copied() {
            if result.outcome == Outcome::Succeeded {
                by_device
                    .entry(result.device_id.as_str())
                    .or_default()
                    .push(result);
            }
        }

        let mut emitted = Vec::new();
        let mut device_ids: Vec<&str> = by_device.keys().copied().collect();
        device_ids.sort_unstable();

        for device_id in device_ids {
            let mut device_results = by_device.remove(device_id).unwrap_or_default();
            device_results.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));

            for prior in device_results {
                let Some(task) = graph.task(&prior.task_id) else {
                    continue;
                };
                let error = match task.rollback_op.clone() {
                    Some(op) => {
                        match timeout(
                            self.options.invoke_timeout,
                            self.adapter.invoke(device_id, &op),
                        )
                        .await
                        {
                            Ok(Ok(())) => None,
                            Ok(Err(e)) => Some(e.to_string()),
                            Err(_) => Some("network-timeout: rollback timed out".to_string()),
                        }
                    }
                    None => Some("no rollback operation".to_string()),
                };

                if let Some(ref e) = error {
                    warn!(task_id = %task.id, device_id = %device_id, "rollback failure: {}", e);
                }

                let result = instant_result(task, Outcome::RolledBack, error);
                let record = AuditRecord::from_result(&result);
                if let Err(e) = self.audit.record(record).await {
                    warn!("audit sink failure: {}", e);
                }
                emitted.push(result);
            }
        }

        emitted
    }

    /// Send one result to the stream and the audit sink
    async fn emit(&self, results_tx: &mpsc::Sender<ExecutionResult>, result: ExecutionResult) {
        let record = AuditRecord::from_result(&result);
        if results_tx.send(result).await.is_err() {
            warn!("result receiver dropped");
        }
        if let Err(e) = self.audit.record(record).await {
            warn!("audit sink failure: {}", e);
        }
    }

    /// Best-effort device status transition
    async fn mark_device(&self, device_id: &DeviceId, status: DeviceStatus) {
        if let Err(e) = self.inventory.transition(device_id, status).await {
            debug!(device_id = %device_id, "device status not updated: {}", e);
        }
    }

    /// Settle device statuses once the run is over
    async fn finalize_device_statuses(&self, st: &RunState) {
        for device_id in st.device_total.keys() {
            let failed = st.device_failed.get(device_id).copied().unwrap_or(0);
            if failed > 0 || st.device_cancelled.contains(device_id) {
                self.mark_device(device_id, DeviceStatus::Failed).await;
                continue;
            }
            let all_succeeded = st
                .tasks
                .iter()
                .filter(|t| &t.device_id == device_id)
                .all(|t| t.status == TaskStatus::Succeeded);
            if all_succeeded {
                self.mark_device(device_id, DeviceStatus::Configured).await;
            }
        }
    }
}

/// Run the attempt/retry loop for one task off the coordinator
#[allow(clippy::too_many_arguments)]
async fn run_attempts(
    adapter: Arc<dyn DeviceAdapter>,
    classifier: ErrorClassifier,
    backoff: CooldownOptions,
    invoke_timeout: Duration,
    max_retries: u32,
    idx: usize,
    device_id: DeviceId,
    operation: Operation,
    abort: watch::Receiver<bool>,
) -> Completion {
    let started_at = Utc::now();
    let start = Instant::now();
    let attempts_allowed = max_retries.saturating_add(1);
    let mut attempt = 0u32;

    let result = loop {
        attempt += 1;
        let outcome = match timeout(invoke_timeout, adapter.invoke(&device_id, &operation)).await {
            Ok(r) => r,
            Err(_) => Err(InvokeError::timeout(format!(
                "no response within {:?}",
                invoke_timeout
            ))),
        };

        match outcome {
            Ok(()) => break Ok(()),
            Err(e) => {
                let transient = classifier.classify(&e) == ErrorClass::Transient;
                // Aborted runs finish the current call but do not retry
                if transient && attempt < attempts_allowed && !*abort.borrow() {
                    let delay = calc_exp_backoff(&backoff, attempt - 1);
                    debug!(
                        device_id = %device_id,
                        op = %operation,
                        attempt,
                        "transient failure, retrying in {:?}: {}",
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                break Err(e);
            }
        }
    };

    Completion {
        idx,
        attempts: attempt,
        started_at,
        finished_at: Utc::now(),
        latency: start.elapsed(),
        result,
    }
}

/// Result for a task that never ran (skip) or was rolled back
fn instant_result(task: &Task, outcome: Outcome, error: Option<String>) -> ExecutionResult {
    let now = Utc::now();
    ExecutionResult {
        task_id: task.id.clone(),
        device_id: task.device_id.clone(),
        operation: task.operation.clone(),
        outcome,
        error,
        attempts: 0,
        latency: Duration::ZERO,
        started_at: now,
        finished_at: now,
    }
}

/// Result for a task that ran through the adapter
fn completion_result(
    task: &Task,
    outcome: Outcome,
    error: Option<String>,
    c: &Completion,
) -> ExecutionResult {
    ExecutionResult {
        task_id: task.id.clone(),
        device_id: task.device_id.clone(),
        operation: task.operation.clone(),
        outcome,
        error,
        attempts: c.attempts,
        latency: c.latency,
        started_at: c.started_at,
        finished_at: c.finished_at,
    }
}
