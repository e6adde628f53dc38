//! Shared test fixtures

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use camfleet::audit::LogSink;
use camfleet::engine::adapter::{DeviceAdapter, ErrorClassifier, InvokeError};
use camfleet::engine::{EngineOptions, ExecutionEngine};
use camfleet::errors::OrchestratorError;
use camfleet::inventory::DeviceInventory;
use camfleet::models::capability::Capability;
use camfleet::models::device::{Device, DeviceStatus};
use camfleet::models::report::{ExecutionResult, Outcome};
use camfleet::models::task::{Operation, Task, TaskGraph};
use camfleet::registry::CapabilitySource;
use camfleet::utils::CooldownOptions;

/// One recorded adapter call with its wall-clock interval
pub struct Invocation {
    pub device_id: String,
    pub operation: Operation,
    pub start: Instant,
    pub end: Instant,
}

/// Scriptable in-memory device adapter.
///
/// Calls succeed unless failures were queued for the exact
/// (device, operation) pair. Every call is recorded with its interval,
/// and concurrent calls against one device are counted as violations.
pub struct MockAdapter {
    delay: Duration,
    scripts: Mutex<HashMap<String, VecDeque<InvokeError>>>,
    pub invocations: Mutex<Vec<Invocation>>,
    active: Mutex<HashSet<String>>,
    pub overlap_violations: AtomicUsize,
}

impl MockAdapter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            scripts: Mutex::new(HashMap::new()),
            invocations: Mutex::new(Vec::new()),
            active: Mutex::new(HashSet::new()),
            overlap_violations: AtomicUsize::new(0),
        }
    }

    fn key(device_id: &str, operation: &Operation) -> String {
        format!("{}|{}", device_id, operation)
    }

    /// Queue failures for the next invocations of an operation
    pub fn fail_next(&self, device_id: &str, operation: &Operation, errors: Vec<InvokeError>) {
        let mut scripts = self.scripts.lock().unwrap();
        scripts
            .entry(Self::key(device_id, operation))
            .or_default()
            .extend(errors);
    }

    /// Number of calls made against a device
    pub fn invocations_for(&self, device_id: &str) -> usize {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.device_id == device_id)
            .count()
    }

    /// Operations invoked on a device, in call order
    pub fn invoked_ops(&self, device_id: &str) -> Vec<String> {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.device_id == device_id)
            .map(|i| i.operation.to_string())
            .collect()
    }
}

#[async_trait]
impl DeviceAdapter for MockAdapter {
    async fn invoke(&self, device_id: &str, operation: &Operation) -> Result<(), InvokeError> {
        let newly_active = self.active.lock().unwrap().insert(device_id.to_string());
        if !newly_active {
            self.overlap_violations.fetch_add(1, Ordering::SeqCst);
        }

        let start = Instant::now();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts
                .get_mut(&Self::key(device_id, operation))
                .and_then(|q| q.pop_front())
            {
                Some(err) => Err(err),
                None => Ok(()),
            }
        };

        self.invocations.lock().unwrap().push(Invocation {
            device_id: device_id.to_string(),
            operation: operation.clone(),
            start,
            end: Instant::now(),
        });
        self.active.lock().unwrap().remove(device_id);
        result
    }
}

/// Capability source with scriptable per-model answers
pub struct ScriptedSource {
    caps: Mutex<HashMap<String, Vec<Capability>>>,
    fail_models: Mutex<HashSet<String>>,
    pub lookups: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            caps: Mutex::new(HashMap::new()),
            fail_models: Mutex::new(HashSet::new()),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn set_caps(&self, model: &str, caps: Vec<Capability>) {
        self.caps.lock().unwrap().insert(model.to_string(), caps);
    }

    pub fn fail_model(&self, model: &str) {
        self.fail_models.lock().unwrap().insert(model.to_string());
    }
}

#[async_trait]
impl CapabilitySource for ScriptedSource {
    async fn lookup(
        &self,
        model: &str,
        _firmware_version: &str,
    ) -> Result<Vec<Capability>, OrchestratorError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_models.lock().unwrap().contains(model) {
            return Err(OrchestratorError::DeviceUnreachable(model.to_string()));
        }
        Ok(self
            .caps
            .lock()
            .unwrap()
            .get(model)
            .cloned()
            .unwrap_or_default())
    }
}

/// Engine options tuned for fast tests
pub fn fast_options() -> EngineOptions {
    EngineOptions {
        concurrency_limit: 4,
        max_retries: 3,
        backoff: CooldownOptions {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        },
        failure_threshold: 0.5,
        invoke_timeout: Duration::from_secs(2),
    }
}

/// Inventory with reachable devices of one model
pub async fn seeded_inventory(device_ids: &[&str]) -> Arc<DeviceInventory> {
    let inventory = Arc::new(DeviceInventory::new());
    for (i, id) in device_ids.iter().enumerate() {
        let mut device = Device::new(*id, format!("192.0.2.{}", i + 10), "AXIS P3265-LV", "10.12.4");
        device.status = DeviceStatus::Reachable;
        inventory.upsert(device).await;
    }
    inventory
}

/// Engine over the mock adapter with default classification and a log
/// audit sink
pub fn engine_for(
    adapter: Arc<MockAdapter>,
    inventory: Arc<DeviceInventory>,
    options: EngineOptions,
) -> ExecutionEngine {
    ExecutionEngine::new(
        adapter,
        ErrorClassifier::default(),
        Arc::new(LogSink),
        inventory,
        options,
    )
}

/// Enable-feature task whose rollback disables the feature
pub fn enable_task(device: &str, capability_id: &str) -> Task {
    let mut task = Task::new(
        device,
        Operation::EnableFeature {
            capability_id: capability_id.to_string(),
        },
    );
    task.rollback_op = Some(Operation::DisableFeature {
        capability_id: capability_id.to_string(),
    });
    task
}

/// Set-parameter task with an optional rollback to the prior value
pub fn set_task(device: &str, name: &str, value: &str, prior: Option<&str>) -> Task {
    let mut task = Task::new(
        device,
        Operation::SetParameter {
            name: name.to_string(),
            value: value.to_string(),
        },
    );
    task.rollback_op = prior.map(|p| Operation::SetParameter {
        name: name.to_string(),
        value: p.to_string(),
    });
    task
}

pub fn graph(tasks: Vec<Task>) -> TaskGraph {
    TaskGraph {
        tasks,
        excluded: vec![],
    }
}

/// Fold a result stream down to the last outcome per task
pub fn last_outcomes(results: &[ExecutionResult]) -> HashMap<String, Outcome> {
    let mut out = HashMap::new();
    for result in results {
        out.insert(result.task_id.clone(), result.outcome);
    }
    out
}

/// Capability with declared parameters
pub fn capability_with_params(id: &str, params: &[&str]) -> Capability {
    let mut capability = Capability::new(id, id.replace('_', " "));
    for name in params {
        capability.parameters.insert(
            name.to_string(),
            camfleet::models::capability::ParameterType::Int,
        );
    }
    capability
}
