//! Aggregated configuration options
//!
//! Thresholds, retry counts and gates are configuration inputs with
//! defaults, never hardcoded behavior.

use crate::engine::EngineOptions;
use crate::http::vapix::VapixOptions;
use crate::logs::LogOptions;
use crate::planner::PlannerOptions;
use crate::registry::RegistryOptions;
use crate::rollout::RolloutOptions;

/// Main orchestrator options
#[derive(Debug, Clone, Default)]
pub struct OrchestratorOptions {
    /// Capability registry options
    pub registry: RegistryOptions,

    /// Plan builder options
    pub planner: PlannerOptions,

    /// Execution engine options
    pub engine: EngineOptions,

    /// Rollout controller options
    pub rollout: RolloutOptions,

    /// VAPIX adapter options
    pub vapix: VapixOptions,

    /// Logging options
    pub logs: LogOptions,
}
