//! Camera Fleet Orchestrator
//!
//! Turns structured operator intents into dependency-aware task graphs
//! and executes them against heterogeneous camera fleets with staged
//! rollout, retry and rollback.

pub mod audit;
pub mod discovery;
pub mod engine;
pub mod errors;
pub mod http;
pub mod inventory;
pub mod logs;
pub mod models;
pub mod options;
pub mod planner;
pub mod registry;
pub mod report;
pub mod rollout;
pub mod secrets;
pub mod utils;
