//! Audit records for executed operations
//!
//! One record per execution result, fire-and-forget: a sink failure is
//! logged and never aborts execution.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::OrchestratorError;
use crate::models::report::{ExecutionResult, Outcome};

/// One audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub task_id: String,
    pub device_id: String,
    pub operation: String,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    /// Build a record from an execution result
    pub fn from_result(result: &ExecutionResult) -> Self {
        Self {
            task_id: result.task_id.clone(),
            device_id: result.device_id.clone(),
            operation: result.operation.to_string(),
            outcome: result.outcome,
            timestamp: result.finished_at,
        }
    }
}

/// Audit sink boundary
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record one audit entry
    async fn record(&self, record: AuditRecord) -> Result<(), OrchestratorError>;
}

/// Sink that writes audit records to the tracing log
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl AuditSink for LogSink {
    async fn record(&self, record: AuditRecord) -> Result<(), OrchestratorError> {
        info!(
            task_id = %record.task_id,
            device_id = %record.device_id,
            operation = %record.operation,
            outcome = ?record.outcome,
            "audit"
        );
        Ok(())
    }
}
