//! Device adapter boundary
//!
//! The engine talks to physical devices only through [`DeviceAdapter`];
//! protocol details live behind it. Errors carry a code that the
//! configured [`ErrorClassifier`] maps to transient or permanent.

use std::collections::BTreeSet;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::task::Operation;

/// Error returned by a device invocation
#[derive(Error, Debug, Clone)]
#[error("{code}: {message}")]
pub struct InvokeError {
    /// Stable error code used for retry classification
    pub code: String,

    /// Human-readable detail
    pub message: String,
}

impl InvokeError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Timeout waiting for the device
    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new("network-timeout", detail)
    }

    /// Device did not accept the connection
    pub fn unreachable(detail: impl Into<String>) -> Self {
        Self::new("unreachable", detail)
    }

    /// Device rejected the parameter value
    pub fn rejected(detail: impl Into<String>) -> Self {
        Self::new("rejected-parameter", detail)
    }
}

/// Sole channel to physical devices
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    /// Apply one operation to one device
    async fn invoke(&self, device_id: &str, operation: &Operation) -> Result<(), InvokeError>;
}

/// Retry classification of an invocation error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying with backoff
    Transient,

    /// Fails the task immediately
    Permanent,
}

/// Configured predicate mapping error codes to a retry class.
///
/// Unlisted codes are transient: network-style failures are the common
/// case for devices that drop off and come back.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    permanent_codes: BTreeSet<String>,
}

impl ErrorClassifier {
    /// Classifier with an explicit permanent-code list
    pub fn new(permanent_codes: impl IntoIterator<Item = String>) -> Self {
        Self {
            permanent_codes: permanent_codes.into_iter().collect(),
        }
    }

    /// Classify one invocation error
    pub fn classify(&self, error: &InvokeError) -> ErrorClass {
        if self.permanent_codes.contains(&error.code) {
            ErrorClass::Permanent
        } else {
            ErrorClass::Transient
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(
            [
                "rejected-parameter",
                "unsupported-operation",
                "unauthorized",
                "bad-request",
            ]
            .into_iter()
            .map(String::from),
        )
    }
}
