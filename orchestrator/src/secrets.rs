//! Credential handles for device access
//!
//! Planning and execution only ever see opaque [`CredentialHandle`]s.
//! The device adapter resolves a handle to a usable credential at call
//! time, so raw passwords never enter plan or intent context.

use std::collections::HashMap;
use std::sync::RwLock;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::models::device::DeviceId;

/// Opaque reference to a stored credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialHandle(String);

impl CredentialHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A resolved device credential; the password stays wrapped until the
/// HTTP call is built
pub struct Credential {
    pub username: String,
    pub password: SecretString,
}

/// Credential store boundary.
///
/// `handle` is safe to call anywhere; `resolve` is called only by the
/// device adapter.
pub trait SecretsManager: Send + Sync {
    /// Get the handle for a device's credential
    fn handle(&self, device_id: &DeviceId) -> Result<CredentialHandle, OrchestratorError>;

    /// Resolve a handle to a usable credential
    fn resolve(&self, handle: &CredentialHandle) -> Result<Credential, OrchestratorError>;
}

/// In-memory secrets manager for tests and demos.
///
/// Real deployments sit this trait on top of an external store; the
/// cryptography of that store is out of scope here.
#[derive(Default)]
pub struct StaticSecrets {
    entries: RwLock<HashMap<String, (String, String)>>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a credential for a device
    pub fn insert(
        &self,
        device_id: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(device_id.into(), (username.into(), password.into()));
    }
}

impl SecretsManager for StaticSecrets {
    fn handle(&self, device_id: &DeviceId) -> Result<CredentialHandle, OrchestratorError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        if entries.contains_key(device_id) {
            Ok(CredentialHandle::new(device_id.clone()))
        } else {
            Err(OrchestratorError::CredentialError(format!(
                "no credential for device {}",
                device_id
            )))
        }
    }

    fn resolve(&self, handle: &CredentialHandle) -> Result<Credential, OrchestratorError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let (username, password) = entries.get(handle.as_str()).ok_or_else(|| {
            OrchestratorError::CredentialError(format!(
                "unknown credential handle {}",
                handle.as_str()
            ))
        })?;
        Ok(Credential {
            username: username.clone(),
            password: SecretString::from(password.clone()),
        })
    }
}
