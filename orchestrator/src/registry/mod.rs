//! Capability registry
//!
//! Caches per-device capability snapshots fetched from the knowledge
//! base. Reads never block on a refresh: an expired entry is served with
//! a staleness flag unless the caller forces a refresh. A refresh swaps
//! in a whole new snapshot for the device; there is no partial merge.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::errors::OrchestratorError;
use crate::models::capability::Capability;
use crate::models::device::{Device, DeviceId};

/// Registry options
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// How long a snapshot stays fresh
    pub ttl: Duration,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
        }
    }
}

/// Upstream capability source (knowledge base)
#[async_trait]
pub trait CapabilitySource: Send + Sync {
    /// Capabilities of a (model, firmware) combination
    async fn lookup(
        &self,
        model: &str,
        firmware_version: &str,
    ) -> Result<Vec<Capability>, OrchestratorError>;
}

/// One cached snapshot; immutable once stored
#[derive(Debug, Clone)]
pub struct CapabilitySnapshot {
    /// Capabilities known for the device
    pub capabilities: Vec<Capability>,

    /// When the snapshot was fetched
    pub fetched_at: DateTime<Utc>,
}

impl CapabilitySnapshot {
    /// Look up one capability by id
    pub fn capability(&self, capability_id: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.id == capability_id)
    }
}

/// A snapshot handed to a reader, with its staleness flag
#[derive(Debug, Clone)]
pub struct CachedCapabilities {
    pub snapshot: Arc<CapabilitySnapshot>,
    pub stale: bool,
}

/// In-memory capability registry
pub struct CapabilityRegistry {
    source: Arc<dyn CapabilitySource>,
    options: RegistryOptions,
    entries: RwLock<HashMap<DeviceId, Arc<CapabilitySnapshot>>>,
}

impl CapabilityRegistry {
    /// Create a registry backed by the given source
    pub fn new(source: Arc<dyn CapabilitySource>, options: RegistryOptions) -> Self {
        Self {
            source,
            options,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Get the cached snapshot for a device.
    ///
    /// Fails with `DeviceNotFound` when the device was never refreshed.
    /// An expired entry is still returned, flagged stale.
    pub async fn get(&self, device_id: &DeviceId) -> Result<CachedCapabilities, OrchestratorError> {
        let entries = self.entries.read().await;
        let snapshot = entries
            .get(device_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::DeviceNotFound(device_id.clone()))?;

        let age = Utc::now().signed_duration_since(snapshot.fetched_at);
        let stale = age.to_std().map(|a| a > self.options.ttl).unwrap_or(false);
        if stale {
            debug!(device_id = %device_id, "serving stale capability snapshot");
        }

        Ok(CachedCapabilities { snapshot, stale })
    }

    /// Fetch a fresh snapshot from the source and swap it in.
    ///
    /// Fails with `DeviceUnreachable` when the source cannot answer for
    /// this device; the previous snapshot (if any) is left untouched.
    pub async fn refresh(&self, device: &Device) -> Result<CachedCapabilities, OrchestratorError> {
        let capabilities = self
            .source
            .lookup(&device.model, &device.firmware_version)
            .await
            .map_err(|e| {
                warn!(device_id = %device.id, "capability lookup failed: {}", e);
                OrchestratorError::DeviceUnreachable(device.id.clone())
            })?;

        let snapshot = Arc::new(CapabilitySnapshot {
            capabilities,
            fetched_at: Utc::now(),
        });

        // Atomic swap: the whole entry is replaced under the write lock
        let mut entries = self.entries.write().await;
        entries.insert(device.id.clone(), snapshot.clone());

        Ok(CachedCapabilities {
            snapshot,
            stale: false,
        })
    }

    /// Get a fresh-enough snapshot, refreshing when the entry is
    /// missing, expired, or when the caller forces it.
    pub async fn get_or_refresh(
        &self,
        device: &Device,
        force: bool,
    ) -> Result<CachedCapabilities, OrchestratorError> {
        if !force {
            if let Ok(cached) = self.get(&device.id).await {
                if !cached.stale {
                    return Ok(cached);
                }
            }
        }
        self.refresh(device).await
    }

    /// Drop a device's snapshot
    pub async fn evict(&self, device_id: &DeviceId) {
        let mut entries = self.entries.write().await;
        entries.remove(device_id);
    }

    /// Number of cached snapshots
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// True when nothing is cached
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
