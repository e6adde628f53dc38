//! Device inventory
//!
//! Arena-style table of devices keyed by id. Status changes go through
//! [`DeviceInventory::transition`], which enforces the device state
//! machine; only the execution engine calls it for devices it is
//! operating on.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use crate::errors::OrchestratorError;
use crate::models::device::{Device, DeviceId, DeviceStatus};

/// Shared device table
#[derive(Default)]
pub struct DeviceInventory {
    devices: RwLock<HashMap<DeviceId, Device>>,
}

impl DeviceInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a device
    pub async fn upsert(&self, device: Device) {
        let mut devices = self.devices.write().await;
        devices.insert(device.id.clone(), device);
    }

    /// Fetch a device by id
    pub async fn get(&self, device_id: &DeviceId) -> Result<Device, OrchestratorError> {
        let devices = self.devices.read().await;
        devices
            .get(device_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::DeviceNotFound(device_id.clone()))
    }

    /// Snapshot of every device
    pub async fn all(&self) -> Vec<Device> {
        let devices = self.devices.read().await;
        devices.values().cloned().collect()
    }

    /// Number of devices
    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    /// True when the inventory holds no devices
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Transition a device's status, rejecting moves the device state
    /// machine does not allow.
    pub async fn transition(
        &self,
        device_id: &DeviceId,
        next: DeviceStatus,
    ) -> Result<(), OrchestratorError> {
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| OrchestratorError::DeviceNotFound(device_id.clone()))?;

        let ok = matches!(
            (device.status, next),
            (DeviceStatus::Unknown, DeviceStatus::Reachable)
                | (DeviceStatus::Unknown, DeviceStatus::Unreachable)
                | (DeviceStatus::Reachable, DeviceStatus::Configuring)
                | (DeviceStatus::Reachable, DeviceStatus::Unreachable)
                | (DeviceStatus::Unreachable, DeviceStatus::Reachable)
                | (DeviceStatus::Configuring, DeviceStatus::Configured)
                | (DeviceStatus::Configuring, DeviceStatus::Failed)
                | (DeviceStatus::Configuring, DeviceStatus::Unreachable)
                | (DeviceStatus::Configured, DeviceStatus::Configuring)
                | (DeviceStatus::Configured, DeviceStatus::Unreachable)
                | (DeviceStatus::Failed, DeviceStatus::Configuring)
                | (DeviceStatus::Failed, DeviceStatus::Reachable)
        );

        if !ok {
            return Err(OrchestratorError::ValidationError(format!(
                "invalid device transition for {}: {:?} -> {:?}",
                device_id, device.status, next
            )));
        }

        debug!(device_id = %device_id, from = ?device.status, to = ?next, "device transition");
        device.status = next;
        Ok(())
    }

    /// Record the observed value of a device parameter.
    ///
    /// Called by the engine after a successful `SetParameter`, and by
    /// discovery when it reads current values off a device.
    pub async fn record_parameter(
        &self,
        device_id: &DeviceId,
        name: &str,
        value: &str,
    ) -> Result<(), OrchestratorError> {
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| OrchestratorError::DeviceNotFound(device_id.clone()))?;
        device.parameters.insert(name.to_string(), value.to_string());
        Ok(())
    }
}
