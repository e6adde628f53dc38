//! VAPIX device adapter
//!
//! Talks to Axis-style cameras over HTTP: `basicdeviceinfo.cgi` for
//! identification, `param.cgi` for configuration writes and the
//! `openapi.json` probe for capability hints. Credentials are resolved
//! from the secrets manager here and nowhere else.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::engine::adapter::{DeviceAdapter, InvokeError};
use crate::errors::OrchestratorError;
use crate::inventory::DeviceInventory;
use crate::models::task::Operation;
use crate::secrets::{Credential, SecretsManager};

/// VAPIX adapter options
#[derive(Debug, Clone)]
pub struct VapixOptions {
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for VapixOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Identification read off a device
#[derive(Debug, Clone, Deserialize)]
pub struct VapixDeviceInfo {
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub firmware_version: Option<String>,

    #[serde(default)]
    pub hardware_id: Option<String>,
}

/// HTTP adapter for VAPIX devices
pub struct VapixAdapter {
    client: Client,
    inventory: Arc<DeviceInventory>,
    secrets: Arc<dyn SecretsManager>,
}

impl VapixAdapter {
    /// Create an adapter with its own HTTP client
    pub fn new(
        inventory: Arc<DeviceInventory>,
        secrets: Arc<dyn SecretsManager>,
        options: VapixOptions,
    ) -> Result<Self, OrchestratorError> {
        let client = Client::builder().timeout(options.request_timeout).build()?;
        Ok(Self {
            client,
            inventory,
            secrets,
        })
    }

    /// Resolve the credential for a device or address key
    fn credential(&self, key: &str) -> Result<Credential, OrchestratorError> {
        let handle = self.secrets.handle(&key.to_string())?;
        self.secrets.resolve(&handle)
    }

    /// GET a VAPIX path with basic auth
    async fn get(
        &self,
        address: &str,
        credential_key: &str,
        path: &str,
    ) -> Result<reqwest::Response, InvokeError> {
        let credential = self
            .credential(credential_key)
            .map_err(|e| InvokeError::new("unauthorized", e.to_string()))?;

        let url = format!("http://{}{}", address, path);
        debug!("GET {}", url);

        self.client
            .get(&url)
            .basic_auth(
                &credential.username,
                Some(credential.password.expose_secret()),
            )
            .send()
            .await
            .map_err(map_reqwest_error)
    }

    /// Read model/firmware identification from a device
    pub async fn fetch_device_info(
        &self,
        address: &str,
    ) -> Result<VapixDeviceInfo, OrchestratorError> {
        let response = self
            .get(address, address, "/axis-cgi/basicdeviceinfo.cgi")
            .await
            .map_err(|e| OrchestratorError::DeviceUnreachable(format!("{}: {}", address, e)))?;

        if !response.status().is_success() {
            return Err(OrchestratorError::DeviceUnreachable(format!(
                "{}: HTTP {}",
                address,
                response.status()
            )));
        }

        Ok(response.json().await?)
    }

    /// Best-effort capability hints from the device's OpenAPI listing.
    ///
    /// Older firmware has no `openapi.json`; that is not an error, it
    /// just yields no hints.
    pub async fn probe_capabilities(&self, address: &str) -> BTreeSet<String> {
        let response = match self.get(address, address, "/axis-cgi/openapi.json").await {
            Ok(r) if r.status().is_success() => r,
            Ok(_) | Err(_) => return BTreeSet::new(),
        };

        let doc: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(address = %address, "unparseable openapi listing: {}", e);
                return BTreeSet::new();
            }
        };

        let mut capabilities = BTreeSet::new();
        if let Some(paths) = doc.get("paths").and_then(|p| p.as_object()) {
            for path in paths.keys() {
                if path.contains("analytics") {
                    capabilities.insert("analytics_api".to_string());
                }
                if path.contains("motion") {
                    capabilities.insert("motion_detection".to_string());
                }
                if path.contains("audio") {
                    capabilities.insert("audio_api".to_string());
                }
            }
        }
        capabilities
    }
}

#[async_trait]
impl DeviceAdapter for VapixAdapter {
    async fn invoke(&self, device_id: &str, operation: &Operation) -> Result<(), InvokeError> {
        let device = self
            .inventory
            .get(&device_id.to_string())
            .await
            .map_err(|e| InvokeError::new("unknown-device", e.to_string()))?;

        let query = match operation {
            Operation::EnableFeature { capability_id } => {
                format!("action=update&{}.Enabled=yes", param_group(capability_id))
            }
            Operation::DisableFeature { capability_id } => {
                format!("action=update&{}.Enabled=no", param_group(capability_id))
            }
            Operation::SetParameter { name, value } => {
                let encoded: String =
                    url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
                format!("action=update&{}={}", name, encoded)
            }
        };

        let response = self
            .get(
                &device.address,
                device_id,
                &format!("/axis-cgi/param.cgi?{}", query),
            )
            .await?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(InvokeError::new(
                "unauthorized",
                format!("HTTP {}", response.status()),
            )),
            StatusCode::BAD_REQUEST => Err(InvokeError::rejected(
                response.text().await.unwrap_or_default(),
            )),
            s => Err(InvokeError::new(
                format!("http-{}", s.as_u16()),
                response.text().await.unwrap_or_default(),
            )),
        }
    }
}

/// VAPIX parameter group for a capability id
/// (e.g. "motion_detection" -> "MotionDetection")
fn param_group(capability_id: &str) -> String {
    capability_id
        .split('_')
        .map(|seg| {
            let mut chars = seg.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Map transport failures onto invoke error codes
fn map_reqwest_error(error: reqwest::Error) -> InvokeError {
    if error.is_timeout() {
        InvokeError::timeout(error.to_string())
    } else if error.is_connect() {
        InvokeError::unreachable(error.to_string())
    } else {
        InvokeError::new("network-error", error.to_string())
    }
}
