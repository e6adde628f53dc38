//! Fleet discovery using pure async TCP probing plus VAPIX
//! identification.
//!
//! No external binaries (nmap, ping) are required. Concurrency is
//! bounded by a semaphore to avoid flooding the network interface.
//! Discovery is best-effort throughout: hosts that do not respond are
//! skipped, never fatal.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use ipnet::Ipv4Net;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::http::vapix::VapixAdapter;
use crate::models::device::{Device, DeviceStatus};

/// Ports probed on each candidate host; VAPIX devices answer on HTTP(S)
const PROBE_PORTS: &[u16] = &[80, 443];

/// Max concurrent TCP probes to avoid overwhelming the local network
const MAX_CONCURRENT: usize = 64;

/// Per-probe timeout
const PROBE_TIMEOUT_MS: u64 = 500;

/// Scan all hosts in `cidr` (e.g. `"192.168.1.0/24"`) and return the
/// addresses that accepted a connection on a VAPIX port.
pub async fn scan_subnet(cidr: &str) -> Vec<String> {
    let net: Ipv4Net = match cidr.parse() {
        Ok(n) => n,
        Err(e) => {
            warn!("Invalid CIDR {}: {}", cidr, e);
            return vec![];
        }
    };

    let hosts: Vec<IpAddr> = net.hosts().map(IpAddr::V4).collect();
    info!("Scanning {} hosts in {}", hosts.len(), cidr);

    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT));
    let mut handles = Vec::with_capacity(hosts.len());

    for ip in hosts {
        let sem = Arc::clone(&semaphore);
        handles.push(tokio::spawn(async move {
            let _permit = sem.acquire().await.ok()?;
            if probe_ports(ip).await.is_empty() {
                return None;
            }
            Some(ip.to_string())
        }));
    }

    let mut results = Vec::new();
    for outcome in futures::future::join_all(handles).await {
        if let Ok(Some(address)) = outcome {
            debug!("Found candidate device at {}", address);
            results.push(address);
        }
    }
    results
}

/// Identify a single candidate host over VAPIX.
///
/// Returns `None` when identification fails; the reason is logged.
pub async fn identify_device(vapix: &VapixAdapter, address: &str) -> Option<Device> {
    let info = match vapix.fetch_device_info(address).await {
        Ok(info) => info,
        Err(e) => {
            debug!(address = %address, "device identification failed: {}", e);
            return None;
        }
    };

    let mut device = Device::new(
        info.hardware_id.unwrap_or_else(|| address.to_string()),
        address,
        info.model.unwrap_or_else(|| "Unknown".to_string()),
        info.firmware_version.unwrap_or_else(|| "0".to_string()),
    );
    device.capabilities = vapix.probe_capabilities(address).await;
    device.status = DeviceStatus::Reachable;
    Some(device)
}

/// Scan a subnet and identify every responding device
pub async fn discover_subnet(vapix: &VapixAdapter, cidr: &str) -> Vec<Device> {
    let mut devices = Vec::new();
    for address in scan_subnet(cidr).await {
        if let Some(device) = identify_device(vapix, &address).await {
            info!(device_id = %device.id, model = %device.model, "discovered device");
            devices.push(device);
        }
    }
    devices
}

/// Try each probe port with a short timeout, returning the open ones
async fn probe_ports(ip: IpAddr) -> Vec<u16> {
    let mut open = Vec::new();
    for &port in PROBE_PORTS {
        let addr = SocketAddr::new(ip, port);
        let connect = TcpStream::connect(addr);
        if let Ok(Ok(_)) =
            tokio::time::timeout(Duration::from_millis(PROBE_TIMEOUT_MS), connect).await
        {
            open.push(port);
        }
    }
    open
}
