//! Same-LAN overlay-member discovery by direct IP scan and a LAN-only
//! gossip topic (spec.md §4.4), grounded on the teacher's `nat.rs` bounded
//! concurrency pattern for probing candidate addresses.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use async_std::sync::Mutex;
use futures::stream::{self, StreamExt};
use libp2p::PeerId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::LocalScanConfig;
use crate::overlay_discovery::OverlayDiscovery;
use crate::runtime::{NetworkRuntime, RuntimeError};
use crate::types::unix_millis_now;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("no non-loopback ipv4 address found")]
    NoLocalAddress,
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

/// LAN-only gossip announcement (spec §4.4 secondary channel).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalAnnouncement {
    pub peer_id: String,
    pub overlay_id: String,
    pub crypto_ipv6: String,
    pub local_ip: String,
    pub ports_by_purpose: HashMap<String, u16>,
    pub stores: Vec<String>,
    pub ts: u64,
}

fn is_preferred_private(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    octets[0] == 192 && octets[1] == 168 || octets[0] == 10 || (octets[0] == 172 && octets[1] == 16)
}

/// Picks the local node's own non-loopback IPv4 address, preferring
/// `192.168.*`, `10.*`, `172.16.*` over any other private range.
pub fn pick_local_address(candidates: &[Ipv4Addr]) -> Option<Ipv4Addr> {
    candidates
        .iter()
        .find(|ip| is_preferred_private(ip))
        .or_else(|| candidates.iter().find(|ip| !ip.is_loopback()))
        .copied()
}

/// Derives the /24 subnet's host list (1..254), excluding `self_ip`.
pub fn subnet_hosts(self_ip: Ipv4Addr) -> Vec<Ipv4Addr> {
    let octets = self_ip.octets();
    (1..=254u8)
        .filter(|host| *host != octets[3])
        .map(|host| Ipv4Addr::new(octets[0], octets[1], octets[2], host))
        .collect()
}

pub struct LocalSubnetScanner<R: NetworkRuntime> {
    runtime: Arc<R>,
    config: LocalScanConfig,
}

impl<R: NetworkRuntime> LocalSubnetScanner<R> {
    pub fn new(runtime: Arc<R>, config: LocalScanConfig) -> Self {
        Self { runtime, config }
    }

    /// One full subnet sweep: probe every host on the fixed candidate-port
    /// list with bounded concurrency, handshake on connect, and admit
    /// members into the directory with `discovered_via = local_scan`.
    pub async fn scan_once(
        &self,
        self_ip: Ipv4Addr,
        discovery: &OverlayDiscovery<R>,
    ) -> Result<usize, ScanError> {
        let hosts = subnet_hosts(self_ip);
        let mut admitted = 0usize;
        let found = Arc::new(Mutex::new(Vec::new()));

        let probes: Vec<(Ipv4Addr, u16)> = hosts
            .into_iter()
            .flat_map(|host| {
                self.config
                    .candidate_ports
                    .iter()
                    .map(move |port| (host, *port))
            })
            .collect();

        // Bounded concurrency: at most `max_in_flight_probes` dials running
        // at once, any one of which must finish before a new probe starts
        // beyond the cap (spec §4.4).
        stream::iter(probes)
            .for_each_concurrent(self.config.max_in_flight_probes, |(host, port)| {
                let dial_timeout = Duration::from_millis(self.config.dial_timeout_ms);
                let found = found.clone();
                async move {
                    let addr_str = format!("/ip4/{host}/tcp/{port}");
                    let addr: libp2p::Multiaddr = match addr_str.parse() {
                        Ok(a) => a,
                        Err(_) => return,
                    };
                    let dialed =
                        async_std::future::timeout(dial_timeout, self.runtime.dial(&addr)).await;
                    if let Ok(Ok(connection)) = dialed {
                        if let Some(peer_id) = connection.remote_peer_id() {
                            found.lock().await.push(peer_id);
                        }
                    }
                }
            })
            .await;

        let found = Arc::try_unwrap(found).map(Mutex::into_inner).unwrap_or_default();
        for peer_id in found {
            let handshake_timeout = Duration::from_millis(self.config.handshake_timeout_ms);
            let outcome =
                async_std::future::timeout(handshake_timeout, discovery.handshake(&peer_id)).await;
            match outcome {
                Ok(Ok(true)) => {
                    discovery.admit_local_scan_member(&peer_id).await;
                    admitted += 1;
                }
                Ok(Ok(false)) | Ok(Err(_)) | Err(_) => {
                    self.runtime.hang_up(&peer_id).await;
                }
            }
        }

        Ok(admitted)
    }

    /// Periodic rescan loop, default every 5 minutes (spec §4.4).
    pub async fn run_rescan_loop(&self, self_ip: Ipv4Addr, discovery: &OverlayDiscovery<R>) {
        let interval = Duration::from_secs(self.config.rescan_interval_secs);
        loop {
            if let Err(err) = self.scan_once(self_ip, discovery).await {
                log::warn!("local_subnet_scanner: scan failed: {err}");
            }
            async_std::task::sleep(interval).await;
        }
    }

    /// Reacts to a received LAN announcement by dialing its advertised
    /// ports (capped at `announce_dial_attempts`, `announce_dial_timeout_ms`
    /// per attempt), admitting the peer on the first successful dial.
    pub async fn dial_announced_ports(
        &self,
        announcement: &LocalAnnouncement,
        discovery: &OverlayDiscovery<R>,
    ) -> bool {
        let mut attempts = 0;
        for port in announcement.ports_by_purpose.values() {
            if attempts >= self.config.announce_dial_attempts {
                break;
            }
            attempts += 1;
            let addr_str = format!("/ip4/{}/tcp/{}", announcement.local_ip, port);
            let addr: libp2p::Multiaddr = match addr_str.parse() {
                Ok(a) => a,
                Err(_) => continue,
            };
            let timeout = Duration::from_millis(self.config.announce_dial_timeout_ms);
            if let Ok(Ok(_)) = async_std::future::timeout(timeout, self.runtime.dial(&addr)).await {
                return discovery
                    .ingest_local_announcement(
                        announcement.peer_id.clone(),
                        &announcement.overlay_id,
                        announcement.crypto_ipv6.clone(),
                        announcement.stores.clone(),
                    )
                    .await;
            }
        }
        false
    }

    pub fn build_announcement(
        &self,
        self_peer_id: &PeerId,
        overlay_id: &str,
        crypto_ipv6: &str,
        local_ip: Ipv4Addr,
        ports_by_purpose: HashMap<String, u16>,
        stores: Vec<String>,
    ) -> LocalAnnouncement {
        LocalAnnouncement {
            peer_id: self_peer_id.to_string(),
            overlay_id: overlay_id.to_string(),
            crypto_ipv6: crypto_ipv6.to_string(),
            local_ip: local_ip.to_string(),
            ports_by_purpose,
            stores,
            ts: unix_millis_now(),
        }
    }
}
