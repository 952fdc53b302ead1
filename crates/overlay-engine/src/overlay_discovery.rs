//! Overlay-filtered peer discovery over DHT, gossip, and protocol handshake
//! (spec.md §4.3), grounded on the teacher's `discovery.rs` bucket/query
//! pattern and `relay.rs`'s peer-directory bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_std::sync::RwLock;
use libp2p::PeerId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::NodeConfig;
use crate::protocol::{IdentifyRequest, IdentifyResponse, PeerInfoRequest, PeerInfoResponse};
use crate::runtime::{NetworkRuntime, RuntimeError};
use crate::types::{unix_millis_now, Capabilities, DiscoverySource, PeerRecord};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("handshake timed out")]
    HandshakeTimeout,
}

/// Self-record payload published under the namespaced DHT peer key
/// (spec §4.3 channel 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhtPeerRecord {
    pub peer_id: String,
    pub crypto_ipv6: String,
    pub stores: Vec<String>,
    pub capabilities: Capabilities,
    pub multiaddrs: Vec<String>,
    pub ts: u64,
}

/// Gossip announcement payload for the four overlay-scoped topics
/// (spec §4.3 channel 2). Rejected unless `overlay_id` matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipAnnouncement {
    pub overlay_id: String,
    pub peer_id: String,
    pub crypto_ipv6: String,
    pub stores: Vec<String>,
    pub capabilities: Capabilities,
    pub multiaddrs: Vec<String>,
}

/// In-memory directory of verified overlay members (spec §4.3).
#[derive(Default)]
struct Directory {
    peers: HashMap<String, PeerRecord>,
}

/// Populates and serves the overlay peer directory across the three
/// discovery channels named in spec §4.3 (DHT registration, gossip
/// announcements, protocol handshake); existing-connection filtering is
/// driven by the caller via `filter_existing_connections`.
pub struct OverlayDiscovery<R: NetworkRuntime> {
    runtime: Arc<R>,
    config: NodeConfig,
    protocol_version: String,
    directory: RwLock<Directory>,
}

impl<R: NetworkRuntime> OverlayDiscovery<R> {
    /// `protocol_version` is this node's own `Capabilities::protocol_version`,
    /// sent as-is in the `/dig/1.0.0` identification request (spec §6).
    pub fn new(runtime: Arc<R>, config: NodeConfig, protocol_version: String) -> Self {
        Self {
            runtime,
            config,
            protocol_version,
            directory: RwLock::new(Directory::default()),
        }
    }

    /// Channel 1: publish this node's self-record under the namespaced
    /// DHT key. Called on start and every `dht_republish_interval_secs`.
    pub async fn publish_self_record(
        &self,
        self_record: &DhtPeerRecord,
    ) -> Result<(), DiscoveryError> {
        let key = self.config.dht_peer_key(&self_record.peer_id);
        let payload = serde_json::to_vec(self_record).unwrap_or_default();
        match self.runtime.dht_put(&key, payload).await {
            Ok(()) => Ok(()),
            Err(err) => {
                // Discovery-layer channel errors never abort discovery
                // (spec §4.5 propagation policy extends to §4.3 channels).
                log::warn!("overlay_discovery: dht_put failed for {key}: {err}");
                Ok(())
            }
        }
    }

    /// Background republish loop; exits when `stop` resolves.
    pub async fn run_republish_loop(&self, self_record_fn: impl Fn() -> DhtPeerRecord) {
        let interval = Duration::from_secs(self.config.discovery.dht_republish_interval_secs);
        loop {
            let record = self_record_fn();
            let _ = self.publish_self_record(&record).await;
            async_std::task::sleep(interval).await;
        }
    }

    /// Channel 2: admit a gossip announcement. Returns `true` if the
    /// directory was updated. Payloads without the matching overlay
    /// identifier are rejected and never update the directory.
    pub async fn ingest_gossip_announcement(&self, announcement: GossipAnnouncement) -> bool {
        if announcement.overlay_id != self.config.overlay_identifier {
            log::debug!(
                "overlay_discovery: rejected gossip announcement from {} (overlay_id mismatch)",
                announcement.peer_id
            );
            return false;
        }
        self.upsert(
            announcement.peer_id,
            announcement.crypto_ipv6,
            announcement.stores,
            announcement.capabilities,
            announcement.multiaddrs,
            DiscoverySource::GossipAnnouncement,
            true,
        )
        .await;
        true
    }

    /// Channel 1 consumer: admit a DHT query result the same way a gossip
    /// announcement is admitted, since both are self-asserted payloads
    /// published only by overlay members under namespaced keys.
    pub async fn ingest_dht_record(&self, record: DhtPeerRecord) {
        self.upsert(
            record.peer_id,
            record.crypto_ipv6,
            record.stores,
            record.capabilities,
            record.multiaddrs,
            DiscoverySource::DhtNamespace,
            true,
        )
        .await;
    }

    /// Channel 3: the `/dig/1.0.0` identification handshake. Admits the
    /// peer iff it responds with the matching overlay id and an explicit
    /// membership flag before `handshake_timeout_ms` elapses.
    pub async fn handshake(&self, peer: &PeerId) -> Result<bool, DiscoveryError> {
        let request = IdentifyRequest::new(
            self.config.overlay_identifier.clone(),
            self.protocol_version.clone(),
        );
        let timeout = Duration::from_millis(self.config.discovery.handshake_timeout_ms);
        let request_bytes = serde_json::to_vec(&request).unwrap_or_default();

        let call = self
            .runtime
            .dial_protocol(peer, &self.config.protocol_id, request_bytes);

        let outcome = async_std::future::timeout(timeout, call).await;
        let response_bytes = match outcome {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(err)) => {
                log::debug!("overlay_discovery: handshake with {peer} failed: {err}");
                return Ok(false);
            }
            Err(_) => return Err(DiscoveryError::HandshakeTimeout),
        };

        let response: IdentifyResponse = match serde_json::from_slice(&response_bytes) {
            Ok(r) => r,
            Err(_) => return Ok(false),
        };

        let is_member =
            response.network_id == self.config.overlay_identifier && response.is_dig_node;

        if is_member {
            self.touch_last_seen(&peer.to_string()).await;
        }

        Ok(is_member)
    }

    /// Channel 4 (spec §4.4 secondary LAN gossip): admits a peer whose
    /// self-asserted LAN announcement matched the overlay id and whose
    /// advertised ports were successfully dialed. Returns `true` if the
    /// directory was updated.
    pub async fn ingest_local_announcement(
        &self,
        peer_id: String,
        overlay_id: &str,
        crypto_ipv6: String,
        stores: Vec<String>,
    ) -> bool {
        if overlay_id != self.config.overlay_identifier {
            log::debug!("overlay_discovery: rejected local announcement from {peer_id} (overlay_id mismatch)");
            return false;
        }
        self.upsert(
            peer_id,
            crypto_ipv6,
            stores,
            Capabilities::default(),
            Vec::new(),
            DiscoverySource::LocalAnnouncement,
            true,
        )
        .await;
        true
    }

    /// Admits a peer discovered by direct dial (local subnet scan) once its
    /// handshake has confirmed membership — unlike the DHT/gossip/peer-info
    /// channels, a local scan has no self-asserted payload to upsert from.
    /// An already-known peer is only touched, never blanked back to a
    /// minimal record; a new one starts minimal and fills in via a later
    /// `fetch_peer_info`.
    pub async fn admit_local_scan_member(&self, peer: &PeerId) {
        let peer_id = peer.to_string();
        if peer_id == self.runtime.self_peer_id().to_string() {
            return;
        }
        let mut directory = self.directory.write().await;
        let record = directory.peers.entry(peer_id.clone()).or_insert_with(|| PeerRecord {
            peer_id,
            crypto_ipv6: String::new(),
            stores: Vec::new(),
            capabilities: Capabilities::default(),
            multiaddrs: Default::default(),
            last_seen_unix_ms: 0,
            discovered_via: DiscoverySource::LocalScan,
            verified: true,
        });
        record.last_seen_unix_ms = unix_millis_now();
        record.verified = true;
    }

    /// `GET_PEER_INFO` — fills in a directory entry's capabilities/stores
    /// once membership is confirmed but the entry is otherwise incomplete
    /// (spec.md §6's peer-info exchange; not itself an admission channel).
    pub async fn fetch_peer_info(&self, peer: &PeerId) -> Result<PeerInfoResponse, DiscoveryError> {
        let request = PeerInfoRequest {
            requested_info: vec![
                "crypto_ipv6".to_string(),
                "stores".to_string(),
                "capabilities".to_string(),
            ],
        };
        let timeout = Duration::from_millis(self.config.discovery.handshake_timeout_ms);
        let request_bytes = serde_json::to_vec(&request).unwrap_or_default();
        let call = self
            .runtime
            .dial_protocol(peer, &self.config.protocol_id, request_bytes);

        let response_bytes = match async_std::future::timeout(timeout, call).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(err)) => return Err(DiscoveryError::Runtime(err)),
            Err(_) => return Err(DiscoveryError::HandshakeTimeout),
        };
        let response: PeerInfoResponse = serde_json::from_slice(&response_bytes)
            .unwrap_or_else(|_| PeerInfoResponse::unavailable());

        if response.success {
            self.upsert(
                peer.to_string(),
                response.crypto_ipv6.clone(),
                response.stores.clone(),
                response.capabilities.clone(),
                Vec::new(),
                DiscoverySource::ProtocolVerification,
                true,
            )
            .await;
        }

        Ok(response)
    }

    /// Channel 4: existing-connection filtering. Every already-connected
    /// peer from the underlying transport is handshake-tested; non-members
    /// are disconnected unless on the infra allow-list.
    pub async fn filter_existing_connections(&self) -> Result<(), DiscoveryError> {
        let peers = self.runtime.get_peers().await;
        for peer in peers {
            let peer_str = peer.to_string();
            if self.config.is_infra_peer(&peer_str) {
                continue;
            }
            let is_member = self.handshake(&peer).await.unwrap_or(false);
            if !is_member {
                log::info!("overlay_discovery: disconnecting non-member {peer_str}");
                self.runtime.hang_up(&peer).await;
            }
        }
        Ok(())
    }

    async fn upsert(
        &self,
        peer_id: String,
        crypto_ipv6: String,
        stores: Vec<String>,
        capabilities: Capabilities,
        multiaddrs: Vec<String>,
        discovered_via: DiscoverySource,
        verified: bool,
    ) {
        if peer_id == self.runtime.self_peer_id().to_string() {
            return;
        }
        let mut directory = self.directory.write().await;
        let record = directory
            .peers
            .entry(peer_id.clone())
            .or_insert_with(|| PeerRecord {
                peer_id: peer_id.clone(),
                crypto_ipv6: crypto_ipv6.clone(),
                stores: stores.clone(),
                capabilities: capabilities.clone(),
                multiaddrs: Default::default(),
                last_seen_unix_ms: 0,
                discovered_via,
                verified,
            });
        record.crypto_ipv6 = crypto_ipv6;
        record.stores = stores;
        record.capabilities = capabilities;
        record.multiaddrs.extend(multiaddrs);
        record.last_seen_unix_ms = unix_millis_now();
        record.verified = record.verified || verified;
    }

    async fn touch_last_seen(&self, peer_id: &str) {
        let mut directory = self.directory.write().await;
        if let Some(record) = directory.peers.get_mut(peer_id) {
            let now = unix_millis_now();
            if now > record.last_seen_unix_ms {
                record.last_seen_unix_ms = now;
            }
            record.verified = true;
        }
    }

    pub async fn get_all(&self) -> Vec<PeerRecord> {
        self.directory.read().await.peers.values().cloned().collect()
    }

    pub async fn get_by_store(&self, store_id: &str) -> Vec<PeerRecord> {
        self.directory
            .read()
            .await
            .peers
            .values()
            .filter(|r| r.advertises_store(store_id))
            .cloned()
            .collect()
    }

    pub async fn get_turn_capable(&self) -> Vec<PeerRecord> {
        self.directory
            .read()
            .await
            .peers
            .values()
            .filter(|r| r.is_turn_capable())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::tests_support::FakeRuntime;

    fn caps() -> Capabilities {
        Capabilities::default()
    }

    #[async_std::test]
    async fn gossip_announcement_with_wrong_overlay_id_is_rejected() {
        let runtime = Arc::new(FakeRuntime::new());
        let discovery = OverlayDiscovery::new(runtime, NodeConfig::default(), "1.0.0".to_string());
        let announcement = GossipAnnouncement {
            overlay_id: "not-dig-mainnet".to_string(),
            peer_id: "peer1".to_string(),
            crypto_ipv6: "fd00::1".to_string(),
            stores: vec![],
            capabilities: caps(),
            multiaddrs: vec![],
        };
        let admitted = discovery.ingest_gossip_announcement(announcement).await;
        assert!(!admitted);
        assert!(discovery.get_all().await.is_empty());
    }

    #[async_std::test]
    async fn matching_gossip_announcement_populates_directory() {
        let runtime = Arc::new(FakeRuntime::new());
        let discovery = OverlayDiscovery::new(runtime, NodeConfig::default(), "1.0.0".to_string());
        let announcement = GossipAnnouncement {
            overlay_id: "dig-mainnet".to_string(),
            peer_id: "peer1".to_string(),
            crypto_ipv6: "fd00::1".to_string(),
            stores: vec!["storeA".to_string()],
            capabilities: caps(),
            multiaddrs: vec!["/ip4/1.2.3.4/tcp/4001".to_string()],
        };
        let admitted = discovery.ingest_gossip_announcement(announcement).await;
        assert!(admitted);
        let all = discovery.get_all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].discovered_via, DiscoverySource::GossipAnnouncement);

        let by_store = discovery.get_by_store("storeA").await;
        assert_eq!(by_store.len(), 1);
    }

    #[async_std::test]
    async fn self_peer_id_is_never_admitted() {
        let runtime = Arc::new(FakeRuntime::new());
        let self_id = runtime.self_peer_id().to_string();
        let discovery = OverlayDiscovery::new(runtime, NodeConfig::default(), "1.0.0".to_string());
        let announcement = GossipAnnouncement {
            overlay_id: "dig-mainnet".to_string(),
            peer_id: self_id,
            crypto_ipv6: "fd00::1".to_string(),
            stores: vec![],
            capabilities: caps(),
            multiaddrs: vec![],
        };
        discovery.ingest_gossip_announcement(announcement).await;
        assert!(discovery.get_all().await.is_empty());
    }

    #[async_std::test]
    async fn handshake_admits_matching_overlay_member() {
        let runtime = Arc::new(FakeRuntime::new());
        let peer = FakeRuntime::fixed_peer_id();
        runtime.set_handshake_response(IdentifyResponse {
            network_id: "dig-mainnet".to_string(),
            is_dig_node: true,
        });
        let discovery = OverlayDiscovery::new(runtime, NodeConfig::default(), "1.0.0".to_string());
        let admitted = discovery.handshake(&peer).await.unwrap();
        assert!(admitted);
    }

    #[async_std::test]
    async fn handshake_rejects_mismatched_overlay_id() {
        let runtime = Arc::new(FakeRuntime::new());
        let peer = FakeRuntime::fixed_peer_id();
        runtime.set_handshake_response(IdentifyResponse {
            network_id: "some-other-network".to_string(),
            is_dig_node: true,
        });
        let discovery = OverlayDiscovery::new(runtime, NodeConfig::default(), "1.0.0".to_string());
        let admitted = discovery.handshake(&peer).await.unwrap();
        assert!(!admitted);
    }

    #[async_std::test]
    async fn fetch_peer_info_surfaces_runtime_error_with_no_response_configured() {
        let runtime = Arc::new(FakeRuntime::new());
        let peer = FakeRuntime::fixed_peer_id();
        let discovery = OverlayDiscovery::new(runtime, NodeConfig::default(), "1.0.0".to_string());
        let result = discovery.fetch_peer_info(&peer).await;
        assert!(result.is_err());
    }
}
