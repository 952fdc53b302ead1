//! Typed, defaulted configuration for every tunable spec.md §6 names
//! wire-exact. Parsing an on-disk file is an external CLI's job (spec.md §1
//! excludes "configuration file parsing"); this module only owns the typed
//! value and convenience constructors from an already-read string.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Public relay multiaddress plus the peer id it carries, used for both
/// circuit-relay dialing and as a "keep-connected" infra allow-list entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayNode {
    pub multiaddr: String,
    pub peer_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GossipTopics {
    pub peer_announcements: String,
    pub store_announcements: String,
    pub capability_announcements: String,
    pub peer_discovery: String,
    pub local_network_discovery: String,
}

impl Default for GossipTopics {
    fn default() -> Self {
        Self {
            peer_announcements: "dig-network-peer-announcements-v1".to_string(),
            store_announcements: "dig-network-store-sharing-v1".to_string(),
            capability_announcements: "dig-network-capability-sharing-v1".to_string(),
            peer_discovery: "dig-network-peer-discovery-v1".to_string(),
            local_network_discovery: "dig-local-network-discovery".to_string(),
        }
    }
}

impl GossipTopics {
    /// The four overlay-scoped topics (spec §4.3 channel 2) that carry
    /// overlay-identifier-gated payloads, excluding the LAN-only topic
    /// which is neither namespace-scoped nor payload-gated.
    ///
    /// These strings are already wire-exact per spec §6 (e.g.
    /// `dig-network-peer-announcements-v1`) — §4.3's "prefixed with the
    /// overlay namespace" describes how the topic names were derived at
    /// the wire-format level, not a further runtime concatenation with the
    /// configured `overlay_namespace` value. Subscribing to
    /// `{overlay_namespace}-{topic}` would produce strings no other node
    /// on the network publishes to.
    pub fn overlay_scoped(&self) -> Vec<String> {
        vec![
            self.peer_announcements.clone(),
            self.store_announcements.clone(),
            self.capability_announcements.clone(),
            self.peer_discovery.clone(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortPolicy {
    pub http: u16,
    pub websocket: u16,
    pub libp2p_main: u16,
    pub turn: u16,
    pub range_start: u16,
    pub range_end: u16,
}

impl Default for PortPolicy {
    fn default() -> Self {
        Self {
            http: 8080,
            websocket: 8081,
            libp2p_main: 8082,
            turn: 3478,
            range_start: 8080,
            range_end: 8090,
        }
    }
}

/// Per-strategy dial timeouts (spec §4.5), in the order strategies run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTimeouts {
    pub direct_tcp_ms: u64,
    pub upnp_direct_ms: u64,
    pub autonat_hole_punch_ms: u64,
    pub webrtc_ms: u64,
    pub circuit_relay_ms: u64,
    pub websocket_ms: u64,
    pub dht_assisted_wait_ms: u64,
}

impl Default for PipelineTimeouts {
    fn default() -> Self {
        Self {
            direct_tcp_ms: 15_000,
            upnp_direct_ms: 20_000,
            autonat_hole_punch_ms: 25_000,
            webrtc_ms: 30_000,
            circuit_relay_ms: 35_000,
            websocket_ms: 20_000,
            dht_assisted_wait_ms: 2_000,
        }
    }
}

impl PipelineTimeouts {
    pub fn for_method(&self, method: crate::types::Method) -> Duration {
        use crate::types::Method::*;
        let ms = match method {
            DirectTcp => self.direct_tcp_ms,
            UpnpDirect => self.upnp_direct_ms,
            AutonatHolePunch => self.autonat_hole_punch_ms,
            Webrtc => self.webrtc_ms,
            CircuitRelay => self.circuit_relay_ms,
            Websocket => self.websocket_ms,
            DhtAssisted => self.dht_assisted_wait_ms,
            TurnRelay => 0, // delegated entirely to the TURN coordinator
        };
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalScanConfig {
    pub candidate_ports: Vec<u16>,
    pub dial_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub max_in_flight_probes: usize,
    pub rescan_interval_secs: u64,
    pub announce_interval_secs: u64,
    pub announce_dial_attempts: u32,
    pub announce_dial_timeout_ms: u64,
}

impl Default for LocalScanConfig {
    fn default() -> Self {
        Self {
            candidate_ports: vec![4001, 4002, 4003, 4004, 4005, 4010, 4020],
            dial_timeout_ms: 3_000,
            handshake_timeout_ms: 2_000,
            max_in_flight_probes: 10,
            rescan_interval_secs: 300,
            announce_interval_secs: 30,
            announce_dial_attempts: 5,
            announce_dial_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub dht_republish_interval_secs: u64,
    pub handshake_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            dht_republish_interval_secs: 300,
            handshake_timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingConfig {
    pub base_delay_secs: u64,
    pub max_attempts: u32,
    pub transfer_teardown_delay_secs: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 5,
            max_attempts: 10,
            transfer_teardown_delay_secs: 5,
        }
    }
}

/// Top-level configuration for one engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub overlay_namespace: String,
    pub overlay_identifier: String,
    pub protocol_id: String,
    pub gossip_topics: GossipTopics,
    pub public_relays: Vec<RelayNode>,
    pub infra_allow_list: Vec<String>,
    pub port_policy: PortPolicy,
    pub pipeline_timeouts: PipelineTimeouts,
    pub local_scan: LocalScanConfig,
    pub discovery: DiscoveryConfig,
    pub signaling: SignalingConfig,
    pub history_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let public_relays = vec![
            RelayNode {
                multiaddr: "/dnsaddr/relay1.dig.network/tcp/4001".to_string(),
                peer_id: "12D3KooWDigRelayNode1Public".to_string(),
            },
            RelayNode {
                multiaddr: "/dnsaddr/relay2.dig.network/tcp/4001".to_string(),
                peer_id: "12D3KooWDigRelayNode2Public".to_string(),
            },
            RelayNode {
                multiaddr: "/dnsaddr/relay3.dig.network/tcp/4001".to_string(),
                peer_id: "12D3KooWDigRelayNode3Public".to_string(),
            },
        ];
        let infra_allow_list = public_relays.iter().map(|r| r.peer_id.clone()).collect();

        Self {
            overlay_namespace: "dig-network-mainnet-v1".to_string(),
            overlay_identifier: "dig-mainnet".to_string(),
            protocol_id: "/dig/1.0.0".to_string(),
            gossip_topics: GossipTopics::default(),
            public_relays,
            infra_allow_list,
            port_policy: PortPolicy::default(),
            pipeline_timeouts: PipelineTimeouts::default(),
            local_scan: LocalScanConfig::default(),
            discovery: DiscoveryConfig::default(),
            signaling: SignalingConfig::default(),
            history_capacity: 1024,
        }
    }
}

impl NodeConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(s)
    }

    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn dht_peer_key(&self, peer_id: &str) -> String {
        format!("/{}/peers/{}", self.overlay_namespace, peer_id)
    }

    pub fn dht_hole_punch_key(&self, target_id: &str) -> String {
        format!("/dig-hole-punch/{target_id}")
    }

    pub fn dht_connection_request_key(&self, target_id: &str) -> String {
        format!("/dig-connection-request/{target_id}")
    }

    pub fn is_infra_peer(&self, peer_id: &str) -> bool {
        self.infra_allow_list.iter().any(|p| p == peer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_wire_exact_strings() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.overlay_namespace, "dig-network-mainnet-v1");
        assert_eq!(cfg.overlay_identifier, "dig-mainnet");
        assert_eq!(cfg.protocol_id, "/dig/1.0.0");
        assert_eq!(cfg.port_policy.http, 8080);
        assert_eq!(cfg.port_policy.websocket, 8081);
        assert_eq!(cfg.port_policy.libp2p_main, 8082);
        assert_eq!(cfg.port_policy.turn, 3478);
        assert_eq!(cfg.port_policy.range_start, 8080);
        assert_eq!(cfg.port_policy.range_end, 8090);
    }

    #[test]
    fn dht_keys_are_wire_exact() {
        let cfg = NodeConfig::default();
        assert_eq!(
            cfg.dht_peer_key("abc"),
            "/dig-network-mainnet-v1/peers/abc"
        );
        assert_eq!(cfg.dht_hole_punch_key("abc"), "/dig-hole-punch/abc");
        assert_eq!(
            cfg.dht_connection_request_key("abc"),
            "/dig-connection-request/abc"
        );
    }

    #[test]
    fn gossip_topics_are_wire_exact_and_local_is_unscoped() {
        let cfg = NodeConfig::default();
        let topics = cfg.gossip_topics.overlay_scoped();
        assert_eq!(
            topics,
            vec![
                "dig-network-peer-announcements-v1",
                "dig-network-store-sharing-v1",
                "dig-network-capability-sharing-v1",
                "dig-network-peer-discovery-v1",
            ]
        );
        assert_eq!(
            cfg.gossip_topics.local_network_discovery,
            "dig-local-network-discovery"
        );
    }

    #[test]
    fn yaml_roundtrip() {
        let cfg = NodeConfig::default();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let parsed = NodeConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(cfg, parsed);
    }

    #[test]
    fn infra_allow_list_contains_public_relays() {
        let cfg = NodeConfig::default();
        for relay in &cfg.public_relays {
            assert!(cfg.is_infra_peer(&relay.peer_id));
        }
        assert!(!cfg.is_infra_peer("some-random-peer"));
    }
}
