//! Core data model shared by every component of the engine.
//!
//! These are plain data types: invariants from the specification are
//! enforced by the owning component (`OverlayDiscovery`, `ConnectionPipeline`,
//! ...), not by the structs themselves, matching the split between data and
//! behavior used throughout the teacher's `relay` and `circuit` modules.

use std::collections::HashSet;

use libp2p::Multiaddr;
use serde::{Deserialize, Serialize};

/// Deployment environment, alters listen-address generation (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
    Cloud,
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

/// Fixed set of boolean capability flags plus protocol version and
/// environment tag (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub dht: bool,
    pub gossip: bool,
    pub mdns: bool,
    pub upnp: bool,
    pub autonat: bool,
    pub webrtc: bool,
    pub websockets: bool,
    pub circuit_relay: bool,
    pub turn_server: bool,
    pub e2e_encryption: bool,
    pub protocol_version: String,
    pub environment: Environment,
}

impl Capabilities {
    /// Count of transport capability flags set (dht, gossip, mdns, upnp,
    /// autonat, webrtc, websockets, circuit_relay, turn_server) — used by
    /// the `onion_routing` privacy-feature predicate (spec §4.2).
    pub fn transport_capability_count(&self) -> usize {
        [
            self.dht,
            self.gossip,
            self.mdns,
            self.upnp,
            self.autonat,
            self.webrtc,
            self.websockets,
            self.circuit_relay,
            self.turn_server,
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            dht: false,
            gossip: false,
            mdns: false,
            upnp: false,
            autonat: false,
            webrtc: false,
            websockets: false,
            circuit_relay: false,
            turn_server: false,
            e2e_encryption: false,
            protocol_version: "1.0.0".to_string(),
            environment: Environment::default(),
        }
    }
}

/// Source a `PeerRecord` was admitted from (spec §3 invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    DhtNamespace,
    GossipAnnouncement,
    ProtocolVerification,
    LocalScan,
    LocalAnnouncement,
}

/// A directory entry for one overlay member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    pub peer_id: String,
    pub crypto_ipv6: String,
    pub stores: Vec<String>,
    pub capabilities: Capabilities,
    pub multiaddrs: HashSet<String>,
    pub last_seen_unix_ms: u64,
    pub discovered_via: DiscoverySource,
    pub verified: bool,
}

impl PeerRecord {
    pub fn advertises_store(&self, store_id: &str) -> bool {
        self.stores.iter().any(|s| s == store_id)
    }

    pub fn is_turn_capable(&self) -> bool {
        self.capabilities.turn_server
    }
}

/// Ordered NAT-traversal strategies (spec §3). Declaration order is the
/// pipeline's attempt order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    DirectTcp,
    UpnpDirect,
    AutonatHolePunch,
    Webrtc,
    CircuitRelay,
    Websocket,
    DhtAssisted,
    TurnRelay,
}

impl Method {
    /// The full ordering, as walked by `ConnectionPipeline::connect`.
    pub const ORDER: [Method; 8] = [
        Method::DirectTcp,
        Method::UpnpDirect,
        Method::AutonatHolePunch,
        Method::Webrtc,
        Method::CircuitRelay,
        Method::Websocket,
        Method::DhtAssisted,
        Method::TurnRelay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::DirectTcp => "direct_tcp",
            Method::UpnpDirect => "upnp_direct",
            Method::AutonatHolePunch => "autonat_hole_punch",
            Method::Webrtc => "webrtc",
            Method::CircuitRelay => "circuit_relay",
            Method::Websocket => "websocket",
            Method::DhtAssisted => "dht_assisted",
            Method::TurnRelay => "turn_relay",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a single strategy attempt within a `ConnectionAttempt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodOutcome {
    pub method: Method,
    pub success: bool,
    pub duration_ms: u64,
    pub address: Option<Multiaddr>,
    pub relay_node: Option<Multiaddr>,
    pub is_relay: bool,
    pub error: Option<String>,
}

impl MethodOutcome {
    pub fn success(method: Method, duration_ms: u64, address: Option<Multiaddr>) -> Self {
        let is_relay = matches!(method, Method::CircuitRelay | Method::TurnRelay);
        Self {
            method,
            success: true,
            duration_ms,
            address,
            relay_node: None,
            is_relay,
            error: None,
        }
    }

    pub fn failure(method: Method, duration_ms: u64, error: impl Into<String>) -> Self {
        Self {
            method,
            success: false,
            duration_ms,
            address: None,
            relay_node: None,
            is_relay: false,
            error: Some(error.into()),
        }
    }
}

/// The full record of one `ConnectionPipeline::connect` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionAttempt {
    pub target_peer_id: String,
    pub started_unix_ms: u64,
    pub outcomes: Vec<MethodOutcome>,
    pub final_success: bool,
}

impl ConnectionAttempt {
    pub fn new(target_peer_id: impl Into<String>, started_unix_ms: u64) -> Self {
        Self {
            target_peer_id: target_peer_id.into(),
            started_unix_ms,
            outcomes: Vec::new(),
            final_success: false,
        }
    }
}

/// Cumulative per-method counters (spec §3). Rate is defined only once
/// `attempts >= 3`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MethodStats {
    pub attempts: u64,
    pub successes: u64,
}

impl MethodStats {
    pub fn rate(&self) -> Option<f64> {
        if self.attempts < 3 {
            None
        } else {
            Some(self.successes as f64 / self.attempts as f64)
        }
    }
}

/// A named listening-port purpose (spec §4.1 / §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Libp2pMain,
    Libp2pWebsocket,
    Http,
    Turn,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Libp2pMain => "libp2p_main",
            Purpose::Libp2pWebsocket => "libp2p_websocket",
            Purpose::Http => "http",
            Purpose::Turn => "turn",
        }
    }
}

pub fn unix_millis_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
