//! Wire messages for the overlay's dedicated request/response protocol
//! `/dig/1.0.0` (spec.md §3, §6).

use serde::{Deserialize, Serialize};

use crate::types::{Capabilities, PeerRecord};

// Untagged: each variant's payload already carries its own wire-exact
// `type` field (`DIG_NETWORK_IDENTIFICATION`, `GET_PEER_INFO`), so an
// outer serde tag would collide with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DigRequest {
    Identify(IdentifyRequest),
    GetPeerInfo(PeerInfoRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DigResponse {
    Identify(IdentifyResponse),
    GetPeerInfo(PeerInfoResponse),
}

/// `{type: "DIG_NETWORK_IDENTIFICATION", networkId, protocolVersion}`
/// (spec §4.3 channel 3, wire-exact per §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyRequest {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(rename = "networkId")]
    pub network_id: String,
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
}

impl IdentifyRequest {
    pub const TYPE: &'static str = "DIG_NETWORK_IDENTIFICATION";

    pub fn new(network_id: impl Into<String>, protocol_version: impl Into<String>) -> Self {
        Self {
            message_type: Self::TYPE.to_string(),
            network_id: network_id.into(),
            protocol_version: protocol_version.into(),
        }
    }
}

/// A peer is admitted iff both `networkId` matches and `isDIGNode` is
/// explicitly true (spec §4.3 channel 3, wire-exact per §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyResponse {
    #[serde(rename = "networkId")]
    pub network_id: String,
    #[serde(rename = "isDIGNode")]
    pub is_dig_node: bool,
}

/// `GET_PEER_INFO` request — a peer's directory-worthy self-description,
/// used when a directory entry is incomplete after a bare identify
/// handshake (the handshake only confirms membership, not capabilities).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfoRequest {
    pub requested_info: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfoResponse {
    pub success: bool,
    pub crypto_ipv6: String,
    pub stores: Vec<String>,
    pub capabilities: Capabilities,
    pub node_type: String,
}

impl PeerInfoResponse {
    pub fn from_record(record: &PeerRecord) -> Self {
        Self {
            success: true,
            crypto_ipv6: record.crypto_ipv6.clone(),
            stores: record.stores.clone(),
            capabilities: record.capabilities.clone(),
            node_type: "dig-peer".to_string(),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            success: false,
            crypto_ipv6: String::new(),
            stores: Vec::new(),
            capabilities: Capabilities::default(),
            node_type: String::new(),
        }
    }
}
