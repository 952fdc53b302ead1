//! Persistent signaling link plus ephemeral relay-mediated transfer
//! connections (spec.md §4.6), grounded on the teacher's `relay.rs`
//! reconnect-with-backoff loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_std::sync::RwLock;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runtime::{BoxConnection, RuntimeError, StoreIndex};

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("reconnect attempts exhausted")]
    ReconnectExhausted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingOutbound {
    RegisterForSignaling {
        peer_id: String,
        crypto_ipv6: String,
        purpose: String,
        capabilities: Vec<String>,
    },
    RegisterForTransfer {
        peer_id: String,
        request_id: String,
        purpose: String,
        requester_peer_id: String,
    },
    TurnConnectionEstablished {
        request_id: String,
        connected_peer_id: String,
        turn_server_info: serde_json::Value,
        status: String,
    },
    TransferFileData {
        store_id: String,
        base64_bytes: String,
        size: usize,
        range_start: Option<u64>,
        range_end: Option<u64>,
    },
    FileNotAvailable {
        request_id: String,
        store_id: String,
        peer_id: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingInbound {
    TurnConnectionSignal {
        request_id: String,
        turn_server_info: serde_json::Value,
        instruction: String,
        requester_peer_id: String,
    },
    FileTransferRequest {
        store_id: String,
        request_id: String,
        requester_peer_id: String,
        turn_server_info: serde_json::Value,
    },
    TransferComplete {
        request_id: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferFileRequest {
    pub store_id: String,
    pub range_start: Option<u64>,
    pub range_end: Option<u64>,
}

/// Reconnect state: exponential-linear backoff `delay = base_delay *
/// attempt`, capped at `max_attempts`, reset to 0 on success (spec §4.6).
pub struct ReconnectState {
    pub attempt: u32,
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectState {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self { attempt: 0, base_delay, max_attempts }
    }

    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        Some(self.base_delay * self.attempt)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

struct EphemeralTransfer {
    connection: BoxConnection,
}

/// Owns the persistent signaling link's registration state and the
/// ephemeral per-`request_id` transfer connections it spawns.
pub struct SignalingChannel<S: StoreIndex> {
    store_index: Arc<S>,
    self_peer_id: String,
    crypto_ipv6: String,
    transfer_teardown_delay: Duration,
    ephemeral: RwLock<HashMap<String, EphemeralTransfer>>,
}

impl<S: StoreIndex> SignalingChannel<S> {
    pub fn new(
        store_index: Arc<S>,
        self_peer_id: String,
        crypto_ipv6: String,
        transfer_teardown_delay: Duration,
    ) -> Self {
        Self {
            store_index,
            self_peer_id,
            crypto_ipv6,
            transfer_teardown_delay,
            ephemeral: RwLock::new(HashMap::new()),
        }
    }

    pub fn registration_message(&self) -> SignalingOutbound {
        SignalingOutbound::RegisterForSignaling {
            peer_id: self.self_peer_id.clone(),
            crypto_ipv6: self.crypto_ipv6.clone(),
            purpose: "signaling_only".to_string(),
            capabilities: vec!["turn_coordination".to_string(), "transfer_signaling".to_string()],
        }
    }

    /// Handles one inbound signaling event, returning the outbound
    /// message(s) the caller should send back (on the signaling link for
    /// control replies, or on the newly opened ephemeral connection for
    /// transfer registration).
    pub async fn handle_inbound(
        &self,
        event: SignalingInbound,
        open_ephemeral: impl FnOnce() -> Option<BoxConnection>,
    ) -> Vec<SignalingOutbound> {
        match event {
            SignalingInbound::TurnConnectionSignal {
                request_id,
                turn_server_info,
                instruction,
                requester_peer_id,
            } => {
                if instruction != "connect_to_turn_server" {
                    return Vec::new();
                }
                let Some(connection) = open_ephemeral() else {
                    return Vec::new();
                };
                self.ephemeral
                    .write()
                    .await
                    .insert(request_id.clone(), EphemeralTransfer { connection });

                vec![
                    SignalingOutbound::RegisterForTransfer {
                        peer_id: self.self_peer_id.clone(),
                        request_id: request_id.clone(),
                        purpose: "file_transfer".to_string(),
                        requester_peer_id: requester_peer_id.clone(),
                    },
                    SignalingOutbound::TurnConnectionEstablished {
                        request_id,
                        connected_peer_id: requester_peer_id,
                        turn_server_info,
                        status: "ready_for_transfer".to_string(),
                    },
                ]
            }
            SignalingInbound::FileTransferRequest {
                store_id,
                request_id,
                requester_peer_id,
                turn_server_info: _,
            } => {
                let entry = self.store_index.get(&store_id).await;
                match entry {
                    Some(_) => {
                        if let Some(connection) = open_ephemeral() {
                            self.ephemeral
                                .write()
                                .await
                                .insert(request_id.clone(), EphemeralTransfer { connection });
                        }
                        vec![SignalingOutbound::RegisterForTransfer {
                            peer_id: self.self_peer_id.clone(),
                            request_id,
                            purpose: "file_transfer".to_string(),
                            requester_peer_id,
                        }]
                    }
                    None => vec![SignalingOutbound::FileNotAvailable {
                        request_id,
                        store_id,
                        peer_id: self.self_peer_id.clone(),
                    }],
                }
            }
            SignalingInbound::TransferComplete { request_id } => {
                let delay = self.transfer_teardown_delay;
                async_std::task::sleep(delay).await;
                self.ephemeral.write().await.remove(&request_id);
                Vec::new()
            }
        }
    }

    /// Serves one `transfer_file_request` over an already-open ephemeral
    /// connection by reading from the store index (spec §4.6).
    pub async fn serve_transfer_request(
        &self,
        request: TransferFileRequest,
    ) -> SignalingOutbound {
        match self.store_index.get(&request.store_id).await {
            Some(entry) => {
                let slice: &[u8] = match (request.range_start, request.range_end) {
                    (Some(start), Some(end)) => {
                        let start = start as usize;
                        let end = (end as usize).min(entry.content.len());
                        if start <= end {
                            &entry.content[start..end]
                        } else {
                            &[]
                        }
                    }
                    _ => &entry.content[..],
                };
                SignalingOutbound::TransferFileData {
                    store_id: request.store_id,
                    base64_bytes: base64::engine::general_purpose::STANDARD.encode(slice),
                    size: slice.len(),
                    range_start: request.range_start,
                    range_end: request.range_end,
                }
            }
            None => SignalingOutbound::FileNotAvailable {
                request_id: String::new(),
                store_id: request.store_id,
                peer_id: self.self_peer_id.clone(),
            },
        }
    }

    pub async fn ephemeral_count(&self) -> usize {
        self.ephemeral.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::StoreEntry;
    use async_trait::async_trait;

    struct FakeStoreIndex {
        stores: HashMap<String, StoreEntry>,
    }

    #[async_trait]
    impl StoreIndex for FakeStoreIndex {
        async fn get(&self, store_id: &str) -> Option<StoreEntry> {
            self.stores.get(store_id).cloned()
        }
    }

    #[derive(Debug)]
    struct FakeConnection;
    impl crate::runtime::ConnectionHandle for FakeConnection {}

    fn channel_with_store(store_id: &str, content: &[u8]) -> SignalingChannel<FakeStoreIndex> {
        let mut stores = HashMap::new();
        stores.insert(
            store_id.to_string(),
            StoreEntry { content: content.to_vec(), meta: serde_json::json!({}) },
        );
        SignalingChannel::new(
            Arc::new(FakeStoreIndex { stores }),
            "self-peer".to_string(),
            "fd00::1".to_string(),
            Duration::from_millis(10),
        )
    }

    #[test]
    fn reconnect_backoff_is_exponential_linear_and_capped() {
        let mut state = ReconnectState::new(Duration::from_secs(5), 3);
        assert_eq!(state.next_delay(), Some(Duration::from_secs(5)));
        assert_eq!(state.next_delay(), Some(Duration::from_secs(10)));
        assert_eq!(state.next_delay(), Some(Duration::from_secs(15)));
        assert_eq!(state.next_delay(), None);
        state.reset();
        assert_eq!(state.next_delay(), Some(Duration::from_secs(5)));
    }

    #[async_std::test]
    async fn file_transfer_request_for_known_store_registers_ephemeral() {
        let channel = channel_with_store("storeA", b"hello world");
        let messages = channel
            .handle_inbound(
                SignalingInbound::FileTransferRequest {
                    store_id: "storeA".to_string(),
                    request_id: "req-1".to_string(),
                    requester_peer_id: "peerB".to_string(),
                    turn_server_info: serde_json::json!({}),
                },
                || Some(Box::new(FakeConnection)),
            )
            .await;
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], SignalingOutbound::RegisterForTransfer { .. }));
        assert_eq!(channel.ephemeral_count().await, 1);
    }

    #[async_std::test]
    async fn file_transfer_request_for_unknown_store_reports_not_available() {
        let channel = channel_with_store("storeA", b"hello world");
        let messages = channel
            .handle_inbound(
                SignalingInbound::FileTransferRequest {
                    store_id: "storeB".to_string(),
                    request_id: "req-2".to_string(),
                    requester_peer_id: "peerB".to_string(),
                    turn_server_info: serde_json::json!({}),
                },
                || Some(Box::new(FakeConnection)),
            )
            .await;
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], SignalingOutbound::FileNotAvailable { .. }));
    }

    #[async_std::test]
    async fn transfer_complete_tears_down_ephemeral_connection_after_delay() {
        let channel = channel_with_store("storeA", b"hello world");
        channel
            .handle_inbound(
                SignalingInbound::FileTransferRequest {
                    store_id: "storeA".to_string(),
                    request_id: "req-3".to_string(),
                    requester_peer_id: "peerB".to_string(),
                    turn_server_info: serde_json::json!({}),
                },
                || Some(Box::new(FakeConnection)),
            )
            .await;
        assert_eq!(channel.ephemeral_count().await, 1);

        channel
            .handle_inbound(
                SignalingInbound::TransferComplete { request_id: "req-3".to_string() },
                || None,
            )
            .await;
        assert_eq!(channel.ephemeral_count().await, 0);
    }

    #[async_std::test]
    async fn serve_transfer_request_honors_byte_range() {
        let channel = channel_with_store("storeA", b"0123456789");
        let response = channel
            .serve_transfer_request(TransferFileRequest {
                store_id: "storeA".to_string(),
                range_start: Some(2),
                range_end: Some(5),
            })
            .await;
        match response {
            SignalingOutbound::TransferFileData { size, base64_bytes, .. } => {
                assert_eq!(size, 3);
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(base64_bytes)
                    .unwrap();
                assert_eq!(decoded, b"234");
            }
            _ => panic!("expected transfer data"),
        }
    }
}
