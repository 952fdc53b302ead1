//! External collaborator interfaces (spec.md §6, §9).
//!
//! The engine never owns the underlying p2p transport, store index, or TURN
//! coordinator — it is parameterized by small traits capturing only the
//! operations each component uses, per spec.md §9's "interface abstraction"
//! redesign note. Concrete adapters (e.g. a real libp2p `Swarm` wrapper)
//! live outside this crate.

use async_trait::async_trait;
use libp2p::{Multiaddr, PeerId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("dial failed: {0}")]
    DialFailed(String),
    #[error("protocol stream failed: {0}")]
    ProtocolFailed(String),
    #[error("dht operation failed: {0}")]
    Dht(String),
    #[error("gossip operation failed: {0}")]
    Gossip(String),
    #[error("timed out")]
    Timeout,
}

/// A live connection to a remote peer. Opaque to the engine beyond the
/// address and peer id it was reached at; callers own the lifecycle
/// (spec.md §4.5).
pub trait ConnectionHandle: Send + Sync + std::fmt::Debug {
    /// The address this connection was actually established over, if the
    /// transport can report one (relayed connections may not have one).
    fn remote_multiaddr(&self) -> Option<Multiaddr> {
        None
    }

    /// The peer id the transport resolved this connection to (known once
    /// the connection upgrade, e.g. noise handshake, completes).
    fn remote_peer_id(&self) -> Option<PeerId> {
        None
    }
}

pub type BoxConnection = Box<dyn ConnectionHandle>;

/// Operations the engine needs from the underlying p2p transport
/// (dial/protocol/DHT/gossip), matching spec.md §6's "Underlying transport
/// (consumed)" surface.
#[async_trait]
pub trait NetworkRuntime: Send + Sync {
    async fn dial(&self, addr: &Multiaddr) -> Result<BoxConnection, RuntimeError>;

    async fn dial_protocol(
        &self,
        peer: &PeerId,
        protocol: &str,
        request: Vec<u8>,
    ) -> Result<Vec<u8>, RuntimeError>;

    async fn hang_up(&self, peer: &PeerId);

    async fn get_peers(&self) -> Vec<PeerId>;

    async fn get_multiaddrs(&self) -> Vec<Multiaddr>;

    async fn dht_put(&self, key: &str, value: Vec<u8>) -> Result<(), RuntimeError>;

    async fn dht_get(&self, key: &str) -> Result<Option<Vec<u8>>, RuntimeError>;

    async fn gossip_subscribe(&self, topic: &str) -> Result<(), RuntimeError>;

    async fn gossip_publish(&self, topic: &str, bytes: Vec<u8>) -> Result<(), RuntimeError>;

    fn has_upnp(&self) -> bool;

    fn has_autonat(&self) -> bool;

    fn self_peer_id(&self) -> PeerId;
}

/// The content-bundle index (spec.md §6's "Store index (consumed)").
#[async_trait]
pub trait StoreIndex: Send + Sync {
    async fn get(&self, store_id: &str) -> Option<StoreEntry>;
}

#[derive(Debug, Clone)]
pub struct StoreEntry {
    pub content: Vec<u8>,
    pub meta: serde_json::Value,
}

/// The TURN coordinator (spec.md §6's "TURN coordinator (consumed)"),
/// the last-resort strategy in `ConnectionPipeline`.
#[async_trait]
pub trait TurnCoordinator: Send + Sync {
    async fn establish_turn_relay(&self, target_peer_id: &PeerId) -> Option<BoxConnection>;
}

/// In-memory `NetworkRuntime`/`StoreIndex`/`TurnCoordinator` fakes shared
/// across this crate's unit tests, grounded on the teacher's pattern of
/// hand-rolled swarm stubs in its own test modules.
#[cfg(test)]
pub mod tests_support {
    use std::collections::HashMap;
    use std::sync::OnceLock;

    use async_std::sync::Mutex;

    use crate::protocol::IdentifyResponse;

    use super::*;

    #[derive(Debug)]
    struct FakeConnection;
    impl ConnectionHandle for FakeConnection {
        fn remote_peer_id(&self) -> Option<PeerId> {
            Some(FakeRuntime::fixed_peer_id())
        }
    }

    pub struct FakeRuntime {
        self_peer_id: PeerId,
        handshake_response: Mutex<Option<IdentifyResponse>>,
        dht: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl FakeRuntime {
        pub fn new() -> Self {
            static SELF_ID: OnceLock<PeerId> = OnceLock::new();
            let self_peer_id = *SELF_ID.get_or_init(PeerId::random);
            Self {
                self_peer_id,
                handshake_response: Mutex::new(None),
                dht: Mutex::new(HashMap::new()),
            }
        }

        /// A stable peer id distinct from any `FakeRuntime::new()`'s
        /// `self_peer_id`, used as the dial target in handshake tests.
        pub fn fixed_peer_id() -> PeerId {
            static TARGET_ID: OnceLock<PeerId> = OnceLock::new();
            *TARGET_ID.get_or_init(PeerId::random)
        }

        pub fn set_handshake_response(&self, response: IdentifyResponse) {
            if let Some(mut guard) = self.handshake_response.try_lock() {
                *guard = Some(response);
            }
        }
    }

    #[async_trait]
    impl NetworkRuntime for FakeRuntime {
        async fn dial(&self, _addr: &Multiaddr) -> Result<BoxConnection, RuntimeError> {
            Ok(Box::new(FakeConnection))
        }

        async fn dial_protocol(
            &self,
            _peer: &PeerId,
            _protocol: &str,
            _request: Vec<u8>,
        ) -> Result<Vec<u8>, RuntimeError> {
            let guard = self.handshake_response.lock().await;
            match guard.as_ref() {
                Some(response) => Ok(serde_json::to_vec(response).unwrap_or_default()),
                None => Err(RuntimeError::ProtocolFailed("no response configured".into())),
            }
        }

        async fn hang_up(&self, _peer: &PeerId) {}

        async fn get_peers(&self) -> Vec<PeerId> {
            Vec::new()
        }

        async fn get_multiaddrs(&self) -> Vec<Multiaddr> {
            Vec::new()
        }

        async fn dht_put(&self, key: &str, value: Vec<u8>) -> Result<(), RuntimeError> {
            self.dht.lock().await.insert(key.to_string(), value);
            Ok(())
        }

        async fn dht_get(&self, key: &str) -> Result<Option<Vec<u8>>, RuntimeError> {
            Ok(self.dht.lock().await.get(key).cloned())
        }

        async fn gossip_subscribe(&self, _topic: &str) -> Result<(), RuntimeError> {
            Ok(())
        }

        async fn gossip_publish(&self, _topic: &str, _bytes: Vec<u8>) -> Result<(), RuntimeError> {
            Ok(())
        }

        fn has_upnp(&self) -> bool {
            false
        }

        fn has_autonat(&self) -> bool {
            false
        }

        fn self_peer_id(&self) -> PeerId {
            self.self_peer_id
        }
    }
}
