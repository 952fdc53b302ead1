//! Top-level orchestrator wiring every component together (replaces the
//! teacher's `MeshNetwork`), grounded on `mesh_network.rs`'s
//! construct-then-spawn-background-tasks shape.

use std::net::Ipv4Addr;
use std::sync::Arc;

use async_std::task::JoinHandle;
use libp2p::PeerId;

use crate::config::NodeConfig;
use crate::connection_pipeline::ConnectionPipeline;
use crate::error::EngineError;
use crate::local_subnet_scanner::LocalSubnetScanner;
use crate::overlay_discovery::{DhtPeerRecord, OverlayDiscovery};
use crate::port_allocator::PortAllocator;
use crate::privacy_policy::{self, PolicyInput};
use crate::runtime::{NetworkRuntime, StoreIndex, TurnCoordinator};
use crate::signaling_channel::SignalingChannel;
use crate::types::{unix_millis_now, Capabilities};

/// The engine's per-purpose listening ports, resolved once at startup
/// (spec §4.1) and held for the lifetime of the engine.
#[derive(Debug, Clone)]
pub struct ResolvedPorts {
    pub http: u16,
    pub libp2p_main: u16,
    pub libp2p_websocket: u16,
    pub turn: u16,
}

pub struct MeshEngine<R: NetworkRuntime, S: StoreIndex> {
    config: NodeConfig,
    runtime: Arc<R>,
    discovery: Arc<OverlayDiscovery<R>>,
    pipeline: Arc<ConnectionPipeline<R>>,
    local_scanner: Arc<LocalSubnetScanner<R>>,
    signaling: Arc<SignalingChannel<S>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<R: NetworkRuntime + 'static, S: StoreIndex + 'static> MeshEngine<R, S> {
    /// Allocates ports, enforces the privacy policy, and constructs every
    /// component. Returns `EngineError::Policy` if a hard-required privacy
    /// feature is unavailable (spec §4.2's "startup must abort").
    pub fn new(
        config: NodeConfig,
        runtime: Arc<R>,
        store_index: Arc<S>,
        turn: Arc<dyn TurnCoordinator>,
        local_capabilities: Capabilities,
    ) -> Result<Self, EngineError> {
        let mut allocator = PortAllocator::new(config.port_policy.clone());
        let http = allocator.reserve(config.port_policy.http, crate::types::Purpose::Http)?;
        let libp2p_main =
            allocator.reserve(config.port_policy.libp2p_main, crate::types::Purpose::Libp2pMain)?;
        let libp2p_websocket = allocator.reserve(
            config.port_policy.websocket,
            crate::types::Purpose::Libp2pWebsocket,
        )?;
        let turn_port = allocator.reserve(config.port_policy.turn, crate::types::Purpose::Turn)?;
        let _ports = ResolvedPorts {
            http,
            libp2p_main,
            libp2p_websocket,
            turn: turn_port,
        };

        let policy_input = PolicyInput {
            capabilities: &local_capabilities,
            hash_primitive_available: true,
        };
        let report = privacy_policy::enforce(&policy_input)?;
        log::info!("engine: privacy policy level={:?} compliant={}", report.level, report.compliant);

        let discovery = Arc::new(OverlayDiscovery::new(
            runtime.clone(),
            config.clone(),
            local_capabilities.protocol_version.clone(),
        ));
        let pipeline = Arc::new(ConnectionPipeline::new(
            runtime.clone(),
            turn,
            config.clone(),
            local_capabilities,
        ));
        let local_scanner = Arc::new(LocalSubnetScanner::new(runtime.clone(), config.local_scan.clone()));
        let signaling = Arc::new(SignalingChannel::new(
            store_index,
            runtime.self_peer_id().to_string(),
            String::new(),
            std::time::Duration::from_secs(config.signaling.transfer_teardown_delay_secs),
        ));

        Ok(Self {
            config,
            runtime,
            discovery,
            pipeline,
            local_scanner,
            signaling,
            tasks: Vec::new(),
        })
    }

    /// Subscribes to the overlay-scoped and LAN gossip topics, publishes
    /// the initial self-record, and spawns the background republish and
    /// rescan loops. Suitable to call once at node startup.
    pub async fn start(&mut self, local_ip: Ipv4Addr, stores: Vec<String>) -> Result<(), EngineError> {
        for topic in self.config.gossip_topics.overlay_scoped() {
            if let Err(err) = self.runtime.gossip_subscribe(&topic).await {
                log::warn!("engine: failed to subscribe to {topic}: {err}");
            }
        }
        if let Err(err) = self
            .runtime
            .gossip_subscribe(&self.config.gossip_topics.local_network_discovery)
            .await
        {
            log::warn!("engine: failed to subscribe to local discovery topic: {err}");
        }

        let self_peer_id = self.runtime.self_peer_id();
        let self_record = DhtPeerRecord {
            peer_id: self_peer_id.to_string(),
            crypto_ipv6: String::new(),
            stores,
            capabilities: Capabilities::default(),
            multiaddrs: self
                .runtime
                .get_multiaddrs()
                .await
                .iter()
                .map(|a| a.to_string())
                .collect(),
            ts: unix_millis_now(),
        };
        self.discovery.publish_self_record(&self_record).await?;

        let discovery_republish = self.discovery.clone();
        let self_record_for_loop = self_record.clone();
        self.tasks.push(async_std::task::spawn(async move {
            discovery_republish
                .run_republish_loop(move || self_record_for_loop.clone())
                .await;
        }));

        let scanner = self.local_scanner.clone();
        let discovery_for_scan = self.discovery.clone();
        self.tasks.push(async_std::task::spawn(async move {
            scanner.run_rescan_loop(local_ip, &discovery_for_scan).await;
        }));

        self.discovery.filter_existing_connections().await?;

        Ok(())
    }

    pub async fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.cancel().await;
        }
    }

    pub fn discovery(&self) -> &Arc<OverlayDiscovery<R>> {
        &self.discovery
    }

    pub fn pipeline(&self) -> &Arc<ConnectionPipeline<R>> {
        &self.pipeline
    }

    pub fn signaling(&self) -> &Arc<SignalingChannel<S>> {
        &self.signaling
    }

    pub async fn connect(
        &self,
        target: &PeerId,
        candidates: &[libp2p::Multiaddr],
    ) -> crate::connection_pipeline::ConnectOutcome {
        self.pipeline.connect(target, candidates).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::tests_support::FakeRuntime;
    use crate::runtime::StoreEntry;
    use async_trait::async_trait;

    struct EmptyStoreIndex;
    #[async_trait]
    impl StoreIndex for EmptyStoreIndex {
        async fn get(&self, _store_id: &str) -> Option<StoreEntry> {
            None
        }
    }

    struct NoTurn;
    #[async_trait]
    impl TurnCoordinator for NoTurn {
        async fn establish_turn_relay(
            &self,
            _target_peer_id: &PeerId,
        ) -> Option<crate::runtime::BoxConnection> {
            None
        }
    }

    #[async_std::test]
    async fn startup_fails_closed_when_e2e_encryption_is_missing() {
        let runtime = Arc::new(FakeRuntime::new());
        let result = MeshEngine::new(
            NodeConfig::default(),
            runtime,
            Arc::new(EmptyStoreIndex),
            Arc::new(NoTurn),
            Capabilities::default(),
        );
        assert!(result.is_err());
    }

    #[async_std::test]
    async fn startup_succeeds_with_e2e_encryption_enabled() {
        let runtime = Arc::new(FakeRuntime::new());
        let caps = Capabilities { e2e_encryption: true, ..Capabilities::default() };
        let result = MeshEngine::new(
            NodeConfig::default(),
            runtime,
            Arc::new(EmptyStoreIndex),
            Arc::new(NoTurn),
            caps,
        );
        assert!(result.is_ok());
    }
}
