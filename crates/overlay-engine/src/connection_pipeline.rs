//! Ordered multi-strategy connection establishment (spec.md §4.5), grounded
//! on the teacher's `nat.rs`/`circuit.rs` strategy-ladder and
//! `RoutingTable`-style bounded history.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_std::sync::RwLock;
use libp2p::{Multiaddr, PeerId};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::NodeConfig;
use crate::runtime::{BoxConnection, NetworkRuntime, RuntimeError, TurnCoordinator};
use crate::types::{unix_millis_now, Capabilities, ConnectionAttempt, Method, MethodOutcome, MethodStats};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

/// DHT payload published for the `autonat_hole_punch` strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HolePunchHint {
    pub from: String,
    pub to: String,
    pub target_address: String,
    pub action: String,
    pub ts: u64,
}

/// DHT payload published for the `dht_assisted` strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRequestRecord {
    pub request_id: String,
    pub from: String,
    pub self_addresses: Vec<String>,
    pub ts: u64,
}

/// A fresh, collision-resistant request id for the `dht_assisted` strategy's
/// coordination record, built the same way the identity layer derives a
/// peer id: sha-256 over the seed bytes, hex-encoded.
fn fresh_request_id(from: &PeerId, to: &PeerId) -> String {
    let seed = format!("{from}:{to}:{}", unix_millis_now());
    let hashed = core_identity::from_pubkey(seed.as_bytes());
    core_identity::to_hex(&hashed)
}

/// Full accounting for one failed `connect` call (spec §4.5).
#[derive(Debug, Clone)]
pub struct FailureReport {
    pub target_peer_id: String,
    pub outcomes: Vec<MethodOutcome>,
    pub error: &'static str,
}

pub enum ConnectOutcome {
    Connected {
        connection: BoxConnection,
        attempt: ConnectionAttempt,
    },
    Failed(FailureReport),
}

/// Bounded FIFO history plus per-method cumulative counters (spec §4.5).
#[derive(Default)]
struct Telemetry {
    history: VecDeque<ConnectionAttempt>,
    stats: HashMap<Method, MethodStats>,
}

pub struct ConnectionPipeline<R: NetworkRuntime> {
    runtime: Arc<R>,
    turn: Arc<dyn TurnCoordinator>,
    config: NodeConfig,
    local_capabilities: Capabilities,
    telemetry: RwLock<Telemetry>,
}

impl<R: NetworkRuntime> ConnectionPipeline<R> {
    pub fn new(
        runtime: Arc<R>,
        turn: Arc<dyn TurnCoordinator>,
        config: NodeConfig,
        local_capabilities: Capabilities,
    ) -> Self {
        Self {
            runtime,
            turn,
            config,
            local_capabilities,
            telemetry: RwLock::new(Telemetry::default()),
        }
    }

    /// Runs the ordered strategy ladder against `target_id`, returning the
    /// first successful connection or an exhaustive `FailureReport`.
    pub async fn connect(
        &self,
        target_id: &PeerId,
        candidate_addresses: &[Multiaddr],
    ) -> ConnectOutcome {
        let mut attempt = ConnectionAttempt::new(target_id.to_string(), unix_millis_now());

        for method in Method::ORDER {
            if !self.strategy_applicable(method, candidate_addresses) {
                continue;
            }

            let started = Instant::now();
            let result = self.try_method(method, target_id, candidate_addresses).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let outcome = match result {
                Ok((connection, relay_node)) => {
                    let address = connection.remote_multiaddr();
                    let mut success_outcome = MethodOutcome::success(method, duration_ms, address);
                    success_outcome.relay_node = relay_node;
                    attempt.outcomes.push(success_outcome);
                    attempt.final_success = true;
                    self.record_method_stats(method, true).await;
                    self.push_history(attempt.clone()).await;
                    return ConnectOutcome::Connected { connection, attempt };
                }
                Err(err) => MethodOutcome::failure(method, duration_ms, err),
            };
            log::debug!(
                "connection_pipeline: method={method} target={target_id} failed duration_ms={duration_ms}"
            );
            attempt.outcomes.push(outcome);
            self.record_method_stats(method, false).await;
        }

        self.push_history(attempt.clone()).await;
        ConnectOutcome::Failed(FailureReport {
            target_peer_id: target_id.to_string(),
            outcomes: attempt.outcomes,
            error: "all_failed",
        })
    }

    fn strategy_applicable(&self, method: Method, candidate_addresses: &[Multiaddr]) -> bool {
        match method {
            Method::DirectTcp => !candidate_addresses.is_empty(),
            Method::UpnpDirect => self.local_capabilities.upnp && !candidate_addresses.is_empty(),
            Method::AutonatHolePunch => {
                self.local_capabilities.autonat && !candidate_addresses.is_empty()
            }
            Method::Webrtc => self.local_capabilities.webrtc,
            Method::CircuitRelay => self.local_capabilities.circuit_relay,
            Method::Websocket => self.local_capabilities.websockets && !candidate_addresses.is_empty(),
            Method::DhtAssisted => self.local_capabilities.dht,
            Method::TurnRelay => self.local_capabilities.turn_server,
        }
    }

    /// Dispatches to the strategy for `method`. The second tuple element is
    /// the relay multiaddr that carried the connection, set only by
    /// `circuit_relay` (spec §3's `MethodOutcome.relay_node`).
    async fn try_method(
        &self,
        method: Method,
        target_id: &PeerId,
        candidate_addresses: &[Multiaddr],
    ) -> Result<(BoxConnection, Option<Multiaddr>), String> {
        let timeout = self.config.pipeline_timeouts.for_method(method);
        match method {
            Method::DirectTcp => self.dial_each(candidate_addresses, timeout).await.map(|c| (c, None)),
            Method::UpnpDirect => self.dial_each(candidate_addresses, timeout).await.map(|c| (c, None)),
            Method::AutonatHolePunch => self
                .autonat_hole_punch(target_id, candidate_addresses, timeout)
                .await
                .map(|c| (c, None)),
            Method::Webrtc => self.webrtc(target_id, timeout).await.map(|c| (c, None)),
            Method::CircuitRelay => self.circuit_relay(target_id, timeout).await,
            Method::Websocket => self.websocket(candidate_addresses, timeout).await.map(|c| (c, None)),
            Method::DhtAssisted => self
                .dht_assisted(target_id, candidate_addresses, timeout)
                .await
                .map(|c| (c, None)),
            Method::TurnRelay => self
                .turn
                .establish_turn_relay(target_id)
                .await
                .map(|c| (c, None))
                .ok_or_else(|| "turn coordinator returned no connection".to_string()),
        }
    }

    async fn dial_each(
        &self,
        candidate_addresses: &[Multiaddr],
        timeout: Duration,
    ) -> Result<BoxConnection, String> {
        let mut last_error = "no candidate addresses".to_string();
        for addr in candidate_addresses {
            let dialed = async_std::future::timeout(timeout, self.runtime.dial(addr)).await;
            match dialed {
                Ok(Ok(connection)) => return Ok(connection),
                Ok(Err(err)) => last_error = err.to_string(),
                Err(_) => last_error = "timed out".to_string(),
            }
        }
        Err(last_error)
    }

    async fn autonat_hole_punch(
        &self,
        target_id: &PeerId,
        candidate_addresses: &[Multiaddr],
        timeout: Duration,
    ) -> Result<BoxConnection, String> {
        if let Some(target_address) = candidate_addresses.first() {
            let hint = HolePunchHint {
                from: self.runtime.self_peer_id().to_string(),
                to: target_id.to_string(),
                target_address: target_address.to_string(),
                action: "simultaneous_dial".to_string(),
                ts: unix_millis_now(),
            };
            let key = self.config.dht_hole_punch_key(&target_id.to_string());
            let payload = serde_json::to_vec(&hint).unwrap_or_default();
            if let Err(err) = self.runtime.dht_put(&key, payload).await {
                log::warn!("connection_pipeline: autonat hint dht_put failed: {err}");
            }
        }
        self.dial_each(candidate_addresses, timeout).await
    }

    async fn webrtc(&self, target_id: &PeerId, timeout: Duration) -> Result<BoxConnection, String> {
        let addr_str = format!("/webrtc/p2p/{target_id}");
        let addr: Multiaddr = addr_str.parse().map_err(|_| "invalid webrtc address".to_string())?;
        let dialed = async_std::future::timeout(timeout, self.runtime.dial(&addr)).await;
        match dialed {
            Ok(Ok(connection)) => Ok(connection),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err("timed out".to_string()),
        }
    }

    async fn circuit_relay(
        &self,
        target_id: &PeerId,
        timeout: Duration,
    ) -> Result<(BoxConnection, Option<Multiaddr>), String> {
        let mut last_error = "no public relays configured".to_string();
        // Random order, not configured order, so repeated circuits don't all
        // transit the same relay.
        let mut relays: Vec<&crate::config::RelayNode> = self.config.public_relays.iter().collect();
        relays.shuffle(&mut rand::thread_rng());
        for relay in relays {
            let addr_str = format!("{}/p2p-circuit/p2p/{}", relay.multiaddr, target_id);
            let addr: Multiaddr = match addr_str.parse() {
                Ok(a) => a,
                Err(_) => continue,
            };
            let dialed = async_std::future::timeout(timeout, self.runtime.dial(&addr)).await;
            match dialed {
                Ok(Ok(connection)) => {
                    let relay_node = relay.multiaddr.parse().ok();
                    return Ok((connection, relay_node));
                }
                Ok(Err(err)) => last_error = err.to_string(),
                Err(_) => last_error = "timed out".to_string(),
            }
        }
        Err(last_error)
    }

    async fn websocket(
        &self,
        candidate_addresses: &[Multiaddr],
        timeout: Duration,
    ) -> Result<BoxConnection, String> {
        let rewritten: Vec<Multiaddr> = candidate_addresses
            .iter()
            .filter_map(|addr| {
                let rewritten = addr.to_string().replacen("/tcp/", "/ws/", 1);
                rewritten.parse().ok()
            })
            .collect();
        self.dial_each(&rewritten, timeout).await
    }

    async fn dht_assisted(
        &self,
        target_id: &PeerId,
        candidate_addresses: &[Multiaddr],
        wait: Duration,
    ) -> Result<BoxConnection, String> {
        let request_id = fresh_request_id(&self.runtime.self_peer_id(), target_id);
        let record = ConnectionRequestRecord {
            request_id,
            from: self.runtime.self_peer_id().to_string(),
            self_addresses: candidate_addresses.iter().map(|a| a.to_string()).collect(),
            ts: unix_millis_now(),
        };
        let key = self.config.dht_connection_request_key(&target_id.to_string());
        let payload = serde_json::to_vec(&record).unwrap_or_default();
        if let Err(err) = self.runtime.dht_put(&key, payload).await {
            log::warn!("connection_pipeline: dht_assisted dht_put failed: {err}");
        }

        async_std::task::sleep(wait).await;

        let connected = self.runtime.get_peers().await;
        if connected.contains(target_id) {
            self.runtime
                .dial(candidate_addresses.first().ok_or("no address to confirm connection")?)
                .await
                .map_err(|e| e.to_string())
        } else {
            Err("target not present in connected-peer set after wait".to_string())
        }
    }

    async fn record_method_stats(&self, method: Method, success: bool) {
        let mut telemetry = self.telemetry.write().await;
        let stats = telemetry.stats.entry(method).or_default();
        stats.attempts += 1;
        if success {
            stats.successes += 1;
        }
    }

    async fn push_history(&self, attempt: ConnectionAttempt) {
        let mut telemetry = self.telemetry.write().await;
        if telemetry.history.len() >= self.config.history_capacity {
            telemetry.history.pop_front();
        }
        telemetry.history.push_back(attempt);
    }

    /// The method with the highest success rate among methods with at
    /// least 3 attempts; `direct_tcp` when undetermined (spec §4.5).
    pub async fn best_method(&self) -> Method {
        let telemetry = self.telemetry.read().await;
        let mut best: Option<(Method, f64)> = None;
        for method in Method::ORDER {
            let Some(stats) = telemetry.stats.get(&method) else { continue };
            let Some(rate) = stats.rate() else { continue };
            match best {
                Some((_, best_rate)) if rate <= best_rate => {}
                _ => best = Some((method, rate)),
            }
        }
        best.map(|(method, _)| method).unwrap_or(Method::DirectTcp)
    }

    pub async fn history_len(&self) -> usize {
        self.telemetry.read().await.history.len()
    }

    pub async fn method_stats(&self, method: Method) -> MethodStats {
        self.telemetry
            .read()
            .await
            .stats
            .get(&method)
            .copied()
            .unwrap_or_default()
    }

    pub async fn history(&self) -> Vec<ConnectionAttempt> {
        self.telemetry.read().await.history.iter().cloned().collect()
    }
}
