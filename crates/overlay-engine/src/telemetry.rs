//! Aggregate connection and discovery statistics (spec.md §4.7).

use crate::connection_pipeline::ConnectionPipeline;
use crate::overlay_discovery::OverlayDiscovery;
use crate::runtime::NetworkRuntime;
use crate::types::{DiscoverySource, Method};

#[derive(Debug, Clone)]
pub struct MethodStatsSnapshot {
    pub method: Method,
    pub attempts: u64,
    pub successes: u64,
    pub rate_percent: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub total_attempts: u64,
    pub successful_attempts: u64,
    pub per_method: Vec<MethodStatsSnapshot>,
}

#[derive(Debug, Clone)]
pub struct DiscoveryStats {
    pub directory_size: usize,
    pub verified_members: usize,
    pub members_with_stores: usize,
    pub turn_capable_members: usize,
    pub latest_last_seen_unix_ms: Option<u64>,
    pub active_discovery_sources: Vec<DiscoverySource>,
}

pub async fn connection_stats<R: NetworkRuntime>(pipeline: &ConnectionPipeline<R>) -> ConnectionStats {
    let history = pipeline.history().await;
    let total_attempts = history.len() as u64;
    let successful_attempts = history.iter().filter(|a| a.final_success).count() as u64;

    let mut per_method = Vec::with_capacity(Method::ORDER.len());
    for method in Method::ORDER {
        let stats = pipeline.method_stats(method).await;
        per_method.push(MethodStatsSnapshot {
            method,
            attempts: stats.attempts,
            successes: stats.successes,
            rate_percent: stats.rate().map(|r| r * 100.0),
        });
    }

    ConnectionStats { total_attempts, successful_attempts, per_method }
}

pub async fn discovery_stats<R: NetworkRuntime>(discovery: &OverlayDiscovery<R>) -> DiscoveryStats {
    let all = discovery.get_all().await;
    let verified_members = all.iter().filter(|p| p.verified).count();
    let members_with_stores = all.iter().filter(|p| !p.stores.is_empty()).count();
    let turn_capable_members = all.iter().filter(|p| p.is_turn_capable()).count();
    let latest_last_seen_unix_ms = all.iter().map(|p| p.last_seen_unix_ms).max();

    let mut active_discovery_sources: Vec<DiscoverySource> =
        all.iter().map(|p| p.discovered_via).collect();
    active_discovery_sources.sort_by_key(|s| *s as u8);
    active_discovery_sources.dedup();

    DiscoveryStats {
        directory_size: all.len(),
        verified_members,
        members_with_stores,
        turn_capable_members,
        latest_last_seen_unix_ms,
        active_discovery_sources,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::overlay_discovery::GossipAnnouncement;
    use crate::runtime::tests_support::FakeRuntime;
    use crate::types::Capabilities;
    use std::sync::Arc;

    #[async_std::test]
    async fn discovery_stats_reflect_empty_directory() {
        let runtime = Arc::new(FakeRuntime::new());
        let discovery = OverlayDiscovery::new(runtime, NodeConfig::default(), "1.0.0".to_string());
        let stats = discovery_stats(&discovery).await;
        assert_eq!(stats.directory_size, 0);
        assert_eq!(stats.verified_members, 0);
        assert!(stats.latest_last_seen_unix_ms.is_none());
    }

    #[async_std::test]
    async fn discovery_stats_count_stores_and_verification() {
        let runtime = Arc::new(FakeRuntime::new());
        let discovery = OverlayDiscovery::new(runtime, NodeConfig::default(), "1.0.0".to_string());
        discovery
            .ingest_gossip_announcement(GossipAnnouncement {
                overlay_id: "dig-mainnet".to_string(),
                peer_id: "peer1".to_string(),
                crypto_ipv6: "fd00::1".to_string(),
                stores: vec!["storeA".to_string()],
                capabilities: Capabilities::default(),
                multiaddrs: vec![],
            })
            .await;
        let stats = discovery_stats(&discovery).await;
        assert_eq!(stats.directory_size, 1);
        assert_eq!(stats.verified_members, 1);
        assert_eq!(stats.members_with_stores, 1);
    }
}
