//! Privacy feature enforcement against a fixed feature table (spec.md §4.2).

use thiserror::Error;

use crate::types::Capabilities;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("policy violation: required feature(s) missing: {0:?}")]
    PolicyViolation(Vec<&'static str>),
}

/// Compliance tier, derived from the fraction of enabled features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivacyLevel {
    Maximum,
    High,
    Medium,
    Low,
    Insufficient,
}

impl PrivacyLevel {
    fn from_ratio(ratio: f64) -> Self {
        if ratio >= 0.90 {
            PrivacyLevel::Maximum
        } else if ratio >= 0.75 {
            PrivacyLevel::High
        } else if ratio >= 0.50 {
            PrivacyLevel::Medium
        } else if ratio >= 0.25 {
            PrivacyLevel::Low
        } else {
            PrivacyLevel::Insufficient
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// No fallback: the feature is hard-required.
    None,
    BasicAuthentication,
    DirectEncrypted,
    BasicDelays,
    PaddingOnly,
    MinimalMetadata,
    BootstrapOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureSpec {
    pub id: &'static str,
    pub fallback: Fallback,
}

impl FeatureSpec {
    pub fn hard_required(&self) -> bool {
        matches!(self.fallback, Fallback::None)
    }
}

/// The fixed nine-feature table (spec §4.2), in table order.
pub const FEATURE_TABLE: [FeatureSpec; 9] = [
    FeatureSpec { id: "noise_encryption", fallback: Fallback::None },
    FeatureSpec { id: "crypto_ipv6", fallback: Fallback::None },
    FeatureSpec { id: "e2e_encryption", fallback: Fallback::None },
    FeatureSpec { id: "zero_knowledge_proofs", fallback: Fallback::BasicAuthentication },
    FeatureSpec { id: "onion_routing", fallback: Fallback::DirectEncrypted },
    FeatureSpec { id: "timing_obfuscation", fallback: Fallback::BasicDelays },
    FeatureSpec { id: "traffic_mixing", fallback: Fallback::PaddingOnly },
    FeatureSpec { id: "metadata_scrambling", fallback: Fallback::MinimalMetadata },
    FeatureSpec { id: "distributed_discovery", fallback: Fallback::BootstrapOnly },
];

/// Signals the availability predicates need beyond `Capabilities`, supplied
/// by the caller (the engine's crypto/hash subsystem isn't owned here).
pub struct PolicyInput<'a> {
    pub capabilities: &'a Capabilities,
    pub hash_primitive_available: bool,
}

fn predicate(id: &'static str, input: &PolicyInput<'_>) -> bool {
    match id {
        "noise_encryption" => true,
        "crypto_ipv6" => true,
        "e2e_encryption" => input.capabilities.e2e_encryption,
        "zero_knowledge_proofs" => input.hash_primitive_available,
        "onion_routing" => input.capabilities.transport_capability_count() >= 3,
        "timing_obfuscation" => true,
        "traffic_mixing" => true,
        "metadata_scrambling" => true,
        "distributed_discovery" => input.capabilities.dht,
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureResult {
    Enabled,
    Degraded(Fallback),
    CriticalFailure,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyReport {
    pub total: usize,
    pub enabled: usize,
    pub degraded: usize,
    pub critical_failures: usize,
    pub per_feature_results: Vec<(&'static str, FeatureResult)>,
    pub compliant: bool,
    pub level: PrivacyLevel,
}

/// Evaluates the nine named predicates; aborts with `PolicyViolation` if
/// any hard-required feature's predicate is false.
pub fn enforce(input: &PolicyInput<'_>) -> Result<PolicyReport, PolicyError> {
    let mut per_feature_results = Vec::with_capacity(FEATURE_TABLE.len());
    let mut enabled = 0usize;
    let mut degraded = 0usize;
    let mut critical_failures = Vec::new();

    for feature in FEATURE_TABLE.iter() {
        let satisfied = predicate(feature.id, input);
        let result = if satisfied {
            enabled += 1;
            FeatureResult::Enabled
        } else if feature.hard_required() {
            critical_failures.push(feature.id);
            FeatureResult::CriticalFailure
        } else {
            degraded += 1;
            FeatureResult::Degraded(feature.fallback)
        };
        per_feature_results.push((feature.id, result));
    }

    if !critical_failures.is_empty() {
        log::error!("privacy_policy: policy_violation missing={critical_failures:?}");
        return Err(PolicyError::PolicyViolation(critical_failures));
    }

    let total = FEATURE_TABLE.len();
    let ratio = enabled as f64 / total as f64;
    let level = PrivacyLevel::from_ratio(ratio);
    log::info!("privacy_policy: level={level:?} enabled={enabled}/{total} degraded={degraded}");

    Ok(PolicyReport {
        total,
        enabled,
        degraded,
        critical_failures: 0,
        per_feature_results,
        compliant: true,
        level,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_caps() -> Capabilities {
        Capabilities {
            dht: true,
            gossip: true,
            mdns: true,
            upnp: true,
            autonat: true,
            webrtc: true,
            websockets: true,
            circuit_relay: true,
            turn_server: true,
            e2e_encryption: true,
            ..Capabilities::default()
        }
    }

    #[test]
    fn full_capabilities_reach_maximum() {
        let caps = full_caps();
        let input = PolicyInput { capabilities: &caps, hash_primitive_available: true };
        let report = enforce(&input).unwrap();
        assert_eq!(report.level, PrivacyLevel::Maximum);
        assert_eq!(report.enabled, 9);
        assert!(report.compliant);
    }

    #[test]
    fn missing_e2e_encryption_is_policy_violation() {
        let caps = Capabilities::default();
        let input = PolicyInput { capabilities: &caps, hash_primitive_available: true };
        let err = enforce(&input).unwrap_err();
        match err {
            PolicyError::PolicyViolation(missing) => assert_eq!(missing, vec!["e2e_encryption"]),
        }
    }

    #[test]
    fn onion_routing_degrades_below_three_transports() {
        let caps = Capabilities {
            dht: true,
            gossip: true,
            e2e_encryption: true,
            ..Capabilities::default()
        };
        let input = PolicyInput { capabilities: &caps, hash_primitive_available: true };
        let report = enforce(&input).unwrap();
        let onion = report
            .per_feature_results
            .iter()
            .find(|(id, _)| *id == "onion_routing")
            .unwrap();
        assert_eq!(onion.1, FeatureResult::Degraded(Fallback::DirectEncrypted));
    }

    #[test]
    fn distributed_discovery_requires_dht() {
        let caps = Capabilities { e2e_encryption: true, ..Capabilities::default() };
        let input = PolicyInput { capabilities: &caps, hash_primitive_available: false };
        let report = enforce(&input).unwrap();
        let dd = report
            .per_feature_results
            .iter()
            .find(|(id, _)| *id == "distributed_discovery")
            .unwrap();
        assert_eq!(dd.1, FeatureResult::Degraded(Fallback::BootstrapOnly));
    }

    #[test]
    fn minimal_compliant_capabilities_are_insufficient() {
        let caps = Capabilities { e2e_encryption: true, ..Capabilities::default() };
        let input = PolicyInput { capabilities: &caps, hash_primitive_available: false };
        let report = enforce(&input).unwrap();
        assert_eq!(report.level, PrivacyLevel::Insufficient);
        assert_eq!(report.critical_failures, 0);
    }
}
