//! Crate-wide error aggregation (spec.md §7), mirroring `MeshError` in the
//! teacher's `mesh_network.rs`: one `thiserror` enum per component, rolled
//! up here with `#[from]` so the orchestrator can return a single type.

use thiserror::Error;

use crate::connection_pipeline::PipelineError;
use crate::overlay_discovery::DiscoveryError;
use crate::port_allocator::PortError;
use crate::privacy_policy::PolicyError;
use crate::signaling_channel::SignalingError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("port allocation error: {0}")]
    Port(#[from] PortError),

    #[error("privacy policy violation: {0}")]
    Policy(#[from] PolicyError),

    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("connection pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("signaling channel error: {0}")]
    Signaling(#[from] SignalingError),
}
