//! Connection-establishment and peer-management engine for an
//! application-level overlay network layered on an underlying p2p
//! transport (libp2p DHT, gossip, dial/protocol streams).
//!
//! The transport itself, storage/indexing, URN parsing, the command-line
//! surface, and configuration-file parsing are external collaborators
//! (see [`runtime`]) — this crate owns overlay-membership filtering,
//! NAT-traversal strategy selection, and peer bookkeeping only.

pub mod config;
pub mod connection_pipeline;
pub mod engine;
pub mod error;
pub mod local_subnet_scanner;
pub mod overlay_discovery;
pub mod port_allocator;
pub mod privacy_policy;
pub mod protocol;
pub mod runtime;
pub mod signaling_channel;
pub mod telemetry;
pub mod types;

pub use config::NodeConfig;
pub use engine::MeshEngine;
pub use error::EngineError;
pub use runtime::{NetworkRuntime, StoreIndex, TurnCoordinator};
pub use types::{Capabilities, Method, PeerRecord};
