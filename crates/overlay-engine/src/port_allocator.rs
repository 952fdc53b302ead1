//! TCP listen-port probing and reservation (spec.md §4.1).

use std::collections::HashMap;
use std::net::{TcpListener, ToSocketAddrs};

use thiserror::Error;

use crate::config::PortPolicy;
use crate::types::Purpose;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortError {
    #[error("no available ports in range")]
    NoAvailablePorts,
}

/// Probe a single port by binding `0.0.0.0:port` and immediately closing it.
/// Any failure other than the bind succeeding is treated as "unavailable"
/// (spec.md §4.1's failure semantics), regardless of the underlying OS
/// error — the allocator never distinguishes "in use" from other bind
/// failures because a caller of `reserve` cannot act on the difference.
fn probe(port: u16) -> bool {
    let addr = format!("0.0.0.0:{port}");
    match addr.to_socket_addrs() {
        Ok(mut addrs) => match addrs.next() {
            Some(sock_addr) => TcpListener::bind(sock_addr).is_ok(),
            None => false,
        },
        Err(_) => false,
    }
}

/// Exclusive, in-process port reservation table (spec.md §4.1).
///
/// `reserve`/`release` never hold the probed socket open — callers bind
/// their own listener on the returned port.
#[derive(Debug, Default)]
pub struct PortAllocator {
    policy: PortPolicy,
    allocated: HashMap<Purpose, u16>,
}

impl PortAllocator {
    pub fn new(policy: PortPolicy) -> Self {
        Self {
            policy,
            allocated: HashMap::new(),
        }
    }

    /// Try `preferred_port` first; if unavailable, scan
    /// `[range_start, range_end]` ascending, skipping ports already
    /// allocated to another purpose and the preferred port just tested.
    pub fn reserve(&mut self, preferred_port: u16, purpose: Purpose) -> Result<u16, PortError> {
        let taken: Vec<u16> = self
            .allocated
            .iter()
            .filter(|(p, _)| **p != purpose)
            .map(|(_, port)| *port)
            .collect();

        if !taken.contains(&preferred_port) && probe(preferred_port) {
            self.allocated.insert(purpose, preferred_port);
            log::info!("port_allocator: reserved preferred port {preferred_port} for {purpose:?}");
            return Ok(preferred_port);
        }

        for candidate in self.policy.range_start..=self.policy.range_end {
            if candidate == preferred_port || taken.contains(&candidate) {
                continue;
            }
            if probe(candidate) {
                self.allocated.insert(purpose, candidate);
                log::info!("port_allocator: reserved fallback port {candidate} for {purpose:?}");
                return Ok(candidate);
            }
        }

        log::warn!("port_allocator: no available ports in [{}, {}]", self.policy.range_start, self.policy.range_end);
        Err(PortError::NoAvailablePorts)
    }

    pub fn release(&mut self, purpose: Purpose) {
        if let Some(port) = self.allocated.remove(&purpose) {
            log::debug!("port_allocator: released port {port} from {purpose:?}");
        }
    }

    pub fn allocated_ports(&self) -> Vec<u16> {
        self.allocated.values().copied().collect()
    }

    pub fn port_for(&self, purpose: Purpose) -> Option<u16> {
        self.allocated.get(&purpose).copied()
    }
}
