//! Free TCP port discovery.
use std::net::{IpAddr, Ipv4Addr};

use tokio::net::TcpListener;
use tracing::{debug, trace};

use suitepool_model::PortBlock;

use crate::error::CoreError;

/// Finds currently unused TCP ports by binding ephemeral listeners.
///
/// Ports are free at the instant of the call only; nothing holds them once
/// [`PortAllocator::allocate`] returns.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    host: IpAddr,
    /// Extra bind attempts tolerated on top of the number of ports wanted.
    retries: usize,
}

impl PortAllocator {
    pub fn new(host: IpAddr) -> Self {
        Self { host, retries: 32 }
    }

    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    /// Reserve `n` distinct free ports.
    ///
    /// Every listener stays open until all `n` are found, so the OS can not
    /// hand out the same port twice.
    pub async fn allocate(&self, n: usize) -> Result<Vec<u16>, CoreError> {
        let mut held = Vec::with_capacity(n);
        let mut attempts = 0;

        while held.len() < n {
            if attempts >= n + self.retries {
                return Err(CoreError::PortAllocation {
                    wanted: n,
                    found: held.len(),
                });
            }
            attempts += 1;

            match TcpListener::bind((self.host, 0)).await {
                Ok(listener) => match listener.local_addr() {
                    Ok(addr) => held.push((addr.port(), listener)),
                    Err(e) => trace!(target: "suitepool.ports", error = %e, "no local addr"),
                },
                Err(e) => trace!(target: "suitepool.ports", error = %e, "bind failed"),
            }
        }

        let ports: Vec<u16> = held.into_iter().map(|(port, _listener)| port).collect();
        debug!(target: "suitepool.ports", ?ports, "allocated ports");
        Ok(ports)
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

/// Split a flat port list into one block per slot.
///
/// Slot `i` gets `ports[i * (per_slot + 1)]` as primary followed by its
/// `per_slot` requested ports.
pub fn partition(ports: &[u16], slots: usize, per_slot: usize) -> Vec<PortBlock> {
    let block = per_slot + 1;
    ports
        .chunks_exact(block)
        .take(slots)
        .map(|chunk| PortBlock::new(chunk[0], chunk[1..].to_vec()))
        .collect()
}
