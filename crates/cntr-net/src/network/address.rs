//! Sequential IPv4 allocator over a configured CIDR block.
//!
//! Addresses are handed out in increasing order starting at
//! `network address + offset`. The pool is monotonic for the lifetime of the
//! process: there is no release operation, so a machine that disappears keeps
//! its lease until the daemon restarts.

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;

use super::error::{NetworkError, Result};

/// Offset of the first leased address from the network address.
pub const DEFAULT_POOL_OFFSET: u32 = 64;

#[derive(Debug, Clone)]
pub struct AddressPool {
    network: Ipv4Network,
    cursor: Ipv4Addr,
}

impl AddressPool {
    /// Create a pool over `cidr` whose first lease is `network + offset`.
    ///
    /// The host bits of `cidr` are ignored (`172.16.85.50/24` describes the
    /// block `172.16.85.0/24`). Fails if the first lease would not be a usable
    /// host address of the block.
    pub fn new(cidr: Ipv4Network, offset: u32) -> Result<Self> {
        let base = u32::from(cidr.network());
        let broadcast = u32::from(cidr.broadcast());
        let start = base
            .checked_add(offset)
            .filter(|start| *start > base && *start < broadcast)
            .ok_or_else(|| {
                NetworkError::InvalidPool(format!("offset {offset} is outside {cidr}"))
            })?;

        let network = Ipv4Network::new(cidr.network(), cidr.prefix())
            .map_err(|e| NetworkError::InvalidPool(format!("{cidr}: {e}")))?;

        Ok(Self {
            network,
            cursor: Ipv4Addr::from(start),
        })
    }

    /// Parse a CIDR string (surrounding whitespace allowed) and create a pool.
    pub fn parse(cidr: &str, offset: u32) -> Result<Self> {
        let network: Ipv4Network = cidr
            .trim()
            .parse()
            .map_err(|e| NetworkError::InvalidPool(format!("{cidr:?}: {e}")))?;
        Self::new(network, offset)
    }

    /// The block addresses are leased from.
    pub fn network(&self) -> Ipv4Network {
        self.network
    }

    /// Prefix length applied to every lease.
    pub fn prefix(&self) -> u8 {
        self.network.prefix()
    }

    /// The address the next call to [`next`](Self::next) will return.
    pub fn cursor(&self) -> Ipv4Addr {
        self.cursor
    }

    /// Number of addresses left before the pool is exhausted.
    pub fn remaining(&self) -> u32 {
        u32::from(self.network.broadcast()).saturating_sub(u32::from(self.cursor))
    }

    /// Lease the current address and advance the cursor by one.
    ///
    /// The broadcast address is never leased; once the cursor reaches it
    /// every call fails with [`NetworkError::PoolExhausted`].
    pub fn next(&mut self) -> Result<Ipv4Network> {
        let current = u32::from(self.cursor);
        if current >= u32::from(self.network.broadcast()) {
            return Err(NetworkError::PoolExhausted {
                cidr: self.network.to_string(),
            });
        }

        let lease = Ipv4Network::new(self.cursor, self.network.prefix())
            .map_err(|e| NetworkError::InvalidPool(e.to_string()))?;
        // current < broadcast <= u32::MAX
        self.cursor = Ipv4Addr::from(current + 1);
        Ok(lease)
    }
}
