//! Cluster Topology
//!
//! A [`Cluster`] is a named set of nodes, optionally attached to a network and
//! a peer network. Nodes are generated from the cluster name: a cluster named
//! `x` with three nodes has nodes `x1`, `x2`, `x3`. When a network is given,
//! node *i* gets the *i+1*-th host address of that network.
//!
//! [`NodeBitmap`] selects a subset of nodes for one command invocation.

use crate::error::{EngineError, EngineResult};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

// =============================================================================
// NetworkAddress
// =============================================================================

/// IPv4 network in `a.b.c.d/prefix` notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkAddress {
    address: Ipv4Addr,
    prefix: u8,
}

impl NetworkAddress {
    /// Create a network from a base address and prefix length (0..=32).
    pub fn new(address: Ipv4Addr, prefix: u8) -> EngineResult<Self> {
        if prefix > 32 {
            return Err(EngineError::InvalidNetwork(format!("{}/{}", address, prefix)));
        }
        Ok(Self { address, prefix })
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    fn mask(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix))
        }
    }

    /// Number of usable host addresses (network and broadcast excluded).
    pub fn host_capacity(&self) -> u64 {
        let total = 1_u64 << (32 - u32::from(self.prefix));
        total.saturating_sub(2)
    }

    /// The `n`-th host address of the network, counting from 1.
    pub fn host(&self, n: u64) -> Option<Ipv4Addr> {
        if n == 0 || n > self.host_capacity() {
            return None;
        }
        let base = u32::from(self.address) & self.mask();
        let offset = u32::try_from(n).ok()?;
        Some(Ipv4Addr::from(base.checked_add(offset)?))
    }
}

impl FromStr for NetworkAddress {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EngineError::InvalidNetwork(s.to_string());
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let address: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        Self::new(address, prefix).map_err(|_| invalid())
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix)
    }
}

// =============================================================================
// Cluster
// =============================================================================

/// One generated cluster node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    pub name: String,
    pub index: usize,
    pub address: Option<Ipv4Addr>,
    pub peer_address: Option<Ipv4Addr>,
}

/// Cluster definition built by the `cluster` command.
/// Largest number of nodes a cluster may have.
pub const MAX_CLUSTER_SIZE: usize = 65_536;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cluster {
    name: String,
    network: Option<NetworkAddress>,
    peer_network: Option<NetworkAddress>,
    nodes: Vec<ClusterNode>,
}

impl Cluster {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_network(mut self, network: NetworkAddress) -> Self {
        self.network = Some(network);
        self
    }

    pub fn with_peer_network(mut self, network: NetworkAddress) -> Self {
        self.peer_network = Some(network);
        self
    }

    /// Generate `size` nodes, replacing any previously generated ones.
    ///
    /// Fails if the name is empty, `size` exceeds [`MAX_CLUSTER_SIZE`] or a
    /// configured network is too small.
    pub fn generate_nodes(mut self, size: usize) -> EngineResult<Self> {
        if self.name.is_empty() {
            return Err(EngineError::EmptyClusterName);
        }
        if size > MAX_CLUSTER_SIZE {
            return Err(EngineError::ClusterTooLarge {
                size,
                max: MAX_CLUSTER_SIZE,
            });
        }
        for network in [self.network, self.peer_network].into_iter().flatten() {
            if (size as u64) > network.host_capacity() {
                return Err(EngineError::NetworkExhausted {
                    network: network.to_string(),
                    size,
                });
            }
        }
        self.nodes = (0..size)
            .map(|index| ClusterNode {
                name: format!("{}{}", self.name, index + 1),
                index,
                address: self.network.and_then(|n| n.host(index as u64 + 1)),
                peer_address: self.peer_network.and_then(|n| n.host(index as u64 + 1)),
            })
            .collect();
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn network(&self) -> Option<NetworkAddress> {
        self.network
    }

    pub fn peer_network(&self) -> Option<NetworkAddress> {
        self.peer_network
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &[ClusterNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&ClusterNode> {
        self.nodes.get(index)
    }
}

// =============================================================================
// NodeBitmap
// =============================================================================

/// Immutable node selection: bit *i* set means node *i* is selected.
///
/// The length always equals the cluster size at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeBitmap {
    bits: Vec<bool>,
}

impl NodeBitmap {
    /// Selection of `len` nodes with nothing selected.
    pub fn empty(len: usize) -> Self {
        Self {
            bits: vec![false; len],
        }
    }

    /// Selection of every node.
    pub fn all(len: usize) -> Self {
        Self {
            bits: vec![true; len],
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn is_selected(&self, index: usize) -> bool {
        self.bits.get(index).copied().unwrap_or(false)
    }

    pub fn count(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    /// Indices of the selected nodes in ascending order.
    pub fn selected(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.then_some(i))
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.bits
    }
}

impl From<Vec<bool>> for NodeBitmap {
    fn from(bits: Vec<bool>) -> Self {
        Self { bits }
    }
}
