// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Read-traffic node selection over a topology snapshot.
//!
//! A routing layer hands in an ordered sequence of [`NodeCandidate`]s and
//! a [`ReadPreference`]; selection filters and reorders without ever
//! mutating the snapshot. The topology collaborator owns refresh and
//! distance measurement; this module is a pure function over whatever it
//! is given.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{KvError, Result};

// ============================================================================
// Candidates
// ============================================================================

/// Role of a node in the topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeRole {
    /// Primary, accepts writes.
    Upstream,

    /// Secondary, serves reads.
    Replica,
}

/// One node in a topology snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeCandidate {
    /// Role of the node.
    pub role: NodeRole,

    /// Host name or IP literal.
    pub host: String,

    /// Port.
    pub port: u16,

    /// Round-trip distance hint supplied by the topology collaborator.
    pub latency_hint: Option<Duration>,
}

impl NodeCandidate {
    /// Create a candidate without a distance hint.
    pub fn new(role: NodeRole, host: impl Into<String>, port: u16) -> Self {
        Self {
            role,
            host: host.into(),
            port,
            latency_hint: None,
        }
    }

    /// Attach a distance hint.
    pub fn with_latency_hint(mut self, hint: Duration) -> Self {
        self.latency_hint = Some(hint);
        self
    }

    fn is_upstream(&self) -> bool {
        self.role == NodeRole::Upstream
    }

    fn is_replica(&self) -> bool {
        self.role == NodeRole::Replica
    }
}

// ============================================================================
// CIDR blocks
// ============================================================================

/// An IPv4 or IPv6 CIDR block.
///
/// Parsing is eager and strict: a missing `/`, an unparseable address, or
/// an out-of-range prefix length all fail with
/// [`KvError::InvalidArgument`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CidrBlock {
    addr: IpAddr,
    prefix: u8,
}

impl CidrBlock {
    /// Parse `address/prefix` notation.
    pub fn parse(block: &str) -> Result<Self> {
        let Some((addr_part, prefix_part)) = block.split_once('/') else {
            return Err(KvError::InvalidArgument(format!(
                "CIDR block {:?} is missing a '/'",
                block
            )));
        };

        let addr: IpAddr = addr_part.parse().map_err(|_| {
            KvError::InvalidArgument(format!("CIDR block {:?} has an unparseable address", block))
        })?;

        let prefix: u8 = prefix_part.parse().map_err(|_| {
            KvError::InvalidArgument(format!(
                "CIDR block {:?} has an unparseable prefix length",
                block
            ))
        })?;

        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix > max {
            return Err(KvError::InvalidArgument(format!(
                "CIDR block {:?} prefix length exceeds {}",
                block, max
            )));
        }

        Ok(Self { addr, prefix })
    }

    /// Whether the block covers the given address. Address families never
    /// match across each other.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                if self.prefix == 0 {
                    return true;
                }
                let shift = 32 - u32::from(self.prefix);
                u32::from_be_bytes(net.octets()) >> shift
                    == u32::from_be_bytes(ip.octets()) >> shift
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                if self.prefix == 0 {
                    return true;
                }
                let shift = 128 - u32::from(self.prefix);
                u128::from_be_bytes(net.octets()) >> shift
                    == u128::from_be_bytes(ip.octets()) >> shift
            }
            _ => false,
        }
    }
}

impl FromStr for CidrBlock {
    type Err = KvError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// ============================================================================
// Preferences
// ============================================================================

/// Node-selection preference for read traffic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadPreference {
    /// Only upstream nodes.
    Upstream,

    /// All nodes; upstream nodes first.
    UpstreamPreferred,

    /// Only replica nodes.
    Replica,

    /// All nodes; replicas first.
    ReplicaPreferred,

    /// All nodes, ordered by ascending distance hint.
    Nearest,

    /// Only replica nodes, any of which may be used.
    AnyReplica,

    /// Only nodes whose address falls inside one of the blocks.
    Subnet(Vec<CidrBlock>),
}

impl ReadPreference {
    /// Build a subnet preference from CIDR notation, validating eagerly.
    pub fn subnet<'a>(blocks: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let blocks: Vec<CidrBlock> = blocks
            .into_iter()
            .map(CidrBlock::parse)
            .collect::<Result<_>>()?;
        if blocks.is_empty() {
            return Err(KvError::InvalidArgument(
                "subnet preference requires at least one CIDR block".into(),
            ));
        }
        Ok(Self::Subnet(blocks))
    }

    /// Resolve a preference by name.
    ///
    /// Names are matched case-insensitively, with or without
    /// word-separating underscores. Unknown names fail at lookup time,
    /// not at selection time; `subnet` cannot be resolved by name because
    /// it requires blocks.
    pub fn from_name(name: &str) -> Result<Self> {
        let folded: String = name
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match folded.as_str() {
            "upstream" => Ok(Self::Upstream),
            "upstreampreferred" => Ok(Self::UpstreamPreferred),
            "replica" => Ok(Self::Replica),
            "replicapreferred" => Ok(Self::ReplicaPreferred),
            "nearest" => Ok(Self::Nearest),
            "anyreplica" => Ok(Self::AnyReplica),
            _ => Err(KvError::InvalidArgument(format!(
                "unknown read preference {:?}",
                name
            ))),
        }
    }

    /// Select and order candidates for this preference.
    ///
    /// The input snapshot is never mutated; relative order of equally
    /// eligible nodes is always preserved.
    pub fn select(&self, candidates: &[NodeCandidate]) -> Vec<NodeCandidate> {
        match self {
            Self::Upstream => candidates
                .iter()
                .filter(|c| c.is_upstream())
                .cloned()
                .collect(),

            Self::UpstreamPreferred => {
                let mut result: Vec<NodeCandidate> = candidates
                    .iter()
                    .filter(|c| c.is_upstream())
                    .cloned()
                    .collect();
                result.extend(candidates.iter().filter(|c| !c.is_upstream()).cloned());
                result
            }

            Self::Replica | Self::AnyReplica => candidates
                .iter()
                .filter(|c| c.is_replica())
                .cloned()
                .collect(),

            Self::ReplicaPreferred => {
                let mut result: Vec<NodeCandidate> = candidates
                    .iter()
                    .filter(|c| c.is_replica())
                    .cloned()
                    .collect();
                result.extend(candidates.iter().filter(|c| !c.is_replica()).cloned());
                result
            }

            Self::Nearest => {
                let mut result: Vec<NodeCandidate> = candidates.to_vec();
                // Stable sort: ties and hintless nodes keep snapshot order,
                // hintless nodes sort last.
                result.sort_by_key(|c| (c.latency_hint.is_none(), c.latency_hint));
                result
            }

            Self::Subnet(blocks) => candidates
                .iter()
                .filter(|c| {
                    candidate_ips(c)
                        .iter()
                        .any(|ip| blocks.iter().any(|b| b.contains(ip)))
                })
                .cloned()
                .collect(),
        }
    }
}

/// Literal addresses a candidate can be matched against.
///
/// A bare hostname cannot be subnet-matched and yields nothing, except
/// `localhost`, which matches as the loopback addresses.
fn candidate_ips(candidate: &NodeCandidate) -> Vec<IpAddr> {
    if let Ok(ip) = candidate.host.parse::<IpAddr>() {
        return vec![ip];
    }
    if candidate.host.eq_ignore_ascii_case("localhost") {
        return vec![
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(Ipv6Addr::LOCALHOST),
        ];
    }
    Vec::new()
}

// ============================================================================
// Tests
// ============================================================================
