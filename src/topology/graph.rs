//! Communication graph
//!
//! One node per host, one edge per flow, weight = total bytes in both
//! directions. Undirected for consumers, but every edge keeps the
//! underlying flow's initiator. Nodes and edges are parallel index
//! arrays - no back-references between hosts and flows.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use serde::Serialize;

use crate::core::{Flow, IpProtocol};

use super::SubnetSet;

/// One flow projected onto node indices
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Edge {
    pub a: usize,
    pub b: usize,
    pub protocol: IpProtocol,
    /// Total bytes, both directions summed
    pub bytes: u64,
    pub packets: u64,
    /// Node index of the flow initiator
    pub initiator: usize,
}

#[derive(Debug, Default)]
pub struct TopologyGraph {
    /// Sorted host addresses; edge fields index into this
    pub nodes: Vec<IpAddr>,
    pub edges: Vec<Edge>,
}

/// Output of the gateway-candidate scan, fed back into the classifier's
/// refinement pass
#[derive(Debug, Default)]
pub struct GatewayScan {
    pub candidates: BTreeSet<IpAddr>,
    /// Per-host bytes on flows whose peer is in a different subnet
    pub cross_subnet_bytes: BTreeMap<IpAddr, u64>,
}

impl TopologyGraph {
    /// Build from the sorted host list and the finalized flow set.
    ///
    /// Every edge references two nodes present in the host set, and
    /// there are no self-loops (the aggregator already drops them).
    pub fn from_flows(nodes: Vec<IpAddr>, flows: &[Flow]) -> Self {
        let index: BTreeMap<IpAddr, usize> =
            nodes.iter().enumerate().map(|(i, a)| (*a, i)).collect();

        let mut edges = Vec::with_capacity(flows.len());
        for flow in flows {
            let (Some(&a), Some(&b)) = (index.get(&flow.key.ip_a), index.get(&flow.key.ip_b))
            else {
                continue;
            };
            if a == b {
                continue;
            }
            let initiator = index.get(&flow.initiator.0).copied().unwrap_or(a);
            edges.push(Edge {
                a,
                b,
                protocol: flow.key.protocol,
                bytes: flow.total_bytes(),
                packets: flow.total_packets(),
                initiator,
            });
        }

        Self { nodes, edges }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Distinct-peer degree per node
    pub fn degrees(&self) -> Vec<usize> {
        let mut peers: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); self.nodes.len()];
        for edge in &self.edges {
            peers[edge.a].insert(edge.b);
            peers[edge.b].insert(edge.a);
        }
        peers.into_iter().map(|p| p.len()).collect()
    }

    /// Tag candidate gateways: nodes whose peers span more than one
    /// inferred subnet and whose distinct-peer degree clears the
    /// configured threshold.
    pub fn scan_gateways(&self, subnets: &SubnetSet, degree_threshold: usize) -> GatewayScan {
        let mut peers: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); self.nodes.len()];
        let mut peer_subnets: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); self.nodes.len()];
        let mut cross_bytes: Vec<u64> = vec![0; self.nodes.len()];

        for edge in &self.edges {
            for (node, peer) in [(edge.a, edge.b), (edge.b, edge.a)] {
                peers[node].insert(peer);
                if let Some(peer_subnet) = subnets.subnet_of(&self.nodes[peer]) {
                    peer_subnets[node].insert(peer_subnet);
                    if subnets.subnet_of(&self.nodes[node]) != Some(peer_subnet) {
                        cross_bytes[node] += edge.bytes;
                    }
                }
            }
        }

        let mut scan = GatewayScan::default();
        for (idx, addr) in self.nodes.iter().enumerate() {
            scan.cross_subnet_bytes.insert(*addr, cross_bytes[idx]);
            if peers[idx].len() >= degree_threshold && peer_subnets[idx].len() > 1 {
                scan.candidates.insert(*addr);
            }
        }
        scan
    }
}
