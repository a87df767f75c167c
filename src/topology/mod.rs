//! Subnet inference
//!
//! Groups host addresses into inferred subnets by greedy longest-common-
//! prefix clustering: starting from the whole address space, any bucket
//! holding more members than the configured maximum is split one prefix
//! bit at a time. A finished bucket is described by the longest prefix
//! common to all of its members, so two lone hosts still report a tight
//! range instead of 0.0.0.0/0. Deterministic over the sorted host list;
//! every host lands in exactly one subnet.

pub mod graph;

pub use graph::{Edge, GatewayScan, TopologyGraph};

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::{Ipv4Network, Ipv6Network};
use serde::Serialize;

use crate::classify::Role;
use crate::hosts::HostTable;

/// An inferred address range and its members
#[derive(Debug, Clone, Serialize)]
pub struct Subnet {
    /// CIDR descriptor, e.g. `10.0.0.0/30`
    pub cidr: String,
    pub members: Vec<IpAddr>,
    /// Most frequent role among members; assigned after classification
    pub dominant_role: Role,
}

/// The full partition, with an address index for peer lookups
#[derive(Debug, Default)]
pub struct SubnetSet {
    pub subnets: Vec<Subnet>,
    index: BTreeMap<IpAddr, usize>,
}

impl SubnetSet {
    /// Which subnet an address belongs to
    pub fn subnet_of(&self, addr: &IpAddr) -> Option<usize> {
        self.index.get(addr).copied()
    }

    pub fn len(&self) -> usize {
        self.subnets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subnets.is_empty()
    }

    /// Recompute each subnet's dominant role from classified hosts.
    /// Frequency ties break on role ordinal to stay deterministic.
    pub fn assign_dominant_roles(&mut self, hosts: &HostTable) {
        for subnet in &mut self.subnets {
            let mut counts: BTreeMap<Role, usize> = BTreeMap::new();
            for addr in &subnet.members {
                if let Some(host) = hosts.get(addr) {
                    *counts.entry(host.role).or_insert(0) += 1;
                }
            }
            subnet.dominant_role = counts
                .into_iter()
                .max_by(|(role_a, n_a), (role_b, n_b)| n_a.cmp(n_b).then(role_b.cmp(role_a)))
                .map(|(role, _)| role)
                .unwrap_or(Role::Unknown);
        }
    }
}

/// Partition sorted host addresses into subnets
pub fn infer_subnets(addrs: &[IpAddr], max_hosts_per_subnet: usize) -> SubnetSet {
    let mut v4: Vec<Ipv4Addr> = Vec::new();
    let mut v6: Vec<Ipv6Addr> = Vec::new();
    for addr in addrs {
        match addr {
            IpAddr::V4(a) => v4.push(*a),
            IpAddr::V6(a) => v6.push(*a),
        }
    }
    v4.sort_unstable();
    v4.dedup();
    v6.sort_unstable();
    v6.dedup();

    let mut set = SubnetSet::default();

    let mut v4_buckets: Vec<Vec<Ipv4Addr>> = Vec::new();
    split_bucket_v4(&v4, 0, max_hosts_per_subnet, &mut v4_buckets);
    for bucket in v4_buckets {
        if bucket.is_empty() {
            continue;
        }
        let network = lcp_network_v4(&bucket);
        push_subnet(&mut set, network.to_string(), bucket.into_iter().map(IpAddr::V4));
    }

    let mut v6_buckets: Vec<Vec<Ipv6Addr>> = Vec::new();
    split_bucket_v6(&v6, 0, max_hosts_per_subnet, &mut v6_buckets);
    for bucket in v6_buckets {
        if bucket.is_empty() {
            continue;
        }
        let network = lcp_network_v6(&bucket);
        push_subnet(&mut set, network.to_string(), bucket.into_iter().map(IpAddr::V6));
    }

    set
}

fn push_subnet(set: &mut SubnetSet, cidr: String, members: impl Iterator<Item = IpAddr>) {
    let idx = set.subnets.len();
    let members: Vec<IpAddr> = members.collect();
    for addr in &members {
        set.index.insert(*addr, idx);
    }
    set.subnets.push(Subnet {
        cidr,
        members,
        dominant_role: Role::Unknown,
    });
}

fn split_bucket_v4(addrs: &[Ipv4Addr], prefix: u8, max: usize, out: &mut Vec<Vec<Ipv4Addr>>) {
    if addrs.is_empty() {
        return;
    }
    if addrs.len() <= max || prefix >= 32 {
        out.push(addrs.to_vec());
        return;
    }
    // Partition on the next prefix bit; input is sorted so this is a
    // single split point
    let bit = 1u32 << (31 - prefix);
    let pivot = addrs.partition_point(|a| u32::from(*a) & bit == 0);
    split_bucket_v4(&addrs[..pivot], prefix + 1, max, out);
    split_bucket_v4(&addrs[pivot..], prefix + 1, max, out);
}

fn split_bucket_v6(addrs: &[Ipv6Addr], prefix: u8, max: usize, out: &mut Vec<Vec<Ipv6Addr>>) {
    if addrs.is_empty() {
        return;
    }
    if addrs.len() <= max || prefix >= 128 {
        out.push(addrs.to_vec());
        return;
    }
    let bit = 1u128 << (127 - prefix);
    let pivot = addrs.partition_point(|a| u128::from(*a) & bit == 0);
    split_bucket_v6(&addrs[..pivot], prefix + 1, max, out);
    split_bucket_v6(&addrs[pivot..], prefix + 1, max, out);
}

/// Tightest network covering every member
fn lcp_network_v4(addrs: &[Ipv4Addr]) -> Ipv4Network {
    let first = u32::from(addrs[0]);
    let last = u32::from(addrs[addrs.len() - 1]);
    let prefix = (first ^ last).leading_zeros().min(32) as u8;
    let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    Ipv4Network::new(Ipv4Addr::from(first & mask), prefix)
        .unwrap_or_else(|_| Ipv4Network::from(Ipv4Addr::from(first)))
}

fn lcp_network_v6(addrs: &[Ipv6Addr]) -> Ipv6Network {
    let first = u128::from(addrs[0]);
    let last = u128::from(addrs[addrs.len() - 1]);
    let prefix = (first ^ last).leading_zeros().min(128) as u8;
    let mask = if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - prefix)
    };
    Ipv6Network::new(Ipv6Addr::from(first & mask), prefix)
        .unwrap_or_else(|_| Ipv6Network::from(Ipv6Addr::from(first)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs(list: &[&str]) -> Vec<IpAddr> {
        list.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn test_every_host_in_exactly_one_subnet() {
        let hosts = addrs(&[
            "10.0.0.1", "10.0.0.2", "10.0.0.3", "192.168.1.10", "192.168.1.11",
        ]);
        let set = infer_subnets(&hosts, 256);

        let total: usize = set.subnets.iter().map(|s| s.members.len()).sum();
        assert_eq!(total, hosts.len());
        for addr in &hosts {
            assert!(set.subnet_of(addr).is_some());
        }
    }

    #[test]
    fn test_tight_cidr_for_close_addresses() {
        let hosts = addrs(&["10.0.0.1", "10.0.0.2"]);
        let set = infer_subnets(&hosts, 256);
        assert_eq!(set.len(), 1);
        assert_eq!(set.subnets[0].cidr, "10.0.0.0/30");
    }

    #[test]
    fn test_distant_prefixes_split() {
        let hosts = addrs(&["10.0.0.1", "10.0.0.2", "192.168.1.10", "192.168.1.11"]);
        // Max 2 per subnet forces at least the 10/8 vs 192/8 split
        let set = infer_subnets(&hosts, 2);
        assert_eq!(set.len(), 2);
        assert_ne!(
            set.subnet_of(&"10.0.0.1".parse().unwrap()),
            set.subnet_of(&"192.168.1.10".parse().unwrap())
        );
    }

    #[test]
    fn test_single_host_is_slash_32() {
        let set = infer_subnets(&addrs(&["172.16.5.4"]), 256);
        assert_eq!(set.subnets[0].cidr, "172.16.5.4/32");
    }

    #[test]
    fn test_bucket_split_respects_max() {
        let hosts: Vec<IpAddr> = (1..=40u8)
            .map(|i| IpAddr::V4(Ipv4Addr::new(10, 0, 0, i)))
            .collect();
        let set = infer_subnets(&hosts, 16);
        for subnet in &set.subnets {
            assert!(subnet.members.len() <= 16);
        }
        let total: usize = set.subnets.iter().map(|s| s.members.len()).sum();
        assert_eq!(total, 40);
    }

    #[test]
    fn test_deterministic() {
        let hosts = addrs(&["10.0.0.1", "10.1.2.3", "10.200.0.1", "172.16.0.1"]);
        let a = infer_subnets(&hosts, 2);
        let b = infer_subnets(&hosts, 2);
        let cidrs_a: Vec<&str> = a.subnets.iter().map(|s| s.cidr.as_str()).collect();
        let cidrs_b: Vec<&str> = b.subnets.iter().map(|s| s.cidr.as_str()).collect();
        assert_eq!(cidrs_a, cidrs_b);
    }
}
