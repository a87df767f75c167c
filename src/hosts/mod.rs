//! Host model builder
//!
//! Projects the finalized flow set into per-address host records. Both
//! endpoints of every flow receive an observation: the initiator gains a
//! client-port usage, the responder a listening port. A host seen in both
//! directions carries both.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use crate::classify::Role;
use crate::core::{AppProtocol, Flow, IpProtocol};

/// A (port, transport) pair as observed on a host
pub type PortUse = (u16, IpProtocol);

/// A network endpoint with aggregated traffic observations.
///
/// `role` and `confidence` are written once by the classifier and are
/// read-only afterwards.
#[derive(Debug, Clone)]
pub struct Host {
    pub addr: IpAddr,

    /// Ports this host was observed accepting connections on
    pub listen_ports: BTreeSet<PortUse>,
    /// Remote ports this host was observed connecting to
    pub client_ports: BTreeSet<PortUse>,

    /// Application protocols seen on this host's flows
    pub protocols: BTreeSet<AppProtocol>,
    /// Transport protocols seen
    pub transports: BTreeSet<IpProtocol>,

    /// Distinct peers this host initiated connections to (fan-out)
    pub peers_out: BTreeSet<IpAddr>,
    /// Distinct peers that initiated connections to this host (fan-in)
    pub peers_in: BTreeSet<IpAddr>,

    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub flow_count: u64,

    /// Bytes on flows where this host was the responder, per listening port.
    /// This is the raw signal strength the classifier scores against.
    pub listener_bytes: BTreeMap<PortUse, u64>,
    /// Total bytes on flows this host initiated
    pub initiated_bytes: u64,
    /// Total bytes on flows this host received
    pub responder_bytes: u64,

    pub role: Role,
    pub confidence: f64,
}

impl Host {
    fn new(addr: IpAddr) -> Self {
        Self {
            addr,
            listen_ports: BTreeSet::new(),
            client_ports: BTreeSet::new(),
            protocols: BTreeSet::new(),
            transports: BTreeSet::new(),
            peers_out: BTreeSet::new(),
            peers_in: BTreeSet::new(),
            bytes_sent: 0,
            bytes_received: 0,
            flow_count: 0,
            listener_bytes: BTreeMap::new(),
            initiated_bytes: 0,
            responder_bytes: 0,
            role: Role::Unknown,
            confidence: 0.0,
        }
    }

    /// Distinct peers contacting this host
    pub fn fan_in(&self) -> usize {
        self.peers_in.len()
    }

    /// Distinct peers contacted by this host
    pub fn fan_out(&self) -> usize {
        self.peers_out.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_sent + self.bytes_received
    }

    /// Bytes observed as responder on any of the given ports
    pub fn listener_bytes_on(&self, ports: &BTreeSet<u16>) -> u64 {
        self.listener_bytes
            .iter()
            .filter(|((port, _), _)| ports.contains(port))
            .map(|(_, bytes)| *bytes)
            .sum()
    }

    /// True when this host listens on any of the given ports
    pub fn listens_on_any(&self, ports: &BTreeSet<u16>) -> bool {
        self.listen_ports.iter().any(|(port, _)| ports.contains(port))
    }
}

/// Per-address host records, keyed and iterated in address order
#[derive(Debug, Default)]
pub struct HostTable {
    hosts: BTreeMap<IpAddr, Host>,
}

impl HostTable {
    /// Fold the finalized flow set into host records
    pub fn from_flows(flows: &[Flow]) -> Self {
        let mut table = Self::default();
        for flow in flows {
            table.observe(flow);
        }
        table
    }

    fn observe(&mut self, flow: &Flow) {
        let (init_addr, _init_port) = flow.initiator;
        let (resp_addr, resp_port) = flow.responder;
        let proto = flow.key.protocol;
        let hint = flow.dominant_hint();
        let total = flow.total_bytes();

        {
            let initiator = self
                .hosts
                .entry(init_addr)
                .or_insert_with(|| Host::new(init_addr));
            initiator.client_ports.insert((resp_port, proto));
            initiator.peers_out.insert(resp_addr);
            initiator.bytes_sent += flow.fwd_bytes;
            initiator.bytes_received += flow.bwd_bytes;
            initiator.initiated_bytes += total;
            initiator.flow_count += 1;
            initiator.transports.insert(proto);
            if let Some(hint) = hint {
                initiator.protocols.insert(hint);
            }
        }

        {
            let responder = self
                .hosts
                .entry(resp_addr)
                .or_insert_with(|| Host::new(resp_addr));
            responder.listen_ports.insert((resp_port, proto));
            responder.peers_in.insert(init_addr);
            responder.bytes_sent += flow.bwd_bytes;
            responder.bytes_received += flow.fwd_bytes;
            responder.responder_bytes += total;
            *responder.listener_bytes.entry((resp_port, proto)).or_insert(0) += total;
            responder.flow_count += 1;
            responder.transports.insert(proto);
            if let Some(hint) = hint {
                responder.protocols.insert(hint);
            }
        }
    }

    pub fn get(&self, addr: &IpAddr) -> Option<&Host> {
        self.hosts.get(addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Host> {
        self.hosts.values_mut()
    }

    /// All addresses in sorted order
    pub fn addrs(&self) -> Vec<IpAddr> {
        self.hosts.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RawEvent;
    use chrono::{TimeZone, Utc};
    use std::net::Ipv4Addr;

    fn flow(src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16, bytes: u64) -> Flow {
        Flow::new(&RawEvent {
            timestamp: Utc.timestamp_opt(0, 0).unwrap(),
            src_ip: IpAddr::V4(Ipv4Addr::from(src)),
            dst_ip: IpAddr::V4(Ipv4Addr::from(dst)),
            src_port: sport,
            dst_port: dport,
            protocol: IpProtocol::Tcp,
            bytes,
            packets: 1,
            app_hint: crate::core::AppProtocol::from_port(dport, IpProtocol::Tcp),
        })
    }

    #[test]
    fn test_both_endpoints_observed() {
        let flows = vec![flow([10, 0, 0, 1], 50000, [10, 0, 0, 2], 502, 400)];
        let table = HostTable::from_flows(&flows);

        assert_eq!(table.len(), 2);
        let client = table.get(&"10.0.0.1".parse().unwrap()).unwrap();
        let server = table.get(&"10.0.0.2".parse().unwrap()).unwrap();

        assert!(client.client_ports.contains(&(502, IpProtocol::Tcp)));
        assert!(client.listen_ports.is_empty());
        assert_eq!(client.fan_out(), 1);
        assert_eq!(client.fan_in(), 0);

        assert!(server.listen_ports.contains(&(502, IpProtocol::Tcp)));
        assert_eq!(server.fan_in(), 1);
        assert_eq!(server.bytes_received, 400);
        assert_eq!(server.listener_bytes[&(502, IpProtocol::Tcp)], 400);
    }

    #[test]
    fn test_host_both_roles() {
        // 10.0.0.2 receives from .1 and initiates to .3
        let flows = vec![
            flow([10, 0, 0, 1], 50000, [10, 0, 0, 2], 80, 100),
            flow([10, 0, 0, 2], 50001, [10, 0, 0, 3], 5432, 100),
        ];
        let table = HostTable::from_flows(&flows);
        let middle = table.get(&"10.0.0.2".parse().unwrap()).unwrap();

        assert_eq!(middle.fan_in(), 1);
        assert_eq!(middle.fan_out(), 1);
        assert!(middle.listen_ports.contains(&(80, IpProtocol::Tcp)));
        assert!(middle.client_ports.contains(&(5432, IpProtocol::Tcp)));
    }
}
