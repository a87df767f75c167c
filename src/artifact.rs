//! Analysis artifact
//!
//! The single serializable output of a run. Everything here is plain
//! data sorted into deterministic order: producing the artifact twice
//! from the same inputs yields byte-identical JSON. No wallclock values
//! are recorded, only timestamps carried by the traffic itself.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::Serialize;

use crate::anomaly::Anomaly;
use crate::classify::Role;
use crate::core::Flow;
use crate::hosts::HostTable;
use crate::topology::{SubnetSet, TopologyGraph};

#[derive(Debug, Serialize)]
pub struct AnalysisArtifact {
    pub summary: Summary,
    pub hosts: Vec<HostReport>,
    pub subnets: Vec<SubnetReport>,
    pub connections: Vec<ConnectionReport>,
    pub anomalies: Vec<Anomaly>,
}

/// Per-input accounting, in the order the inputs were given
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub name: String,
    /// Resolved format; absent when the input never got that far
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub events: u64,
    pub malformed: u64,
}

#[derive(Debug, Serialize)]
pub struct ProtocolStat {
    pub flows: u64,
    pub bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct Summary {
    pub host_count: usize,
    pub subnet_count: usize,
    pub connection_count: usize,
    pub anomaly_count: usize,
    /// Hosts per role name
    pub role_distribution: BTreeMap<String, usize>,
    /// Flows and bytes per application protocol; flows with no dominant
    /// hint are bucketed under their transport name
    pub protocol_distribution: BTreeMap<String, ProtocolStat>,
    pub sources: Vec<SourceReport>,
    /// Inputs that failed to parse entirely
    pub failed_sources: usize,
    /// Records skipped across all inputs (malformed plus self-loops)
    pub skipped_records: u64,
}

/// A listening port with its transport; the same port number can appear
/// once per transport (e.g. DNS on 53/tcp and 53/udp)
#[derive(Debug, Serialize)]
pub struct ListenPort {
    pub port: u16,
    pub transport: String,
}

#[derive(Debug, Serialize)]
pub struct HostReport {
    pub addr: IpAddr,
    pub role: Role,
    pub confidence: f64,
    pub listen_ports: Vec<ListenPort>,
    pub protocols: Vec<String>,
    pub fan_in: usize,
    pub fan_out: usize,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub flow_count: u64,
}

#[derive(Debug, Serialize)]
pub struct SubnetReport {
    pub cidr: String,
    pub host_count: usize,
    pub dominant_role: Role,
    pub members: Vec<IpAddr>,
}

#[derive(Debug, Serialize)]
pub struct ConnectionReport {
    pub a: IpAddr,
    pub b: IpAddr,
    pub initiator: IpAddr,
    pub transport: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    pub bytes: u64,
    pub packets: u64,
}

/// Assemble the artifact from finished pipeline stages.
///
/// `flows` must be the same sorted list the graph was built from, so
/// connections come out in flow-key order.
pub fn assemble(
    hosts: &HostTable,
    subnets: &SubnetSet,
    graph: &TopologyGraph,
    flows: &[Flow],
    anomalies: Vec<Anomaly>,
    sources: Vec<SourceReport>,
    skipped_records: u64,
) -> AnalysisArtifact {
    let host_reports: Vec<HostReport> = hosts
        .iter()
        .map(|host| HostReport {
            addr: host.addr,
            role: host.role,
            confidence: host.confidence,
            listen_ports: host
                .listen_ports
                .iter()
                .map(|(port, proto)| ListenPort {
                    port: *port,
                    transport: proto.to_string(),
                })
                .collect(),
            protocols: host.protocols.iter().map(|p| p.name().to_string()).collect(),
            fan_in: host.fan_in(),
            fan_out: host.fan_out(),
            bytes_sent: host.bytes_sent,
            bytes_received: host.bytes_received,
            flow_count: host.flow_count,
        })
        .collect();

    let subnet_reports: Vec<SubnetReport> = subnets
        .subnets
        .iter()
        .map(|subnet| SubnetReport {
            cidr: subnet.cidr.clone(),
            host_count: subnet.members.len(),
            dominant_role: subnet.dominant_role,
            members: subnet.members.clone(),
        })
        .collect();

    let connections: Vec<ConnectionReport> = flows
        .iter()
        .map(|flow| ConnectionReport {
            a: flow.key.ip_a,
            b: flow.key.ip_b,
            initiator: flow.initiator.0,
            transport: flow.key.protocol.to_string(),
            protocol: flow.dominant_hint().map(|h| h.name().to_string()),
            bytes: flow.total_bytes(),
            packets: flow.total_packets(),
        })
        .collect();

    let mut role_distribution: BTreeMap<String, usize> = BTreeMap::new();
    for host in hosts.iter() {
        *role_distribution
            .entry(host.role.as_str().to_string())
            .or_insert(0) += 1;
    }

    let mut protocol_distribution: BTreeMap<String, ProtocolStat> = BTreeMap::new();
    for flow in flows {
        let key = match flow.dominant_hint() {
            Some(hint) => hint.name().to_string(),
            None => flow.key.protocol.to_string(),
        };
        let stat = protocol_distribution
            .entry(key)
            .or_insert(ProtocolStat { flows: 0, bytes: 0 });
        stat.flows += 1;
        stat.bytes += flow.total_bytes();
    }

    let failed_sources = sources.iter().filter(|s| !s.ok).count();

    AnalysisArtifact {
        summary: Summary {
            host_count: host_reports.len(),
            subnet_count: subnet_reports.len(),
            connection_count: graph.edge_count(),
            anomaly_count: anomalies.len(),
            role_distribution,
            protocol_distribution,
            sources,
            failed_sources,
            skipped_records,
        },
        hosts: host_reports,
        subnets: subnet_reports,
        connections,
        anomalies,
    }
}
