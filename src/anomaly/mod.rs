//! Rule-based anomaly detection
//!
//! Runs after classification over the finished host and flow sets. Each
//! rule is a pure function of those sets plus thresholds from
//! [`AnomalyConfig`]; findings carry a severity and a human-readable
//! detail string. Output order is deterministic (sorted by reference,
//! then kind).

use std::net::IpAddr;

use serde::Serialize;
use tracing::debug;

use crate::config::AnomalyConfig;
use crate::core::{AppProtocol, Flow};
use crate::hosts::{Host, HostTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyKind {
    /// A server-role host initiating connections to many peers
    BeaconingServer,
    /// Host speaks a protocol outside its classified role's profile
    ProtocolRoleMismatch,
    /// Bidirectional flow with a heavily one-sided byte ratio
    AsymmetricFlow,
}

/// What a finding points at
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnomalyRef {
    Host { addr: IpAddr },
    Flow { a: IpAddr, b: IpAddr, protocol: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    pub reference: AnomalyRef,
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub detail: String,
}

/// Apply every rule and return sorted findings
pub fn detect(hosts: &HostTable, flows: &[Flow], config: &AnomalyConfig) -> Vec<Anomaly> {
    let mut findings = Vec::new();

    for host in hosts.iter() {
        if let Some(f) = beaconing_server(host, config) {
            findings.push(f);
        }
        findings.extend(protocol_role_mismatch(host));
    }
    for flow in flows {
        if let Some(f) = asymmetric_flow(flow, config) {
            findings.push(f);
        }
    }

    findings.sort_by(|x, y| {
        x.reference
            .cmp(&y.reference)
            .then(x.kind.cmp(&y.kind))
            .then(x.detail.cmp(&y.detail))
    });
    debug!(findings = findings.len(), "anomaly rules applied");
    findings
}

/// Server-role host that itself initiates connections to many distinct
/// peers across several remote ports. Ordinary servers answer; one that
/// fans out like a client deserves a look.
fn beaconing_server(host: &Host, config: &AnomalyConfig) -> Option<Anomaly> {
    if !host.role.is_server_like() {
        return None;
    }
    let remote_ports: std::collections::BTreeSet<u16> =
        host.client_ports.iter().map(|(port, _)| *port).collect();
    if host.fan_out() < config.beacon_min_peers || remote_ports.len() < config.beacon_min_ports {
        return None;
    }
    Some(Anomaly {
        reference: AnomalyRef::Host { addr: host.addr },
        kind: AnomalyKind::BeaconingServer,
        severity: Severity::High,
        detail: format!(
            "{} host initiated connections to {} peers on {} ports",
            host.role.as_str(),
            host.fan_out(),
            remote_ports.len()
        ),
    })
}

/// Protocols a specialized role is expected to speak. DNS and NTP are
/// always allowed as network housekeeping.
fn allowed_for_role(host: &Host, proto: AppProtocol) -> bool {
    use crate::classify::Role;

    if matches!(proto, AppProtocol::Dns | AppProtocol::Ntp) {
        return true;
    }
    match host.role {
        Role::PlcModbus | Role::PlcS7comm | Role::PlcEthernetIp => proto.is_industrial(),
        Role::DatabaseServer => proto.is_database(),
        Role::WebServer => proto.is_web(),
        // Generic roles have no protocol profile
        _ => true,
    }
}

fn protocol_role_mismatch(host: &Host) -> Vec<Anomaly> {
    host.protocols
        .iter()
        .filter(|proto| !allowed_for_role(host, **proto))
        .map(|proto| Anomaly {
            reference: AnomalyRef::Host { addr: host.addr },
            kind: AnomalyKind::ProtocolRoleMismatch,
            severity: Severity::Medium,
            detail: format!(
                "{} host observed speaking {}",
                host.role.as_str(),
                proto.name()
            ),
        })
        .collect()
}

/// Bidirectional flow where one direction carries a large multiple of
/// the other. One-way flows are excluded: scans and unanswered probes
/// are a different signal.
fn asymmetric_flow(flow: &Flow, config: &AnomalyConfig) -> Option<Anomaly> {
    if flow.fwd_bytes == 0 || flow.bwd_bytes == 0 {
        return None;
    }
    if flow.total_bytes() < config.asymmetry_min_bytes {
        return None;
    }
    let (big, small) = if flow.fwd_bytes >= flow.bwd_bytes {
        (flow.fwd_bytes, flow.bwd_bytes)
    } else {
        (flow.bwd_bytes, flow.fwd_bytes)
    };
    let ratio = big as f64 / small as f64;
    if ratio < config.asymmetry_ratio {
        return None;
    }
    Some(Anomaly {
        reference: AnomalyRef::Flow {
            a: flow.key.ip_a,
            b: flow.key.ip_b,
            protocol: flow.key.protocol.to_string(),
        },
        kind: AnomalyKind::AsymmetricFlow,
        severity: Severity::Low,
        detail: format!(
            "{} bytes against {} ({:.0}x imbalance)",
            big, small, ratio
        ),
    })
}
