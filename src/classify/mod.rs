//! Role classification
//!
//! Assigns exactly one role and a confidence value to every host. The
//! rule set is an explicit ordered list of pure predicate/score functions
//! evaluated in sequence - rule priority is data, not override order.
//! The first rule that clears the configured minimum confidence wins;
//! candidates inside a rule are tie-broken by highest raw signal.
//!
//! Confidence is the fraction of the host's total byte volume consistent
//! with the winning rule's signature, and is surfaced in the artifact
//! alongside the role.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ClassifierConfig, SignatureTable, TopologyConfig};
use crate::hosts::{Host, HostTable};

/// Functional classification of a host. Closed set; `Unknown` is the
/// terminal state for hosts no rule matches confidently - a valid
/// result, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Client,
    Server,
    PlcModbus,
    PlcS7comm,
    PlcEthernetIp,
    WebServer,
    DatabaseServer,
    WebClient,
    Gateway,
    Unknown,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "CLIENT",
            Role::Server => "SERVER",
            Role::PlcModbus => "PLC_MODBUS",
            Role::PlcS7comm => "PLC_S7COMM",
            Role::PlcEthernetIp => "PLC_ETHERNET_IP",
            Role::WebServer => "WEB_SERVER",
            Role::DatabaseServer => "DATABASE_SERVER",
            Role::WebClient => "WEB_CLIENT",
            Role::Gateway => "GATEWAY",
            Role::Unknown => "UNKNOWN",
        }
    }

    /// PLC variants
    pub fn is_plc(&self) -> bool {
        matches!(self, Role::PlcModbus | Role::PlcS7comm | Role::PlcEthernetIp)
    }

    /// Roles expected to accept connections rather than make them
    pub fn is_server_like(&self) -> bool {
        matches!(self, Role::Server | Role::WebServer | Role::DatabaseServer) || self.is_plc()
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one rule against one host
#[derive(Debug, Clone, Copy)]
pub struct RoleMatch {
    pub role: Role,
    pub confidence: f64,
    /// Raw matched byte volume, used to break ties
    pub signal: u64,
}

/// One entry in the ordered rule list
pub struct ClassifyRule {
    pub name: &'static str,
    pub eval: fn(&Host, &SignatureTable) -> Option<RoleMatch>,
}

/// The rule set in priority order. Protocol signatures outrank service
/// signatures, which outrank pure directionality; the gateway rule runs
/// separately as a refinement pass because it needs topology output.
pub fn rules() -> &'static [ClassifyRule] {
    &[
        ClassifyRule {
            name: "plc_signature",
            eval: plc_signature,
        },
        ClassifyRule {
            name: "database_signature",
            eval: database_signature,
        },
        ClassifyRule {
            name: "web_server_signature",
            eval: web_server_signature,
        },
        ClassifyRule {
            name: "server_directionality",
            eval: server_directionality,
        },
        ClassifyRule {
            name: "client_directionality",
            eval: client_directionality,
        },
    ]
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// An industrial endpoint listening on a PLC port is that PLC variant
/// regardless of what else it talks - industrial endpoints rarely serve
/// unrelated roles.
fn plc_signature(host: &Host, sig: &SignatureTable) -> Option<RoleMatch> {
    let variants: [(Role, &BTreeSet<u16>); 3] = [
        (Role::PlcModbus, &sig.modbus_ports),
        (Role::PlcS7comm, &sig.s7comm_ports),
        (Role::PlcEthernetIp, &sig.ethernet_ip_ports),
    ];

    let mut best: Option<RoleMatch> = None;
    for (role, ports) in variants {
        if !host.listens_on_any(ports) {
            continue;
        }
        let signal = host.listener_bytes_on(ports);
        let candidate = RoleMatch {
            role,
            confidence: ratio(signal, host.total_bytes()),
            signal,
        };
        // Strictly-greater keeps the earlier variant on exact ties
        if best.map_or(true, |b| candidate.signal > b.signal) {
            best = Some(candidate);
        }
    }
    best
}

fn database_signature(host: &Host, sig: &SignatureTable) -> Option<RoleMatch> {
    if !host.listens_on_any(&sig.database_ports) {
        return None;
    }
    let signal = host.listener_bytes_on(&sig.database_ports);
    Some(RoleMatch {
        role: Role::DatabaseServer,
        confidence: ratio(signal, host.total_bytes()),
        signal,
    })
}

fn web_server_signature(host: &Host, sig: &SignatureTable) -> Option<RoleMatch> {
    if !host.listens_on_any(&sig.web_ports) {
        return None;
    }
    // Predominantly inbound: at least as much traffic arrives on
    // connections it accepted as on connections it opened
    if host.responder_bytes < host.initiated_bytes {
        return None;
    }
    let signal = host.listener_bytes_on(&sig.web_ports);
    Some(RoleMatch {
        role: Role::WebServer,
        confidence: ratio(signal, host.total_bytes()),
        signal,
    })
}

/// High fan-in, little to no initiated traffic, no signature match
fn server_directionality(host: &Host, _sig: &SignatureTable) -> Option<RoleMatch> {
    let fan_in = host.fan_in();
    let fan_out = host.fan_out();
    if fan_in == 0 {
        return None;
    }
    if fan_out != 0 && fan_in < 3 * fan_out {
        return None;
    }
    Some(RoleMatch {
        role: Role::Server,
        confidence: ratio(host.responder_bytes, host.total_bytes()),
        signal: host.responder_bytes,
    })
}

/// High fan-out, little to no received traffic; WEB_CLIENT when its only
/// application protocols are HTTP/HTTPS
fn client_directionality(host: &Host, _sig: &SignatureTable) -> Option<RoleMatch> {
    let fan_in = host.fan_in();
    let fan_out = host.fan_out();
    if fan_out == 0 {
        return None;
    }
    if fan_in != 0 && fan_out < 3 * fan_in {
        return None;
    }
    let role = if !host.protocols.is_empty() && host.protocols.iter().all(|p| p.is_web()) {
        Role::WebClient
    } else {
        Role::Client
    };
    Some(RoleMatch {
        role,
        confidence: ratio(host.initiated_bytes, host.total_bytes()),
        signal: host.initiated_bytes,
    })
}

/// First classification pass: ordered rules, first qualifying match wins
pub fn classify_hosts(hosts: &mut HostTable, config: &ClassifierConfig) {
    for host in hosts.iter_mut() {
        for rule in rules() {
            if let Some(m) = (rule.eval)(host, &config.signatures) {
                if m.confidence >= config.min_confidence {
                    debug!(addr = %host.addr, rule = rule.name, role = %m.role,
                           confidence = m.confidence, "host classified");
                    host.role = m.role;
                    host.confidence = m.confidence;
                    break;
                }
            }
        }
    }
}

/// Gateway refinement: a single extra pass over still-unknown hosts using
/// the topology stage's candidate tags, never an unbounded fixed point.
///
/// `cross_subnet_bytes` is the per-host byte volume on flows whose peer
/// sits in a different inferred subnet.
pub fn refine_gateways(
    hosts: &mut HostTable,
    candidates: &BTreeSet<IpAddr>,
    cross_subnet_bytes: &BTreeMap<IpAddr, u64>,
    topology: &TopologyConfig,
    config: &ClassifierConfig,
) {
    for host in hosts.iter_mut() {
        if host.role != Role::Unknown || !candidates.contains(&host.addr) {
            continue;
        }
        let fan_in = host.fan_in();
        let fan_out = host.fan_out();
        if fan_in == 0 || fan_out == 0 {
            continue;
        }
        let imbalance = fan_in.max(fan_out) as f64 / fan_in.min(fan_out) as f64;
        if imbalance > topology.gateway_balance_ratio {
            continue;
        }
        let crossing = cross_subnet_bytes.get(&host.addr).copied().unwrap_or(0);
        let confidence = ratio(crossing, host.total_bytes());
        if confidence >= config.min_confidence {
            debug!(addr = %host.addr, confidence, "gateway refinement match");
            host.role = Role::Gateway;
            host.confidence = confidence;
        }
    }
}
