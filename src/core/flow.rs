//! Bidirectional flow reconstruction
//!
//! A flow is the aggregate of all events between two endpoints on one
//! transport protocol. Flow identity is symmetric: events with swapped
//! source/destination fold into the same flow.

use std::net::IpAddr;

use chrono::{DateTime, Utc};

use super::event::{AppProtocol, IpProtocol, RawEvent};

/// Unique key identifying a flow (normalized so the smaller endpoint is
/// always first)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowKey {
    pub ip_a: IpAddr,
    pub port_a: u16,
    pub ip_b: IpAddr,
    pub port_b: u16,
    pub protocol: IpProtocol,
}

impl FlowKey {
    /// Create from an event, order-independent
    pub fn from_event(ev: &RawEvent) -> Self {
        if (ev.src_ip, ev.src_port) <= (ev.dst_ip, ev.dst_port) {
            Self {
                ip_a: ev.src_ip,
                port_a: ev.src_port,
                ip_b: ev.dst_ip,
                port_b: ev.dst_port,
                protocol: ev.protocol,
            }
        } else {
            Self {
                ip_a: ev.dst_ip,
                port_a: ev.dst_port,
                ip_b: ev.src_ip,
                port_b: ev.src_port,
                protocol: ev.protocol,
            }
        }
    }
}

/// A reconstructed bidirectional session between two endpoints.
///
/// The initiator is the source of the earliest event seen for the key;
/// forward counters are initiator-to-responder, backward the reverse.
#[derive(Debug, Clone)]
pub struct Flow {
    pub key: FlowKey,

    /// Initiator endpoint (address, port)
    pub initiator: (IpAddr, u16),
    /// Responder endpoint (address, port)
    pub responder: (IpAddr, u16),

    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,

    /// Initiator -> responder
    pub fwd_packets: u64,
    pub fwd_bytes: u64,
    /// Responder -> initiator
    pub bwd_packets: u64,
    pub bwd_bytes: u64,

    /// Application-protocol hints with corroborating event counts, in
    /// first-observed order. The order matters for the tie-break rule.
    hints: Vec<(AppProtocol, u64)>,
}

impl Flow {
    /// Create a new flow from its first event
    pub fn new(ev: &RawEvent) -> Self {
        let mut flow = Self {
            key: FlowKey::from_event(ev),
            initiator: (ev.src_ip, ev.src_port),
            responder: (ev.dst_ip, ev.dst_port),
            first_seen: ev.timestamp,
            last_seen: ev.timestamp,
            fwd_packets: ev.packets,
            fwd_bytes: ev.bytes,
            bwd_packets: 0,
            bwd_bytes: 0,
            hints: Vec::new(),
        };
        if let Some(hint) = ev.app_hint {
            flow.add_hint(hint, 1);
        }
        flow
    }

    /// Fold another event into this flow
    pub fn update(&mut self, ev: &RawEvent) {
        if ev.timestamp < self.first_seen {
            self.first_seen = ev.timestamp;
        }
        if ev.timestamp > self.last_seen {
            self.last_seen = ev.timestamp;
        }

        if (ev.src_ip, ev.src_port) == self.initiator {
            self.fwd_packets += ev.packets;
            self.fwd_bytes += ev.bytes;
        } else {
            self.bwd_packets += ev.packets;
            self.bwd_bytes += ev.bytes;
        }

        if let Some(hint) = ev.app_hint {
            self.add_hint(hint, 1);
        }
    }

    /// Record `count` corroborating events for a hint
    pub fn add_hint(&mut self, hint: AppProtocol, count: u64) {
        match self.hints.iter_mut().find(|(h, _)| *h == hint) {
            Some((_, n)) => *n += count,
            None => self.hints.push((hint, count)),
        }
    }

    /// The winning application-protocol hint.
    ///
    /// Highest corroborating-event count wins; exact ties go to the hint
    /// observed first, which keeps the result order-preserving and
    /// deterministic.
    pub fn dominant_hint(&self) -> Option<AppProtocol> {
        let mut best: Option<(AppProtocol, u64)> = None;
        for &(hint, count) in &self.hints {
            match best {
                Some((_, best_count)) if count <= best_count => {}
                _ => best = Some((hint, count)),
            }
        }
        best.map(|(hint, _)| hint)
    }

    /// All observed hints with their counts, first-observed order
    pub fn hints(&self) -> &[(AppProtocol, u64)] {
        &self.hints
    }

    pub fn total_packets(&self) -> u64 {
        self.fwd_packets + self.bwd_packets
    }

    pub fn total_bytes(&self) -> u64 {
        self.fwd_bytes + self.bwd_bytes
    }

    /// Merge a partial flow from another source arena into this one.
    ///
    /// The partial with the earlier first event decides who initiated;
    /// counters from the other partial are re-oriented if its view of the
    /// initiator disagrees.
    pub fn absorb(&mut self, other: Flow) {
        debug_assert_eq!(self.key, other.key);

        if other.first_seen < self.first_seen {
            self.first_seen = other.first_seen;
            if other.initiator != self.initiator {
                std::mem::swap(&mut self.fwd_packets, &mut self.bwd_packets);
                std::mem::swap(&mut self.fwd_bytes, &mut self.bwd_bytes);
                std::mem::swap(&mut self.initiator, &mut self.responder);
            }
        }
        if other.last_seen > self.last_seen {
            self.last_seen = other.last_seen;
        }

        if other.initiator == self.initiator {
            self.fwd_packets += other.fwd_packets;
            self.fwd_bytes += other.fwd_bytes;
            self.bwd_packets += other.bwd_packets;
            self.bwd_bytes += other.bwd_bytes;
        } else {
            self.fwd_packets += other.bwd_packets;
            self.fwd_bytes += other.bwd_bytes;
            self.bwd_packets += other.fwd_packets;
            self.bwd_bytes += other.fwd_bytes;
        }

        for (hint, count) in other.hints {
            self.add_hint(hint, count);
        }
    }
}
