//! Flow aggregation
//!
//! Folds the normalized event stream into a table of bidirectional flows.
//! Each input file is aggregated into its own table (one arena per worker,
//! no shared state), then the per-file tables are merged sequentially by a
//! single writer. There is no timeout-based expiry: within a batch run a
//! flow is complete only once its input is fully consumed.

use std::collections::HashMap;

use serde::Serialize;

use crate::core::{Flow, FlowKey, RawEvent};

/// Aggregation counters, carried into the artifact summary
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TableStats {
    /// Events folded into flows
    pub events: u64,
    /// Flows created
    pub flows_created: u64,
    /// Events dropped because both endpoints were the same address
    pub self_loops_dropped: u64,
}

/// Per-source flow arena
#[derive(Debug, Default)]
pub struct FlowTable {
    flows: HashMap<FlowKey, Flow>,
    pub stats: TableStats,
}

impl FlowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the table, creating the flow on first sight
    pub fn record(&mut self, ev: &RawEvent) {
        // A flow's two endpoints are always distinct
        if ev.src_ip == ev.dst_ip {
            self.stats.self_loops_dropped += 1;
            return;
        }

        self.stats.events += 1;
        let key = FlowKey::from_event(ev);
        match self.flows.get_mut(&key) {
            Some(flow) => flow.update(ev),
            None => {
                self.stats.flows_created += 1;
                self.flows.insert(key, Flow::new(ev));
            }
        }
    }

    /// Fold another arena into this one.
    ///
    /// Called sequentially from the merge step, so no locking is needed;
    /// flows sharing a key are combined with [`Flow::absorb`].
    pub fn merge(&mut self, other: FlowTable) {
        self.stats.events += other.stats.events;
        self.stats.self_loops_dropped += other.stats.self_loops_dropped;
        for (key, flow) in other.flows {
            match self.flows.get_mut(&key) {
                Some(existing) => existing.absorb(flow),
                None => {
                    self.stats.flows_created += 1;
                    self.flows.insert(key, flow);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Flow> {
        self.flows.values()
    }

    /// Finalize the table into a key-ordered flow list.
    ///
    /// Sorting here is what makes every later stage deterministic even
    /// though the table itself hashes.
    pub fn into_flows(self) -> Vec<Flow> {
        let mut flows: Vec<Flow> = self.flows.into_values().collect();
        flows.sort_by(|a, b| a.key.cmp(&b.key));
        flows
    }
}
