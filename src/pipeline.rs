//! Batch analysis pipeline
//!
//! Drives the whole run: per-input reading and flow aggregation in a
//! rayon worker pool (one arena per input, no shared state), a
//! single-writer merge, then the sequential host / topology / anomaly
//! stages. A file that fails to parse is logged and skipped; the run
//! only fails when every input does.

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::anomaly;
use crate::artifact::{self, AnalysisArtifact, SourceReport};
use crate::classify;
use crate::config::Config;
use crate::error::{AnalysisError, Result};
use crate::flow::FlowTable;
use crate::hosts::HostTable;
use crate::readers::{self, FormatSelector};
use crate::topology::{self, TopologyGraph};

/// One input source: a name for reporting and its raw bytes
#[derive(Debug, Clone)]
pub struct Input {
    pub name: String,
    pub data: Vec<u8>,
    pub format: FormatSelector,
}

impl Input {
    /// Input with automatic format detection
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
            format: FormatSelector::Auto,
        }
    }

    /// Input with an explicitly declared format
    pub fn with_format(name: impl Into<String>, data: Vec<u8>, format: FormatSelector) -> Self {
        Self {
            name: name.into(),
            data,
            format,
        }
    }
}

struct SourceRun {
    report: SourceReport,
    table: Option<FlowTable>,
}

/// Run the full analysis over a set of inputs.
///
/// Deterministic: the same inputs in the same order produce a
/// byte-identical serialized artifact regardless of worker scheduling.
pub fn analyze(inputs: &[Input], config: &Config) -> Result<AnalysisArtifact> {
    config.validate()?;
    info!(inputs = inputs.len(), "starting analysis");

    // Parallel per-input read + aggregate; collect preserves input order
    let runs: Vec<SourceRun> = inputs
        .par_iter()
        .map(|input| read_one(input, config))
        .collect();

    if !inputs.is_empty() && runs.iter().all(|r| r.table.is_none()) {
        return Err(AnalysisError::AllInputsFailed {
            attempted: inputs.len(),
        });
    }

    // Single-writer merge, sequential in input order
    let mut merged = FlowTable::new();
    let mut sources = Vec::with_capacity(runs.len());
    for run in runs {
        if let Some(table) = run.table {
            merged.merge(table);
        }
        sources.push(run.report);
    }
    let skipped_records =
        merged.stats.self_loops_dropped + sources.iter().map(|s| s.malformed).sum::<u64>();
    let flows = merged.into_flows();
    debug!(flows = flows.len(), "flow merge complete");

    let mut hosts = HostTable::from_flows(&flows);
    classify::classify_hosts(&mut hosts, &config.classifier);

    let mut subnets =
        topology::infer_subnets(&hosts.addrs(), config.topology.max_hosts_per_subnet);
    let graph = TopologyGraph::from_flows(hosts.addrs(), &flows);
    let scan = graph.scan_gateways(&subnets, config.topology.gateway_degree_threshold);
    classify::refine_gateways(
        &mut hosts,
        &scan.candidates,
        &scan.cross_subnet_bytes,
        &config.topology,
        &config.classifier,
    );
    subnets.assign_dominant_roles(&hosts);

    let anomalies = anomaly::detect(&hosts, &flows, &config.anomaly);

    info!(
        hosts = hosts.len(),
        subnets = subnets.len(),
        connections = graph.edge_count(),
        anomalies = anomalies.len(),
        "analysis complete"
    );

    Ok(artifact::assemble(
        &hosts,
        &subnets,
        &graph,
        &flows,
        anomalies,
        sources,
        skipped_records,
    ))
}

fn read_one(input: &Input, config: &Config) -> SourceRun {
    let selector = match input.format {
        FormatSelector::Auto => config.reader.format,
        explicit => explicit,
    };
    match readers::read_events(&input.data, selector) {
        Ok(outcome) => {
            let mut table = FlowTable::new();
            for event in &outcome.events {
                table.record(event);
            }
            debug!(
                input = %input.name,
                events = outcome.events.len(),
                flows = table.len(),
                malformed = outcome.malformed,
                "input aggregated"
            );
            SourceRun {
                report: SourceReport {
                    name: input.name.clone(),
                    format: outcome.format.map(|f| f.to_string()),
                    ok: true,
                    error: None,
                    events: outcome.events.len() as u64,
                    malformed: outcome.malformed,
                },
                table: Some(table),
            }
        }
        Err(source) => {
            let err = AnalysisError::UnreadableInput {
                name: input.name.clone(),
                source,
            };
            warn!(%err, "input skipped");
            SourceRun {
                report: SourceReport {
                    name: input.name.clone(),
                    format: None,
                    ok: false,
                    error: Some(err.to_string()),
                    events: 0,
                    malformed: 0,
                },
                table: None,
            }
        }
    }
}
