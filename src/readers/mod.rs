//! Format readers
//!
//! One reader per input kind, each producing the uniform `RawEvent`
//! stream. A reader never fails the job on a single malformed record -
//! the record is skipped and counted. Only an input that is unreadable
//! from the start (wrong magic bytes, unusable header) is a hard per-file
//! error.

pub mod flow_csv;
pub mod netflow;
pub mod pcap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::RawEvent;
use crate::error::ReadError;

/// Concrete input encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputFormat {
    Pcap,
    FlowCsv,
    NetflowV5,
}

impl std::fmt::Display for InputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputFormat::Pcap => write!(f, "pcap"),
            InputFormat::FlowCsv => write!(f, "flow-csv"),
            InputFormat::NetflowV5 => write!(f, "netflow-v5"),
        }
    }
}

/// Caller-supplied parser selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormatSelector {
    /// Detect by file signature / header shape
    #[default]
    Auto,
    Pcap,
    FlowCsv,
    Netflow,
}

impl FormatSelector {
    /// Resolve to a concrete format, sniffing the data when `Auto`
    pub fn resolve(&self, data: &[u8]) -> Result<InputFormat, ReadError> {
        match self {
            FormatSelector::Pcap => Ok(InputFormat::Pcap),
            FormatSelector::FlowCsv => Ok(InputFormat::FlowCsv),
            FormatSelector::Netflow => Ok(InputFormat::NetflowV5),
            FormatSelector::Auto => detect_format(data),
        }
    }
}

/// Result of reading one input source
#[derive(Debug, Default)]
pub struct ReadOutcome {
    pub format: Option<InputFormat>,
    pub events: Vec<RawEvent>,
    /// Individual records that failed to parse and were skipped
    pub malformed: u64,
}

// Legacy pcap magic, both endiannesses, microsecond and nanosecond variants
const PCAP_MAGICS: [[u8; 4]; 4] = [
    [0xa1, 0xb2, 0xc3, 0xd4],
    [0xd4, 0xc3, 0xb2, 0xa1],
    [0xa1, 0xb2, 0x3c, 0x4d],
    [0x4d, 0x3c, 0xb2, 0xa1],
];

const PCAPNG_MAGIC: [u8; 4] = [0x0a, 0x0d, 0x0d, 0x0a];

/// Auto-detect the input format from its leading bytes.
///
/// Order matters: binary signatures first, the CSV header-shape check is
/// the loosest and goes last.
pub fn detect_format(data: &[u8]) -> Result<InputFormat, ReadError> {
    if data.len() >= 4 {
        let magic = [data[0], data[1], data[2], data[3]];
        if PCAP_MAGICS.contains(&magic) {
            return Ok(InputFormat::Pcap);
        }
        if magic == PCAPNG_MAGIC {
            return Err(ReadError::PcapNgUnsupported);
        }
    }
    if netflow::looks_like_netflow_v5(data) {
        return Ok(InputFormat::NetflowV5);
    }
    if flow_csv::looks_like_flow_table(data) {
        return Ok(InputFormat::FlowCsv);
    }
    Err(ReadError::UnknownFormat)
}

/// Read all events from one byte source.
///
/// This is the single entry point the pipeline uses per input file.
pub fn read_events(data: &[u8], selector: FormatSelector) -> Result<ReadOutcome, ReadError> {
    let format = selector.resolve(data)?;
    debug!(%format, len = data.len(), "reading input");

    let mut outcome = match format {
        InputFormat::Pcap => pcap::read(data)?,
        InputFormat::FlowCsv => flow_csv::read(data)?,
        InputFormat::NetflowV5 => netflow::read(data)?,
    };
    outcome.format = Some(format);
    Ok(outcome)
}
