use thiserror::Error;

/// Error raised while reading a single input source.
///
/// These are per-file failures: the pipeline catches them, logs a warning
/// and continues with the remaining inputs.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("unrecognized capture format")]
    UnknownFormat,

    #[error("pcapng captures are not supported, convert to legacy pcap")]
    PcapNgUnsupported,

    #[error("pcap: {0}")]
    Pcap(String),

    #[error("flow table header unusable: {0}")]
    CsvHeader(String),

    #[error("netflow: {0}")]
    Netflow(String),
}

/// Top-level analysis error.
///
/// Malformed individual records are never errors - they are skipped and
/// counted. An unclassifiable host is never an error either, it stays
/// `Role::Unknown`.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// A declared or detected format could not be parsed at all.
    #[error("input '{name}' unreadable: {source}")]
    UnreadableInput {
        name: String,
        #[source]
        source: ReadError,
    },

    /// Every input failed to parse. Distinct from a partial-success run,
    /// which still produces an artifact with a warning count.
    #[error("all {attempted} input(s) failed to parse, no artifact produced")]
    AllInputsFailed { attempted: usize },

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = AnalysisError> = std::result::Result<T, E>;
