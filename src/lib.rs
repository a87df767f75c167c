//! netscope - offline network traffic analysis
//!
//! Takes a batch of capture files (legacy pcap, flow-summary CSV,
//! NetFlow v5 exports), reconstructs bidirectional flows, profiles the
//! hosts behind them, classifies each host into an operational role
//! (web server, database, PLC, gateway, ...), infers the subnet layout
//! and communication topology, and runs rule-based anomaly checks. The
//! result is a single deterministic [`AnalysisArtifact`].
//!
//! ```no_run
//! use netscope::{analyze, Config, Input};
//!
//! # fn main() -> netscope::Result<()> {
//! let data = std::fs::read("capture.pcap")?;
//! let artifact = analyze(&[Input::new("capture.pcap", data)], &Config::default())?;
//! println!("{}", serde_json::to_string_pretty(&artifact).unwrap());
//! # Ok(())
//! # }
//! ```

pub mod anomaly;
pub mod artifact;
pub mod classify;
pub mod config;
pub mod core;
pub mod error;
pub mod flow;
pub mod hosts;
pub mod pipeline;
pub mod readers;
pub mod topology;

pub use anomaly::{Anomaly, AnomalyKind, Severity};
pub use artifact::AnalysisArtifact;
pub use classify::Role;
pub use config::Config;
pub use error::{AnalysisError, ReadError, Result};
pub use pipeline::{analyze, Input};
pub use readers::{FormatSelector, InputFormat};
