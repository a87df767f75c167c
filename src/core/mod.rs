//! Core shared types for traffic analysis
//!
//! Provides the data structures every pipeline stage works with:
//! - `RawEvent`: normalized packet/flow-record observation
//! - `Flow`: reconstructed bidirectional session
//! - `IpProtocol` / `AppProtocol`: transport and application identifiers

pub mod event;
pub mod flow;

pub use event::{AppProtocol, IpProtocol, RawEvent};
pub use flow::{Flow, FlowKey};
