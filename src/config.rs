//! Analysis configuration
//!
//! Every threshold the inference stages consume lives here with a
//! documented default, so the pipeline is runnable with no configuration
//! at all. Port/protocol signature tables are configuration rather than
//! constants baked into the classifier: they are operational tuning
//! parameters that differ per plant.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};
use crate::readers::FormatSelector;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub reader: ReaderConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub topology: TopologyConfig,

    #[serde(default)]
    pub anomaly: AnomalyConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            AnalysisError::Config(format!(
                "failed to parse {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject out-of-range thresholds early, before any stage runs
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.classifier.min_confidence) {
            return Err(AnalysisError::Config(
                "classifier.min_confidence must be within 0..=1".into(),
            ));
        }
        if self.topology.max_hosts_per_subnet < 2 {
            return Err(AnalysisError::Config(
                "topology.max_hosts_per_subnet must be at least 2".into(),
            ));
        }
        if self.topology.gateway_degree_threshold == 0 {
            return Err(AnalysisError::Config(
                "topology.gateway_degree_threshold must be at least 1".into(),
            ));
        }
        if self.anomaly.asymmetry_ratio < 1.0 {
            return Err(AnalysisError::Config(
                "anomaly.asymmetry_ratio must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Input parsing configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Parser selection applied to inputs that do not declare their own
    #[serde(default)]
    pub format: FormatSelector,
}

/// Role classification thresholds and signature tables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// A rule must reach this confidence for its role to be assigned;
    /// below it the host stays UNKNOWN
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    #[serde(default)]
    pub signatures: SignatureTable,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            signatures: SignatureTable::default(),
        }
    }
}

fn default_min_confidence() -> f64 {
    0.3
}

/// Port signature tables for protocol- and service-signature rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureTable {
    /// Modbus/TCP listener ports
    #[serde(default = "default_modbus_ports")]
    pub modbus_ports: BTreeSet<u16>,

    /// Siemens S7comm (ISO-TSAP) listener ports
    #[serde(default = "default_s7comm_ports")]
    pub s7comm_ports: BTreeSet<u16>,

    /// EtherNet/IP listener ports (TCP explicit + UDP implicit messaging)
    #[serde(default = "default_ethernet_ip_ports")]
    pub ethernet_ip_ports: BTreeSet<u16>,

    /// Database wire-protocol listener ports
    #[serde(default = "default_database_ports")]
    pub database_ports: BTreeSet<u16>,

    /// HTTP/HTTPS listener ports
    #[serde(default = "default_web_ports")]
    pub web_ports: BTreeSet<u16>,
}

impl Default for SignatureTable {
    fn default() -> Self {
        Self {
            modbus_ports: default_modbus_ports(),
            s7comm_ports: default_s7comm_ports(),
            ethernet_ip_ports: default_ethernet_ip_ports(),
            database_ports: default_database_ports(),
            web_ports: default_web_ports(),
        }
    }
}

fn default_modbus_ports() -> BTreeSet<u16> {
    BTreeSet::from([502])
}

fn default_s7comm_ports() -> BTreeSet<u16> {
    BTreeSet::from([102])
}

fn default_ethernet_ip_ports() -> BTreeSet<u16> {
    BTreeSet::from([44818, 2222])
}

fn default_database_ports() -> BTreeSet<u16> {
    BTreeSet::from([3306, 5432, 1433, 1521, 6379, 27017])
}

fn default_web_ports() -> BTreeSet<u16> {
    BTreeSet::from([80, 443, 8080, 8443, 8000])
}

/// Subnet inference and gateway detection thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// A subnet is split once it would hold more members than this
    #[serde(default = "default_max_hosts_per_subnet")]
    pub max_hosts_per_subnet: usize,

    /// Minimum distinct-peer degree for a gateway candidate
    #[serde(default = "default_gateway_degree")]
    pub gateway_degree_threshold: usize,

    /// Fan-in/fan-out imbalance allowed for a "balanced" gateway,
    /// as max(fan_in, fan_out) / min(fan_in, fan_out)
    #[serde(default = "default_gateway_balance")]
    pub gateway_balance_ratio: f64,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            max_hosts_per_subnet: default_max_hosts_per_subnet(),
            gateway_degree_threshold: default_gateway_degree(),
            gateway_balance_ratio: default_gateway_balance(),
        }
    }
}

fn default_max_hosts_per_subnet() -> usize {
    256
}

fn default_gateway_degree() -> usize {
    4
}

fn default_gateway_balance() -> f64 {
    4.0
}

/// Anomaly detection thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    /// A server-role host initiating to at least this many distinct peers
    /// is flagged as possible beaconing
    #[serde(default = "default_beacon_min_peers")]
    pub beacon_min_peers: usize,

    /// ... across at least this many distinct remote ports
    #[serde(default = "default_beacon_min_ports")]
    pub beacon_min_ports: usize,

    /// Directional byte ratio beyond which a flow is flagged asymmetric
    #[serde(default = "default_asymmetry_ratio")]
    pub asymmetry_ratio: f64,

    /// Ignore asymmetry on flows smaller than this many bytes
    #[serde(default = "default_asymmetry_min_bytes")]
    pub asymmetry_min_bytes: u64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            beacon_min_peers: default_beacon_min_peers(),
            beacon_min_ports: default_beacon_min_ports(),
            asymmetry_ratio: default_asymmetry_ratio(),
            asymmetry_min_bytes: default_asymmetry_min_bytes(),
        }
    }
}

fn default_beacon_min_peers() -> usize {
    5
}

fn default_beacon_min_ports() -> usize {
    3
}

fn default_asymmetry_ratio() -> f64 {
    20.0
}

fn default_asymmetry_min_bytes() -> u64 {
    10_000
}
