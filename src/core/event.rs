//! Normalized traffic observations
//!
//! Every format reader lowers its input into `RawEvent` records so the
//! rest of the pipeline never sees the capture encoding.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// IP protocol numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IpProtocol {
    Icmp,
    Tcp,
    Udp,
    Icmpv6,
    Other(u8),
}

impl From<u8> for IpProtocol {
    fn from(val: u8) -> Self {
        match val {
            1 => IpProtocol::Icmp,
            6 => IpProtocol::Tcp,
            17 => IpProtocol::Udp,
            58 => IpProtocol::Icmpv6,
            other => IpProtocol::Other(other),
        }
    }
}

impl From<IpProtocol> for u8 {
    fn from(val: IpProtocol) -> Self {
        match val {
            IpProtocol::Icmp => 1,
            IpProtocol::Tcp => 6,
            IpProtocol::Udp => 17,
            IpProtocol::Icmpv6 => 58,
            IpProtocol::Other(v) => v,
        }
    }
}

impl std::fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpProtocol::Icmp => write!(f, "icmp"),
            IpProtocol::Tcp => write!(f, "tcp"),
            IpProtocol::Udp => write!(f, "udp"),
            IpProtocol::Icmpv6 => write!(f, "icmpv6"),
            IpProtocol::Other(n) => write!(f, "proto{}", n),
        }
    }
}

/// Application layer protocol, guessed by port or carried by the input format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AppProtocol {
    Http,
    Https,
    Dns,
    Ssh,
    Ftp,
    Smtp,
    Ntp,
    Snmp,
    Mqtt,
    Rdp,
    Smb,
    // Industrial
    Modbus,
    S7comm,
    EthernetIp,
    Dnp3,
    // Databases
    Mysql,
    Postgres,
    Mssql,
    Oracle,
    Redis,
    Mongodb,
}

impl AppProtocol {
    /// Guess protocol from well-known port
    pub fn from_port(port: u16, proto: IpProtocol) -> Option<Self> {
        match (proto, port) {
            (IpProtocol::Tcp, 80) | (IpProtocol::Tcp, 8080) | (IpProtocol::Tcp, 8000) => {
                Some(AppProtocol::Http)
            }
            (IpProtocol::Tcp, 443) | (IpProtocol::Tcp, 8443) => Some(AppProtocol::Https),
            (IpProtocol::Udp, 53) | (IpProtocol::Tcp, 53) => Some(AppProtocol::Dns),
            (IpProtocol::Tcp, 22) => Some(AppProtocol::Ssh),
            (IpProtocol::Tcp, 21) => Some(AppProtocol::Ftp),
            (IpProtocol::Tcp, 25) | (IpProtocol::Tcp, 587) => Some(AppProtocol::Smtp),
            (IpProtocol::Udp, 123) => Some(AppProtocol::Ntp),
            (IpProtocol::Udp, 161) | (IpProtocol::Udp, 162) => Some(AppProtocol::Snmp),
            (IpProtocol::Tcp, 1883) | (IpProtocol::Tcp, 8883) => Some(AppProtocol::Mqtt),
            (IpProtocol::Tcp, 3389) => Some(AppProtocol::Rdp),
            (IpProtocol::Tcp, 445) | (IpProtocol::Tcp, 139) => Some(AppProtocol::Smb),
            (IpProtocol::Tcp, 502) => Some(AppProtocol::Modbus),
            (IpProtocol::Tcp, 102) => Some(AppProtocol::S7comm),
            (IpProtocol::Tcp, 44818) | (IpProtocol::Udp, 44818) | (IpProtocol::Udp, 2222) => {
                Some(AppProtocol::EthernetIp)
            }
            (IpProtocol::Tcp, 20000) | (IpProtocol::Udp, 20000) => Some(AppProtocol::Dnp3),
            (IpProtocol::Tcp, 3306) => Some(AppProtocol::Mysql),
            (IpProtocol::Tcp, 5432) => Some(AppProtocol::Postgres),
            (IpProtocol::Tcp, 1433) => Some(AppProtocol::Mssql),
            (IpProtocol::Tcp, 1521) => Some(AppProtocol::Oracle),
            (IpProtocol::Tcp, 6379) => Some(AppProtocol::Redis),
            (IpProtocol::Tcp, 27017) => Some(AppProtocol::Mongodb),
            _ => None,
        }
    }

    /// Stable lowercase name used as artifact key
    pub fn name(&self) -> &'static str {
        match self {
            AppProtocol::Http => "http",
            AppProtocol::Https => "https",
            AppProtocol::Dns => "dns",
            AppProtocol::Ssh => "ssh",
            AppProtocol::Ftp => "ftp",
            AppProtocol::Smtp => "smtp",
            AppProtocol::Ntp => "ntp",
            AppProtocol::Snmp => "snmp",
            AppProtocol::Mqtt => "mqtt",
            AppProtocol::Rdp => "rdp",
            AppProtocol::Smb => "smb",
            AppProtocol::Modbus => "modbus",
            AppProtocol::S7comm => "s7comm",
            AppProtocol::EthernetIp => "ethernet-ip",
            AppProtocol::Dnp3 => "dnp3",
            AppProtocol::Mysql => "mysql",
            AppProtocol::Postgres => "postgres",
            AppProtocol::Mssql => "mssql",
            AppProtocol::Oracle => "oracle",
            AppProtocol::Redis => "redis",
            AppProtocol::Mongodb => "mongodb",
        }
    }

    /// Web-tier traffic
    pub fn is_web(&self) -> bool {
        matches!(self, AppProtocol::Http | AppProtocol::Https)
    }

    /// Database wire protocols
    pub fn is_database(&self) -> bool {
        matches!(
            self,
            AppProtocol::Mysql
                | AppProtocol::Postgres
                | AppProtocol::Mssql
                | AppProtocol::Oracle
                | AppProtocol::Redis
                | AppProtocol::Mongodb
        )
    }

    /// Industrial control protocols
    pub fn is_industrial(&self) -> bool {
        matches!(
            self,
            AppProtocol::Modbus | AppProtocol::S7comm | AppProtocol::EthernetIp | AppProtocol::Dnp3
        )
    }
}

impl std::fmt::Display for AppProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One normalized observation from a capture or flow record.
///
/// Immutable once produced by a reader; a pcap packet maps to one event
/// with `packets == 1`, a flow-record row maps to one event carrying the
/// row's packet count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub timestamp: DateTime<Utc>,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: IpProtocol,
    pub bytes: u64,
    pub packets: u64,
    pub app_hint: Option<AppProtocol>,
}

impl RawEvent {
    /// Guess the application hint from the better-known of the two ports.
    /// The destination port is preferred since clients connect to services.
    pub fn hint_from_ports(&self) -> Option<AppProtocol> {
        AppProtocol::from_port(self.dst_port, self.protocol)
            .or_else(|| AppProtocol::from_port(self.src_port, self.protocol))
    }
}
