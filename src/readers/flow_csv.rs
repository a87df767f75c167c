//! Flow-record table reader
//!
//! Parses delimited flow exports (Zeek/nfdump/exporter CSV dumps) whose
//! first row names the columns. Column names are matched against a small
//! alias table so the usual exporter vocabularies all map onto the same
//! event fields. Records go through the `csv` crate, so quoted fields
//! containing the delimiter stay intact. Rows that cannot be parsed are
//! skipped and counted.

use std::net::IpAddr;

use chrono::{DateTime, TimeZone, Utc};
use tracing::trace;

use super::ReadOutcome;
use crate::core::{IpProtocol, RawEvent};
use crate::error::ReadError;

const SRC_IP_ALIASES: &[&str] = &["src_ip", "srcaddr", "source", "source_ip", "saddr", "ipv4_src_addr", "id.orig_h"];
const DST_IP_ALIASES: &[&str] = &["dst_ip", "dstaddr", "destination", "destination_ip", "daddr", "ipv4_dst_addr", "id.resp_h"];
const SRC_PORT_ALIASES: &[&str] = &["src_port", "srcport", "sport", "source_port", "l4_src_port", "id.orig_p"];
const DST_PORT_ALIASES: &[&str] = &["dst_port", "dstport", "dport", "destination_port", "l4_dst_port", "id.resp_p"];
const PROTO_ALIASES: &[&str] = &["protocol", "proto", "ip_proto", "prot"];
const BYTES_ALIASES: &[&str] = &["bytes", "octets", "doctets", "in_bytes", "byte_count", "orig_bytes"];
const PACKETS_ALIASES: &[&str] = &["packets", "pkts", "dpkts", "in_pkts", "packet_count", "orig_pkts"];
const TS_ALIASES: &[&str] = &["timestamp", "ts", "time", "first", "start", "start_time", "first_switched"];

#[derive(Debug, Default)]
struct ColumnMap {
    src_ip: Option<usize>,
    dst_ip: Option<usize>,
    src_port: Option<usize>,
    dst_port: Option<usize>,
    protocol: Option<usize>,
    bytes: Option<usize>,
    packets: Option<usize>,
    timestamp: Option<usize>,
}

fn pick_delimiter(header: &str) -> u8 {
    for d in [b',', b';', b'\t'] {
        if header.as_bytes().contains(&d) {
            return d;
        }
    }
    b','
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

fn map_header(header: &csv::StringRecord) -> ColumnMap {
    let mut map = ColumnMap::default();
    for (idx, raw) in header.iter().enumerate() {
        let name = normalize(raw);
        let slot = if SRC_IP_ALIASES.contains(&name.as_str()) {
            &mut map.src_ip
        } else if DST_IP_ALIASES.contains(&name.as_str()) {
            &mut map.dst_ip
        } else if SRC_PORT_ALIASES.contains(&name.as_str()) {
            &mut map.src_port
        } else if DST_PORT_ALIASES.contains(&name.as_str()) {
            &mut map.dst_port
        } else if PROTO_ALIASES.contains(&name.as_str()) {
            &mut map.protocol
        } else if BYTES_ALIASES.contains(&name.as_str()) {
            &mut map.bytes
        } else if PACKETS_ALIASES.contains(&name.as_str()) {
            &mut map.packets
        } else if TS_ALIASES.contains(&name.as_str()) {
            &mut map.timestamp
        } else {
            continue;
        };
        // First alias hit wins; later duplicate columns are ignored
        if slot.is_none() {
            *slot = Some(idx);
        }
    }
    map
}

fn table_reader(data: &[u8], delimiter: u8) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(data)
}

/// First line of the input, for delimiter sniffing
fn header_line(data: &[u8]) -> Option<&str> {
    let line = data.split(|b| *b == b'\n').next()?;
    std::str::from_utf8(line).ok()
}

/// Loose shape check used by format auto-detection: a printable first
/// line that names both address columns.
pub fn looks_like_flow_table(data: &[u8]) -> bool {
    let head = &data[..data.len().min(4096)];
    let Some(header) = header_line(head) else {
        return false;
    };
    let mut reader = table_reader(head, pick_delimiter(header));
    match reader.headers() {
        Ok(headers) => {
            let map = map_header(headers);
            map.src_ip.is_some() && map.dst_ip.is_some()
        }
        Err(_) => false,
    }
}

pub fn read(data: &[u8]) -> Result<ReadOutcome, ReadError> {
    let header = header_line(data)
        .ok_or_else(|| ReadError::CsvHeader("header is not valid utf-8".into()))?;

    let mut reader = table_reader(data, pick_delimiter(header));
    let map = map_header(
        reader
            .headers()
            .map_err(|e| ReadError::CsvHeader(e.to_string()))?,
    );
    if map.src_ip.is_none() || map.dst_ip.is_none() {
        return Err(ReadError::CsvHeader(
            "no source/destination address columns".into(),
        ));
    }

    let mut outcome = ReadOutcome::default();
    for result in reader.records() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                trace!(error = %e, "skipping unparsable flow record");
                outcome.malformed += 1;
                continue;
            }
        };
        match parse_row(&record, &map) {
            Some(event) => outcome.events.push(event),
            None => {
                trace!(row = ?record, "skipping malformed flow record");
                outcome.malformed += 1;
            }
        }
    }
    Ok(outcome)
}

fn parse_row(record: &csv::StringRecord, map: &ColumnMap) -> Option<RawEvent> {
    let field = |idx: Option<usize>| idx.and_then(|i| record.get(i));

    let src_ip: IpAddr = field(map.src_ip)?.parse().ok()?;
    let dst_ip: IpAddr = field(map.dst_ip)?.parse().ok()?;
    let src_port = field(map.src_port).and_then(|f| f.parse().ok()).unwrap_or(0u16);
    let dst_port = field(map.dst_port).and_then(|f| f.parse().ok()).unwrap_or(0u16);
    let protocol = field(map.protocol)
        .map(parse_protocol)
        .unwrap_or(IpProtocol::Tcp);
    let bytes = field(map.bytes).and_then(|f| f.parse().ok()).unwrap_or(0u64);
    let packets = field(map.packets).and_then(|f| f.parse().ok()).unwrap_or(1u64);
    let timestamp = field(map.timestamp)
        .and_then(parse_timestamp)
        .unwrap_or_default();

    let mut event = RawEvent {
        timestamp,
        src_ip,
        dst_ip,
        src_port,
        dst_port,
        protocol,
        bytes,
        packets,
        app_hint: None,
    };
    event.app_hint = event.hint_from_ports();
    Some(event)
}

fn parse_protocol(field: &str) -> IpProtocol {
    if let Ok(num) = field.parse::<u8>() {
        return IpProtocol::from(num);
    }
    match field.to_ascii_lowercase().as_str() {
        "tcp" => IpProtocol::Tcp,
        "udp" => IpProtocol::Udp,
        "icmp" => IpProtocol::Icmp,
        "icmpv6" | "icmp6" => IpProtocol::Icmpv6,
        _ => IpProtocol::Other(0),
    }
}

/// Accepts epoch seconds (integer or fractional) or RFC 3339
fn parse_timestamp(field: &str) -> Option<DateTime<Utc>> {
    if let Ok(secs) = field.parse::<f64>() {
        let nanos = (secs * 1e9) as i64;
        return Some(Utc.timestamp_nanos(nanos));
    }
    DateTime::parse_from_rfc3339(field)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AppProtocol;

    #[test]
    fn test_read_basic_table() {
        let data = b"src_ip,dst_ip,src_port,dst_port,protocol,bytes,packets,timestamp\n\
            10.0.0.1,10.0.0.2,49152,502,tcp,240,4,1700000000\n\
            10.0.0.2,10.0.0.1,502,49152,6,180,3,1700000001\n";
        let outcome = read(data).unwrap();

        assert_eq!(outcome.events.len(), 2);
        assert_eq!(outcome.malformed, 0);
        assert_eq!(outcome.events[0].app_hint, Some(AppProtocol::Modbus));
        assert_eq!(outcome.events[1].protocol, IpProtocol::Tcp);
        assert_eq!(outcome.events[0].packets, 4);
    }

    #[test]
    fn test_alias_columns() {
        let data = b"ipv4_src_addr;ipv4_dst_addr;l4_src_port;l4_dst_port;prot;in_bytes\n\
            192.168.1.5;192.168.1.9;1234;443;6;9000\n";
        let outcome = read(data).unwrap();
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].dst_port, 443);
        assert_eq!(outcome.events[0].bytes, 9000);
    }

    #[test]
    fn test_quoted_field_containing_delimiter() {
        // The quoted note must not shift the address columns
        let data = b"note,src_ip,dst_ip,bytes\n\
            \"a,b\",10.0.0.1,10.0.0.2,500\n";
        let outcome = read(data).unwrap();
        assert_eq!(outcome.malformed, 0);
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].src_ip.to_string(), "10.0.0.1");
        assert_eq!(outcome.events[0].bytes, 500);
    }

    #[test]
    fn test_malformed_rows_skipped_and_counted() {
        let data = b"src_ip,dst_ip,bytes\n\
            10.0.0.1,10.0.0.2,100\n\
            not-an-ip,10.0.0.2,100\n\
            10.0.0.3,10.0.0.4,50\n";
        let outcome = read(data).unwrap();
        assert_eq!(outcome.events.len(), 2);
        assert_eq!(outcome.malformed, 1);
    }

    #[test]
    fn test_missing_address_columns_unreadable() {
        let data = b"time,bytes,packets\n1,2,3\n";
        assert!(read(data).is_err());
    }

    #[test]
    fn test_rfc3339_timestamp() {
        let data = b"src_ip,dst_ip,timestamp\n10.0.0.1,10.0.0.2,2024-05-01T10:00:00Z\n";
        let outcome = read(data).unwrap();
        assert_eq!(outcome.events[0].timestamp.timestamp(), 1714557600);
    }
}
