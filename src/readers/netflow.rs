//! NetFlow v5 export reader
//!
//! Parses a byte source holding one or more concatenated NetFlow v5
//! export packets: a 24-byte header followed by up to 30 fixed 48-byte
//! records, all big-endian. Each record becomes one `RawEvent` carrying
//! the record's packet and octet counters. Truncated trailing records
//! are counted as malformed; a version word other than 5 up front makes
//! the input unreadable.

use std::net::{IpAddr, Ipv4Addr};

use chrono::{TimeZone, Utc};
use tracing::trace;

use super::ReadOutcome;
use crate::core::{IpProtocol, RawEvent};
use crate::error::ReadError;

pub const HEADER_LEN: usize = 24;
pub const RECORD_LEN: usize = 48;
const MAX_RECORDS_PER_PACKET: u16 = 30;

/// Signature check for format auto-detection
pub fn looks_like_netflow_v5(data: &[u8]) -> bool {
    if data.len() < HEADER_LEN + RECORD_LEN {
        return false;
    }
    let version = u16::from_be_bytes([data[0], data[1]]);
    let count = u16::from_be_bytes([data[2], data[3]]);
    version == 5 && (1..=MAX_RECORDS_PER_PACKET).contains(&count)
}

pub fn read(data: &[u8]) -> Result<ReadOutcome, ReadError> {
    if data.len() < HEADER_LEN {
        return Err(ReadError::Netflow("input shorter than v5 header".into()));
    }
    let version = u16::from_be_bytes([data[0], data[1]]);
    if version != 5 {
        return Err(ReadError::Netflow(format!(
            "unsupported export version {}",
            version
        )));
    }

    let mut outcome = ReadOutcome::default();
    let mut offset = 0usize;

    while offset + HEADER_LEN <= data.len() {
        let header = &data[offset..offset + HEADER_LEN];
        let version = u16::from_be_bytes([header[0], header[1]]);
        if version != 5 {
            // Mid-stream garbage; everything from here on is unframeable
            trace!(offset, "stopping at non-v5 packet boundary");
            outcome.malformed += 1;
            break;
        }
        let count = u16::from_be_bytes([header[2], header[3]]) as usize;
        let sys_uptime_ms = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as i64;
        let unix_secs = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as i64;
        let unix_nsecs =
            u32::from_be_bytes([header[12], header[13], header[14], header[15]]) as i64;
        let export_ms = unix_secs * 1000 + unix_nsecs / 1_000_000;

        offset += HEADER_LEN;
        for _ in 0..count {
            if offset + RECORD_LEN > data.len() {
                // Promised records missing from the tail
                outcome.malformed += 1;
                offset = data.len();
                break;
            }
            let record = &data[offset..offset + RECORD_LEN];
            outcome.events.push(parse_record(record, sys_uptime_ms, export_ms));
            offset += RECORD_LEN;
        }
    }

    if offset < data.len() {
        // Trailing bytes too short for another header
        outcome.malformed += 1;
    }

    Ok(outcome)
}

fn parse_record(rec: &[u8], sys_uptime_ms: i64, export_ms: i64) -> RawEvent {
    let be32 = |i: usize| u32::from_be_bytes([rec[i], rec[i + 1], rec[i + 2], rec[i + 3]]);
    let be16 = |i: usize| u16::from_be_bytes([rec[i], rec[i + 1]]);

    let src_ip = IpAddr::V4(Ipv4Addr::from(be32(0)));
    let dst_ip = IpAddr::V4(Ipv4Addr::from(be32(4)));
    let packets = be32(16) as u64;
    let bytes = be32(20) as u64;
    let first_ms = be32(24) as i64;
    let src_port = be16(32);
    let dst_port = be16(34);
    let protocol = IpProtocol::from(rec[38]);

    // `first` is router uptime at flow start; anchor it to the export
    // wallclock carried in the header.
    let start_ms = export_ms - (sys_uptime_ms - first_ms);
    let timestamp = Utc
        .timestamp_millis_opt(start_ms.max(0))
        .single()
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
    event
}


#[cfg(test)]
mod tests {
    use super::test_support::v5_packet;
    use super::*;

    #[test]
    fn test_parse_single_packet() {
        let data = v5_packet(&[
            ([10, 0, 0, 1], 49152, [10, 0, 0, 2], 502, 6, 12, 960),
            ([10, 0, 0, 2], 502, [10, 0, 0, 1], 49152, 6, 10, 800),
        ]);
        let outcome = read(&data).unwrap();

        assert_eq!(outcome.events.len(), 2);
        assert_eq!(outcome.malformed, 0);
        let ev = &outcome.events[0];
        assert_eq!(ev.src_ip.to_string(), "10.0.0.1");
        assert_eq!(ev.dst_port, 502);
        assert_eq!(ev.bytes, 960);
        assert_eq!(ev.packets, 12);
        // export time 1_700_000_000s, uptime 60s, first 30s -> started 30s before export
        assert_eq!(ev.timestamp.timestamp(), 1_699_999_970);
    }

    #[test]
    fn test_concatenated_packets() {
        let mut data = v5_packet(&[([10, 0, 0, 1], 1, [10, 0, 0, 2], 2, 17, 1, 64)]);
        data.extend(v5_packet(&[([10, 0, 0, 3], 3, [10, 0, 0, 4], 4, 17, 1, 64)]));
        let outcome = read(&data).unwrap();
        assert_eq!(outcome.events.len(), 2);
    }

    #[test]
    fn test_truncated_tail_counted() {
        let mut data = v5_packet(&[([10, 0, 0, 1], 1, [10, 0, 0, 2], 2, 6, 1, 64)]);
        let keep = data.len() - 10;
        data.truncate(keep);
        let outcome = read(&data).unwrap();
        assert_eq!(outcome.events.len(), 0);
        assert!(outcome.malformed >= 1);
    }

    #[test]
    fn test_wrong_version_unreadable() {
        let mut data = v5_packet(&[([10, 0, 0, 1], 1, [10, 0, 0, 2], 2, 6, 1, 64)]);
        data[1] = 9;
        assert!(read(&data).is_err());
    }
}
