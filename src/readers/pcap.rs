//! Legacy pcap capture reader
//!
//! Reads a pcap byte source and lowers each IP packet to one `RawEvent`.
//! Non-IP frames (ARP, LLDP, ...) are skipped silently; frames that fail
//! to slice are counted as malformed. A truncated packet record ends the
//! stream, since nothing after it can be framed.

use chrono::{TimeZone, Utc};
use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use pcap_file::pcap::PcapReader;
use tracing::trace;

use super::ReadOutcome;
use crate::core::{IpProtocol, RawEvent};
use crate::error::ReadError;

pub fn read(data: &[u8]) -> Result<ReadOutcome, ReadError> {
    let mut reader = PcapReader::new(data).map_err(|e| ReadError::Pcap(e.to_string()))?;

    let mut outcome = ReadOutcome::default();
    while let Some(packet) = reader.next_packet() {
        let packet = match packet {
            Ok(p) => p,
            Err(e) => {
                // Truncated or corrupt record; the remainder is unframeable
                trace!(error = %e, "stopping at unreadable pcap record");
                outcome.malformed += 1;
                break;
            }
        };

        // Saturate instead of wrapping if the duration exceeds i64 nanos
        let timestamp_ns = i64::try_from(packet.timestamp.as_nanos()).unwrap_or(i64::MAX);
        match parse_frame(&packet.data, packet.orig_len as u64, timestamp_ns) {
            Ok(Some(event)) => outcome.events.push(event),
            Ok(None) => {} // non-IP frame
            Err(()) => outcome.malformed += 1,
        }
    }

    Ok(outcome)
}

/// Slice one ethernet frame into an event. `Ok(None)` means not IP.
fn parse_frame(raw: &[u8], wire_len: u64, timestamp_ns: i64) -> Result<Option<RawEvent>, ()> {
    let sliced = SlicedPacket::from_ethernet(raw).map_err(|_| ())?;

    let (src_ip, dst_ip, protocol) = match &sliced.net {
        Some(NetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            (
                header.source_addr().into(),
                header.destination_addr().into(),
                match header.protocol() {
                    etherparse::IpNumber::TCP => IpProtocol::Tcp,
                    etherparse::IpNumber::UDP => IpProtocol::Udp,
                    etherparse::IpNumber::ICMP => IpProtocol::Icmp,
                    other => IpProtocol::Other(other.0),
                },
            )
        }
        Some(NetSlice::Ipv6(ipv6)) => {
            let header = ipv6.header();
            (
                header.source_addr().into(),
                header.destination_addr().into(),
                match header.next_header() {
                    etherparse::IpNumber::TCP => IpProtocol::Tcp,
                    etherparse::IpNumber::UDP => IpProtocol::Udp,
                    etherparse::IpNumber::IPV6_ICMP => IpProtocol::Icmpv6,
                    other => IpProtocol::Other(other.0),
                },
            )
        }
        // ARP and friends
        _ => return Ok(None),
    };

    let (src_port, dst_port) = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => (tcp.source_port(), tcp.destination_port()),
        Some(TransportSlice::Udp(udp)) => (udp.source_port(), udp.destination_port()),
        _ => (0, 0),
    };

    let mut event = RawEvent {
        timestamp: Utc.timestamp_nanos(timestamp_ns),
        src_ip,
        dst_ip,
        src_port,
        dst_port,
        protocol,
        bytes: wire_len,
        packets: 1,
        app_hint: None,
    };
    event.app_hint = event.hint_from_ports();
    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;

    /// Minimal legacy pcap file (little-endian, usec)
    fn pcap_bytes_at(ts_sec: u32, frames: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&0xa1b2c3d4u32.to_le_bytes()); // magic
        out.extend_from_slice(&2u16.to_le_bytes()); // major
        out.extend_from_slice(&4u16.to_le_bytes()); // minor
        out.extend_from_slice(&0u32.to_le_bytes()); // thiszone
        out.extend_from_slice(&0u32.to_le_bytes()); // sigfigs
        out.extend_from_slice(&65535u32.to_le_bytes()); // snaplen
        out.extend_from_slice(&1u32.to_le_bytes()); // linktype ethernet
        for frame in frames {
            out.extend_from_slice(&ts_sec.to_le_bytes()); // ts sec
            out.extend_from_slice(&0u32.to_le_bytes()); // ts usec
            out.extend_from_slice(&(frame.len() as u32).to_le_bytes()); // incl
            out.extend_from_slice(&(frame.len() as u32).to_le_bytes()); // orig
            out.extend_from_slice(frame);
        }
        out
    }

    fn pcap_bytes(frames: &[Vec<u8>]) -> Vec<u8> {
        pcap_bytes_at(10, frames)
    }

    fn tcp_frame(src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
            .ipv4(src, dst, 64)
            .tcp(sport, dport, 1000, 64);
        let payload = [0u8; 16];
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut frame, &payload).unwrap();
        frame
    }

    #[test]
    fn test_read_tcp_packet() {
        let data = pcap_bytes(&[tcp_frame([10, 0, 0, 1], 50000, [10, 0, 0, 2], 502)]);
        let outcome = read(&data).unwrap();

        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.malformed, 0);
        let ev = &outcome.events[0];
        assert_eq!(ev.src_ip.to_string(), "10.0.0.1");
        assert_eq!(ev.dst_port, 502);
        assert_eq!(ev.protocol, IpProtocol::Tcp);
        assert_eq!(ev.app_hint, Some(crate::core::AppProtocol::Modbus));
    }

    #[test]
    fn test_extreme_timestamp_never_goes_negative() {
        // Largest second counter a legacy header can carry
        let data = pcap_bytes_at(
            u32::MAX,
            &[tcp_frame([10, 0, 0, 1], 50000, [10, 0, 0, 2], 80)],
        );
        let outcome = read(&data).unwrap();
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].timestamp.timestamp(), i64::from(u32::MAX));
    }

    #[test]
    fn test_bad_magic_is_unreadable() {
        assert!(read(&[0u8; 64]).is_err());
    }

    #[test]
    fn test_truncated_record_counts_malformed() {
        let mut data = pcap_bytes(&[tcp_frame([10, 0, 0, 1], 1, [10, 0, 0, 2], 2)]);
        // Append a record header promising more bytes than remain
        data.extend_from_slice(&10u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&1000u32.to_le_bytes());
        data.extend_from_slice(&1000u32.to_le_bytes());
        data.extend_from_slice(&[0u8; 8]);

        let outcome = read(&data).unwrap();
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.malformed, 1);
    }
}
