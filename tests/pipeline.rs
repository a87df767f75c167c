//! End-to-end pipeline tests over synthetic captures

use netscope::{analyze, AnalysisError, Config, Input, Role};

/// Honors RUST_LOG when debugging a failing case
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Build one NetFlow v5 export packet from
/// (src, sport, dst, dport, proto, pkts, bytes) tuples
fn v5_packet(records: &[([u8; 4], u16, [u8; 4], u16, u8, u32, u32)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&5u16.to_be_bytes());
    out.extend_from_slice(&(records.len() as u16).to_be_bytes());
    out.extend_from_slice(&60_000u32.to_be_bytes());
    out.extend_from_slice(&1_700_000_000u32.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&0u16.to_be_bytes());
    for (src, sport, dst, dport, proto, pkts, bytes) in records {
        out.extend_from_slice(src);
        out.extend_from_slice(dst);
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&pkts.to_be_bytes());
        out.extend_from_slice(&bytes.to_be_bytes());
        out.extend_from_slice(&30_000u32.to_be_bytes());
        out.extend_from_slice(&45_000u32.to_be_bytes());
        out.extend_from_slice(&sport.to_be_bytes());
        out.extend_from_slice(&dport.to_be_bytes());
        out.push(0);
        out.push(0x18);
        out.push(*proto);
        out.push(0);
        out.extend_from_slice(&[0u8; 8]);
    }
    out
}

fn csv_input(name: &str, rows: &[&str]) -> Input {
    let mut text = String::from("timestamp,src_ip,src_port,dst_ip,dst_port,protocol,bytes,packets\n");
    for row in rows {
        text.push_str(row);
        text.push('\n');
    }
    Input::new(name, text.into_bytes())
}

/// An HMI polling a PLC on the modbus port comes out as PLC + client.
#[test]
fn test_modbus_polling_classifies_plc() {
    init_logging();
    let input = csv_input(
        "plant.csv",
        &[
            "1700000000,192.168.10.5,49200,192.168.10.20,502,tcp,240,4",
            "1700000001,192.168.10.20,502,192.168.10.5,49200,tcp,180,3",
            "1700000010,192.168.10.5,49201,192.168.10.20,502,tcp,240,4",
            "1700000011,192.168.10.20,502,192.168.10.5,49201,tcp,180,3",
        ],
    );
    let artifact = analyze(&[input], &Config::default()).unwrap();

    let plc = artifact
        .hosts
        .iter()
        .find(|h| h.addr.to_string() == "192.168.10.20")
        .unwrap();
    assert_eq!(plc.role, Role::PlcModbus);
    assert!((plc.confidence - 1.0).abs() < 1e-9);

    let hmi = artifact
        .hosts
        .iter()
        .find(|h| h.addr.to_string() == "192.168.10.5")
        .unwrap();
    assert_eq!(hmi.role, Role::Client);
}

/// Many clients pulling from one host on 443 makes it a web server.
#[test]
fn test_fan_in_on_443_classifies_web_server() {
    init_logging();
    let mut rows = Vec::new();
    for i in 1..=6u8 {
        rows.push(format!(
            "170000000{i},10.1.0.{i},49{i}00,10.1.0.100,443,tcp,300,4"
        ));
        rows.push(format!(
            "170000000{i},10.1.0.100,443,10.1.0.{i},49{i}00,tcp,9000,12"
        ));
    }
    let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
    let artifact = analyze(&[csv_input("office.csv", &refs)], &Config::default()).unwrap();

    let server = artifact
        .hosts
        .iter()
        .find(|h| h.addr.to_string() == "10.1.0.100")
        .unwrap();
    assert_eq!(server.role, Role::WebServer);
    assert_eq!(server.fan_in, 6);
}

/// A balanced host bridging two subnets gets the gateway role in the
/// refinement pass.
#[test]
fn test_bridge_host_refined_to_gateway() {
    init_logging();
    let mut rows = Vec::new();
    // Four hosts on 10.2.0.x each talk through 10.2.0.254 to 10.3.0.x,
    // traffic flows both ways through the bridge on varied ports
    for i in 1..=4u8 {
        rows.push(format!(
            "1700000000,10.2.0.{i},4910{i},10.2.0.254,70{i}0,tcp,5000,10"
        ));
        rows.push(format!(
            "1700000001,10.2.0.254,4920{i},10.3.0.{i},70{i}1,tcp,5000,10"
        ));
    }
    let refs: Vec<&str> = rows.iter().map(String::as_str).collect();

    let mut config = Config::default();
    // Small capture: split the two wings apart
    config.topology.max_hosts_per_subnet = 4;
    let artifact = analyze(&[csv_input("bridge.csv", &refs)], &config).unwrap();

    let bridge = artifact
        .hosts
        .iter()
        .find(|h| h.addr.to_string() == "10.2.0.254")
        .unwrap();
    assert_eq!(bridge.role, Role::Gateway);
    assert!(artifact.subnets.len() >= 2);
}

/// One garbage input alongside a valid one still yields an artifact,
/// with the failure recorded in the summary.
#[test]
fn test_partial_failure_still_produces_artifact() {
    init_logging();
    let garbage = Input::new("noise.bin", vec![0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);
    let valid = Input::new(
        "flows.nf",
        v5_packet(&[([10, 0, 0, 1], 49152, [10, 0, 0, 2], 80, 6, 10, 4000)]),
    );
    let artifact = analyze(&[garbage, valid], &Config::default()).unwrap();

    assert_eq!(artifact.summary.failed_sources, 1);
    assert_eq!(artifact.summary.sources.len(), 2);
    assert!(!artifact.summary.sources[0].ok);
    assert!(artifact.summary.sources[0]
        .error
        .as_deref()
        .unwrap()
        .contains("noise.bin"));
    assert!(artifact.summary.sources[1].ok);
    assert_eq!(artifact.summary.host_count, 2);
}

/// Every input failing is a hard error, not an empty artifact.
#[test]
fn test_all_inputs_failing_is_fatal() {
    init_logging();
    let inputs = vec![
        Input::new("a.bin", vec![0xff; 16]),
        Input::new("b.bin", vec![0x00; 16]),
    ];
    let err = analyze(&inputs, &Config::default()).unwrap_err();
    assert!(matches!(err, AnalysisError::AllInputsFailed { attempted: 2 }));
}

/// Same inputs, same artifact, byte for byte.
#[test]
fn test_artifact_is_deterministic() {
    init_logging();
    let inputs = vec![
        csv_input(
            "site.csv",
            &[
                "1700000000,10.5.0.1,49152,10.5.0.9,502,tcp,300,5",
                "1700000001,10.5.0.9,502,10.5.0.1,49152,tcp,200,4",
                "1700000002,10.5.0.2,49153,10.5.0.8,3306,tcp,800,9",
                "1700000003,10.5.0.8,3306,10.5.0.2,49153,tcp,44000,40",
            ],
        ),
        Input::new(
            "edge.nf",
            v5_packet(&[
                ([10, 5, 0, 3], 50000, [10, 5, 0, 9], 502, 6, 6, 360),
                ([10, 5, 0, 9], 502, [10, 5, 0, 3], 50000, 6, 5, 280),
            ]),
        ),
    ];

    let first = serde_json::to_vec(&analyze(&inputs, &Config::default()).unwrap()).unwrap();
    let second = serde_json::to_vec(&analyze(&inputs, &Config::default()).unwrap()).unwrap();
    assert_eq!(first, second);
}

/// Flows for the same session split across two files merge into one
/// connection, initiated by whoever the earlier file saw first.
#[test]
fn test_cross_file_flow_merge() {
    init_logging();
    let early = csv_input(
        "first-half.csv",
        &["1700000000,10.6.0.1,49152,10.6.0.2,80,tcp,500,5"],
    );
    let late = csv_input(
        "second-half.csv",
        &["1700000100,10.6.0.2,80,10.6.0.1,49152,tcp,90000,60"],
    );
    let artifact = analyze(&[early, late], &Config::default()).unwrap();

    assert_eq!(artifact.connections.len(), 1);
    let conn = &artifact.connections[0];
    assert_eq!(conn.initiator.to_string(), "10.6.0.1");
    assert_eq!(conn.bytes, 90_500);
}

/// Dropping an input never adds hosts or connections.
#[test]
fn test_fewer_inputs_never_grow_the_artifact() {
    init_logging();
    let a = || {
        csv_input(
            "a.csv",
            &[
                "1700000000,10.7.0.1,49152,10.7.0.2,443,tcp,400,5",
                "1700000001,10.7.0.2,443,10.7.0.1,49152,tcp,8000,10",
            ],
        )
    };
    let b = || {
        Input::new(
            "b.nf",
            v5_packet(&[([10, 7, 0, 3], 50000, [10, 7, 0, 4], 53, 17, 2, 128)]),
        )
    };

    let full = analyze(&[a(), b()], &Config::default()).unwrap();
    let partial = analyze(&[a()], &Config::default()).unwrap();

    assert!(partial.summary.host_count <= full.summary.host_count);
    assert!(partial.summary.connection_count <= full.summary.connection_count);
    assert!(partial.summary.anomaly_count <= full.summary.anomaly_count);

    // 10.7.0.2's supporting flows live entirely in input a, so dropping
    // input b must not move its role or confidence
    let host_in = |artifact: &netscope::AnalysisArtifact| {
        artifact
            .hosts
            .iter()
            .find(|h| h.addr.to_string() == "10.7.0.2")
            .map(|h| (h.role, h.confidence))
            .unwrap()
    };
    assert_eq!(host_in(&full), host_in(&partial));
}

/// Malformed CSV rows are counted and skipped, not fatal.
#[test]
fn test_malformed_rows_counted() {
    init_logging();
    let input = csv_input(
        "messy.csv",
        &[
            "1700000000,10.8.0.1,49152,10.8.0.2,80,tcp,400,5",
            "not,a,valid,row",
            "1700000001,10.8.0.2,80,10.8.0.1,49152,tcp,600,7",
        ],
    );
    let artifact = analyze(&[input], &Config::default()).unwrap();

    assert_eq!(artifact.summary.sources[0].events, 2);
    assert_eq!(artifact.summary.sources[0].malformed, 1);
    assert_eq!(artifact.summary.skipped_records, 1);
    assert_eq!(artifact.summary.host_count, 2);
}
