//! Integration tests for the sample → text exposition path.
//!
//! These verify that collected samples come out of the Prometheus text
//! encoder with the expected names, labels and values.

use cosanet::sample::{samples_to_families, MetricSample};
use prometheus::{Encoder, TextEncoder};

fn standard_sample(name: &str, value: f64) -> MetricSample {
    MetricSample {
        name: name.to_string(),
        help: format!("{name} help"),
        label_names: vec![
            "cosanet_node".to_string(),
            "cosanet_pod".to_string(),
            "cosanet_namespace".to_string(),
            "cosanet_netnsname".to_string(),
        ],
        label_values: vec![
            "node-1".to_string(),
            "web-0".to_string(),
            "default".to_string(),
            "cni-1234".to_string(),
        ],
        value,
    }
}

fn encode(samples: &[MetricSample]) -> String {
    let families = samples_to_families(samples);
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

#[test]
fn snmp_sample_renders_as_untyped_metric() {
    let text = encode(&[standard_sample("cosanet_proc_net_snmp_Tcp_ActiveOpens", 7.0)]);

    assert!(text.contains("# TYPE cosanet_proc_net_snmp_Tcp_ActiveOpens untyped"));
    assert!(text.contains(r#"cosanet_node="node-1""#));
    assert!(text.contains(r#"cosanet_pod="web-0""#));
    assert!(text.contains(r#"cosanet_namespace="default""#));
    assert!(text.contains(r#"cosanet_netnsname="cni-1234""#));

    let sample_line = text
        .lines()
        .find(|l| !l.starts_with('#') && l.starts_with("cosanet_proc_net_snmp_Tcp_ActiveOpens"))
        .expect("sample line present");
    assert!(sample_line.ends_with(" 7"));
}

#[test]
fn socket_state_samples_share_one_family() {
    let mut established = standard_sample("cosanet_proc_net_tcp", 1.0);
    established
        .label_names
        .extend(["cosanet_state".to_string(), "cosanet_ipversion".to_string()]);
    established
        .label_values
        .extend(["ESTABLISHED".to_string(), "ipv4".to_string()]);

    let mut listen = established.clone();
    listen.label_values[4] = "LISTEN".to_string();

    let text = encode(&[established, listen]);

    assert_eq!(
        text.matches("# TYPE cosanet_proc_net_tcp untyped").count(),
        1
    );
    assert!(text.contains(r#"cosanet_state="ESTABLISHED""#));
    assert!(text.contains(r#"cosanet_state="LISTEN""#));
    assert_eq!(text.matches(r#"cosanet_ipversion="ipv4""#).count(), 2);
}

#[test]
fn replayed_vectors_encode_identically() {
    let samples = vec![
        standard_sample("cosanet_conntrack_curr", 42.0),
        standard_sample("cosanet_conntrack_max", 262144.0),
    ];
    assert_eq!(encode(&samples), encode(&samples.clone()));
}
