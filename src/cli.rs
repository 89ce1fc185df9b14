//! CLI arguments for cosanet.
//!
//! Flag names mirror the exporter's historical surface: generic settings at
//! the top level, collector settings under the `collector.` prefix.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use regex::Regex;
use tracing::Level;

use crate::collector::CollectorOptions;

/// Log output formats.
#[derive(Debug, Clone, ValueEnum)]
pub enum LogFormat {
    Json,
    Text,
}

/// Log verbosity options for CLI parsing.
#[derive(Debug, Clone, ValueEnum)]
pub enum Verbosity {
    Debug,
    Info,
    Warn,
    Error,
}

impl Verbosity {
    pub fn level(&self) -> Level {
        match self {
            Verbosity::Debug => Level::DEBUG,
            Verbosity::Info => Level::INFO,
            Verbosity::Warn => Level::WARN,
            Verbosity::Error => Level::ERROR,
        }
    }
}

/// Main CLI arguments structure.
#[derive(Parser, Debug)]
#[command(
    name = "cosanet",
    about = "Per-node network telemetry exporter for container sandboxes",
    long_about = "Per-node network telemetry exporter for container sandboxes.\n\n\
                  Enumerates ready pod sandboxes through the CRI socket, samples\n\
                  /proc/net and conntrack counters inside each sandbox's network\n\
                  namespace and exposes them with Kubernetes identity labels.",
    version
)]
pub struct Args {
    /// Log output format: json or text
    #[arg(long = "logformat", value_enum, default_value = "json")]
    pub log_format: LogFormat,

    /// Address and port to listen on (e.g. :8080 or 0.0.0.0:9988)
    #[arg(long = "listen", default_value = ":9156")]
    pub listen: String,

    /// Cache duration for metrics collection (e.g. 500ms, 2s, 1m)
    #[arg(long = "cache-duration", value_parser = parse_duration, default_value = "500ms")]
    pub cache_duration: Duration,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, value_enum, default_value = "info")]
    pub verbosity: Verbosity,

    /// filter namespace/pod based on regex (eg: ^default/.*$)
    #[arg(long = "collector.pod-filter", default_value = "^.+$")]
    pub pod_filter: String,

    /// collect host metrics
    #[arg(long = "collector.host-metrics.enabled", action = ArgAction::Set, default_value_t = true)]
    pub host_metrics: bool,

    /// enable conntrack stats (curr and max) collection
    #[arg(long = "collector.conntrack.enabled", action = ArgAction::Set, default_value_t = true)]
    pub conntrack: bool,

    /// enable /proc/net/snmp and snmp6 collection
    #[arg(long = "collector.snmp.enabled", action = ArgAction::Set, default_value_t = true)]
    pub snmp: bool,

    /// filter snmp metrics using regex tested against proto_metric
    #[arg(
        long = "collector.snmp.metric-include",
        default_value = "^(Tcp_((Act|Pass)iveOpens|CurrEstab)|Ip6_(In|Out)Octets)$"
    )]
    pub snmp_metric_include: String,

    /// enable /proc/net/netstat collection
    #[arg(long = "collector.netstat.enabled", action = ArgAction::Set, default_value_t = true)]
    pub netstat: bool,

    /// filter netstat metrics using regex tested against proto_metric
    #[arg(
        long = "collector.netstat.metric-include",
        default_value = "^IpExt_(In|Out)Octets$"
    )]
    pub netstat_metric_include: String,

    /// enable per socket protocol states stats (/proc/net/{tcp,udp,icmp,udplite,raw}{,6})
    #[arg(long = "collector.sockproto.enabled", action = ArgAction::Set, default_value_t = false)]
    pub sockproto: bool,

    /// socket protocol list to collect (comma separated, available: tcp, udp, icmp, udplite and raw)
    #[arg(long = "collector.sockproto.protos", default_value = "tcp,udp")]
    pub sockproto_protos: String,
}

impl Args {
    /// Compiles the filter regexes into the collector's option set.
    pub fn collector_options(&self) -> Result<CollectorOptions> {
        Ok(CollectorOptions {
            pod_filter: Regex::new(&self.pod_filter)
                .with_context(|| format!("invalid pod filter {:?}", self.pod_filter))?,
            collect_host: self.host_metrics,
            conntrack: self.conntrack,
            snmp: self.snmp,
            snmp_metric_include: Regex::new(&self.snmp_metric_include)
                .with_context(|| format!("invalid snmp include {:?}", self.snmp_metric_include))?,
            netstat: self.netstat,
            netstat_metric_include: Regex::new(&self.netstat_metric_include).with_context(
                || format!("invalid netstat include {:?}", self.netstat_metric_include),
            )?,
            sockproto: self.sockproto,
            sockproto_protos: self
                .sockproto_protos
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        })
    }

    /// Resolves the listen flag to a socket address; a bare `:port` binds
    /// all interfaces.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let spec = if self.listen.starts_with(':') {
            format!("0.0.0.0{}", self.listen)
        } else {
            self.listen.clone()
        };
        spec.parse()
            .with_context(|| format!("invalid listen address {:?}", self.listen))
    }
}

/// Parses duration literals like `500ms`, `2s`, `1m` or `1h`.
fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("missing unit in duration {value:?}"))?;
    let (digits, unit) = value.split_at(split);
    let amount: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration {value:?}"))?;
    match unit {
        "ms" => Ok(Duration::from_millis(amount)),
        "s" => Ok(Duration::from_secs(amount)),
        "m" => Ok(Duration::from_secs(amount * 60)),
        "h" => Ok(Duration::from_secs(amount * 3600)),
        _ => Err(format!("unknown duration unit {unit:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_literals() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("500").is_err());
        assert!(parse_duration("ms").is_err());
        assert!(parse_duration("5x").is_err());
    }

    #[test]
    fn defaults_match_the_documented_surface() {
        let args = Args::parse_from(["cosanet"]);
        assert_eq!(args.listen, ":9156");
        assert_eq!(args.cache_duration, Duration::from_millis(500));
        assert!(args.host_metrics);
        assert!(args.conntrack);
        assert!(args.snmp);
        assert!(args.netstat);
        assert!(!args.sockproto);
        assert_eq!(args.sockproto_protos, "tcp,udp");
    }

    #[test]
    fn bare_port_listen_spec_binds_all_interfaces() {
        let args = Args::parse_from(["cosanet"]);
        assert_eq!(args.listen_addr().unwrap().to_string(), "0.0.0.0:9156");

        let args = Args::parse_from(["cosanet", "--listen", "127.0.0.1:9988"]);
        assert_eq!(args.listen_addr().unwrap().to_string(), "127.0.0.1:9988");

        let args = Args::parse_from(["cosanet", "--listen", "nonsense"]);
        assert!(args.listen_addr().is_err());
    }

    #[test]
    fn collector_options_compile_and_split() {
        let args = Args::parse_from([
            "cosanet",
            "--collector.sockproto.enabled",
            "true",
            "--collector.sockproto.protos",
            "tcp, udp,raw,",
        ]);
        let options = args.collector_options().unwrap();
        assert!(options.sockproto);
        assert_eq!(options.sockproto_protos, vec!["tcp", "udp", "raw"]);
        assert!(options.pod_filter.is_match("kube-system/kube-proxy-xyz"));
    }

    #[test]
    fn default_snmp_filter_keeps_the_curated_set() {
        let args = Args::parse_from(["cosanet"]);
        let options = args.collector_options().unwrap();
        for motif in ["Tcp_ActiveOpens", "Tcp_PassiveOpens", "Tcp_CurrEstab", "Ip6_InOctets"] {
            assert!(options.snmp_metric_include.is_match(motif), "{motif}");
        }
        assert!(!options.snmp_metric_include.is_match("Tcp_InSegs"));
    }

    #[test]
    fn namespaced_pod_filter_suppresses_other_namespaces() {
        let args = Args::parse_from(["cosanet", "--collector.pod-filter", "^default/.*$"]);
        let options = args.collector_options().unwrap();
        assert!(options.pod_filter.is_match("default/web-0"));
        assert!(!options.pod_filter.is_match("kube-system/kube-proxy-xyz"));
    }

    #[test]
    fn bad_filter_regex_is_rejected() {
        let args = Args::parse_from(["cosanet", "--collector.pod-filter", "("]);
        assert!(args.collector_options().is_err());
    }
}
