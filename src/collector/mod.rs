//! Namespace-serialized collection core.
//!
//! Scrapes from arbitrary tasks are funneled through a request channel to
//! the single pinned worker ([`worker`]), the only execution context allowed
//! to switch network namespaces. The orchestrator here is intentionally
//! thin: it enqueues, waits for the acknowledgement and drains the feed.

pub mod conntrack;
pub mod cri;
pub mod procnet;
pub mod sandbox;
pub mod sockstat;
pub mod worker;

use std::sync::mpsc::{Receiver, Sender};
use std::time::Instant;

use parking_lot::Mutex;
use regex::Regex;
use tracing::{error, info};

use crate::sample::MetricSample;

/// Feature switches and filters for one collection run.
#[derive(Debug, Clone)]
pub struct CollectorOptions {
    /// Tested against `<pod_namespace>/<pod_name>`.
    pub pod_filter: Regex,
    pub collect_host: bool,
    pub conntrack: bool,
    pub snmp: bool,
    pub snmp_metric_include: Regex,
    pub netstat: bool,
    pub netstat_metric_include: Regex,
    pub sockproto: bool,
    /// Protocols to tally, already split from the comma-separated flag.
    pub sockproto_protos: Vec<String>,
}

/// One scrape enqueued to the pinned worker.
///
/// The feed receives every sample of the (possibly replayed) scrape; `done`
/// fires after the last sample was sent.
pub struct CollectRequest {
    pub feed: Sender<MetricSample>,
    pub done: tokio::sync::oneshot::Sender<()>,
}

/// Handle through which scrape handlers reach the pinned worker.
pub struct NetnsCollector {
    requests: Mutex<Sender<CollectRequest>>,
}

impl NetnsCollector {
    pub fn new(requests: Sender<CollectRequest>) -> Self {
        NetnsCollector {
            requests: Mutex::new(requests),
        }
    }

    /// Runs one scrape against the worker and returns the sample vector.
    ///
    /// Blocking; callers inside the async runtime must wrap this in
    /// `spawn_blocking`.
    pub fn collect(&self) -> Vec<MetricSample> {
        let start = Instant::now();
        let (feed_tx, feed_rx): (Sender<MetricSample>, Receiver<MetricSample>) =
            std::sync::mpsc::channel();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        let enqueued = self
            .requests
            .lock()
            .send(CollectRequest {
                feed: feed_tx,
                done: done_tx,
            })
            .is_ok();
        if !enqueued {
            error!("collection worker is gone, serving empty scrape");
            return Vec::new();
        }

        // The worker replays from its cache before acknowledging, so by the
        // time this returns every sample is buffered in the feed.
        let _ = done_rx.blocking_recv();
        let samples: Vec<MetricSample> = feed_rx.try_iter().collect();

        info!(
            ms = start.elapsed().as_secs_f64() * 1000.0,
            samples = samples.len(),
            "collector scrape served"
        );
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn options() -> CollectorOptions {
        CollectorOptions {
            pod_filter: Regex::new("^.+$").unwrap(),
            collect_host: true,
            conntrack: true,
            snmp: true,
            snmp_metric_include: Regex::new("^Tcp_ActiveOpens$").unwrap(),
            netstat: true,
            netstat_metric_include: Regex::new("^IpExt_(In|Out)Octets$").unwrap(),
            sockproto: false,
            sockproto_protos: vec!["tcp".to_string(), "udp".to_string()],
        }
    }

    #[test]
    fn collect_drains_everything_the_worker_feeds() {
        let (request_tx, request_rx) = std::sync::mpsc::channel::<CollectRequest>();
        let collector = NetnsCollector::new(request_tx);

        // Stand-in worker: replays two samples per request, then acks.
        let worker = thread::spawn(move || {
            if let Ok(request) = request_rx.recv() {
                for value in [1.0, 2.0] {
                    let _ = request.feed.send(MetricSample {
                        name: "cosanet_conntrack_curr".to_string(),
                        help: String::new(),
                        label_names: Vec::new(),
                        label_values: Vec::new(),
                        value,
                    });
                }
                let _ = request.done.send(());
            }
        });

        let samples = collector.collect();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].value, 1.0);
        assert_eq!(samples[1].value, 2.0);
        worker.join().unwrap();
    }

    #[test]
    fn collect_with_dead_worker_is_empty() {
        let (request_tx, request_rx) = std::sync::mpsc::channel::<CollectRequest>();
        drop(request_rx);
        let collector = NetnsCollector::new(request_tx);
        assert!(collector.collect().is_empty());
    }

    #[test]
    fn options_compile_the_default_filters() {
        let options = options();
        assert!(options.pod_filter.is_match("default/web-0"));
        assert!(options.snmp_metric_include.is_match("Tcp_ActiveOpens"));
        assert!(!options.snmp_metric_include.is_match("Tcp_PassiveOpens"));
        assert!(options.netstat_metric_include.is_match("IpExt_InOctets"));
    }
}
