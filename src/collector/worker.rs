//! The namespace-pinned worker.
//!
//! Network-namespace membership is per kernel thread, so every namespace
//! switch and every in-namespace read happens on one dedicated OS thread
//! that nothing else ever runs on. The worker owns a handle to the initial
//! namespace and treats failure to restore it as fatal: continuing with
//! unknown kernel state on this thread would corrupt every later sample.

use std::cell::RefCell;
use std::fs::File;
use std::os::fd::AsFd;
use std::process;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nix::sched::{setns, CloneFlags};
use regex::Regex;
use tracing::{debug, error, warn};

use super::conntrack::Conntrack;
use super::procnet::{parse_snmp6_file, parse_two_line_file, CounterMap};
use super::sandbox::{self, SandboxRecord};
use super::sockstat::{self, IpVersion, SockProto, SocketStateTally};
use super::{CollectRequest, CollectorOptions};
use crate::cache::ScrapeCache;
use crate::resolver::PodControllerResolver;
use crate::sample::{MetricSample, MetricSink};

const BASE_LABELS: [&str; 4] = [
    "cosanet_node",
    "cosanet_pod",
    "cosanet_namespace",
    "cosanet_netnsname",
];

/// The ordered label tuple shared by every sample of one sandbox.
pub(crate) struct SampleLabels {
    names: Vec<String>,
    values: Vec<String>,
}

impl SampleLabels {
    fn new(names: &[&str], values: Vec<String>) -> Self {
        SampleLabels {
            names: names.iter().map(|n| n.to_string()).collect(),
            values,
        }
    }

    /// Extends the tuple with per-sample labels (socket state, ip version).
    fn with(&self, extra_names: &[&str], extra_values: &[&str]) -> (Vec<String>, Vec<String>) {
        let mut names = self.names.clone();
        names.extend(extra_names.iter().map(|n| n.to_string()));
        let mut values = self.values.clone();
        values.extend(extra_values.iter().map(|v| v.to_string()));
        (names, values)
    }
}

pub struct Worker {
    node_name: String,
    options: CollectorOptions,
    resolver: Arc<dyn PodControllerResolver>,
    cache_duration: Duration,
    requests: Receiver<CollectRequest>,
}

/// Serves scrape requests in arrival order, one at a time: refresh the
/// cache when stale, replay it, acknowledge. Returns when every request
/// sender is gone.
fn serve_requests(
    requests: &Receiver<CollectRequest>,
    cache: &mut ScrapeCache,
    ttl: Duration,
    mut collect: impl FnMut(&dyn MetricSink),
) {
    while let Ok(request) = requests.recv() {
        if !cache.is_fresh(ttl) {
            let sink = RefCell::new(Vec::new());
            collect(&sink);
            cache.store(sink.into_inner());
            debug!(samples = cache.len(), "scrape cache refreshed");
        }
        cache.replay(&request.feed);
        let _ = request.done.send(());
    }
}

/// Spawns the worker on its own OS thread and returns the request sender.
pub fn spawn(
    node_name: String,
    options: CollectorOptions,
    resolver: Arc<dyn PodControllerResolver>,
    cache_duration: Duration,
) -> std::io::Result<Sender<CollectRequest>> {
    let (tx, rx) = std::sync::mpsc::channel();
    let worker = Worker {
        node_name,
        options,
        resolver,
        cache_duration,
        requests: rx,
    };
    thread::Builder::new()
        .name("netns-worker".to_string())
        .spawn(move || worker.run())?;
    Ok(tx)
}

impl Worker {
    /// Serves requests until every sender is gone. Runs on the pinned
    /// thread only.
    fn run(self) {
        // Current-thread runtime: the CRI calls it drives are polled on
        // this very thread and can never migrate.
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                error!(err = %err, "failed to build worker runtime");
                process::exit(1);
            }
        };

        // /proc/thread-self makes the handle belong to this thread, not to
        // whichever thread happened to start the process.
        let initial_ns = match File::open("/proc/thread-self/ns/net") {
            Ok(file) => file,
            Err(err) => {
                error!(err = %err, "failed to open initial network namespace");
                process::exit(1);
            }
        };

        let mut cache = ScrapeCache::default();
        serve_requests(&self.requests, &mut cache, self.cache_duration, |sink| {
            self.collect_all(&runtime, &initial_ns, sink)
        });
    }

    /// One full collection: enumerate sandboxes, visit each namespace,
    /// optionally sample the host namespace last.
    fn collect_all(&self, runtime: &tokio::runtime::Runtime, initial_ns: &File, sink: &dyn MetricSink) {
        let socket_path = match sandbox::discover_socket_path() {
            Ok(path) => path,
            Err(err) => {
                error!(err = %err, "failed to locate CRI socket");
                process::exit(1);
            }
        };
        let records = match runtime.block_on(sandbox::list_ready_sandboxes(&socket_path)) {
            Ok(records) => records,
            Err(err) => {
                error!(err = %err, "failed to list sandboxes");
                process::exit(1);
            }
        };

        for record in records {
            let composed = record.composed_name();
            if !self.options.pod_filter.is_match(&composed) {
                debug!(
                    pod = %record.name,
                    namespace = %record.namespace,
                    composedpodname = %composed,
                    filter = %self.options.pod_filter,
                    "sandbox skipped due to pod filter"
                );
                continue;
            }

            let ns_handle = match File::open(format!("/proc/{}/ns/net", record.pid)) {
                Ok(file) => file,
                Err(err) => {
                    error!(
                        pod = %record.name,
                        namespace = %record.namespace,
                        pid = record.pid,
                        err = %err,
                        "failed to get network namespace for pid"
                    );
                    continue;
                }
            };
            if let Err(err) = setns(ns_handle.as_fd(), CloneFlags::CLONE_NEWNET) {
                error!(
                    pod = %record.name,
                    namespace = %record.namespace,
                    pid = record.pid,
                    err = %err,
                    "failed to switch to network namespace"
                );
                continue;
            }

            self.collect_in_netns(&record, sink);

            if let Err(err) = setns(initial_ns.as_fd(), CloneFlags::CLONE_NEWNET) {
                // This thread is now stuck in a foreign namespace; there is
                // no safe way to keep collecting from it.
                error!(err = %err, "failed to switch back to the original network namespace");
                process::exit(1);
            }
            // ns_handle drops here, closing the sandbox namespace fd.
        }

        if self.options.collect_host {
            self.collect_in_netns(&SandboxRecord::host(), sink);
        }
    }

    /// Labels shared by everything emitted for one sandbox. Controller
    /// labels appear only when the active resolver is installed; a cache
    /// miss leaves them empty rather than guessing.
    fn sample_labels(&self, record: &SandboxRecord) -> SampleLabels {
        let mut names: Vec<&str> = BASE_LABELS.to_vec();
        let mut values = vec![
            self.node_name.clone(),
            record.name.clone(),
            record.namespace.clone(),
            record.netns_name.clone(),
        ];

        if self.resolver.active() {
            names.push("cosanet_pod_controller_kind");
            names.push("cosanet_pod_controller_name");
            match self.resolver.get_by_uid(&record.pod_uid) {
                Some(controller) => {
                    values.push(controller.kind);
                    values.push(controller.name);
                }
                None => {
                    debug!(
                        pod = %record.name,
                        namespace = %record.namespace,
                        "no cached controller ref for pod"
                    );
                    values.push(String::new());
                    values.push(String::new());
                }
            }
        }

        SampleLabels::new(&names, values)
    }

    /// The in-namespace collection block, run once per visited namespace.
    /// Emission order: conntrack, socket states, snmp, snmp6, netstat.
    fn collect_in_netns(&self, record: &SandboxRecord, sink: &dyn MetricSink) {
        let labels = self.sample_labels(record);

        if self.options.conntrack {
            let conntrack = match Conntrack::dial() {
                Ok(conntrack) => conntrack,
                Err(err) => {
                    error!(err = %err, "conntrack dial failed");
                    process::exit(1);
                }
            };
            let stats = conntrack.stats_global();
            emit(
                sink,
                &labels,
                "cosanet_conntrack_curr",
                "Number of entries in the conntrack table",
                stats.entries as f64,
            );
            emit(
                sink,
                &labels,
                "cosanet_conntrack_max",
                "Maximum entries in the conntrack table",
                stats.max_entries as f64,
            );
        }

        if self.options.sockproto {
            for proto in SockProto::ALL {
                if !self
                    .options
                    .sockproto_protos
                    .iter()
                    .any(|p| p == proto.as_str())
                {
                    debug!(
                        pod = %record.name,
                        namespace = %record.namespace,
                        sockproto = proto.as_str(),
                        "socket proto skipped, not in collect list"
                    );
                    continue;
                }
                self.collect_sock_stats(record, proto, &labels, sink);
            }
        }

        if self.options.snmp {
            let snmp_stats = parse_two_line_file("/proc/net/snmp").unwrap_or_default();
            publish_proc_net(
                "snmp",
                &snmp_stats,
                &self.options.snmp_metric_include,
                &labels,
                sink,
            );

            let snmp6_stats = parse_snmp6_file("/proc/net/snmp6").unwrap_or_default();
            publish_proc_net(
                "snmp6",
                &snmp6_stats,
                &self.options.snmp_metric_include,
                &labels,
                sink,
            );
        }

        if self.options.netstat {
            let netstat_stats = parse_two_line_file("/proc/net/netstat").unwrap_or_default();
            publish_proc_net(
                "netstat",
                &netstat_stats,
                &self.options.netstat_metric_include,
                &labels,
                sink,
            );
        }
    }

    /// Reads both address families of one protocol table; a failure on
    /// either skips the protocol for this sandbox.
    fn collect_sock_stats(
        &self,
        record: &SandboxRecord,
        proto: SockProto,
        labels: &SampleLabels,
        sink: &dyn MetricSink,
    ) {
        let v4 = match sockstat::stats(proto, IpVersion::V4) {
            Ok(tally) => tally,
            Err(err) => {
                warn!(
                    pod = %record.name,
                    sockproto = proto.as_str(),
                    err = %err,
                    "failed to collect IPv4 socket stats"
                );
                return;
            }
        };
        let v6 = match sockstat::stats(proto, IpVersion::V6) {
            Ok(tally) => tally,
            Err(err) => {
                warn!(
                    pod = %record.name,
                    sockproto = proto.as_str(),
                    err = %err,
                    "failed to collect IPv6 socket stats"
                );
                return;
            }
        };
        publish_sock_tally(proto, IpVersion::V4, &v4, labels, sink);
        publish_sock_tally(proto, IpVersion::V6, &v6, labels, sink);
    }
}

fn emit(sink: &dyn MetricSink, labels: &SampleLabels, name: &str, help: &str, value: f64) {
    sink.emit(MetricSample {
        name: name.to_string(),
        help: help.to_string(),
        label_names: labels.names.clone(),
        label_values: labels.values.clone(),
        value,
    });
}

/// Emits every counter of a parsed `/proc/net` map that passes the include
/// filter, as `cosanet_proc_net_<source>_<section>_<counter>`.
pub(crate) fn publish_proc_net(
    source: &str,
    stats: &CounterMap,
    filter: &Regex,
    labels: &SampleLabels,
    sink: &dyn MetricSink,
) {
    for (section, counters) in stats {
        for (counter, value) in counters {
            let motif = format!("{section}_{counter}");
            if !filter.is_match(&motif) {
                debug!(
                    proto_metric = %motif,
                    source = source,
                    filter = %filter,
                    "metric skipped due to filter"
                );
                continue;
            }
            sink.emit(MetricSample {
                name: format!("cosanet_proc_net_{source}_{section}_{counter}"),
                help: format!("/proc/net/{source} {section} {counter} entry"),
                label_names: labels.names.clone(),
                label_values: labels.values.clone(),
                value: *value as f64,
            });
        }
    }
}

/// Emits one sample per socket state under the shared per-protocol name,
/// labeled with state and ip version.
pub(crate) fn publish_sock_tally(
    proto: SockProto,
    version: IpVersion,
    tally: &SocketStateTally,
    labels: &SampleLabels,
    sink: &dyn MetricSink,
) {
    for (state, count) in tally {
        let (label_names, label_values) = labels.with(
            &["cosanet_state", "cosanet_ipversion"],
            &[state, version.label()],
        );
        sink.emit(MetricSample {
            name: format!("cosanet_proc_net_{}", proto.as_str()),
            help: format!("Socket statistics for {}", proto.as_str()),
            label_names,
            label_values,
            value: *count as f64,
        });
    }
}
