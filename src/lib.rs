//! cosanet - per-node network telemetry for container sandboxes.
//!
//! The crate enumerates ready pod sandboxes through the container runtime's
//! CRI socket, enters each sandbox's network namespace on a single pinned
//! worker thread, samples `/proc/net` and conntrack counters there and
//! exposes everything as Prometheus metrics labeled with Kubernetes
//! identity (pod, namespace, network namespace, top-level controller).

pub mod cache;
pub mod cli;
pub mod collector;
pub mod handlers;
pub mod resolver;
pub mod sample;
pub mod state;
