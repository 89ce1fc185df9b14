//! Metric sample model and Prometheus family conversion.
//!
//! The pinned worker produces plain `MetricSample`s so that cache replay and
//! direct collection share one code path. Samples are turned into untyped
//! Prometheus metric families only at the HTTP edge.

use ahash::AHashMap as HashMap;
use prometheus::proto::{LabelPair, Metric, MetricFamily, MetricType, Untyped};

/// One emitted metric value with its descriptor.
///
/// The label name list and label value list are positionally aligned and
/// fixed per emission site.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub help: String,
    pub label_names: Vec<String>,
    pub label_values: Vec<String>,
    pub value: f64,
}

/// Capability accepting metric samples in any order.
///
/// Implemented by the scrape feed channel and by plain vectors in tests.
pub trait MetricSink {
    fn emit(&self, sample: MetricSample);
}

impl MetricSink for std::sync::mpsc::Sender<MetricSample> {
    fn emit(&self, sample: MetricSample) {
        // The receiver only disappears when the scrape was abandoned; the
        // remaining replay is then pointless and silently dropped.
        let _ = self.send(sample);
    }
}

impl MetricSink for std::cell::RefCell<Vec<MetricSample>> {
    fn emit(&self, sample: MetricSample) {
        self.borrow_mut().push(sample);
    }
}

/// Groups samples by metric name into untyped Prometheus families,
/// preserving first-seen order.
pub fn samples_to_families(samples: &[MetricSample]) -> Vec<MetricFamily> {
    let mut order: Vec<String> = Vec::new();
    let mut families: HashMap<String, MetricFamily> = HashMap::new();

    for sample in samples {
        let family = families.entry(sample.name.clone()).or_insert_with(|| {
            order.push(sample.name.clone());
            let mut family = MetricFamily::new();
            family.set_name(sample.name.clone());
            family.set_help(sample.help.clone());
            family.set_field_type(MetricType::UNTYPED);
            family
        });

        let mut metric = Metric::new();
        for (name, value) in sample.label_names.iter().zip(&sample.label_values) {
            let mut pair = LabelPair::new();
            pair.set_name(name.clone());
            pair.set_value(value.clone());
            metric.mut_label().push(pair);
        }
        let mut untyped = Untyped::new();
        untyped.set_value(sample.value);
        metric.set_untyped(untyped);
        family.mut_metric().push(metric);
    }

    order
        .into_iter()
        .map(|name| families.remove(&name).expect("family recorded in order"))
        .collect()
}
