//! Single-slot memoization of a whole scrape.
//!
//! The cache is owned by the pinned worker and consulted once per incoming
//! scrape request, so at most one underlying collection is ever in flight.

use std::time::{Duration, Instant};

use crate::sample::{MetricSample, MetricSink};

/// The materialized result of the most recent collection.
#[derive(Default)]
pub struct ScrapeCache {
    taken_at: Option<Instant>,
    samples: Vec<MetricSample>,
}

impl ScrapeCache {
    /// True when the cached vector can be replayed instead of collecting.
    ///
    /// An empty vector is never fresh; it usually means the previous
    /// collection found nothing and retrying is cheap.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        match self.taken_at {
            Some(taken_at) => taken_at.elapsed() <= ttl && !self.samples.is_empty(),
            None => false,
        }
    }

    /// Replaces the cached scrape with a newer one.
    pub fn store(&mut self, samples: Vec<MetricSample>) {
        self.samples = samples;
        self.taken_at = Some(Instant::now());
    }

    /// Replays every cached sample into the sink.
    pub fn replay(&self, sink: &dyn MetricSink) {
        for sample in &self.samples {
            sink.emit(sample.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn sample(value: f64) -> MetricSample {
        MetricSample {
            name: "cosanet_test".to_string(),
            help: String::new(),
            label_names: Vec::new(),
            label_values: Vec::new(),
            value,
        }
    }

    #[test]
    fn empty_cache_is_never_fresh() {
        let cache = ScrapeCache::default();
        assert!(!cache.is_fresh(Duration::from_secs(60)));
    }

    #[test]
    fn stored_scrape_is_fresh_within_ttl() {
        let mut cache = ScrapeCache::default();
        cache.store(vec![sample(1.0)]);
        assert!(cache.is_fresh(Duration::from_secs(60)));
        assert!(!cache.is_fresh(Duration::from_nanos(0)));
    }

    #[test]
    fn stored_empty_vector_stays_stale() {
        let mut cache = ScrapeCache::default();
        cache.store(Vec::new());
        assert!(!cache.is_fresh(Duration::from_secs(60)));
    }

    #[test]
    fn replay_emits_all_samples_in_order() {
        let mut cache = ScrapeCache::default();
        cache.store(vec![sample(1.0), sample(2.0)]);

        let sink = RefCell::new(Vec::new());
        cache.replay(&sink);
        let replayed = sink.into_inner();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].value, 1.0);
        assert_eq!(replayed[1].value, 2.0);
    }
}
