//! Latency histograms for the celebration and generation paths.
//! Each metric keeps the last 1024 samples; summaries report p50/p95/p99.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Measures elapsed time from creation until `finish`.
pub struct TimingSpan {
    name: &'static str,
    start: Instant,
    registry: Arc<MetricsRegistry>,
}

impl TimingSpan {
    /// Record elapsed milliseconds under the span's metric and return them.
    pub fn finish(self) -> f64 {
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        self.registry.record(self.name, elapsed_ms);
        elapsed_ms
    }
}

struct SampleRing {
    samples: Vec<f64>,
    pos: usize,
    count: usize,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity],
            pos: 0,
            count: 0,
        }
    }

    fn push(&mut self, value: f64) {
        let capacity = self.samples.len();
        self.samples[self.pos] = value;
        self.pos = (self.pos + 1) % capacity;
        self.count = (self.count + 1).min(capacity);
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples[..self.count].to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((p / 100.0) * (self.count as f64 - 1.0)).round() as usize;
        sorted[idx.min(self.count - 1)]
    }
}

pub struct MetricsRegistry {
    histograms: Mutex<HashMap<&'static str, SampleRing>>,
    ring_capacity: usize,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            histograms: Mutex::new(HashMap::new()),
            ring_capacity: 1024,
        }
    }

    /// Record a sample in milliseconds.
    pub fn record(&self, name: &'static str, value_ms: f64) {
        self.histograms
            .lock()
            .entry(name)
            .or_insert_with(|| SampleRing::new(self.ring_capacity))
            .push(value_ms);
        tracing::trace!(metric = name, value_ms, "metric_recorded");
    }

    pub fn span(self: &Arc<Self>, name: &'static str) -> TimingSpan {
        TimingSpan {
            name,
            start: Instant::now(),
            registry: Arc::clone(self),
        }
    }

    #[cfg(test)]
    pub fn count(&self, name: &str) -> usize {
        self.histograms.lock().get(name).map(|r| r.count).unwrap_or(0)
    }

    #[cfg(test)]
    pub fn percentile(&self, name: &str, p: f64) -> f64 {
        self.histograms
            .lock()
            .get(name)
            .map(|ring| ring.percentile(p))
            .unwrap_or(0.0)
    }

    pub fn summary(&self) -> HashMap<String, MetricSummary> {
        let hists = self.histograms.lock();
        hists
            .iter()
            .map(|(&name, ring)| {
                (
                    name.to_string(),
                    MetricSummary {
                        p50_ms: ring.percentile(50.0),
                        p95_ms: ring.percentile(95.0),
                        p99_ms: ring.percentile(99.0),
                        count: ring.count,
                    },
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricSummary {
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub count: usize,
}

pub mod metric_names {
    /// Session attached → candles blown by detection.
    pub const BLOW_DETECTED: &str = "t_blow_detected";
    /// Work done per sampler tick.
    pub const TICK: &str = "t_tick";
    pub const WISH_GENERATED: &str = "t_wish_generated";
    pub const IMAGE_GENERATED: &str = "t_image_generated";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_over_recorded_samples() {
        let registry = MetricsRegistry::new();
        for v in 1..=100 {
            registry.record(metric_names::TICK, v as f64);
        }
        assert_eq!(registry.count(metric_names::TICK), 100);
        assert_eq!(registry.percentile(metric_names::TICK, 50.0), 51.0);
        assert_eq!(registry.percentile(metric_names::TICK, 99.0), 99.0);
        assert_eq!(registry.percentile("missing", 50.0), 0.0);
    }

    #[test]
    fn ring_keeps_latest_window() {
        let registry = MetricsRegistry {
            histograms: Mutex::new(HashMap::new()),
            ring_capacity: 4,
        };
        for v in [100.0, 1.0, 2.0, 3.0, 4.0] {
            registry.record(metric_names::TICK, v);
        }
        let summary = registry.summary();
        let tick = &summary[metric_names::TICK];
        assert_eq!(tick.count, 4);
        assert_eq!(tick.p99_ms, 4.0);
    }

    #[test]
    fn span_records_on_finish() {
        let registry = Arc::new(MetricsRegistry::new());
        let span = registry.span(metric_names::WISH_GENERATED);
        assert!(span.finish() >= 0.0);
        assert_eq!(registry.count(metric_names::WISH_GENERATED), 1);
    }
}
