//! Pipeline metrics
//!
//! Counters and a latency histogram, exportable in Prometheus text format.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counter metric (monotonically increasing)
pub struct Counter {
    value: AtomicU64,
    name: String,
    help: String,
}

impl Counter {
    /// Create a new counter
    pub fn new(name: &str, help: &str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name: name.into(),
            help: help.into(),
        }
    }

    /// Increment by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} counter\n{} {}\n",
            self.name, self.help, self.name, self.name, self.get()
        )
    }
}

/// Histogram for latency measurements
pub struct Histogram {
    buckets: Vec<(f64, AtomicU64)>,
    sum: AtomicU64,
    count: AtomicU64,
    name: String,
    help: String,
}

impl Histogram {
    /// Create with buckets suited to remote fetches (10ms .. 2min)
    pub fn new(name: &str, help: &str) -> Self {
        Self::with_buckets(
            name,
            help,
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0],
        )
    }

    /// Create with custom buckets
    pub fn with_buckets(name: &str, help: &str, bounds: Vec<f64>) -> Self {
        let buckets = bounds
            .into_iter()
            .map(|b| (b, AtomicU64::new(0)))
            .collect();

        Self {
            buckets,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
            name: name.into(),
            help: help.into(),
        }
    }

    /// Observe a value
    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);

        // sum kept in micros
        let micros = (value * 1_000_000.0) as u64;
        self.sum.fetch_add(micros, Ordering::Relaxed);

        for (bound, count) in &self.buckets {
            if value <= *bound {
                count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Number of observations
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        let mut output = format!(
            "# HELP {} {}\n# TYPE {} histogram\n",
            self.name, self.help, self.name
        );

        for (bound, count) in &self.buckets {
            output.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                self.name,
                bound,
                count.load(Ordering::Relaxed)
            ));
        }

        let sum_secs = self.sum.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        output.push_str(&format!("{}_sum {}\n", self.name, sum_secs));
        output.push_str(&format!("{}_count {}\n", self.name, self.count()));

        output
    }
}

/// Process-wide pipeline metrics
pub mod standard {
    use super::*;
    use std::sync::LazyLock;

    pub static SHOTS_REQUESTED: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("frameprep_shots_requested_total", "Shots sent to the frame source")
    });

    pub static FRAMES_EXTRACTED: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("frameprep_frames_extracted_total", "Frames materialized")
    });

    pub static SHOTS_SKIPPED: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("frameprep_shots_skipped_total", "Shots skipped as not found")
    });

    pub static CACHE_HITS: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("frameprep_cache_hits_total", "Cache artifact loads")
    });

    pub static CACHE_MISSES: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("frameprep_cache_misses_total", "Cache artifact rebuilds")
    });

    pub static FETCH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
        Histogram::new("frameprep_fetch_duration_seconds", "Per-shot select + materialize latency")
    });
}

/// Gather all standard metrics
pub fn gather_pipeline_metrics() -> String {
    let mut output = String::new();

    output.push_str(&standard::SHOTS_REQUESTED.to_prometheus());
    output.push_str(&standard::FRAMES_EXTRACTED.to_prometheus());
    output.push_str(&standard::SHOTS_SKIPPED.to_prometheus());
    output.push_str(&standard::CACHE_HITS.to_prometheus());
    output.push_str(&standard::CACHE_MISSES.to_prometheus());
    output.push_str(&standard::FETCH_DURATION.to_prometheus());

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new("test_counter", "Test counter");
        assert_eq!(counter.get(), 0);

        for _ in 0..6 {
            counter.inc();
        }
        assert_eq!(counter.get(), 6);
        assert!(counter.to_prometheus().contains("test_counter 6"));
    }

    #[test]
    fn test_histogram() {
        let histogram = Histogram::new("test_histogram", "Test histogram");

        histogram.observe(0.02);
        histogram.observe(0.2);
        histogram.observe(3.0);
        histogram.observe(45.0);

        let prometheus = histogram.to_prometheus();
        assert!(prometheus.contains("test_histogram_count 4"));
        assert!(prometheus.contains("test_histogram_bucket{le=\"5\"} 3"));
        assert!(prometheus.contains("test_histogram_bucket{le=\"60\"} 4"));
    }

    #[test]
    fn test_gather_lists_every_metric() {
        let text = gather_pipeline_metrics();
        assert!(text.contains("frameprep_shots_skipped_total"));
        assert!(text.contains("frameprep_fetch_duration_seconds_count"));
    }
}
