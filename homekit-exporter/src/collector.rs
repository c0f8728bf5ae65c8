//! Metric registry that stores accessory metrics between scrapes.
//!
//! Entries are created on first sight and only ever updated afterwards:
//! a metric whose accessory disappears keeps its last value. The HELP text
//! of an entry is fixed when it is created.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::mapping::MetricSample;

/// Prefix of the exporter's own metrics.
pub const SELF_METRIC_PREFIX: &str = "homekit_exporter";

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// The name was unseen; a new entry was allocated.
    Created,
    /// The name existed; only its value changed.
    Updated,
}

/// A stored metric value with metadata.
#[derive(Debug, Clone)]
pub struct MetricEntry {
    /// HELP text, fixed at creation.
    pub description: String,
    /// The current value.
    pub value: f64,
}

/// Registry statistics.
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    /// Poll cycles that ran to completion or failure.
    pub cycles_total: u64,
    /// Poll cycles that produced at least one accessory.
    pub cycles_succeeded: u64,
    /// Poll cycles abandoned with an error.
    pub cycles_failed: u64,
    /// Individual room/accessory fetches that failed.
    pub targets_failed: u64,
    /// Entries allocated since start.
    pub series_created: u64,
    /// Unix time in seconds of the last successful cycle.
    pub last_success_unix: Option<f64>,
    /// Scrapes served by the HTTP endpoint.
    pub scrapes_total: u64,
}

/// Thread-safe metric registry.
#[derive(Debug, Default)]
pub struct MetricRegistry {
    /// Stored metrics indexed by metric name.
    metrics: RwLock<BTreeMap<String, MetricEntry>>,
    /// Statistics.
    stats: RwLock<RegistryStats>,
}

impl MetricRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a metric.
    ///
    /// An unseen name gets a new entry carrying `description`. A known name
    /// only has its value replaced; the stored description is kept even if
    /// `description` differs.
    pub fn upsert(&self, name: &str, value: f64, description: &str) -> Upsert {
        let mut metrics = self.metrics.write();

        if let Some(entry) = metrics.get_mut(name) {
            entry.value = value;
            if entry.description != description {
                debug!(
                    metric = %name,
                    kept = %entry.description,
                    ignored = %description,
                    "Keeping original description"
                );
            }
            return Upsert::Updated;
        }

        metrics.insert(
            name.to_string(),
            MetricEntry {
                description: description.to_string(),
                value,
            },
        );
        drop(metrics);

        self.stats.write().series_created += 1;
        trace!(metric = %name, value, "Registered new metric");

        Upsert::Created
    }

    /// Insert or update a metric from a normalized sample.
    pub fn record(&self, sample: &MetricSample) -> Upsert {
        self.upsert(&sample.name, sample.value, &sample.description)
    }

    /// Current value of every metric, keyed by name.
    pub fn snapshot(&self) -> BTreeMap<String, f64> {
        self.metrics
            .read()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.value))
            .collect()
    }

    /// Current value of a single metric.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.metrics.read().get(name).map(|e| e.value)
    }

    /// Stored description of a metric.
    pub fn description(&self, name: &str) -> Option<String> {
        self.metrics.read().get(name).map(|e| e.description.clone())
    }

    /// Get the current number of stored series.
    pub fn series_count(&self) -> usize {
        self.metrics.read().len()
    }

    /// Record a completed poll cycle.
    pub fn record_cycle_success(&self, targets_failed: usize) {
        let mut stats = self.stats.write();
        stats.cycles_total += 1;
        stats.cycles_succeeded += 1;
        stats.targets_failed += targets_failed as u64;
        stats.last_success_unix = Some(unix_now());
    }

    /// Record an abandoned poll cycle.
    pub fn record_cycle_failure(&self, targets_failed: usize) {
        let mut stats = self.stats.write();
        stats.cycles_total += 1;
        stats.cycles_failed += 1;
        stats.targets_failed += targets_failed as u64;
    }

    /// Count one scrape of the metrics endpoint.
    pub fn record_scrape(&self) {
        self.stats.write().scrapes_total += 1;
    }

    /// Get registry statistics.
    pub fn stats(&self) -> RegistryStats {
        self.stats.read().clone()
    }

    /// Whether at least one poll cycle has succeeded.
    pub fn is_ready(&self) -> bool {
        self.stats.read().cycles_succeeded > 0
    }

    /// Render metrics in Prometheus exposition format.
    pub fn render(&self) -> String {
        let metrics = self.metrics.read();
        let mut output = Vec::with_capacity(metrics.len() * 120);

        // BTreeMap iteration is already sorted by name
        for (name, entry) in metrics.iter() {
            writeln!(output, "# HELP {} {}", name, escape_help(&entry.description)).ok();
            writeln!(output, "# TYPE {} gauge", name).ok();
            writeln!(output, "{} {}", name, format_value(entry.value)).ok();
        }

        // Add registry stats as metrics
        let stats = self.stats.read();
        let p = SELF_METRIC_PREFIX;
        writeln!(output).ok();

        writeln!(output, "# HELP {p}_series Number of exported accessory series").ok();
        writeln!(output, "# TYPE {p}_series gauge").ok();
        writeln!(output, "{p}_series {}", metrics.len()).ok();

        writeln!(output, "# HELP {p}_cycles_total Poll cycles run").ok();
        writeln!(output, "# TYPE {p}_cycles_total counter").ok();
        writeln!(output, "{p}_cycles_total {}", stats.cycles_total).ok();

        writeln!(
            output,
            "# HELP {p}_cycle_failures_total Poll cycles abandoned with an error"
        )
        .ok();
        writeln!(output, "# TYPE {p}_cycle_failures_total counter").ok();
        writeln!(output, "{p}_cycle_failures_total {}", stats.cycles_failed).ok();

        writeln!(
            output,
            "# HELP {p}_target_failures_total Room or accessory fetches that failed"
        )
        .ok();
        writeln!(output, "# TYPE {p}_target_failures_total counter").ok();
        writeln!(output, "{p}_target_failures_total {}", stats.targets_failed).ok();

        writeln!(output, "# HELP {p}_scrapes_total Scrapes of the metrics endpoint").ok();
        writeln!(output, "# TYPE {p}_scrapes_total counter").ok();
        writeln!(output, "{p}_scrapes_total {}", stats.scrapes_total).ok();

        if let Some(ts) = stats.last_success_unix {
            writeln!(
                output,
                "# HELP {p}_last_success_timestamp_seconds Unix time of the last successful poll cycle"
            )
            .ok();
            writeln!(output, "# TYPE {p}_last_success_timestamp_seconds gauge").ok();
            writeln!(output, "{p}_last_success_timestamp_seconds {}", format_value(ts)).ok();
        }

        String::from_utf8(output).unwrap_or_default()
    }
}

/// Create a shareable registry handle.
pub type SharedRegistry = Arc<MetricRegistry>;

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Escape special characters in HELP text.
fn escape_help(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}
