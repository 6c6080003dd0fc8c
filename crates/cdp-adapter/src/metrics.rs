//! DevTools traffic accounting for one browser session.
//!
//! Each [`crate::CdpAdapter`] owns its own collectors, so a snapshot taken at release time
//! describes exactly the scan that ran in that browser.

use std::collections::BTreeMap;
use std::time::Duration;

use prometheus::core::Collector;
use prometheus::{histogram_opts, opts, HistogramVec, IntCounter, IntCounterVec};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterMetricsSnapshot {
    pub commands: u64,
    pub command_failures: u64,
    pub events: u64,
    pub navigations: u64,
    /// Summed round-trip time of every command.
    pub command_seconds: f64,
    pub commands_by_method: BTreeMap<String, u64>,
}

pub struct SessionMetrics {
    commands: IntCounterVec,
    failures: IntCounterVec,
    round_trip: HistogramVec,
    events: IntCounter,
    navigations: IntCounter,
}

impl SessionMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            commands: IntCounterVec::new(
                opts!("a11yscope_cdp_commands_total", "DevTools commands sent"),
                &["method"],
            )?,
            failures: IntCounterVec::new(
                opts!("a11yscope_cdp_command_failures_total", "DevTools commands that failed"),
                &["method"],
            )?,
            round_trip: HistogramVec::new(
                histogram_opts!(
                    "a11yscope_cdp_command_seconds",
                    "DevTools command round trip",
                    vec![0.005, 0.05, 0.25, 1.0, 5.0, 30.0]
                ),
                &["method"],
            )?,
            events: IntCounter::new("a11yscope_cdp_events_total", "DevTools events handled")?,
            navigations: IntCounter::new(
                "a11yscope_cdp_navigations_total",
                "Main-frame navigations observed",
            )?,
        })
    }

    pub fn command_finished(&self, method: &str, elapsed: Duration, ok: bool) {
        self.commands.with_label_values(&[method]).inc();
        self.round_trip
            .with_label_values(&[method])
            .observe(elapsed.as_secs_f64());
        if !ok {
            self.failures.with_label_values(&[method]).inc();
        }
    }

    pub fn event(&self) {
        self.events.inc();
    }

    pub fn navigation(&self) {
        self.navigations.inc();
    }

    pub fn snapshot(&self) -> AdapterMetricsSnapshot {
        let commands_by_method = by_method(&self.commands);
        let command_seconds = self
            .round_trip
            .collect()
            .iter()
            .flat_map(|family| family.get_metric())
            .map(|metric| metric.get_histogram().get_sample_sum())
            .sum();
        AdapterMetricsSnapshot {
            commands: commands_by_method.values().sum(),
            command_failures: by_method(&self.failures).values().sum(),
            events: self.events.get(),
            navigations: self.navigations.get(),
            command_seconds,
            commands_by_method,
        }
    }
}

fn by_method(counters: &IntCounterVec) -> BTreeMap<String, u64> {
    counters
        .collect()
        .iter()
        .flat_map(|family| family.get_metric())
        .filter_map(|metric| {
            let method = metric.get_label().first()?.get_value().to_string();
            Some((method, metric.get_counter().get_value() as u64))
        })
        .collect()
}
