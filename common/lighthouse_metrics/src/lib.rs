//! Thin wrapper around `prometheus` matching the upstream lighthouse metrics crate: every
//! constructor returns a `Result` so a metric registration failure (e.g. duplicate name) is a
//! recoverable condition rather than a panic, and the `inc_*` / `observe_*` helpers silently
//! no-op on a `None` handle so call sites never need to unwrap.
//!
//! Metrics export itself (the HTTP endpoint) is out of scope (§1 non-goals); this crate only
//! supplies the counters the duty runner and slashing-protection store increment in-process.

pub use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};

pub fn try_create_int_counter(name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let counter = IntCounter::new(name, help)?;
    Ok(counter)
}

pub fn try_create_int_counter_vec(
    name: &str,
    help: &str,
    labels: &[&str],
) -> prometheus::Result<IntCounterVec> {
    let opts = Opts::new(name, help);
    IntCounterVec::new(opts, labels)
}

pub fn try_create_int_gauge(name: &str, help: &str) -> prometheus::Result<IntGauge> {
    IntGauge::new(name, help)
}

pub fn try_create_histogram_vec(
    name: &str,
    help: &str,
    labels: &[&str],
) -> prometheus::Result<HistogramVec> {
    let opts = HistogramOpts::new(name, help);
    HistogramVec::new(opts, labels)
}

pub fn inc_counter(counter: &prometheus::Result<IntCounter>) {
    if let Ok(counter) = counter {
        counter.inc();
    }
}

pub fn inc_counter_vec(counter: &prometheus::Result<IntCounterVec>, labels: &[&str]) {
    if let Ok(counter) = counter {
        counter.with_label_values(labels).inc();
    }
}

pub fn set_gauge(gauge: &prometheus::Result<IntGauge>, value: i64) {
    if let Ok(gauge) = gauge {
        gauge.set(value);
    }
}

pub fn start_timer(histogram: &prometheus::Result<Histogram>) -> Option<prometheus::HistogramTimer> {
    histogram.as_ref().ok().map(|h| h.start_timer())
}
