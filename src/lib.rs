//! In-process metrics instrumentation with Prometheus text exposition.
//!
//! `promenade` lets an application record four kinds of numeric observations
//! and expose them in the Prometheus text format (v0.0.4), either pulled by a
//! scraper over HTTP or pushed periodically to a Pushgateway.
//!
//! # Metric kinds
//!
//! - **Counters** are cumulative totals that only move forward: requests
//!   served, bytes sent, errors seen.
//! - **Gauges** are instantaneous measurements that move in both directions:
//!   queue depth, temperature, in-flight requests.
//! - **Histograms** count observations into a fixed set of cumulative
//!   upper-bound buckets, alongside a running sum and count.
//! - **Summaries** estimate configured φ-quantiles over a sliding age window
//!   using a biased-sampling stream, alongside a running sum and count.
//!
//! Counter, gauge, and histogram updates are lock-free atomic operations, so
//! instrumenting a hot path costs nanoseconds regardless of how many threads
//! observe concurrently. Summaries buffer observations under a short lock.
//!
//! # Registries and labels
//!
//! Metrics live in a [`Registry`]: an append-only set of families, each
//! holding one child per distinct label-value tuple. The per-kind builder
//! methods validate names, enforce one-registration-per-name, and hand back
//! cloneable handles:
//!
//! ```
//! use promenade::Registry;
//!
//! let registry = Registry::new();
//! let requests = registry
//!     .counter("http_requests_total", "Total HTTP requests served.")
//!     .label_names(["method"])
//!     .build()?;
//!
//! requests.with_labels(["GET"])?.inc();
//!
//! let exposition = registry.render()?;
//! assert!(exposition.contains("http_requests_total{method=\"GET\"} 1\n"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Applications that want zero ceremony use the process-wide
//! [`default_registry`]; tests and embedded scopes create their own.
//!
//! # Exposition
//!
//! With the `http-listener` feature, [`ExporterBuilder`] serves the registry
//! on a scrape endpoint; with `push-gateway`, it POSTs the exposition to a
//! Pushgateway on an interval. Both run until their [`Shutdown`] handle is
//! requested.
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod atomics;
mod builder;
mod child;
mod counter;
mod error;
mod family;
mod formatting;
mod gauge;
mod histogram;
mod label;
mod quantile;
mod registry;
mod summary;

#[cfg(any(feature = "http-listener", feature = "push-gateway"))]
#[cfg_attr(
    docsrs,
    doc(cfg(any(feature = "http-listener", feature = "push-gateway")))
)]
pub mod exporter;

pub use self::builder::{CounterBuilder, GaugeBuilder, HistogramBuilder, SummaryBuilder};
pub use self::counter::{Counter, CounterChild};
pub use self::error::{CollectError, Error, ScrapeError};
pub use self::family::MetricKind;
pub use self::formatting::{valid_label_name, valid_metric_name};
pub use self::gauge::{Gauge, GaugeChild};
pub use self::histogram::{
    exponential_buckets, linear_buckets, Histogram, HistogramChild, DEFAULT_BUCKETS,
};
pub use self::label::LabelSet;
pub use self::quantile::QuantileStream;
pub use self::registry::{default_registry, set_default_registry, Registry};
pub use self::summary::{
    Objective, Summary, SummaryChild, DEFAULT_AGE_BUCKETS, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_AGE,
};

#[cfg(any(feature = "http-listener", feature = "push-gateway"))]
pub use self::exporter::{ExporterBuilder, Shutdown};
