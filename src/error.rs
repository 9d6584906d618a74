use thiserror::Error;

/// Errors raised synchronously by registration and observation calls.
///
/// None of these mutate any metric state: a failed call leaves the registry
/// and every child exactly as it was.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Error {
    /// The metric name does not match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
    #[error("invalid metric name: {0:?}")]
    InvalidMetricName(String),

    /// The label name does not match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
    #[error("invalid label name: {0:?}")]
    InvalidLabelName(String),

    /// The label name collides with a name the exposition format owns:
    /// anything starting with `__`, `le` on histograms, `quantile` on
    /// summaries.
    #[error("label name {0:?} is reserved")]
    ReservedLabelName(String),

    /// The same label name appears twice across the instance schema, the
    /// metric static labels, and the registry static labels.
    #[error("duplicate label name: {0:?}")]
    DuplicateLabelName(String),

    /// The number of label values does not match the number of label names.
    #[error("expected {expected} label value(s), got {actual}")]
    LabelArityMismatch {
        /// Arity of the label schema.
        expected: usize,
        /// Number of values supplied by the caller.
        actual: usize,
    },

    /// Histogram buckets must be strictly increasing.
    #[error("histogram buckets must be strictly increasing")]
    NonMonotonicBuckets,

    /// A bucket generator was asked for zero buckets.
    #[error("bucket count must be positive")]
    ZeroBucketCount,

    /// `linear_buckets` needs a positive width.
    #[error("linear buckets require a positive width")]
    InvalidBucketWidth,

    /// `exponential_buckets` needs a positive start value.
    #[error("exponential buckets require a positive start")]
    InvalidBucketStart,

    /// `exponential_buckets` needs a growth factor greater than one.
    #[error("exponential buckets require a factor greater than 1")]
    InvalidBucketFactor,

    /// A summary was configured with a zero age window, zero age buckets, or
    /// a zero sample buffer.
    #[error("invalid summary configuration: {0}")]
    InvalidSummaryConfiguration(&'static str),

    /// Counters only move forward; the increment was negative or not finite.
    #[error("counter increments must be finite and non-negative")]
    InvalidCounterIncrement,

    /// A collector with this name exists but is of another kind.
    #[error("Collector of a different type with the same name is already registered.")]
    KindConflict,

    /// A collector with this name exists but declares another label schema.
    #[error("Collector matches a previous registration but has a different set of label names.")]
    LabelSchemaConflict,

    /// Registry static labels can only be set once, before any collector is
    /// registered and before the first collection.
    #[error("static labels must be set once, before any collector is registered and before the first collection")]
    StaticLabelsLocked,
}

/// Signal from a before-collect callback that the scrape cannot proceed.
///
/// This is the one error that aborts a collection instead of being swallowed:
/// the HTTP listener maps it to a `503` response carrying the reason, the
/// push gateway loop skips the cycle.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("scrape failed: {reason}")]
pub struct ScrapeError {
    reason: String,
}

impl ScrapeError {
    /// Creates a new [`ScrapeError`] with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }

    /// The reason the scrape was aborted.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Errors that can occur while collecting a registry into a sink.
#[derive(Debug, Error)]
pub enum CollectError {
    /// A before-collect callback aborted the scrape.
    #[error(transparent)]
    Scrape(#[from] ScrapeError),

    /// The sink failed to accept the exposition bytes.
    #[error("failed to write exposition output: {0}")]
    Io(#[from] std::io::Error),
}
