//! Bucketed histograms.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::atomics::{AtomicF64, AtomicU64};
use crate::child::Child;
use crate::error::Error;
use crate::family::Family;
use crate::formatting::{build_identifier, render_f64, write_metric_line, write_metric_line_u64};
use crate::label::LabelSet;

/// The default upper bounds, covering the usual latency-in-seconds range.
///
/// `+Inf` is appended by the constructor, not listed here.
pub const DEFAULT_BUCKETS: [f64; 14] =
    [0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0];

/// Generates `count` buckets of equal `width` starting at `start`.
pub fn linear_buckets(start: f64, width: f64, count: usize) -> Result<Vec<f64>, Error> {
    if count == 0 {
        return Err(Error::ZeroBucketCount);
    }
    if !(width > 0.0) {
        return Err(Error::InvalidBucketWidth);
    }

    let mut buckets = Vec::with_capacity(count);
    let mut bound = start;
    for _ in 0..count {
        buckets.push(bound);
        bound += width;
    }
    Ok(buckets)
}

/// Generates `count` buckets starting at `start`, each `factor` times the
/// previous one.
pub fn exponential_buckets(start: f64, factor: f64, count: usize) -> Result<Vec<f64>, Error> {
    if count == 0 {
        return Err(Error::ZeroBucketCount);
    }
    if !(start > 0.0) {
        return Err(Error::InvalidBucketStart);
    }
    if !(factor > 1.0) {
        return Err(Error::InvalidBucketFactor);
    }

    let mut buckets = Vec::with_capacity(count);
    let mut bound = start;
    for _ in 0..count {
        buckets.push(bound);
        bound *= factor;
    }
    Ok(buckets)
}

/// Validates caller-supplied bounds and closes them with `+Inf`.
///
/// An empty slice selects [`DEFAULT_BUCKETS`].
pub(crate) fn normalize_buckets(buckets: &[f64]) -> Result<Arc<[f64]>, Error> {
    let mut bounds =
        if buckets.is_empty() { DEFAULT_BUCKETS.to_vec() } else { buckets.to_vec() };

    if bounds.iter().any(|bound| bound.is_nan()) {
        return Err(Error::NonMonotonicBuckets);
    }
    for pair in bounds.windows(2) {
        if !(pair[0] < pair[1]) {
            return Err(Error::NonMonotonicBuckets);
        }
    }

    if bounds.last() != Some(&f64::INFINITY) {
        bounds.push(f64::INFINITY);
    }
    Ok(bounds.into())
}

/// Per-child histogram state: parallel bound/count arrays plus the running
/// sum, all updated without locks.
pub(crate) struct HistogramState {
    bounds: Arc<[f64]>,
    counts: Box<[AtomicU64]>,
    sum: AtomicF64,
    sum_id: String,
    count_id: String,
    bucket_ids: Box<[String]>,
}

impl HistogramState {
    pub(crate) fn new(name: &str, labels: &LabelSet, bounds: Arc<[f64]>) -> Self {
        let counts = bounds.iter().map(|_| AtomicU64::new(0)).collect();
        let bucket_ids = bounds
            .iter()
            .map(|bound| {
                build_identifier(name, Some("bucket"), labels, Some(("le", &render_f64(*bound))))
            })
            .collect();

        Self {
            bounds,
            counts,
            sum: AtomicF64::new(0.0),
            sum_id: build_identifier(name, Some("sum"), labels, None),
            count_id: build_identifier(name, Some("count"), labels, None),
            bucket_ids,
        }
    }

    pub(crate) fn observe(&self, value: f64, count: u64) {
        // First bucket that admits the value; the +Inf bound guarantees a hit.
        for (bound, cell) in self.bounds.iter().zip(self.counts.iter()) {
            if value <= *bound {
                cell.fetch_add(count, Ordering::Release);
                break;
            }
        }
        self.sum.add(value * count as f64);
    }

    pub(crate) fn sum(&self) -> f64 {
        self.sum.load()
    }

    pub(crate) fn count(&self) -> u64 {
        self.counts.iter().map(|cell| cell.load(Ordering::Acquire)).sum()
    }

    pub(crate) fn collect_into(&self, out: &mut String) {
        let counts =
            self.counts.iter().map(|cell| cell.load(Ordering::Acquire)).collect::<Vec<_>>();

        write_metric_line(out, &self.sum_id, self.sum.load());
        write_metric_line_u64(out, &self.count_id, counts.iter().sum());

        let mut cumulative = 0;
        for (id, count) in self.bucket_ids.iter().zip(counts) {
            cumulative += count;
            write_metric_line_u64(out, id, cumulative);
        }
    }
}

/// A histogram metric family handle.
///
/// Created through [`Registry::histogram`](crate::Registry::histogram). For a
/// family without labels the observation methods forward to the single
/// unlabelled child; a family with labels hands out children via
/// [`with_labels`](Histogram::with_labels).
#[derive(Clone)]
pub struct Histogram {
    family: Arc<Family>,
}

impl std::fmt::Debug for Histogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Histogram").finish_non_exhaustive()
    }
}

impl Histogram {
    pub(crate) fn from_family(family: Arc<Family>) -> Self {
        Self { family }
    }

    /// Records one observation.
    ///
    /// # Panics
    ///
    /// Panics if this family declares label names; use
    /// [`with_labels`](Histogram::with_labels) first.
    pub fn observe(&self, value: f64) {
        self.unlabelled().observe(value);
    }

    /// Records `count` observations of `value` at once.
    ///
    /// # Panics
    ///
    /// Panics if this family declares label names; use
    /// [`with_labels`](Histogram::with_labels) first.
    pub fn observe_many(&self, value: f64, count: u64) {
        self.unlabelled().observe_many(value, count);
    }

    /// Sum of all observed values of the unlabelled child.
    ///
    /// # Panics
    ///
    /// Panics if this family declares label names.
    pub fn sum(&self) -> f64 {
        self.unlabelled().sum()
    }

    /// Number of observations of the unlabelled child.
    ///
    /// # Panics
    ///
    /// Panics if this family declares label names.
    pub fn count(&self) -> u64 {
        self.unlabelled().count()
    }

    /// Returns the child for the given label values, creating it on first
    /// use. The same values always return a handle to the same child.
    pub fn with_labels<I, S>(&self, values: I) -> Result<HistogramChild, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let values = values.into_iter().map(|v| v.as_ref().to_string()).collect();
        Ok(HistogramChild { child: self.family.child(values)? })
    }

    /// Drops the child for the given label values; a later
    /// [`with_labels`](Histogram::with_labels) starts from a cleared state.
    pub fn remove<I, S>(&self, values: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.family.remove(values.into_iter().map(|v| v.as_ref().to_string()).collect())
    }

    /// Label value tuples of every labelled child.
    pub fn all_label_values(&self) -> Vec<Vec<String>> {
        self.family.all_label_values()
    }

    fn unlabelled(&self) -> HistogramChild {
        HistogramChild { child: self.family.unlabelled_child().clone() }
    }
}

/// One labelled child of a [`Histogram`] family.
#[derive(Clone)]
pub struct HistogramChild {
    pub(crate) child: Arc<Child>,
}

impl HistogramChild {
    /// Records one observation. NaN values are ignored.
    pub fn observe(&self, value: f64) {
        self.observe_many(value, 1);
    }

    /// Records `count` observations of `value` at once. NaN values are
    /// ignored.
    pub fn observe_many(&self, value: f64, count: u64) {
        if value.is_nan() {
            return;
        }
        self.child.histogram().observe(value, count);
        self.child.mark_published();
    }

    /// Sum of all observed values.
    pub fn sum(&self) -> f64 {
        self.child.histogram().sum()
    }

    /// Number of observations.
    pub fn count(&self) -> u64 {
        self.child.histogram().count()
    }

    /// Forces the child into the exposition even if it has never been
    /// observed.
    pub fn publish(&self) {
        self.child.set_published(true);
    }

    /// Hides the child from the exposition until its next observation.
    pub fn unpublish(&self) {
        self.child.set_published(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(actual: &[f64], expected: &[f64]) -> bool {
        actual.len() == expected.len()
            && actual
                .iter()
                .zip(expected)
                .all(|(a, e)| (a - e).abs() <= 1e-9 * e.abs().max(1.0))
    }

    #[test]
    fn test_linear_buckets() {
        let buckets = linear_buckets(1.1, 2.4, 4).expect("valid parameters");
        assert!(close(&buckets, &[1.1, 3.5, 5.9, 8.3]), "got {buckets:?}");

        assert_eq!(linear_buckets(1.0, 2.0, 0), Err(Error::ZeroBucketCount));
        assert_eq!(linear_buckets(1.0, 0.0, 3), Err(Error::InvalidBucketWidth));
        assert_eq!(linear_buckets(1.0, -2.0, 3), Err(Error::InvalidBucketWidth));
    }

    #[test]
    fn test_exponential_buckets() {
        let buckets = exponential_buckets(1.1, 2.4, 4).expect("valid parameters");
        assert!(close(&buckets, &[1.1, 2.64, 6.336, 15.2064]), "got {buckets:?}");

        assert_eq!(exponential_buckets(1.0, 2.0, 0), Err(Error::ZeroBucketCount));
        assert_eq!(exponential_buckets(0.0, 2.0, 3), Err(Error::InvalidBucketStart));
        assert_eq!(exponential_buckets(-1.0, 2.0, 3), Err(Error::InvalidBucketStart));
        assert_eq!(exponential_buckets(1.0, 1.0, 3), Err(Error::InvalidBucketFactor));
        assert_eq!(exponential_buckets(1.0, 0.5, 3), Err(Error::InvalidBucketFactor));
    }

    #[test]
    fn test_normalize_buckets() {
        let bounds = normalize_buckets(&[]).expect("empty selects the defaults");
        assert_eq!(bounds.len(), DEFAULT_BUCKETS.len() + 1);
        assert_eq!(bounds.last(), Some(&f64::INFINITY));

        let bounds = normalize_buckets(&[1.0, 2.0]).expect("increasing");
        assert_eq!(&bounds[..], &[1.0, 2.0, f64::INFINITY]);

        let bounds = normalize_buckets(&[1.0, f64::INFINITY]).expect("already closed");
        assert_eq!(&bounds[..], &[1.0, f64::INFINITY]);

        assert_eq!(normalize_buckets(&[1.0, 1.0]), Err(Error::NonMonotonicBuckets));
        assert_eq!(normalize_buckets(&[2.0, 1.0]), Err(Error::NonMonotonicBuckets));
        assert_eq!(normalize_buckets(&[1.0, f64::NAN]), Err(Error::NonMonotonicBuckets));
    }

    #[test]
    fn test_observe_places_values_in_first_matching_bucket() {
        let bounds = normalize_buckets(&[1.0, 5.0, 10.0]).unwrap();
        let state = HistogramState::new("latency", &LabelSet::empty(), bounds);

        state.observe(0.5, 1);
        state.observe(1.0, 1); // boundary lands in its own bucket
        state.observe(7.0, 2);
        state.observe(99.0, 1);

        assert_eq!(state.count(), 5);
        assert_eq!(state.sum(), 0.5 + 1.0 + 14.0 + 99.0);

        let mut out = String::new();
        state.collect_into(&mut out);
        let expected = concat!(
            "latency_sum 114.5\n",
            "latency_count 5\n",
            "latency_bucket{le=\"1\"} 2\n",
            "latency_bucket{le=\"5\"} 2\n",
            "latency_bucket{le=\"10\"} 4\n",
            "latency_bucket{le=\"+Inf\"} 5\n",
        );
        assert_eq!(out, expected);
    }
}
