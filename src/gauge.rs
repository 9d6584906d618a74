//! Bidirectional gauges.

use std::sync::Arc;

use crate::child::Child;
use crate::error::Error;
use crate::family::Family;

/// A gauge metric family handle.
///
/// Gauges hold an instantaneous measurement that can move in either
/// direction. For a family without labels the value methods forward to the
/// single unlabelled child; a family with labels hands out children via
/// [`with_labels`](Gauge::with_labels).
///
/// All value methods panic when the family declares label names; pick a child
/// with [`with_labels`](Gauge::with_labels) first.
#[derive(Clone)]
pub struct Gauge {
    family: Arc<Family>,
}

impl std::fmt::Debug for Gauge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gauge").finish_non_exhaustive()
    }
}

impl Gauge {
    pub(crate) fn from_family(family: Arc<Family>) -> Self {
        Self { family }
    }

    /// Sets the gauge to `value`.
    pub fn set(&self, value: f64) {
        self.unlabelled().set(value);
    }

    /// Increments the gauge by one.
    pub fn inc(&self) {
        self.unlabelled().inc();
    }

    /// Decrements the gauge by one.
    pub fn dec(&self) {
        self.unlabelled().dec();
    }

    /// Increments the gauge by `delta`.
    pub fn inc_by(&self, delta: f64) {
        self.unlabelled().inc_by(delta);
    }

    /// Decrements the gauge by `delta`.
    pub fn dec_by(&self, delta: f64) {
        self.unlabelled().dec_by(delta);
    }

    /// Raises the gauge to `target` iff `target` is greater than the current
    /// value; never lowers it.
    pub fn inc_to(&self, target: f64) {
        self.unlabelled().inc_to(target);
    }

    /// Lowers the gauge to `target` iff `target` is smaller than the current
    /// value; never raises it.
    pub fn dec_to(&self, target: f64) {
        self.unlabelled().dec_to(target);
    }

    /// The current value.
    pub fn value(&self) -> f64 {
        self.unlabelled().value()
    }

    /// Returns the child for the given label values, creating it on first
    /// use. The same values always return a handle to the same child.
    pub fn with_labels<I, S>(&self, values: I) -> Result<GaugeChild, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let values = values.into_iter().map(|v| v.as_ref().to_string()).collect();
        Ok(GaugeChild { child: self.family.child(values)? })
    }

    /// Drops the child for the given label values; a later
    /// [`with_labels`](Gauge::with_labels) starts from zero.
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

    fn unlabelled(&self) -> GaugeChild {
        GaugeChild { child: self.family.unlabelled_child().clone() }
    }
}

/// One labelled child of a [`Gauge`] family.
#[derive(Clone)]
pub struct GaugeChild {
    pub(crate) child: Arc<Child>,
}

impl GaugeChild {
    /// Sets the gauge to `value`.
    pub fn set(&self, value: f64) {
        self.child.gauge().cell.store(value);
        self.child.mark_published();
    }

    /// Increments the gauge by one.
    pub fn inc(&self) {
        self.inc_by(1.0);
    }

    /// Decrements the gauge by one.
    pub fn dec(&self) {
        self.inc_by(-1.0);
    }

    /// Increments the gauge by `delta`.
    pub fn inc_by(&self, delta: f64) {
        self.child.gauge().cell.add(delta);
        self.child.mark_published();
    }

    /// Decrements the gauge by `delta`.
    pub fn dec_by(&self, delta: f64) {
        self.inc_by(-delta);
    }

    /// Raises the gauge to `target` iff `target` is greater than the current
    /// value; never lowers it.
    pub fn inc_to(&self, target: f64) {
        self.child.gauge().cell.max_to(target);
        self.child.mark_published();
    }

    /// Lowers the gauge to `target` iff `target` is smaller than the current
    /// value; never raises it.
    pub fn dec_to(&self, target: f64) {
        self.child.gauge().cell.min_to(target);
        self.child.mark_published();
    }

    /// The current value.
    pub fn value(&self) -> f64 {
        self.child.gauge().cell.load()
    }

    /// Forces the child into the exposition even if it has never been set.
    pub fn publish(&self) {
        self.child.set_published(true);
    }

    /// Hides the child from the exposition until its next mutation.
    pub fn unpublish(&self) {
        self.child.set_published(false);
    }
}
