//! Monotone counters.

use std::sync::Arc;

use crate::child::Child;
use crate::error::Error;
use crate::family::Family;

/// A counter metric family handle.
///
/// Counters only ever move forward. For a family without labels the value
/// methods forward to the single unlabelled child; a family with labels hands
/// out children via [`with_labels`](Counter::with_labels).
#[derive(Clone)]
pub struct Counter {
    family: Arc<Family>,
}

impl std::fmt::Debug for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Counter").finish_non_exhaustive()
    }
}

impl Counter {
    pub(crate) fn from_family(family: Arc<Family>) -> Self {
        Self { family }
    }

    /// Increments the counter by one.
    ///
    /// # Panics
    ///
    /// Panics if this family declares label names; use
    /// [`with_labels`](Counter::with_labels) first.
    pub fn inc(&self) {
        self.unlabelled().inc();
    }

    /// Increments the counter by `delta`.
    ///
    /// Fails if `delta` is negative or not finite; the counter is unchanged.
    ///
    /// # Panics
    ///
    /// Panics if this family declares label names; use
    /// [`with_labels`](Counter::with_labels) first.
    pub fn inc_by(&self, delta: f64) -> Result<(), Error> {
        self.unlabelled().inc_by(delta)
    }

    /// Raises the counter to `target` iff `target` is greater than the
    /// current value.
    ///
    /// Intended for mirroring an external counter that several callers read
    /// and report: a stale (smaller) report leaves the value alone.
    ///
    /// # Panics
    ///
    /// Panics if this family declares label names; use
    /// [`with_labels`](Counter::with_labels) first.
    pub fn inc_to(&self, target: f64) {
        self.unlabelled().inc_to(target);
    }

    /// The current value.
    ///
    /// # Panics
    ///
    /// Panics if this family declares label names.
    pub fn value(&self) -> f64 {
        self.unlabelled().value()
    }

    /// Returns the child for the given label values, creating it on first
    /// use. The same values always return a handle to the same child.
    pub fn with_labels<I, S>(&self, values: I) -> Result<CounterChild, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let values = values.into_iter().map(|v| v.as_ref().to_string()).collect();
        Ok(CounterChild { child: self.family.child(values)? })
    }

    /// Drops the child for the given label values; a later
    /// [`with_labels`](Counter::with_labels) starts from zero.
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

    fn unlabelled(&self) -> CounterChild {
        CounterChild { child: self.family.unlabelled_child().clone() }
    }
}

/// One labelled child of a [`Counter`] family.
#[derive(Clone)]
pub struct CounterChild {
    pub(crate) child: Arc<Child>,
}

impl std::fmt::Debug for CounterChild {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterChild").finish_non_exhaustive()
    }
}

impl CounterChild {
    /// Increments the counter by one.
    pub fn inc(&self) {
        self.child.counter().cell.add(1.0);
        self.child.mark_published();
    }

    /// Increments the counter by `delta`.
    ///
    /// Fails if `delta` is negative or not finite; the counter is unchanged.
    pub fn inc_by(&self, delta: f64) -> Result<(), Error> {
        if !delta.is_finite() || delta < 0.0 {
            return Err(Error::InvalidCounterIncrement);
        }
        self.child.counter().cell.add(delta);
        self.child.mark_published();
        Ok(())
    }

    /// Raises the counter to `target` iff `target` is greater than the
    /// current value.
    pub fn inc_to(&self, target: f64) {
        self.child.counter().cell.max_to(target);
        self.child.mark_published();
    }

    /// The current value.
    pub fn value(&self) -> f64 {
        self.child.counter().cell.load()
    }

    /// Forces the child into the exposition even if it has never been
    /// incremented.
    pub fn publish(&self) {
        self.child.set_published(true);
    }

    /// Hides the child from the exposition until its next increment.
    pub fn unpublish(&self) {
        self.child.set_published(false);
    }
}
