//! Metric families: the registered (name, help, kind, schema) unit.

use std::sync::Arc;

use indexmap::map::Entry;
use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::atomics::AtomicF64;
use crate::child::{Child, ChildState, ScalarState};
use crate::error::Error;
use crate::formatting::{build_identifier, write_header};
use crate::histogram::HistogramState;
use crate::label::LabelSet;
use crate::summary::{SummaryShape, SummaryState};

/// The four metric kinds of the exposition format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing value.
    Counter,
    /// A freely moving instantaneous value.
    Gauge,
    /// Counts of observations in cumulative upper-bound buckets.
    Histogram,
    /// φ-quantile estimates over a sliding age window.
    Summary,
}

impl MetricKind {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
        }
    }
}

/// Everything a family needs to stamp out a new child of its kind.
pub(crate) enum ChildShape {
    Counter,
    Gauge,
    Histogram { bounds: Arc<[f64]> },
    Summary(SummaryShape),
}

/// A collector family: owns the children and the schema they all share.
///
/// Families are created by the registry builders and never removed;
/// individual children come and go. A family with an empty label schema
/// materializes its single unlabelled child at construction so the per-kind
/// handles can forward value operations to it without a map lookup.
pub(crate) struct Family {
    name: String,
    kind: MetricKind,
    label_names: Box<[String]>,
    static_labels: LabelSet,
    suppress_initial_value: bool,
    header: String,
    shape: ChildShape,
    unlabelled: Option<Arc<Child>>,
    children: RwLock<IndexMap<LabelSet, Arc<Child>>>,
}

impl Family {
    pub(crate) fn new(
        name: String,
        help: &str,
        kind: MetricKind,
        label_names: Vec<String>,
        static_labels: LabelSet,
        suppress_initial_value: bool,
        shape: ChildShape,
    ) -> Arc<Family> {
        let mut header = String::new();
        write_header(&mut header, &name, help, kind.as_str());

        let mut family = Family {
            name,
            kind,
            label_names: label_names.into_boxed_slice(),
            static_labels,
            suppress_initial_value,
            header,
            shape,
            unlabelled: None,
            children: RwLock::new(IndexMap::new()),
        };
        if family.label_names.is_empty() {
            family.unlabelled = Some(family.make_child(&[]));
        }
        Arc::new(family)
    }

    pub(crate) fn kind(&self) -> MetricKind {
        self.kind
    }

    pub(crate) fn label_names(&self) -> &[String] {
        &self.label_names
    }

    /// The eagerly created empty-tuple child.
    ///
    /// # Panics
    ///
    /// Panics when the family declares label names: the unlabelled
    /// convenience operations only exist for schema-less families.
    pub(crate) fn unlabelled_child(&self) -> &Arc<Child> {
        self.unlabelled.as_ref().unwrap_or_else(|| {
            panic!(
                "metric `{}` declares label names {:?}; use `with_labels` to pick a child",
                self.name, self.label_names
            )
        })
    }

    /// Looks up or creates the child for the given label values.
    ///
    /// The same value tuple always yields the same `Arc`, which is the
    /// identity guarantee callers rely on when caching children.
    pub(crate) fn child(&self, values: Vec<String>) -> Result<Arc<Child>, Error> {
        if values.len() != self.label_names.len() {
            return Err(Error::LabelArityMismatch {
                expected: self.label_names.len(),
                actual: values.len(),
            });
        }
        if self.label_names.is_empty() {
            return Ok(self.unlabelled.clone().expect("created at construction"));
        }

        let key = LabelSet::new(self.label_names.to_vec(), values)
            .expect("arity checked above");

        {
            let children = self.children.read();
            if let Some(child) = children.get(&key) {
                return Ok(child.clone());
            }
        }

        let mut children = self.children.write();
        let child = match children.entry(key) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let child = self.make_child(entry.key().values());
                entry.insert(child).clone()
            }
        };
        Ok(child)
    }

    /// Discards the child for the given label values, if any.
    pub(crate) fn remove(&self, values: Vec<String>) -> Result<(), Error> {
        if values.len() != self.label_names.len() {
            return Err(Error::LabelArityMismatch {
                expected: self.label_names.len(),
                actual: values.len(),
            });
        }
        if self.label_names.is_empty() {
            // The unlabelled child is permanent; there is nothing to discard.
            return Ok(());
        }

        let key = LabelSet::new(self.label_names.to_vec(), values)
            .expect("arity checked above");
        self.children.write().shift_remove(&key);
        Ok(())
    }

    /// The value tuples of every labelled child, in creation order.
    pub(crate) fn all_label_values(&self) -> Vec<Vec<String>> {
        self.children.read().keys().map(|key| key.values().to_vec()).collect()
    }

    /// Serializes the header and every published child.
    pub(crate) fn collect_into(&self, out: &mut String) {
        out.push_str(&self.header);

        if let Some(unlabelled) = &self.unlabelled {
            if unlabelled.is_published() {
                unlabelled.collect_into(out);
            }
        }

        // Snapshot the children so serialization (which may take the summary
        // locks) happens outside the map lock.
        let children = self.children.read().values().cloned().collect::<Vec<_>>();
        for child in children {
            if child.is_published() {
                child.collect_into(out);
            }
        }
    }

    fn make_child(&self, values: &[String]) -> Arc<Child> {
        let mut labels = LabelSet::new(self.label_names.to_vec(), values.to_vec())
            .expect("callers pass schema-arity values");
        labels.append(&self.static_labels);

        let state = match &self.shape {
            ChildShape::Counter => ChildState::Counter(ScalarState {
                cell: AtomicF64::new(0.0),
                identifier: build_identifier(&self.name, None, &labels, None),
            }),
            ChildShape::Gauge => ChildState::Gauge(ScalarState {
                cell: AtomicF64::new(0.0),
                identifier: build_identifier(&self.name, None, &labels, None),
            }),
            ChildShape::Histogram { bounds } => {
                ChildState::Histogram(HistogramState::new(&self.name, &labels, bounds.clone()))
            }
            ChildShape::Summary(shape) => {
                ChildState::Summary(SummaryState::new(&self.name, &labels, shape))
            }
        };

        Arc::new(Child::new(state, !self.suppress_initial_value))
    }
}
