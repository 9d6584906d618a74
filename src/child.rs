//! Per-label-tuple metric instances.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::atomics::AtomicF64;
use crate::formatting::write_metric_line;
use crate::histogram::HistogramState;
use crate::summary::SummaryState;

/// One child of a family: the state behind a single label tuple.
///
/// The child owns its accumulators and its precomputed wire identifiers; the
/// family owns the child. Handles clone the `Arc` around it, which is what
/// gives `with_labels` its same-tuple-same-instance guarantee.
pub(crate) struct Child {
    published: AtomicBool,
    state: ChildState,
}

pub(crate) enum ChildState {
    Counter(ScalarState),
    Gauge(ScalarState),
    Histogram(HistogramState),
    Summary(SummaryState),
}

/// State shared by the two single-valued kinds.
pub(crate) struct ScalarState {
    pub(crate) cell: AtomicF64,
    pub(crate) identifier: String,
}

impl Child {
    pub(crate) fn new(state: ChildState, published: bool) -> Self {
        Self { published: AtomicBool::new(published), state }
    }

    /// Whether this child currently contributes lines to the exposition.
    pub(crate) fn is_published(&self) -> bool {
        self.published.load(Ordering::Acquire)
    }

    pub(crate) fn set_published(&self, published: bool) {
        self.published.store(published, Ordering::Release);
    }

    /// Called by every mutating operation: an observed child is visible.
    pub(crate) fn mark_published(&self) {
        self.published.store(true, Ordering::Release);
    }

    pub(crate) fn counter(&self) -> &ScalarState {
        match &self.state {
            ChildState::Counter(state) => state,
            _ => unreachable!("child state does not match family kind"),
        }
    }

    pub(crate) fn gauge(&self) -> &ScalarState {
        match &self.state {
            ChildState::Gauge(state) => state,
            _ => unreachable!("child state does not match family kind"),
        }
    }

    pub(crate) fn histogram(&self) -> &HistogramState {
        match &self.state {
            ChildState::Histogram(state) => state,
            _ => unreachable!("child state does not match family kind"),
        }
    }

    pub(crate) fn summary(&self) -> &SummaryState {
        match &self.state {
            ChildState::Summary(state) => state,
            _ => unreachable!("child state does not match family kind"),
        }
    }

    pub(crate) fn collect_into(&self, out: &mut String) {
        match &self.state {
            ChildState::Counter(state) | ChildState::Gauge(state) => {
                write_metric_line(out, &state.identifier, state.cell.load());
            }
            ChildState::Histogram(state) => state.collect_into(out),
            ChildState::Summary(state) => state.collect_into(out),
        }
    }
}
