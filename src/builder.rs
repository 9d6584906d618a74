//! Per-kind metric builders: the factory front door.
//!
//! A builder validates the name and label schema, composes metric-level
//! static labels with the registry's, and performs get-or-create against the
//! registry, so a second registration of the same name hands back the
//! existing family (or fails on a kind or schema mismatch).

use std::sync::Arc;
use std::time::Duration;

use quanta::Clock;

use crate::counter::Counter;
use crate::error::Error;
use crate::family::{ChildShape, Family, MetricKind};
use crate::formatting::{validate_label_name, validate_metric_name};
use crate::gauge::Gauge;
use crate::histogram::{normalize_buckets, Histogram};
use crate::label::LabelSet;
use crate::registry::Registry;
use crate::summary::{
    Objective, Summary, SummaryShape, DEFAULT_AGE_BUCKETS, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_AGE,
};

struct BuilderCore<'a> {
    registry: &'a Registry,
    name: String,
    help: String,
    label_names: Vec<String>,
    static_labels: Vec<(String, String)>,
    suppress_initial_value: bool,
}

impl<'a> BuilderCore<'a> {
    fn new(registry: &'a Registry, name: String, help: String) -> Self {
        Self {
            registry,
            name,
            help,
            label_names: Vec::new(),
            static_labels: Vec::new(),
            suppress_initial_value: false,
        }
    }

    fn build_family(
        self,
        kind: MetricKind,
        shape: ChildShape,
        reserved: Option<&str>,
    ) -> Result<Arc<Family>, Error> {
        validate_metric_name(&self.name)?;

        for (i, name) in self.label_names.iter().enumerate() {
            validate_label_name(name, reserved)?;
            if self.label_names[..i].iter().any(|other| other == name) {
                return Err(Error::DuplicateLabelName(name.clone()));
            }
        }

        // Effective static labels: the metric's own, then the registry's.
        let mut static_labels = self.static_labels;
        static_labels.extend(self.registry.static_labels());
        for (i, (name, _)) in static_labels.iter().enumerate() {
            validate_label_name(name, reserved)?;
            if self.label_names.iter().any(|other| other == name)
                || static_labels[..i].iter().any(|(other, _)| other == name)
            {
                return Err(Error::DuplicateLabelName(name.clone()));
            }
        }

        let (static_names, static_values) = static_labels.into_iter().unzip();
        let static_labels =
            LabelSet::new(static_names, static_values).expect("parallel vectors");

        let registry = self.registry;
        let key = self.name.clone();
        let schema = self.label_names.clone();
        registry.get_or_add(&key, kind, &schema, move || {
            Family::new(
                self.name,
                &self.help,
                kind,
                self.label_names,
                static_labels,
                self.suppress_initial_value,
                shape,
            )
        })
    }
}

macro_rules! common_builder_methods {
    () => {
        /// Declares the per-instance label schema, in order.
        pub fn label_names<I, S>(mut self, names: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            self.core.label_names = names.into_iter().map(Into::into).collect();
            self
        }

        /// Attaches a static label to every child of this family.
        pub fn static_label(
            mut self,
            name: impl Into<String>,
            value: impl Into<String>,
        ) -> Self {
            self.core.static_labels.push((name.into(), value.into()));
            self
        }

        /// Omits children from the exposition until their first mutation.
        pub fn suppress_initial_value(mut self) -> Self {
            self.core.suppress_initial_value = true;
            self
        }
    };
}

/// Builder for a [`Counter`] family.
pub struct CounterBuilder<'a> {
    core: BuilderCore<'a>,
}

impl<'a> CounterBuilder<'a> {
    pub(crate) fn new(registry: &'a Registry, name: String, help: String) -> Self {
        Self { core: BuilderCore::new(registry, name, help) }
    }

    common_builder_methods!();

    /// Validates the configuration and registers the family.
    pub fn build(self) -> Result<Counter, Error> {
        let family = self.core.build_family(MetricKind::Counter, ChildShape::Counter, None)?;
        Ok(Counter::from_family(family))
    }
}

/// Builder for a [`Gauge`] family.
pub struct GaugeBuilder<'a> {
    core: BuilderCore<'a>,
}

impl<'a> GaugeBuilder<'a> {
    pub(crate) fn new(registry: &'a Registry, name: String, help: String) -> Self {
        Self { core: BuilderCore::new(registry, name, help) }
    }

    common_builder_methods!();

    /// Validates the configuration and registers the family.
    pub fn build(self) -> Result<Gauge, Error> {
        let family = self.core.build_family(MetricKind::Gauge, ChildShape::Gauge, None)?;
        Ok(Gauge::from_family(family))
    }
}

/// Builder for a [`Histogram`] family.
pub struct HistogramBuilder<'a> {
    core: BuilderCore<'a>,
    buckets: Vec<f64>,
}

impl<'a> HistogramBuilder<'a> {
    pub(crate) fn new(registry: &'a Registry, name: String, help: String) -> Self {
        Self { core: BuilderCore::new(registry, name, help), buckets: Vec::new() }
    }

    common_builder_methods!();

    /// Overrides the default buckets.
    ///
    /// Bounds must be strictly increasing; `+Inf` is appended automatically.
    /// An empty vector keeps the defaults.
    pub fn buckets(mut self, buckets: Vec<f64>) -> Self {
        self.buckets = buckets;
        self
    }

    /// Validates the configuration and registers the family.
    pub fn build(self) -> Result<Histogram, Error> {
        let bounds = normalize_buckets(&self.buckets)?;
        let family = self.core.build_family(
            MetricKind::Histogram,
            ChildShape::Histogram { bounds },
            Some("le"),
        )?;
        Ok(Histogram::from_family(family))
    }
}

/// Builder for a [`Summary`] family.
pub struct SummaryBuilder<'a> {
    core: BuilderCore<'a>,
    objectives: Vec<Objective>,
    max_age: Duration,
    age_buckets: usize,
    buffer_size: usize,
}

impl<'a> SummaryBuilder<'a> {
    pub(crate) fn new(registry: &'a Registry, name: String, help: String) -> Self {
        Self {
            core: BuilderCore::new(registry, name, help),
            objectives: Vec::new(),
            max_age: DEFAULT_MAX_AGE,
            age_buckets: DEFAULT_AGE_BUCKETS,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    common_builder_methods!();

    /// Adds one reported quantile with its permitted rank error.
    ///
    /// Without any objectives the summary only reports `_sum` and `_count`.
    pub fn objective(mut self, quantile: f64, epsilon: f64) -> Self {
        self.objectives.push(Objective::new(quantile, epsilon));
        self
    }

    /// Replaces the reported quantiles wholesale.
    pub fn objectives(mut self, objectives: impl IntoIterator<Item = Objective>) -> Self {
        self.objectives = objectives.into_iter().collect();
        self
    }

    /// Sets the total sliding age window. Defaults to ten minutes.
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Sets the number of age buckets the window is divided into.
    /// Defaults to five.
    pub fn age_buckets(mut self, age_buckets: usize) -> Self {
        self.age_buckets = age_buckets;
        self
    }

    /// Sets the capacity of the hot and cold observation buffers.
    /// Defaults to 500.
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Validates the configuration and registers the family.
    pub fn build(self) -> Result<Summary, Error> {
        let shape = SummaryShape {
            objectives: self.objectives.clone().into(),
            max_age: self.max_age,
            age_buckets: self.age_buckets,
            buffer_size: self.buffer_size,
            clock: Clock::new(),
        };
        shape.validate()?;
        let family = self.core.build_family(
            MetricKind::Summary,
            ChildShape::Summary(shape),
            Some("quantile"),
        )?;
        Ok(Summary::from_family(family))
    }
}
