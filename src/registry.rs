//! The collector registry.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use crate::builder::{CounterBuilder, GaugeBuilder, HistogramBuilder, SummaryBuilder};
use crate::error::{CollectError, Error, ScrapeError};
use crate::family::{Family, MetricKind};
use crate::formatting::validate_label_name;

type BeforeCollect = Arc<dyn Fn() -> Result<(), ScrapeError> + Send + Sync>;
type FirstCollect = Box<dyn FnOnce(&Registry) + Send>;

/// An append-only set of metric families with common static labels and
/// collection hooks.
///
/// Registries hand out metrics through the per-kind builder methods
/// ([`counter`][Registry::counter], [`gauge`][Registry::gauge],
/// [`histogram`][Registry::histogram], [`summary`][Registry::summary]) and
/// turn into exposition text through
/// [`collect_and_serialize`][Registry::collect_and_serialize]. Most
/// applications use the process-wide [`default_registry`]; tests and embedded
/// scopes create their own with [`Registry::new`].
pub struct Registry {
    families: RwLock<IndexMap<String, Arc<Family>>>,
    static_labels: RwLock<Vec<(String, String)>>,
    static_labels_set: AtomicBool,
    before_collect: Mutex<Vec<BeforeCollect>>,
    before_collect_concurrent: Mutex<Vec<BeforeCollect>>,
    first_collect: Mutex<Option<FirstCollect>>,
    has_collected: AtomicBool,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            families: RwLock::new(IndexMap::new()),
            static_labels: RwLock::new(Vec::new()),
            static_labels_set: AtomicBool::new(false),
            before_collect: Mutex::new(Vec::new()),
            before_collect_concurrent: Mutex::new(Vec::new()),
            first_collect: Mutex::new(None),
            has_collected: AtomicBool::new(false),
        }
    }

    /// Starts building a counter registered in this registry.
    pub fn counter(&self, name: impl Into<String>, help: impl Into<String>) -> CounterBuilder<'_> {
        CounterBuilder::new(self, name.into(), help.into())
    }

    /// Starts building a gauge registered in this registry.
    pub fn gauge(&self, name: impl Into<String>, help: impl Into<String>) -> GaugeBuilder<'_> {
        GaugeBuilder::new(self, name.into(), help.into())
    }

    /// Starts building a histogram registered in this registry.
    pub fn histogram(
        &self,
        name: impl Into<String>,
        help: impl Into<String>,
    ) -> HistogramBuilder<'_> {
        HistogramBuilder::new(self, name.into(), help.into())
    }

    /// Starts building a summary registered in this registry.
    pub fn summary(&self, name: impl Into<String>, help: impl Into<String>) -> SummaryBuilder<'_> {
        SummaryBuilder::new(self, name.into(), help.into())
    }

    /// Sets the labels attached to every child of every family.
    ///
    /// May be called at most once, and only while the registry is still
    /// empty and has never been collected.
    pub fn set_static_labels<I, K, V>(&self, labels: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let labels = labels
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect::<Vec<(String, String)>>();
        for (i, (name, _)) in labels.iter().enumerate() {
            validate_label_name(name, None)?;
            if labels[..i].iter().any(|(other, _)| other == name) {
                return Err(Error::DuplicateLabelName(name.clone()));
            }
        }

        let mut slot = self.static_labels.write();
        if self.static_labels_set.load(Ordering::Acquire)
            || self.has_collected.load(Ordering::Acquire)
            || !self.families.read().is_empty()
        {
            return Err(Error::StaticLabelsLocked);
        }
        *slot = labels;
        self.static_labels_set.store(true, Ordering::Release);
        Ok(())
    }

    pub(crate) fn static_labels(&self) -> Vec<(String, String)> {
        self.static_labels.read().clone()
    }

    /// Registers a callback run at the start of every collection, in
    /// registration order. Returning a [`ScrapeError`] aborts the scrape.
    pub fn add_before_collect<F>(&self, callback: F)
    where
        F: Fn() -> Result<(), ScrapeError> + Send + Sync + 'static,
    {
        self.before_collect.lock().push(Arc::new(callback));
    }

    /// Registers a callback run concurrently with the other concurrent
    /// callbacks at the start of every collection; the collection waits for
    /// all of them. Returning a [`ScrapeError`] aborts the scrape.
    pub fn add_before_collect_concurrent<F>(&self, callback: F)
    where
        F: Fn() -> Result<(), ScrapeError> + Send + Sync + 'static,
    {
        self.before_collect_concurrent.lock().push(Arc::new(callback));
    }

    /// Installs a hook run exactly once, at the start of the first
    /// collection. Used to register default sample metrics lazily.
    pub fn set_before_first_collect<F>(&self, hook: F)
    where
        F: FnOnce(&Registry) + Send + 'static,
    {
        *self.first_collect.lock() = Some(Box::new(hook));
    }

    /// Whether this registry has been collected at least once.
    pub fn has_collected(&self) -> bool {
        self.has_collected.load(Ordering::Acquire)
    }

    /// Runs the collection pipeline and streams the text exposition into
    /// `sink`.
    ///
    /// The sink is written in family order and not flushed or closed. A
    /// scrape failure from a before-collect callback aborts before any byte
    /// is written; callback panics are logged and ignored.
    pub fn collect_and_serialize<W: io::Write>(&self, sink: &mut W) -> Result<(), CollectError> {
        self.run_first_collect();

        let callbacks = self.before_collect.lock().clone();
        for callback in &callbacks {
            run_callback(callback)?;
        }

        let concurrent = self.before_collect_concurrent.lock().clone();
        if !concurrent.is_empty() {
            let mut failure = None;
            std::thread::scope(|scope| {
                let handles = concurrent
                    .iter()
                    .map(|callback| scope.spawn(move || callback()))
                    .collect::<Vec<_>>();
                for handle in handles {
                    match handle.join() {
                        Ok(Ok(())) => {}
                        Ok(Err(scrape)) => {
                            if failure.is_none() {
                                failure = Some(scrape);
                            }
                        }
                        Err(_) => {
                            tracing::error!(
                                "concurrent before-collect callback panicked; continuing"
                            );
                        }
                    }
                }
            });
            if let Some(scrape) = failure {
                return Err(scrape.into());
            }
        }

        let families = self.families.read().values().cloned().collect::<Vec<_>>();
        let mut buffer = String::new();
        for family in families {
            buffer.clear();
            family.collect_into(&mut buffer);
            sink.write_all(buffer.as_bytes())?;
        }
        Ok(())
    }

    /// Collects into a fresh `String`, the form the HTTP listener and the
    /// push gateway consume.
    pub fn render(&self) -> Result<String, CollectError> {
        let mut buffer = Vec::new();
        self.collect_and_serialize(&mut buffer)?;
        Ok(String::from_utf8(buffer).expect("exposition output is always UTF-8"))
    }

    fn run_first_collect(&self) {
        if self.has_collected.load(Ordering::Acquire) {
            return;
        }
        let mut slot = self.first_collect.lock();
        if !self.has_collected.load(Ordering::Acquire) {
            if let Some(hook) = slot.take() {
                hook(self);
            }
            self.has_collected.store(true, Ordering::Release);
        }
    }

    /// Looks up `name`, enforcing kind and schema compatibility, or inserts
    /// the family built by `create`.
    pub(crate) fn get_or_add(
        &self,
        name: &str,
        kind: MetricKind,
        label_names: &[String],
        create: impl FnOnce() -> Arc<Family>,
    ) -> Result<Arc<Family>, Error> {
        let mut families = self.families.write();
        if let Some(existing) = families.get(name) {
            if existing.kind() != kind {
                return Err(Error::KindConflict);
            }
            if existing.label_names() != label_names {
                return Err(Error::LabelSchemaConflict);
            }
            return Ok(existing.clone());
        }

        let family = create();
        families.insert(name.to_string(), family.clone());
        Ok(family)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

fn run_callback(callback: &BeforeCollect) -> Result<(), ScrapeError> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback())) {
        Ok(result) => result,
        Err(_) => {
            tracing::error!("before-collect callback panicked; continuing with the scrape");
            Ok(())
        }
    }
}

static DEFAULT_REGISTRY: RwLock<Option<Arc<Registry>>> = RwLock::new(None);

/// The process-wide default registry, created lazily on first use.
pub fn default_registry() -> Arc<Registry> {
    if let Some(registry) = DEFAULT_REGISTRY.read().as_ref() {
        return registry.clone();
    }
    let mut slot = DEFAULT_REGISTRY.write();
    slot.get_or_insert_with(|| Arc::new(Registry::new())).clone()
}

/// Replaces the process-wide default registry.
///
/// Metrics already created against the previous default keep working against
/// it; only future [`default_registry`] calls see the replacement.
pub fn set_default_registry(registry: Arc<Registry>) {
    *DEFAULT_REGISTRY.write() = Some(registry);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_render_contains_registered_values() {
        let registry = Registry::new();
        let gauge = registry.gauge("sb64v77", "An arbitrarily named gauge.").build().unwrap();
        gauge.set(64835.83);

        let rendered = registry.render().unwrap();
        assert!(rendered.contains("sb64v77"), "got {rendered:?}");
        assert!(rendered.contains("64835.83"), "got {rendered:?}");
        assert!(rendered.contains("# HELP sb64v77 An arbitrarily named gauge.\n"));
        assert!(rendered.contains("# TYPE sb64v77 gauge\n"));
    }

    #[test]
    fn test_collection_is_deterministic() {
        let registry = Registry::new();
        let counter = registry.counter("requests_total", "Total requests.").build().unwrap();
        counter.inc();
        let histogram = registry
            .histogram("latency_seconds", "Request latency.")
            .buckets(vec![0.1, 1.0])
            .build()
            .unwrap();
        histogram.observe(0.5);

        let first = registry.render().unwrap();
        let second = registry.render().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_families_serialize_in_registration_order() {
        let registry = Registry::new();
        registry.gauge("second_metric", "Registered first.").build().unwrap().set(1.0);
        registry.counter("first_metric", "Registered second.").build().unwrap().inc();

        let rendered = registry.render().unwrap();
        let second_pos = rendered.find("second_metric").unwrap();
        let first_pos = rendered.find("first_metric").unwrap();
        assert!(second_pos < first_pos, "registration order not preserved: {rendered}");
    }

    #[test]
    fn test_before_collect_runs_in_order() {
        let registry = Registry::new();
        let trace = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let trace = trace.clone();
            registry.add_before_collect(move || {
                trace.lock().push(i);
                Ok(())
            });
        }

        registry.render().unwrap();
        assert_eq!(*trace.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_scrape_failure_aborts_collection() {
        let registry = Registry::new();
        registry.gauge("present", "A gauge.").build().unwrap().set(1.0);
        registry.add_before_collect(|| Err(ScrapeError::new("backend down")));

        let mut sink = Vec::new();
        let error = registry.collect_and_serialize(&mut sink).unwrap_err();
        match error {
            CollectError::Scrape(scrape) => assert_eq!(scrape.reason(), "backend down"),
            other => panic!("expected a scrape failure, got {other:?}"),
        }
        assert!(sink.is_empty(), "aborted scrape must not emit bytes");
    }

    #[test]
    fn test_concurrent_callbacks_all_run_and_failures_propagate() {
        let registry = Registry::new();
        let ran = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let ran = ran.clone();
            registry.add_before_collect_concurrent(move || {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        registry.add_before_collect_concurrent(|| Err(ScrapeError::new("probe timeout")));

        let error = registry.render().unwrap_err();
        assert!(matches!(error, CollectError::Scrape(_)));
        assert_eq!(ran.load(Ordering::SeqCst), 4, "collection must wait for every callback");
    }

    #[test]
    fn test_callback_panic_does_not_abort_collection() {
        let registry = Registry::new();
        registry.gauge("survivor", "A gauge.").build().unwrap().set(3.0);
        registry.add_before_collect(|| panic!("misbehaving callback"));

        let rendered = registry.render().unwrap();
        assert!(rendered.contains("survivor 3\n"));
    }

    #[test]
    fn test_before_first_collect_runs_once() {
        let registry = Registry::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let hook_runs = runs.clone();
        registry.set_before_first_collect(move |registry| {
            hook_runs.fetch_add(1, Ordering::SeqCst);
            registry.gauge("installed_lazily", "From the hook.").build().unwrap().set(1.0);
        });

        assert!(!registry.has_collected());
        let rendered = registry.render().unwrap();
        assert!(rendered.contains("installed_lazily 1\n"));
        assert!(registry.has_collected());

        registry.render().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_static_labels_lock_after_registration() {
        let registry = Registry::new();
        registry.counter("anything_total", "A counter.").build().unwrap();
        let result = registry.set_static_labels([("region", "eu-1")]);
        assert_eq!(result, Err(Error::StaticLabelsLocked));
    }

    #[test]
    fn test_static_labels_lock_after_collection() {
        let registry = Registry::new();
        registry.render().unwrap();
        let result = registry.set_static_labels([("region", "eu-1")]);
        assert_eq!(result, Err(Error::StaticLabelsLocked));
    }

    #[test]
    fn test_static_labels_set_at_most_once() {
        let registry = Registry::new();
        registry.set_static_labels([("region", "eu-1")]).unwrap();
        let result = registry.set_static_labels([("zone", "a")]);
        assert_eq!(result, Err(Error::StaticLabelsLocked));
    }

    #[test]
    fn test_static_labels_validated() {
        let registry = Registry::new();
        assert_eq!(
            registry.set_static_labels([("bad-name", "x")]),
            Err(Error::InvalidLabelName("bad-name".to_string()))
        );
        assert_eq!(
            registry.set_static_labels([("dup", "1"), ("dup", "2")]),
            Err(Error::DuplicateLabelName("dup".to_string()))
        );
    }

    #[test]
    fn test_static_labels_appear_on_every_child() {
        let registry = Registry::new();
        registry.set_static_labels([("app", "checkout")]).unwrap();
        registry.counter("orders_total", "Orders.").build().unwrap().inc();

        let rendered = registry.render().unwrap();
        assert!(rendered.contains("orders_total{app=\"checkout\"} 1\n"), "got {rendered}");
    }

    #[test]
    fn test_default_registry_is_process_wide() {
        let a = default_registry();
        let b = default_registry();
        assert!(Arc::ptr_eq(&a, &b));

        let replacement = Arc::new(Registry::new());
        set_default_registry(replacement.clone());
        assert!(Arc::ptr_eq(&default_registry(), &replacement));
    }
}
