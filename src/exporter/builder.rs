use std::sync::Arc;
use std::thread;
#[cfg(feature = "push-gateway")]
use std::time::Duration;

#[cfg(feature = "http-listener")]
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

#[cfg(feature = "http-listener")]
use ipnet::IpNet;

#[cfg(feature = "push-gateway")]
use hyper::http::uri::Uri;

use crate::registry::{default_registry, Registry};

use super::{BuildError, ExporterConfig, ExporterFuture, Shutdown};

#[cfg(feature = "http-listener")]
use super::http_listener::RequestPredicate;
#[cfg(feature = "push-gateway")]
use super::push_gateway::{basic_auth, OnPushError, PushError};

/// Builder for an exporter serving or pushing a registry's exposition.
///
/// Defaults to an HTTP listener at `0.0.0.0:9000` answering on `/metrics`,
/// collecting the process default registry. Listener mode and push gateway
/// mode are mutually exclusive: configuring one disables the other.
pub struct ExporterBuilder {
    exporter_config: ExporterConfig,
    registry: Option<Arc<Registry>>,
    #[cfg(feature = "http-listener")]
    allowed_addresses: Option<Vec<IpNet>>,
    #[cfg(feature = "http-listener")]
    listen_path: String,
    #[cfg(feature = "http-listener")]
    predicate: Option<Arc<RequestPredicate>>,
    #[cfg(feature = "push-gateway")]
    push_interval: Duration,
    #[cfg(feature = "push-gateway")]
    push_instance: Option<String>,
    #[cfg(feature = "push-gateway")]
    push_grouping: Vec<(String, String)>,
    #[cfg(feature = "push-gateway")]
    push_auth: Option<(String, Option<String>)>,
    #[cfg(feature = "push-gateway")]
    on_push_error: Option<OnPushError>,
}

impl std::fmt::Debug for ExporterBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExporterBuilder").finish_non_exhaustive()
    }
}

impl ExporterBuilder {
    /// Creates a new [`ExporterBuilder`].
    pub fn new() -> Self {
        #[cfg(feature = "http-listener")]
        let exporter_config = ExporterConfig::HttpListener {
            listen_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 9000),
        };
        #[cfg(not(feature = "http-listener"))]
        let exporter_config = ExporterConfig::Unconfigured;

        Self {
            exporter_config,
            registry: None,
            #[cfg(feature = "http-listener")]
            allowed_addresses: None,
            #[cfg(feature = "http-listener")]
            listen_path: "/metrics".to_string(),
            #[cfg(feature = "http-listener")]
            predicate: None,
            #[cfg(feature = "push-gateway")]
            push_interval: Duration::from_millis(1000),
            #[cfg(feature = "push-gateway")]
            push_instance: None,
            #[cfg(feature = "push-gateway")]
            push_grouping: Vec::new(),
            #[cfg(feature = "push-gateway")]
            push_auth: None,
            #[cfg(feature = "push-gateway")]
            on_push_error: None,
        }
    }

    /// Collects the given registry instead of the process default.
    #[must_use]
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Configures the exporter to expose an HTTP listener that functions as a
    /// [scrape endpoint].
    ///
    /// Defaults to enabled, listening at `0.0.0.0:9000`.
    ///
    /// [scrape endpoint]: https://prometheus.io/docs/instrumenting/exposition_formats/#text-based-format
    #[cfg(feature = "http-listener")]
    #[must_use]
    pub fn with_http_listener(mut self, addr: impl Into<SocketAddr>) -> Self {
        self.exporter_config = ExporterConfig::HttpListener { listen_address: addr.into() };
        self
    }

    /// Sets the request path the scrape endpoint answers on.
    ///
    /// Requests for any other path receive `404 Not Found`. Defaults to
    /// `/metrics`.
    #[cfg(feature = "http-listener")]
    #[must_use]
    pub fn listen_path(mut self, path: impl Into<String>) -> Self {
        self.listen_path = path.into();
        self
    }

    /// Adds an IP address or subnet to the allowlist for the scrape endpoint.
    ///
    /// If a client makes a request to the scrape endpoint and their IP is not
    /// present in the allowlist, either directly or within any of the allowed
    /// subnets, they will receive a `403 Forbidden` response.
    ///
    /// Defaults to allowing all IPs.
    ///
    /// ## Errors
    ///
    /// If the given address cannot be parsed into an IP address or subnet, an
    /// error variant will be returned describing the error.
    #[cfg(feature = "http-listener")]
    pub fn add_allowed_address<A>(mut self, address: A) -> Result<Self, BuildError>
    where
        A: AsRef<str>,
    {
        use std::str::FromStr;

        let address = IpNet::from_str(address.as_ref())
            .map_err(|e| BuildError::InvalidAllowlistAddress(e.to_string()))?;
        self.allowed_addresses.get_or_insert_with(Vec::new).push(address);

        Ok(self)
    }

    /// Installs a predicate consulted for every scrape request.
    ///
    /// A rejected request receives `403 Forbidden`. The predicate composes
    /// with the IP allowlist; both must admit the request.
    #[cfg(feature = "http-listener")]
    #[must_use]
    pub fn request_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&hyper::Request<hyper::body::Incoming>) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Configures the exporter to periodically push to a Prometheus
    /// [push gateway].
    ///
    /// Each cycle POSTs the exposition to
    /// `<endpoint>/job/<job>[/instance/<instance>][/key/value…]`. An empty
    /// endpoint or job is rejected.
    ///
    /// [push gateway]: https://prometheus.io/docs/instrumenting/pushing/
    #[cfg(feature = "push-gateway")]
    pub fn with_push_gateway<T>(
        mut self,
        endpoint: T,
        job: impl Into<String>,
    ) -> Result<Self, BuildError>
    where
        T: AsRef<str>,
    {
        let endpoint = endpoint.as_ref();
        if endpoint.is_empty() {
            return Err(BuildError::InvalidPushGatewayEndpoint("endpoint is empty".to_string()));
        }
        let job = job.into();
        if job.is_empty() {
            return Err(BuildError::EmptyPushGatewayJob);
        }

        self.exporter_config = ExporterConfig::PushGateway {
            endpoint: Uri::try_from(endpoint)
                .map_err(|e| BuildError::InvalidPushGatewayEndpoint(e.to_string()))?,
            job,
        };
        Ok(self)
    }

    /// Sets the time between push cycles. Defaults to one second.
    ///
    /// ## Errors
    ///
    /// A zero interval is rejected.
    #[cfg(feature = "push-gateway")]
    pub fn push_interval(mut self, interval: Duration) -> Result<Self, BuildError> {
        if interval.is_zero() {
            return Err(BuildError::ZeroPushInterval);
        }
        self.push_interval = interval;
        Ok(self)
    }

    /// Adds the `instance` path segment to the push target URL.
    #[cfg(feature = "push-gateway")]
    #[must_use]
    pub fn push_instance(mut self, instance: impl Into<String>) -> Self {
        self.push_instance = Some(instance.into());
        self
    }

    /// Adds a grouping label pair to the push target URL.
    ///
    /// ## Errors
    ///
    /// Both the key and the value must be non-empty.
    #[cfg(feature = "push-gateway")]
    pub fn push_grouping_label(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, BuildError> {
        let (key, value) = (key.into(), value.into());
        if key.is_empty() || value.is_empty() {
            return Err(BuildError::EmptyGroupingLabel);
        }
        self.push_grouping.push((key, value));
        Ok(self)
    }

    /// Authenticates pushes with HTTP basic auth.
    #[cfg(feature = "push-gateway")]
    #[must_use]
    pub fn push_basic_auth(
        mut self,
        username: impl Into<String>,
        password: Option<String>,
    ) -> Self {
        self.push_auth = Some((username.into(), password));
        self
    }

    /// Delivers push transport failures to `callback` instead of logging
    /// them. Scrape failures are not delivered; they skip the cycle silently.
    #[cfg(feature = "push-gateway")]
    #[must_use]
    pub fn on_push_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&PushError) + Send + Sync + 'static,
    {
        self.on_push_error = Some(Arc::new(callback));
        self
    }

    /// Builds the exporter future and its cancellation handle.
    ///
    /// The future runs until the [`Shutdown`] is requested; drive it on a
    /// Tokio runtime. Most callers use [`install`][ExporterBuilder::install]
    /// instead.
    ///
    /// ## Errors
    ///
    /// If the HTTP listener cannot bind, or the push gateway target URL
    /// cannot be assembled, an error variant will be returned describing the
    /// error.
    pub fn build(self) -> Result<(Shutdown, ExporterFuture), BuildError> {
        let registry = self.registry.clone().unwrap_or_else(default_registry);
        let shutdown = Shutdown::new();

        let future = match self.exporter_config.clone() {
            ExporterConfig::Unconfigured => Err(BuildError::MissingExporterConfiguration)?,

            #[cfg(feature = "http-listener")]
            ExporterConfig::HttpListener { listen_address } => {
                super::http_listener::new_http_listener(
                    registry,
                    listen_address,
                    self.listen_path,
                    self.allowed_addresses,
                    self.predicate,
                    shutdown.clone(),
                )?
            }

            #[cfg(feature = "push-gateway")]
            ExporterConfig::PushGateway { endpoint, job } => {
                let target = build_push_target(
                    &endpoint,
                    &job,
                    self.push_instance.as_deref(),
                    &self.push_grouping,
                )?;
                let auth = self
                    .push_auth
                    .as_ref()
                    .map(|(user, pass)| basic_auth(user, pass.as_deref()));
                super::push_gateway::new_push_gateway(
                    registry,
                    target,
                    self.push_interval,
                    auth,
                    self.on_push_error,
                    shutdown.clone(),
                )
            }
        };

        Ok((shutdown, future))
    }

    /// Builds the exporter and runs it on a dedicated background thread with
    /// its own single-threaded runtime.
    ///
    /// Returns the [`Shutdown`] handle; requesting it stops the exporter and
    /// ends the thread.
    ///
    /// ## Errors
    ///
    /// If the runtime or the exporter cannot be created, an error variant
    /// will be returned describing the error.
    pub fn install(self) -> Result<Shutdown, BuildError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BuildError::FailedToCreateRuntime(e.to_string()))?;

        let (shutdown, exporter) = {
            let _guard = runtime.enter();
            self.build()?
        };

        thread::Builder::new()
            .name("promenade-exporter".to_string())
            .spawn(move || {
                if let Err(error) = runtime.block_on(exporter) {
                    tracing::error!(?error, "Exporter terminated abnormally.");
                }
            })
            .map_err(|e| BuildError::FailedToCreateRuntime(e.to_string()))?;

        Ok(shutdown)
    }
}

impl Default for ExporterBuilder {
    fn default() -> Self {
        ExporterBuilder::new()
    }
}

/// Assembles `<endpoint>/job/<job>[/instance/<instance>][/key/value…]`.
#[cfg(feature = "push-gateway")]
fn build_push_target(
    endpoint: &Uri,
    job: &str,
    instance: Option<&str>,
    grouping: &[(String, String)],
) -> Result<Uri, BuildError> {
    let mut target = endpoint.to_string();
    while target.ends_with('/') {
        target.pop();
    }

    target.push_str("/job/");
    target.push_str(job);
    if let Some(instance) = instance {
        if instance.is_empty() {
            return Err(BuildError::EmptyGroupingLabel);
        }
        target.push_str("/instance/");
        target.push_str(instance);
    }
    for (key, value) in grouping {
        target.push('/');
        target.push_str(key);
        target.push('/');
        target.push_str(value);
    }

    Uri::try_from(target.as_str())
        .map_err(|e| BuildError::InvalidPushGatewayEndpoint(e.to_string()))
}
