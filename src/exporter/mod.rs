//! Exposing a registry over HTTP: a pull-mode scrape listener and a
//! push-mode Pushgateway client.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[cfg(feature = "push-gateway")]
use hyper::Uri;
use thiserror::Error;
use tokio::sync::Notify;

mod builder;
pub use builder::ExporterBuilder;

#[cfg(feature = "http-listener")]
mod http_listener;
#[cfg(feature = "http-listener")]
pub use http_listener::RequestPredicate;

#[cfg(feature = "push-gateway")]
mod push_gateway;
#[cfg(feature = "push-gateway")]
pub use push_gateway::PushError;

/// The `Content-Type` of the text exposition format served by the listener.
pub const TEXT_FORMAT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Errors that can occur while building an exporter.
#[derive(Debug, Error)]
pub enum BuildError {
    /// There was an issue when creating the necessary Tokio runtime to launch
    /// the exporter.
    #[error("failed to create Tokio runtime for exporter: {0}")]
    FailedToCreateRuntime(String),

    /// There was an issue when creating the HTTP listener.
    #[cfg(feature = "http-listener")]
    #[error("failed to create HTTP listener: {0}")]
    FailedToCreateHTTPListener(String),

    /// The given address could not be parsed successfully as an IP
    /// address/subnet.
    #[cfg(feature = "http-listener")]
    #[error("failed to parse address as a valid IP address/subnet: {0}")]
    InvalidAllowlistAddress(String),

    /// The given push gateway endpoint is empty or not a valid URI.
    #[cfg(feature = "push-gateway")]
    #[error("push gateway endpoint is not valid: {0}")]
    InvalidPushGatewayEndpoint(String),

    /// The push gateway job name is empty.
    #[cfg(feature = "push-gateway")]
    #[error("push gateway job must not be empty")]
    EmptyPushGatewayJob,

    /// The push interval is zero.
    #[cfg(feature = "push-gateway")]
    #[error("push interval must be positive")]
    ZeroPushInterval,

    /// A grouping label key or value is empty.
    #[cfg(feature = "push-gateway")]
    #[error("grouping label keys and values must not be empty")]
    EmptyGroupingLabel,

    /// No exporter configuration was present.
    ///
    /// This generally only occurs when HTTP listener support is disabled, but
    /// no push gateway configuration was given to the builder.
    #[error("attempted to build exporter with no exporters enabled; did you disable default features and forget to enable either the `http-listener` or `push-gateway` features?")]
    MissingExporterConfiguration,
}

/// Errors surfaced by a running exporter future.
#[derive(Debug)]
pub enum ExporterError {
    /// The HTTP listener could not be registered with the runtime.
    #[cfg(feature = "http-listener")]
    Listener(std::io::Error),
}

/// Convenience type for a future implementing an exporter.
pub type ExporterFuture = Pin<Box<dyn Future<Output = Result<(), ExporterError>> + Send + 'static>>;

#[derive(Clone, Debug)]
enum ExporterConfig {
    // Run an HTTP listener on the given `listen_address`.
    #[cfg(feature = "http-listener")]
    HttpListener { listen_address: std::net::SocketAddr },

    // Run a push gateway task sending to the assembled target URL once per
    // interval, until cancelled.
    #[cfg(feature = "push-gateway")]
    PushGateway { endpoint: Uri, job: String },

    #[allow(dead_code)]
    Unconfigured,
}

/// A cancellation signal shared between an exporter and its owner.
///
/// [`request`][Shutdown::request] is monotone: once requested, the signal
/// stays requested, and [`is_requested`][Shutdown::is_requested] is readable
/// from any thread. The HTTP listener reacts by refusing new connections and
/// draining in-flight requests; the push gateway loop performs one final push
/// and exits.
#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    inner: Arc<ShutdownInner>,
}

#[derive(Debug, Default)]
struct ShutdownInner {
    requested: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    /// Creates an unrequested signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown.
    pub fn request(&self) {
        self.inner.requested.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Whether shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
    }

    /// Resolves once shutdown is requested.
    pub(crate) async fn wait(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a request between the check
        // and the await cannot be missed.
        notified.as_mut().enable();
        if self.is_requested() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::Shutdown;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_is_monotone_and_wakes_waiters() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_requested());

        let waiter = shutdown.clone();
        let waited = tokio::spawn(async move { waiter.wait().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.request();
        tokio::time::timeout(Duration::from_secs(1), waited)
            .await
            .expect("waiter must wake after a request")
            .unwrap();

        assert!(shutdown.is_requested());
        // Waiting after the request resolves immediately.
        tokio::time::timeout(Duration::from_secs(1), shutdown.wait())
            .await
            .expect("requested signal resolves immediately");
    }
}
