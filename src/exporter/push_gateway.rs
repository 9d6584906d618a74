use std::sync::Arc;
use std::time::{Duration, Instant};

use http_body_util::{BodyExt, Collected, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use hyper_rustls::HttpsConnector;
use thiserror::Error;
use tracing::{debug, error};

use crate::error::CollectError;
use crate::registry::Registry;

use super::{ExporterFuture, Shutdown};

/// A failed push cycle, delivered to the `on_push_error` callback.
///
/// Pushes fail open: a failed cycle never stops the loop, the next one runs
/// at the usual interval.
#[derive(Debug, Error)]
pub enum PushError {
    /// The push gateway answered with a non-success status.
    #[error("push gateway returned status {status}: {body}")]
    Status {
        /// The HTTP status code of the response.
        status: u16,
        /// The response body, if it could be read.
        body: String,
    },

    /// The request never produced a response.
    #[error("error sending request to push gateway: {0}")]
    Transport(String),
}

pub(super) type OnPushError = Arc<dyn Fn(&PushError) + Send + Sync>;

type PushClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Creates an [`ExporterFuture`] implementing a push gateway loop.
///
/// Each cycle collects the registry and POSTs the exposition to `target`;
/// the loop then sleeps for whatever remains of `interval`. On shutdown it
/// performs one final push so the gateway holds the latest state.
pub(super) fn new_push_gateway(
    registry: Arc<Registry>,
    target: Uri,
    interval: Duration,
    auth: Option<HeaderValue>,
    on_error: Option<OnPushError>,
    shutdown: Shutdown,
) -> ExporterFuture {
    Box::pin(async move {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .expect("no native root CA certificates found")
            .https_or_http()
            .enable_http1()
            .build();
        let client: PushClient = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .build(https);

        loop {
            let cycle_started = Instant::now();
            push_once(&client, &registry, &target, auth.as_ref(), on_error.as_ref()).await;

            if shutdown.is_requested() {
                return Ok(());
            }
            if let Some(remaining) = interval.checked_sub(cycle_started.elapsed()) {
                tokio::select! {
                    () = shutdown.wait() => {
                        // Flush the latest state before exiting.
                        push_once(&client, &registry, &target, auth.as_ref(), on_error.as_ref())
                            .await;
                        return Ok(());
                    }
                    () = tokio::time::sleep(remaining) => {}
                }
            }
        }
    })
}

async fn push_once(
    client: &PushClient,
    registry: &Registry,
    target: &Uri,
    auth: Option<&HeaderValue>,
    on_error: Option<&OnPushError>,
) {
    let output = match registry.render() {
        Ok(output) => output,
        Err(CollectError::Scrape(scrape)) => {
            debug!(reason = scrape.reason(), "Scrape failed; skipping push cycle.");
            return;
        }
        Err(error) => {
            error!(%error, "Failed to collect registry for push.");
            return;
        }
    };

    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(target.clone())
        .header(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    if let Some(auth) = auth {
        builder = builder.header(AUTHORIZATION, auth.clone());
    }
    let request = match builder.body(Full::from(output)) {
        Ok(request) => request,
        Err(e) => {
            error!("failed to build push gateway request: {}", e);
            return;
        }
    };

    match client.request(request).await {
        Ok(response) if !response.status().is_success() => {
            let status = response.status().as_u16();
            let body = response
                .into_body()
                .collect()
                .await
                .map(Collected::to_bytes)
                .map_err(|_| ())
                .and_then(|b| String::from_utf8(b[..].to_vec()).map_err(|_| ()))
                .unwrap_or_else(|()| String::from("<failed to read response body>"));
            deliver(on_error, &PushError::Status { status, body });
        }
        Ok(_) => {}
        Err(e) => deliver(on_error, &PushError::Transport(e.to_string())),
    }
}

fn deliver(on_error: Option<&OnPushError>, error: &PushError) {
    match on_error {
        Some(callback) => callback(error),
        None => error!(%error, "Failed to push metrics to the push gateway."),
    }
}

// The `user:password` shape of RFC 7617; a missing password still keeps the
// trailing colon.
pub(super) fn basic_auth(username: &str, password: Option<&str>) -> HeaderValue {
    use base64::prelude::{Engine as _, BASE64_STANDARD};

    let credentials = format!("{username}:{}", password.unwrap_or_default());
    let encoded = BASE64_STANDARD.encode(credentials);
    let mut header = HeaderValue::try_from(format!("Basic {encoded}"))
        .expect("base64 output is always a valid header value");
    header.set_sensitive(true);
    header
}
