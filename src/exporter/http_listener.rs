use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::{
    body::{Bytes, Incoming},
    header::{HeaderValue, CONTENT_TYPE},
    server::conn::http1::Builder as HyperHttpBuilder,
    service::service_fn,
    Method, Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use ipnet::IpNet;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{error, warn};

use crate::error::CollectError;
use crate::registry::Registry;

use super::{BuildError, ExporterError, ExporterFuture, Shutdown, TEXT_FORMAT_CONTENT_TYPE};

/// A caller-supplied check consulted for every scrape request; returning
/// `false` answers `403 Forbidden`.
pub type RequestPredicate = dyn Fn(&Request<Incoming>) -> bool + Send + Sync;

struct HttpListeningExporter {
    registry: Arc<Registry>,
    path: String,
    allowed_addresses: Option<Vec<IpNet>>,
    predicate: Option<Arc<RequestPredicate>>,
    shutdown: Shutdown,
}

impl HttpListeningExporter {
    async fn serve(self, listener: std::net::TcpListener) -> Result<(), ExporterError> {
        let listener = TcpListener::from_std(listener).map_err(ExporterError::Listener)?;
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => self.process_tcp_stream(&mut connections, stream),
                        Err(e) => warn!(error = ?e, "Error accepting connection. Ignoring request."),
                    }
                }
                () = self.shutdown.wait() => break,
            }
            // Reap finished connection tasks so the set does not grow without
            // bound on long-lived listeners.
            while connections.try_join_next().is_some() {}
        }

        // Stop accepting, but let in-flight requests run to completion.
        while connections.join_next().await.is_some() {}
        Ok(())
    }

    fn process_tcp_stream(&self, connections: &mut JoinSet<()>, stream: TcpStream) {
        let is_allowed = self.is_peer_allowed(&stream);
        let registry = self.registry.clone();
        let path = self.path.clone();
        let predicate = self.predicate.clone();

        let service = service_fn(move |req: Request<Incoming>| {
            let registry = registry.clone();
            let path = path.clone();
            let predicate = predicate.clone();
            async move {
                Ok::<_, hyper::Error>(handle_http_request(
                    is_allowed,
                    &registry,
                    &path,
                    predicate.as_deref(),
                    &req,
                ))
            }
        });

        connections.spawn(async move {
            if let Err(err) =
                HyperHttpBuilder::new().serve_connection(TokioIo::new(stream), service).await
            {
                warn!(error = ?err, "Error serving connection.");
            }
        });
    }

    fn is_peer_allowed(&self, stream: &TcpStream) -> bool {
        // An absent allowlist admits everyone.
        let Some(allowlist) = self.allowed_addresses.as_deref() else {
            return true;
        };
        match stream.peer_addr() {
            Ok(peer) => allowlist_admits(allowlist, peer.ip()),
            Err(e) => {
                warn!(error = ?e, "Could not determine peer address; refusing request.");
                false
            }
        }
    }
}

fn allowlist_admits(allowlist: &[IpNet], peer: std::net::IpAddr) -> bool {
    allowlist.iter().any(|net| net.contains(&peer))
}

fn handle_http_request(
    is_allowed: bool,
    registry: &Registry,
    path: &str,
    predicate: Option<&RequestPredicate>,
    req: &Request<Incoming>,
) -> Response<Full<Bytes>> {
    if !is_allowed || predicate.is_some_and(|predicate| !predicate(req)) {
        return empty_response(StatusCode::FORBIDDEN);
    }
    if req.uri().path() != path {
        return empty_response(StatusCode::NOT_FOUND);
    }
    if req.method() != Method::GET {
        return empty_response(StatusCode::METHOD_NOT_ALLOWED);
    }

    match registry.render() {
        Ok(output) => {
            let mut response = Response::new(Full::from(output));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static(TEXT_FORMAT_CONTENT_TYPE),
            );
            response
        }
        Err(CollectError::Scrape(scrape)) => {
            let mut response = Response::new(Full::from(scrape.reason().to_string()));
            *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
            response
        }
        Err(error) => {
            error!(%error, "Failed to collect registry for scrape.");
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    // This unwrap cannot fail: no fallible builder method is used.
    Response::builder().status(status).body(Full::<Bytes>::default()).unwrap()
}

/// Creates an [`ExporterFuture`] implementing an HTTP listener that serves
/// the text exposition.
///
/// # Errors
///
/// Will return an error if it cannot bind to the listen address.
pub(super) fn new_http_listener(
    registry: Arc<Registry>,
    listen_address: SocketAddr,
    path: String,
    allowed_addresses: Option<Vec<IpNet>>,
    predicate: Option<Arc<RequestPredicate>>,
    shutdown: Shutdown,
) -> Result<ExporterFuture, BuildError> {
    let listener = std::net::TcpListener::bind(listen_address)
        .and_then(|listener| {
            listener.set_nonblocking(true)?;
            Ok(listener)
        })
        .map_err(|e| BuildError::FailedToCreateHTTPListener(e.to_string()))?;

    let exporter =
        HttpListeningExporter { registry, path, allowed_addresses, predicate, shutdown };

    Ok(Box::pin(async move { exporter.serve(listener).await }))
}

#[cfg(test)]
mod tests {
    use super::allowlist_admits;
    use ipnet::IpNet;
    use std::net::IpAddr;

    fn nets(specs: &[&str]) -> Vec<IpNet> {
        specs.iter().map(|spec| spec.parse().expect("valid network spec")).collect()
    }

    fn peer(addr: &str) -> IpAddr {
        addr.parse().expect("valid peer address")
    }

    #[test]
    fn test_allowlist_admits_members_only() {
        let allowlist = nets(&["127.0.0.0/8", "10.1.0.0/16", "2001:db8::/32"]);

        assert!(allowlist_admits(&allowlist, peer("127.0.0.1")));
        assert!(allowlist_admits(&allowlist, peer("10.1.255.9")));
        assert!(allowlist_admits(&allowlist, peer("2001:db8::17")));

        assert!(!allowlist_admits(&allowlist, peer("10.2.0.1")));
        assert!(!allowlist_admits(&allowlist, peer("192.168.1.1")));
        assert!(!allowlist_admits(&allowlist, peer("2001:db9::17")));
    }

    #[test]
    fn test_empty_allowlist_admits_nobody() {
        // An allowlist that exists but holds no entries is a deny-all; only
        // the absence of an allowlist admits everyone.
        assert!(!allowlist_admits(&[], peer("127.0.0.1")));
    }

    #[test]
    fn test_single_address_entry() {
        let allowlist = nets(&["192.0.2.7/32"]);
        assert!(allowlist_admits(&allowlist, peer("192.0.2.7")));
        assert!(!allowlist_admits(&allowlist, peer("192.0.2.8")));
    }
}
