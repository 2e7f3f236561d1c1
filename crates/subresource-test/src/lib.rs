//! Helpers for testing loads against a real HTTP origin.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output is
//!    captured by the test runner.
//!
//!  - Hold on to the [`OriginServer`] until all requests to it have been made. Dropping it stops
//!    the server and pending connections will fail.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{self, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tracing_subscriber::EnvFilter;
use url::Url;

/// The `ETag` of every resource served below `/validated/`.
pub const ETAG: &str = "\"v1\"";

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `subresource` crate and mutes all
///    other logs (such as hyper or reqwest).
pub fn setup() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("subresource=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    pub handle: tokio::task::JoinHandle<()>,
    pub socket: SocketAddr,
}

impl Server {
    pub fn with_router(router: Router) -> Self {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

type Hits = Arc<Mutex<BTreeMap<String, usize>>>;

async fn count_hit(
    State(hits): State<Hits>,
    extract::OriginalUri(uri): extract::OriginalUri,
    request: Request,
    next: Next,
) -> Response {
    {
        let mut hits = hits.lock().unwrap();
        *hits.entry(uri.path().to_owned()).or_default() += 1;
    }
    next.run(request).await
}

async fn validated(headers: HeaderMap, extract::Path(path): extract::Path<String>) -> Response {
    let matches = headers
        .get(header::IF_NONE_MATCH)
        .is_some_and(|value| value == ETAG);
    if matches {
        return (
            StatusCode::NOT_MODIFIED,
            [
                (header::ETAG.as_str(), ETAG),
                ("x-revalidated", "yes"),
                (header::CONTENT_TYPE.as_str(), "application/octet-stream"),
            ],
        )
            .into_response();
    }

    (
        [
            (header::ETAG.as_str(), ETAG),
            (header::CACHE_CONTROL.as_str(), "no-cache"),
            (header::CONTENT_TYPE.as_str(), "text/javascript"),
        ],
        path,
    )
        .into_response()
}

/// An origin server counting the hits on every path.
///
/// Routes:
///
///  - `/static/*path` responds with `path`, fresh for an hour.
///  - `/validated/*path` responds with `path` and an `ETag`, and requires revalidation. A matching
///    `If-None-Match` yields a `304` carrying an `x-revalidated` header.
///  - `/nostore/*path` responds with `path`, marked `no-store`.
///  - `/respond_statuscode/:num/*tail` responds with an empty body and status `num`.
///  - `/delay/:time/*path` waits for the humantime duration `time` before responding with `path`.
pub struct OriginServer {
    server: Server,
    hits: Hits,
}

impl OriginServer {
    pub fn new() -> Self {
        let hits = Hits::default();

        let router = Router::new()
            .route(
                "/static/*path",
                get(|extract::Path(path): extract::Path<String>| async move {
                    ([(header::CACHE_CONTROL, "max-age=3600")], path)
                }),
            )
            .route("/validated/*path", get(validated))
            .route(
                "/nostore/*path",
                get(|extract::Path(path): extract::Path<String>| async move {
                    ([(header::CACHE_CONTROL, "no-store")], path)
                }),
            )
            .route(
                "/respond_statuscode/:num/*tail",
                get(
                    |extract::Path((num, _)): extract::Path<(u16, String)>| async move {
                        StatusCode::from_u16(num).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                    },
                ),
            )
            .route(
                "/delay/:time/*path",
                get(
                    |extract::Path((time, path)): extract::Path<(String, String)>| async move {
                        let duration = humantime::parse_duration(&time).unwrap();
                        tokio::time::sleep(duration).await;
                        path
                    },
                ),
            )
            .layer(middleware::from_fn_with_state(hits.clone(), count_hit));

        let server = Server::with_router(router);

        Self { server, hits }
    }

    /// The number of requests for `path` since the server started.
    pub fn hits(&self, path: &str) -> usize {
        let path = format!("/{}", path.trim_start_matches('/'));
        self.hits.lock().unwrap().get(&path).copied().unwrap_or(0)
    }

    /// Takes the hit counts of all paths, resetting them.
    pub fn all_hits(&self) -> Vec<(String, usize)> {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_iter().collect()
    }

    pub fn url(&self, path: &str) -> Url {
        self.server.url(path)
    }
}

impl Default for OriginServer {
    fn default() -> Self {
        Self::new()
    }
}
