use std::rc::Rc;
use std::time::Duration;

use subresource::config::{DispatchPolicy, HttpConfig, StoreConfig};
use subresource::error::ResourceError;
use subresource::fetcher::Fetcher;
use subresource::http::HttpTransport;
use subresource::resource::{LoadOptions, ResourceKind, ResourceStatus};
use subresource::scheduler::NotificationScheduler;
use subresource::store::MemoryStore;
use tokio::task::LocalSet;

use crate::setup_fetcher;
use crate::test::OriginServer;

#[tokio::test]
async fn test_error_status() {
    let server = OriginServer::new();
    LocalSet::new()
        .run_until(async {
            let env = setup_fetcher(HttpConfig::default());

            let url = server.url("respond_statuscode/404/logo.png");
            let (image, _) = env.fetch(url.clone(), ResourceKind::Image).await;
            assert_eq!(image.status(), ResourceStatus::LoadError);
            assert_eq!(image.resource_error(), Some(ResourceError::HttpStatus(404)));

            // Raw loads deliver error pages like any other payload.
            let (raw, _) = env.fetch(url, ResourceKind::Raw).await;
            assert_eq!(raw.status(), ResourceStatus::Cached);
            assert_eq!(raw.response().unwrap().status().as_u16(), 404);
        })
        .await;
}

#[tokio::test]
async fn test_timeout() {
    let server = OriginServer::new();
    LocalSet::new()
        .run_until(async {
            let config = HttpConfig {
                timeout: Duration::from_millis(100),
                ..Default::default()
            };
            let env = setup_fetcher(config);

            let (resource, _) = env
                .fetch(server.url("delay/2s/slow.js"), ResourceKind::Script)
                .await;
            assert_eq!(
                resource.resource_error(),
                Some(ResourceError::Timeout(Duration::from_millis(100)))
            );
            assert_eq!(env.transport.running(), 0);
        })
        .await;
}

#[tokio::test]
async fn test_connection_refused() {
    // Nothing listens on a port that was just released.
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let url = format!("http://127.0.0.1:{port}/gone.js").parse().unwrap();

    LocalSet::new()
        .run_until(async {
            let env = setup_fetcher(HttpConfig::default());
            let (resource, _) = env.fetch(url, ResourceKind::Script).await;

            assert_eq!(resource.status(), ResourceStatus::LoadError);
            assert!(matches!(
                resource.resource_error(),
                Some(ResourceError::Network(_))
            ));
        })
        .await;
}

#[tokio::test]
async fn test_detach_aborts_running_loads() {
    let server = OriginServer::new();
    LocalSet::new()
        .run_until(async {
            let env = setup_fetcher(HttpConfig::default());

            let (resource, _) = env.fetcher.request(
                server.url("delay/10s/slow.js"),
                ResourceKind::Script,
                LoadOptions::default(),
            );
            // Let the transport task connect.
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert_eq!(env.transport.running(), 1);

            env.fetcher.detach();
            assert_eq!(resource.resource_error(), Some(ResourceError::Cancelled));
            assert_eq!(env.transport.running(), 0);
            assert_eq!(env.fetcher.active_sessions(), 0);
        })
        .await;
}

#[tokio::test]
async fn test_load_without_transport_driver() {
    crate::test::setup();
    let transport = Rc::new(HttpTransport::new(&HttpConfig::default()).unwrap());
    let fetcher = Fetcher::new(
        Rc::new(MemoryStore::new(StoreConfig::default())),
        Rc::new(NotificationScheduler::new()),
        DispatchPolicy::default(),
        transport.clone(),
    );
    let url: url::Url = "http://127.0.0.1:1/app.js".parse().unwrap();

    // There is no `LocalSet` to spawn loads on yet.
    let (resource, _) = fetcher.request(url.clone(), ResourceKind::Script, LoadOptions::default());
    assert_eq!(resource.resource_error(), Some(ResourceError::NoTransportContext));

    // A dropped driver stays detached.
    drop(transport.clone().run());
    let (resource, _) = fetcher.request(url, ResourceKind::Script, LoadOptions::default());
    assert_eq!(resource.resource_error(), Some(ResourceError::NoTransportContext));
    assert_eq!(transport.running(), 0);
}
