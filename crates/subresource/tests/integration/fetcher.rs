use std::rc::Rc;

use subresource::config::HttpConfig;
use subresource::fetcher::FetchDisposition;
use subresource::resource::{ResourceKind, ResourceStatus};
use subresource::store::ResourceStore;
use tokio::task::LocalSet;

use crate::test::OriginServer;
use crate::setup_fetcher;

#[tokio::test]
async fn test_fresh_resource_is_reused() {
    let server = OriginServer::new();
    LocalSet::new()
        .run_until(async {
            let env = setup_fetcher(HttpConfig::default());
            let url = server.url("static/app.js");

            let (first, disposition) = env.fetch(url.clone(), ResourceKind::Script).await;
            assert_eq!(disposition, FetchDisposition::Load);
            assert_eq!(first.status(), ResourceStatus::Cached);
            assert_eq!(first.data().unwrap().to_bytes(), "app.js");

            let (second, disposition) = env.fetch(url, ResourceKind::Script).await;
            assert_eq!(disposition, FetchDisposition::Reuse);
            assert!(Rc::ptr_eq(&first, &second));
            assert_eq!(server.hits("static/app.js"), 1);
        })
        .await;
}

#[tokio::test]
async fn test_stale_resource_is_revalidated() {
    let server = OriginServer::new();
    LocalSet::new()
        .run_until(async {
            let env = setup_fetcher(HttpConfig::default());
            let url = server.url("validated/app.js");

            let (original, disposition) = env.fetch(url.clone(), ResourceKind::Script).await;
            assert_eq!(disposition, FetchDisposition::Load);
            assert!(original.response().unwrap().header_str("x-revalidated").is_none());

            let (revalidated, disposition) = env.fetch(url.clone(), ResourceKind::Script).await;
            assert_eq!(disposition, FetchDisposition::Revalidate);
            assert!(Rc::ptr_eq(&original, &revalidated));
            assert_eq!(server.hits("validated/app.js"), 2);

            let response = original.response().unwrap();
            assert_eq!(response.header_str("x-revalidated"), Some("yes"));
            assert_eq!(response.header_str("content-type"), Some("text/javascript"));
            assert_eq!(original.data().unwrap().to_bytes(), "app.js");

            let stored = env.store.get(&url).unwrap();
            assert!(Rc::ptr_eq(&stored, &original));
        })
        .await;
}

#[tokio::test]
async fn test_no_store_is_loaded_again() {
    let server = OriginServer::new();
    LocalSet::new()
        .run_until(async {
            let env = setup_fetcher(HttpConfig::default());
            let url = server.url("nostore/balance.json");

            let (first, _) = env.fetch(url.clone(), ResourceKind::Raw).await;
            let (second, disposition) = env.fetch(url, ResourceKind::Raw).await;

            assert_eq!(disposition, FetchDisposition::Load);
            assert!(!Rc::ptr_eq(&first, &second));
            assert!(!env.store.contains(&first));
            assert_eq!(server.hits("nostore/balance.json"), 2);
        })
        .await;
}

#[tokio::test]
async fn test_failed_resource_is_loaded_again() {
    let server = OriginServer::new();
    LocalSet::new()
        .run_until(async {
            let env = setup_fetcher(HttpConfig::default());
            let url = server.url("respond_statuscode/500/logo.png");

            let (first, _) = env.fetch(url.clone(), ResourceKind::Image).await;
            assert!(first.error_occurred());
            assert!(!env.store.contains(&first));

            let (_, disposition) = env.fetch(url, ResourceKind::Image).await;
            assert_eq!(disposition, FetchDisposition::Load);
            assert_eq!(server.hits("respond_statuscode/500/logo.png"), 2);
        })
        .await;
}
