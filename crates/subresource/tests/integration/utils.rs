use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use subresource::config::{DispatchPolicy, HttpConfig, StoreConfig};
use subresource::fetcher::{FetchDisposition, Fetcher};
use subresource::http::HttpTransport;
use subresource::resource::{LoadOptions, Resource, ResourceClient, ResourceKind};
use subresource::scheduler::NotificationScheduler;
use subresource::store::MemoryStore;
use tokio::sync::Notify;
use url::Url;

pub use subresource_test as test;

/// A client waking up a task once it is notified.
#[derive(Default)]
pub struct Waiter {
    notified_by: RefCell<Option<Rc<Resource>>>,
    notify: Notify,
}

impl Waiter {
    /// Waits for the notification and returns the resource it came from.
    pub async fn wait(&self) -> Rc<Resource> {
        if let Some(resource) = self.notified_by.borrow().clone() {
            return resource;
        }
        tokio::time::timeout(Duration::from_secs(10), self.notify.notified())
            .await
            .expect("resource never finished");
        self.notified_by.borrow().clone().unwrap()
    }
}

impl ResourceClient for Waiter {
    fn notify_finished(&self, resource: &Rc<Resource>) {
        *self.notified_by.borrow_mut() = Some(resource.clone());
        self.notify.notify_one();
    }
}

pub struct TestFetcher {
    pub fetcher: Rc<Fetcher>,
    pub store: Rc<MemoryStore>,
    pub transport: Rc<HttpTransport>,
}

impl TestFetcher {
    /// Requests `url` and waits until the load is done.
    ///
    /// Returns the resource the client ended up on, which is the revalidated entry after a `304`.
    pub async fn fetch(&self, url: Url, kind: ResourceKind) -> (Rc<Resource>, FetchDisposition) {
        let (resource, disposition) = self.fetcher.request(url, kind, LoadOptions::default());

        let waiter = Rc::new(Waiter::default());
        let client: Rc<dyn ResourceClient> = waiter.clone();
        resource.add_client(client.clone());

        let resource = waiter.wait().await;
        resource.remove_client(&client);
        (resource, disposition)
    }
}

/// Creates a fetcher loading over HTTP and spawns its notification scheduler and transport driver.
///
/// Must be called from within a [`LocalSet`](tokio::task::LocalSet).
pub fn setup_fetcher(config: HttpConfig) -> TestFetcher {
    test::setup();

    let store = Rc::new(MemoryStore::new(StoreConfig::default()));
    let scheduler = Rc::new(NotificationScheduler::new());
    tokio::task::spawn_local(scheduler.clone().run());

    let transport = Rc::new(HttpTransport::new(&config).unwrap());
    tokio::task::spawn_local(transport.clone().run());
    let fetcher = Fetcher::new(
        store.clone(),
        scheduler,
        DispatchPolicy::default(),
        transport.clone(),
    );

    TestFetcher {
        fetcher,
        store,
        transport,
    }
}
