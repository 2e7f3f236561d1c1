use std::cell::RefCell;
use std::rc::Rc;

use subresource::resource::{Resource, ResourceClient};
use tokio::sync::Notify;

/// A client that lets a task wait for the outcome of a load.
#[derive(Default)]
pub struct CompletionClient {
    finished: RefCell<Option<Rc<Resource>>>,
    notify: Notify,
}

impl CompletionClient {
    /// Observes `resource` until it stops loading.
    ///
    /// Returns the resource that delivered the notification. After a successful revalidation this
    /// is the revalidated entry, not the probe that was requested.
    pub async fn observe(self: Rc<Self>, resource: &Rc<Resource>) -> Rc<Resource> {
        let client: Rc<dyn ResourceClient> = self.clone();
        resource.add_client(client.clone());

        let finished = loop {
            let finished = self.finished.borrow().clone();
            match finished {
                Some(finished) => break finished,
                None => self.notify.notified().await,
            }
        };
        finished.remove_client(&client);
        finished
    }
}

impl ResourceClient for CompletionClient {
    fn notify_finished(&self, resource: &Rc<Resource>) {
        *self.finished.borrow_mut() = Some(Rc::clone(resource));
        self.notify.notify_one();
    }
}
