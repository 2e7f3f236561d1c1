//! Deferred "finished" notifications for clients joining a resource that already has a response.
//!
//! Instead of calling back into the caller of [`Resource::add_client`](crate::resource::Resource::add_client)
//! synchronously, the resource parks the client and schedules itself here. All resources
//! scheduled within one task are flushed together on the next pass.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tokio::sync::Notify;

/// Something with clients waiting for their deferred notification.
pub trait PendingClients {
    fn flush_pending_clients(self: Rc<Self>);
}

fn is_entry(scheduled: &Weak<dyn PendingClients>, entry: &dyn PendingClients) -> bool {
    std::ptr::addr_eq(scheduled.as_ptr(), entry)
}

/// Batches deferred client notifications until the next scheduling point.
///
/// A scheduler is owned by whatever drives the single threaded event loop and shared by all
/// resources of that loop. Spawn [`run`](Self::run) on the loop, or call [`fire`](Self::fire)
/// directly to drive it by hand.
#[derive(Default)]
pub struct NotificationScheduler {
    pending: RefCell<Vec<Weak<dyn PendingClients>>>,
    armed: Cell<bool>,
    wakeup: Notify,
}

impl NotificationScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flushes `entry` on the next pass. Scheduling an entry twice has no effect.
    pub fn schedule<T: PendingClients + 'static>(&self, entry: &Rc<T>) {
        if !self.is_scheduled(&**entry) {
            let entry: Weak<T> = Rc::downgrade(entry);
            self.pending.borrow_mut().push(entry);
        }
        if !self.armed.replace(true) {
            tracing::trace!("arming notification pass");
            self.wakeup.notify_one();
        }
    }

    /// Removes `entry` from the next pass, disarming it if nothing else is pending.
    pub fn cancel(&self, entry: &dyn PendingClients) {
        let now_empty = {
            let mut pending = self.pending.borrow_mut();
            pending.retain(|scheduled| !is_entry(scheduled, entry));
            pending.is_empty()
        };
        if now_empty {
            self.armed.set(false);
        }
    }

    pub fn is_scheduled(&self, entry: &dyn PendingClients) -> bool {
        self.pending
            .borrow()
            .iter()
            .any(|scheduled| is_entry(scheduled, entry))
    }

    /// Whether a pass is due.
    pub fn is_armed(&self) -> bool {
        self.armed.get()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Runs one pass over everything scheduled so far.
    ///
    /// Entries scheduled while the pass runs are left for the next one.
    pub fn fire(&self) {
        self.armed.set(false);
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        tracing::trace!(entries = pending.len(), "running notification pass");

        for entry in pending {
            if let Some(entry) = entry.upgrade() {
                entry.flush_pending_clients();
            }
        }
    }

    /// Fires a pass whenever one is armed. Never returns.
    pub async fn run(self: Rc<Self>) {
        loop {
            self.wakeup.notified().await;
            if self.armed.get() {
                self.fire();
            }
        }
    }
}
