use std::rc::Rc;

use super::Resource;

/// A consumer interested in the outcome of a [`Resource`] load.
///
/// Each distinct client is notified once when the resource stops loading, however often it is
/// registered, and regardless of whether the load finished successfully or with an error. Inspect
/// [`Resource::status`] to tell the two apart.
///
/// The notification may re-enter the resource: removing this or any other client, cancelling the
/// load, or dropping the last outside reference are all allowed.
pub trait ResourceClient {
    fn notify_finished(&self, resource: &Rc<Resource>);
}

/// Identity comparison for client trait objects, ignoring vtable pointers.
pub(crate) fn same_client(a: &Rc<dyn ResourceClient>, b: &Rc<dyn ResourceClient>) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

/// A counted set of clients. The same client may be registered more than once.
#[derive(Default)]
pub(crate) struct ClientSet {
    entries: Vec<(Rc<dyn ResourceClient>, usize)>,
}

impl ClientSet {
    pub fn add(&mut self, client: Rc<dyn ResourceClient>) {
        self.add_count(client, 1);
    }

    pub fn add_count(&mut self, client: Rc<dyn ResourceClient>, count: usize) {
        if count == 0 {
            return;
        }
        match self.entries.iter_mut().find(|(c, _)| same_client(c, &client)) {
            Some((_, existing)) => *existing += count,
            None => self.entries.push((client, count)),
        }
    }

    /// Removes one registration of `client`.
    pub fn remove(&mut self, client: &Rc<dyn ResourceClient>) -> bool {
        let Some(index) = self.position(client) else {
            return false;
        };
        let count = &mut self.entries[index].1;
        *count -= 1;
        if *count == 0 {
            self.entries.remove(index);
        }
        true
    }

    /// Removes all registrations of `client`, returning how many there were.
    pub fn take_client(&mut self, client: &Rc<dyn ResourceClient>) -> usize {
        match self.position(client) {
            Some(index) => self.entries.remove(index).1,
            None => 0,
        }
    }

    pub fn contains(&self, client: &Rc<dyn ResourceClient>) -> bool {
        self.position(client).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of registrations.
    pub fn len(&self) -> usize {
        self.entries.iter().map(|(_, count)| count).sum()
    }

    /// Each distinct client once.
    pub fn distinct(&self) -> Vec<Rc<dyn ResourceClient>> {
        self.entries.iter().map(|(c, _)| Rc::clone(c)).collect()
    }

    pub fn take(&mut self) -> Vec<(Rc<dyn ResourceClient>, usize)> {
        std::mem::take(&mut self.entries)
    }

    fn position(&self, client: &Rc<dyn ResourceClient>) -> Option<usize> {
        self.entries.iter().position(|(c, _)| same_client(c, client))
    }
}
