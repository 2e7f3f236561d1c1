use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::Resource;

/// Where a [`ResourceHandle`] points. Revalidation retargets slots from the probe to the
/// revalidated entry.
pub(crate) struct HandleSlot {
    resource: RefCell<Rc<Resource>>,
}

impl HandleSlot {
    pub(super) fn retarget(&self, resource: Rc<Resource>) -> Rc<Resource> {
        self.resource.replace(resource)
    }
}

/// A long lived owning reference to a [`Resource`], counted separately from its clients.
///
/// Every handle keeps the resource from being deleted. When a revalidation succeeds, all
/// handles of the probe move to the revalidated entry.
pub struct ResourceHandle {
    slot: Rc<HandleSlot>,
}

impl ResourceHandle {
    pub fn new(resource: &Rc<Resource>) -> Self {
        let slot = Rc::new(HandleSlot {
            resource: RefCell::new(Rc::clone(resource)),
        });
        resource.register_handle(&slot);
        Self { slot }
    }

    pub fn get(&self) -> Rc<Resource> {
        Rc::clone(&self.slot.resource.borrow())
    }

    /// Whether this handle points to `resource`.
    pub fn is(&self, resource: &Resource) -> bool {
        std::ptr::eq(Rc::as_ptr(&self.slot.resource.borrow()), resource)
    }
}

impl Clone for ResourceHandle {
    fn clone(&self) -> Self {
        Self::new(&self.get())
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        let resource = self.get();
        resource.unregister_handle(&self.slot);
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResourceHandle").field(&self.get()).finish()
    }
}
