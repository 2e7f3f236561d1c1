//! Revalidation of a cached resource through a transient probe.
//!
//! The probe is a fresh [`Resource`] loaded with a conditional request. Both sides know each
//! other through weak links only, and the store keeps holding the original while the probe is in
//! flight. On a `304` the probe merges into the original: refreshable headers are copied over, the
//! store holds the original and every client and handle of the probe moves to it. Any other
//! outcome ends the revalidation and leaves the original alone.

use std::rc::{Rc, Weak};

use reqwest::header::{self, HeaderValue};

use super::Resource;
use crate::response::{ResourceRequest, ResourceResponse};

/// Headers a `304` must not overwrite, RFC 2616 section 7.1 plus a few extension headers.
const HEADERS_TO_IGNORE_AFTER_REVALIDATION: &[&str] = &[
    "allow",
    "connection",
    "etag",
    "keep-alive",
    "last-modified",
    "proxy-authenticate",
    "proxy-connection",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "www-authenticate",
    "x-frame-options",
    "x-xss-protection",
];

/// Prefixes of representation headers a `304` must not overwrite.
const HEADER_PREFIXES_TO_IGNORE_AFTER_REVALIDATION: &[&str] =
    &["content-", "x-content-", "x-webkit-"];

/// Whether a header of a `304` response refreshes the cached response.
pub fn should_update_header_after_revalidation(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    !HEADERS_TO_IGNORE_AFTER_REVALIDATION.contains(&name.as_str())
        && !HEADER_PREFIXES_TO_IGNORE_AFTER_REVALIDATION
            .iter()
            .any(|prefix| name.starts_with(prefix))
}

fn is_link_to(link: Option<&Weak<Resource>>, resource: &Resource) -> bool {
    link.is_some_and(|link| std::ptr::eq(link.as_ptr(), resource))
}

impl Resource {
    /// Turns this resource into a revalidation probe for `original`.
    pub fn set_resource_to_revalidate(self: &Rc<Self>, original: &Rc<Resource>) {
        debug_assert!(!Rc::ptr_eq(self, original), "revalidating a resource with itself");
        debug_assert_eq!(self.kind, original.kind);
        debug_assert!(self.inner.borrow().resource_to_revalidate.is_none());
        debug_assert!(self.inner.borrow().handles.is_empty());
        debug_assert!(
            original.inner.borrow().proxy_resource.is_none(),
            "resource is already being revalidated"
        );
        tracing::debug!(url = %self.url, "revalidating resource");

        original.inner.borrow_mut().proxy_resource = Some(Rc::downgrade(self));
        self.inner.borrow_mut().resource_to_revalidate = Some(Rc::downgrade(original));
    }

    /// The resource this probe revalidates.
    pub fn resource_to_revalidate(&self) -> Option<Rc<Resource>> {
        self.inner
            .borrow()
            .resource_to_revalidate
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// The probe currently revalidating this resource.
    pub fn proxy_resource(&self) -> Option<Rc<Resource>> {
        self.inner
            .borrow()
            .proxy_resource
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub fn is_switching_clients(&self) -> bool {
        self.inner.borrow().switching_clients
    }

    /// Adds the validators of the revalidated response to a probe's request.
    pub(super) fn add_conditional_headers(&self, request: &mut ResourceRequest) {
        let Some(original) = self.resource_to_revalidate() else {
            return;
        };
        let Some(response) = original.response() else {
            return;
        };

        if let Some(etag) = response.headers().get(header::ETAG) {
            request.headers.insert(header::IF_NONE_MATCH, etag.clone());
        }
        if let Some(last_modified) = response.headers().get(header::LAST_MODIFIED) {
            request
                .headers
                .insert(header::IF_MODIFIED_SINCE, last_modified.clone());
        }
    }

    /// Ends the revalidation link from both sides.
    ///
    /// Suppressed while clients are being switched over, so a client callback cannot tear down the
    /// link in the middle of the migration.
    pub fn clear_resource_to_revalidate(self: &Rc<Self>) {
        let _protector = Rc::clone(self);
        let original = {
            let mut inner = self.inner.borrow_mut();
            if inner.switching_clients {
                return;
            }
            inner.resource_to_revalidate.take()
        };

        // The original may already be revalidated by another probe.
        if let Some(original) = original.as_ref().and_then(Weak::upgrade) {
            let is_proxy = is_link_to(original.inner.borrow().proxy_resource.as_ref(), self);
            if is_proxy {
                original.inner.borrow_mut().proxy_resource = None;
                original.delete_if_possible();
            }
        }

        self.delete_if_possible();
    }

    /// Merges this probe into the revalidated resource after a `304`.
    ///
    /// Returns `false` if the revalidated resource no longer exists. The link is torn down either
    /// way.
    pub fn revalidation_succeeded(self: &Rc<Self>, response: &ResourceResponse) -> bool {
        let _protector = Rc::clone(self);
        let Some(original) = self.resource_to_revalidate() else {
            tracing::debug!(url = %self.url, "revalidated resource is gone");
            self.revalidation_failed();
            return false;
        };

        original.update_response_after_revalidation(response);
        // The store may have evicted the original while the probe was in flight.
        if !self.cx.store.contains(&original) {
            self.cx.store.replace(self, &original);
        }
        self.switch_clients_to_revalidated_resource(&original);

        metric!(counter("resource.revalidation") += 1, "result" => "succeeded");
        tracing::debug!(url = %self.url, "revalidation succeeded");
        self.clear_resource_to_revalidate();
        true
    }

    /// Ends the revalidation without touching the revalidated resource.
    pub fn revalidation_failed(self: &Rc<Self>) {
        debug_assert!(self.inner.borrow().resource_to_revalidate.is_some());
        metric!(counter("resource.revalidation") += 1, "result" => "failed");
        tracing::debug!(url = %self.url, "revalidation failed");
        self.clear_resource_to_revalidate();
    }

    /// Refreshes the cached response from the headers of a `304`.
    fn update_response_after_revalidation(&self, validating: &ResourceResponse) {
        let mut inner = self.inner.borrow_mut();
        inner.response_timestamp = Some(chrono::Utc::now());
        let Some(response) = inner.response.as_mut() else {
            return;
        };

        // Servers should not send entity headers with a 304, but misconfigured ones do.
        for name in validating.headers().keys() {
            if !should_update_header_after_revalidation(name.as_str()) {
                continue;
            }
            let values: Vec<HeaderValue> =
                validating.headers().get_all(name).iter().cloned().collect();
            let headers = response.headers_mut();
            headers.remove(name);
            for value in values {
                headers.append(name.clone(), value);
            }
        }
    }

    /// Moves every client and handle of this probe to `original`.
    fn switch_clients_to_revalidated_resource(self: &Rc<Self>, original: &Rc<Resource>) {
        debug_assert!(self.cx.store.contains(original));
        debug_assert!(!self.cx.store.contains(self));

        let (slots, clients, awaiting) = {
            let mut inner = self.inner.borrow_mut();
            inner.switching_clients = true;
            (
                std::mem::take(&mut inner.handles),
                inner.clients.take(),
                inner.clients_awaiting_callback.take(),
            )
        };

        for slot in slots.iter().filter_map(Weak::upgrade) {
            let _previous = slot.retarget(Rc::clone(original));
            original.register_handle(&slot);
        }

        if !awaiting.is_empty() {
            self.cx.scheduler.cancel(&**self);
        }

        let moved: Vec<_> = clients.into_iter().chain(awaiting).collect();
        for (client, count) in &moved {
            for _ in 0..*count {
                original.add_client_to_set(Rc::clone(client));
            }
        }

        for (client, _) in &moved {
            // A client callback may have removed other clients in the meantime.
            let registered = original.inner.borrow().clients.contains(client);
            if registered {
                original.did_add_client(client);
            }
        }

        self.inner.borrow_mut().switching_clients = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_to_update() {
        assert!(should_update_header_after_revalidation("Expires"));
        assert!(should_update_header_after_revalidation("cache-control"));
        assert!(should_update_header_after_revalidation("date"));

        assert!(!should_update_header_after_revalidation("ETag"));
        assert!(!should_update_header_after_revalidation("Last-Modified"));
        assert!(!should_update_header_after_revalidation("transfer-encoding"));
        assert!(!should_update_header_after_revalidation("Content-Type"));
        assert!(!should_update_header_after_revalidation("content-length"));
        assert!(!should_update_header_after_revalidation("X-Content-Type-Options"));
        assert!(!should_update_header_after_revalidation("x-webkit-csp"));
    }
}
