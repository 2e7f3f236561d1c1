//! The cache entry for one fetched resource.
//!
//! A [`Resource`] holds the status, payload and response of one network fetched object, the
//! roster of [`ResourceClient`]s interested in it, and the revalidation link to another entry.
//! It is driven by at most one [`LoadSession`] at a time.
//!
//! Everything in here is single threaded and reentrant: clients, the host and the store may call
//! back into a resource while one of its methods is still on the stack. Methods that issue
//! callbacks therefore take `self: &Rc<Self>`, keep a protector clone alive for their duration and
//! never hold a borrow of the inner state across a callback.

use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::rc::{Rc, Weak};
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use crate::buffer::{PurgeableBuffer, SharedBuffer};
use crate::config::DispatchPolicy;
use crate::error::ResourceError;
use crate::freshness;
use crate::loader::{LoadHost, LoadSession, Transport};
use crate::response::{CredentialsPolicy, ResourceRequest, ResourceResponse};
use crate::scheduler::{NotificationScheduler, PendingClients};
use crate::store::ResourceStore;

mod clients;
mod handle;
mod revalidation;

pub use clients::ResourceClient;
pub use handle::ResourceHandle;
pub use revalidation::should_update_header_after_revalidation;

use clients::ClientSet;
use handle::HandleSlot;

/// Approximate bookkeeping cost of the client roster.
const AVERAGE_CLIENTS_SIZE: usize = 384;

/// What a resource is fetched for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    MainResource,
    Image,
    Font,
    Raw,
    Script,
    StyleSheet,
    LinkPrefetch,
    LinkSubresource,
    Import,
    Media,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MainResource => "main_resource",
            Self::Image => "image",
            Self::Font => "font",
            Self::Raw => "raw",
            Self::Script => "script",
            Self::StyleSheet => "style_sheet",
            Self::LinkPrefetch => "link_prefetch",
            Self::LinkSubresource => "link_subresource",
            Self::Import => "import",
            Self::Media => "media",
        }
    }

    /// Whether an HTTP error status still delivers its body as the payload.
    pub fn tolerates_error_status(self) -> bool {
        matches!(self, Self::MainResource | Self::Raw | Self::Media)
    }

    /// Whether an unfinished load is cancelled as soon as the last client leaves.
    pub fn cancels_load_without_clients(self) -> bool {
        matches!(self, Self::MainResource | Self::Raw)
    }

    /// Whether the payload may be made purgeable once nobody observes the resource.
    pub fn is_safe_to_unlock(self) -> bool {
        !matches!(self, Self::MainResource | Self::Media)
    }

    /// Whether a `multipart/x-mixed-replace` stream is accepted for this kind.
    pub fn supports_multipart(self) -> bool {
        matches!(self, Self::MainResource | Self::Image)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "main_resource" => Self::MainResource,
            "image" => Self::Image,
            "font" => Self::Font,
            "raw" => Self::Raw,
            "script" => Self::Script,
            "style_sheet" => Self::StyleSheet,
            "link_prefetch" => Self::LinkPrefetch,
            "link_subresource" => Self::LinkSubresource,
            "import" => Self::Import,
            "media" => Self::Media,
            _ => return Err(format!("unknown resource kind `{s}`")),
        })
    }
}

/// The load status of a [`Resource`].
///
/// Transitions only go from `Pending` to one of the other states, except that an error may be
/// raised at any time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResourceStatus {
    #[default]
    Pending,
    Cached,
    LoadError,
    DecodeError,
}

impl ResourceStatus {
    pub fn is_error(self) -> bool {
        matches!(self, Self::LoadError | Self::DecodeError)
    }
}

/// Whether received bytes are kept in the resource.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DataBufferingPolicy {
    #[default]
    BufferData,
    /// Only sizes are tracked, the payload is streamed to the host and dropped.
    DoNotBufferData,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub buffering: DataBufferingPolicy,
    pub credentials: CredentialsPolicy,
}

/// The collaborators shared by all resources of one fetch context.
#[derive(Clone)]
pub struct ResourceContext {
    pub store: Rc<dyn ResourceStore>,
    pub scheduler: Rc<NotificationScheduler>,
    pub dispatch: Rc<DispatchPolicy>,
}

impl ResourceContext {
    pub fn new(
        store: Rc<dyn ResourceStore>,
        scheduler: Rc<NotificationScheduler>,
        dispatch: DispatchPolicy,
    ) -> Self {
        Self {
            store,
            scheduler,
            dispatch: Rc::new(dispatch),
        }
    }
}

#[derive(Default)]
struct ResourceInner {
    status: ResourceStatus,
    loading: bool,
    options: LoadOptions,

    data: PurgeableBuffer,
    encoded_size: usize,
    decoded_size: usize,

    response: Option<ResourceResponse>,
    response_timestamp: Option<DateTime<Utc>>,
    load_finish_time: Option<DateTime<Utc>>,
    error: Option<ResourceError>,

    clients: ClientSet,
    clients_awaiting_callback: ClientSet,
    handles: Vec<Weak<HandleSlot>>,

    loader: Option<Rc<LoadSession>>,

    /// Set on a revalidation probe, points to the entry being revalidated.
    resource_to_revalidate: Option<Weak<Resource>>,
    /// Set on the entry being revalidated, points back to the probe.
    proxy_resource: Option<Weak<Resource>>,
    switching_clients: bool,

    deleted: bool,
}

impl ResourceInner {
    fn has_clients(&self) -> bool {
        !self.clients.is_empty() || !self.clients_awaiting_callback.is_empty()
    }

    fn handle_count(&self) -> usize {
        self.handles
            .iter()
            .filter(|slot| slot.strong_count() > 0)
            .count()
    }

    fn size(&self, overhead: usize) -> usize {
        self.encoded_size + self.decoded_size + overhead
    }
}

/// One fetched resource, shared by all of its clients.
pub struct Resource {
    url: Url,
    kind: ResourceKind,
    cx: ResourceContext,
    inner: RefCell<ResourceInner>,
}

impl Resource {
    pub fn new(url: Url, kind: ResourceKind, cx: ResourceContext) -> Rc<Self> {
        let resource = Rc::new(Self {
            url,
            kind,
            cx,
            inner: RefCell::new(ResourceInner::default()),
        });
        resource.cx.store.register_live(&resource);
        resource
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn context(&self) -> &ResourceContext {
        &self.cx
    }

    pub fn status(&self) -> ResourceStatus {
        self.inner.borrow().status
    }

    pub fn is_loading(&self) -> bool {
        self.inner.borrow().loading
    }

    /// Whether no load has been started for this resource yet.
    pub fn still_needs_load(&self) -> bool {
        let inner = self.inner.borrow();
        inner.status == ResourceStatus::Pending && !inner.loading
    }

    pub fn error_occurred(&self) -> bool {
        self.inner.borrow().status.is_error()
    }

    pub fn resource_error(&self) -> Option<ResourceError> {
        self.inner.borrow().error.clone()
    }

    pub fn options(&self) -> LoadOptions {
        self.inner.borrow().options
    }

    pub fn response(&self) -> Option<ResourceResponse> {
        self.inner.borrow().response.clone()
    }

    pub fn response_timestamp(&self) -> Option<DateTime<Utc>> {
        self.inner.borrow().response_timestamp
    }

    pub fn load_finish_time(&self) -> Option<DateTime<Utc>> {
        self.inner.borrow().load_finish_time
    }

    /// A read-only view of the payload.
    ///
    /// The view does not observe later appends. It does not keep the resource from purging its
    /// own copy either, [`lock`](Self::lock) the resource to guarantee the payload stays around.
    pub fn data(&self) -> Option<SharedBuffer> {
        self.inner.borrow().data.get().cloned()
    }

    pub fn encoded_size(&self) -> usize {
        self.inner.borrow().encoded_size
    }

    pub fn decoded_size(&self) -> usize {
        self.inner.borrow().decoded_size
    }

    /// The number of bytes this resource accounts for in the store.
    pub fn size(&self) -> usize {
        self.inner.borrow().size(self.overhead_size())
    }

    fn overhead_size(&self) -> usize {
        mem::size_of::<Self>() + AVERAGE_CLIENTS_SIZE + self.url.as_str().len() * 2
    }

    pub fn has_clients(&self) -> bool {
        self.inner.borrow().has_clients()
    }

    /// Whether `client` is registered, notified or still waiting for its callback.
    pub fn has_client(&self, client: &Rc<dyn ResourceClient>) -> bool {
        let inner = self.inner.borrow();
        inner.clients.contains(client) || inner.clients_awaiting_callback.contains(client)
    }

    pub fn client_count(&self) -> usize {
        let inner = self.inner.borrow();
        inner.clients.len() + inner.clients_awaiting_callback.len()
    }

    pub fn awaiting_callback_count(&self) -> usize {
        self.inner.borrow().clients_awaiting_callback.len()
    }

    pub fn handle_count(&self) -> usize {
        self.inner.borrow().handle_count()
    }

    /// The load session currently bound to this resource.
    pub fn loader(&self) -> Option<Rc<LoadSession>> {
        self.inner.borrow().loader.clone()
    }

    pub fn is_deleted(&self) -> bool {
        self.inner.borrow().deleted
    }

    /// Whether the cached response may be served at `now` without asking the origin.
    pub fn can_use_response(&self, now: DateTime<Utc>) -> bool {
        let inner = self.inner.borrow();
        let received_at = inner.response_timestamp.unwrap_or(now);
        freshness::can_use_response(inner.response.as_ref(), received_at, now)
    }

    /// Whether the response forbids reuse or is expired at `now`.
    pub fn needs_revalidation(&self, now: DateTime<Utc>) -> bool {
        let inner = self.inner.borrow();
        let Some(response) = inner.response.as_ref() else {
            return true;
        };
        let received_at = inner.response_timestamp.unwrap_or(now);
        freshness::must_revalidate_due_to_cache_headers(response)
            || freshness::is_expired(response, received_at, now)
    }

    /// Whether the response can be revalidated with a conditional request.
    pub fn can_use_cache_validator(&self) -> bool {
        self.inner
            .borrow()
            .response
            .as_ref()
            .is_some_and(freshness::can_use_cache_validator)
    }

    /// Starts loading this resource through a new [`LoadSession`].
    ///
    /// If the host has no transport context, the load fails right away: the host is told about the
    /// failure and the resource enters [`ResourceStatus::LoadError`].
    pub fn load(
        self: &Rc<Self>,
        host: Rc<dyn LoadHost>,
        transport: Rc<dyn Transport>,
        options: LoadOptions,
    ) {
        let _protector = Rc::clone(self);
        {
            let mut inner = self.inner.borrow_mut();
            debug_assert!(inner.loader.is_none(), "resource already has a bound load");
            debug_assert_eq!(inner.status, ResourceStatus::Pending);
            if inner.loader.is_some() {
                tracing::warn!(url = %self.url, "ignoring second load of a resource");
                return;
            }
            inner.options = options;
            inner.loading = true;
        }

        if !host.has_transport_context() {
            let error = ResourceError::NoTransportContext;
            tracing::debug!(url = %self.url, "no transport context, failing load");
            host.did_fail_loading(self, &error);
            self.error(error);
            return;
        }

        let mut request = ResourceRequest::new(self.url.clone());
        request.credentials = options.credentials;
        self.add_conditional_headers(&mut request);

        let session = LoadSession::new(request, self, host, transport);
        self.inner.borrow_mut().loader = Some(Rc::clone(&session));
        session.start();
    }

    /// Registers a client.
    ///
    /// A client of a finished resource is notified right away if the resource kind dispatches cache
    /// hits synchronously. Otherwise the notification is deferred to the next pass of the
    /// [`NotificationScheduler`].
    pub fn add_client(self: &Rc<Self>, client: Rc<dyn ResourceClient>) {
        let _protector = Rc::clone(self);
        debug_assert!(!self.is_deleted(), "adding a client to a deleted resource");
        if self.add_client_to_set(Rc::clone(&client)) {
            self.did_add_client(&client);
        }
    }

    /// Puts `client` into the roster. Returns `true` if the caller has to run
    /// [`did_add_client`](Self::did_add_client), `false` if the notification was deferred.
    fn add_client_to_set(self: &Rc<Self>, client: Rc<dyn ResourceClient>) -> bool {
        if !self.has_clients() {
            self.cx.store.mark_live(self);
        }

        let synchronous = self.cx.dispatch.dispatches_synchronously(self.kind);
        let mut inner = self.inner.borrow_mut();
        if !inner.data.lock() {
            tracing::debug!(url = %self.url, "client joined a purged resource");
        }

        // A client never sits in both sets.
        if inner.clients_awaiting_callback.contains(&client) {
            inner.clients_awaiting_callback.add(client);
            return false;
        }

        let defer = inner.response.is_some() && inner.proxy_resource.is_none() && !synchronous;
        if defer {
            let active = inner.clients.take_client(&client);
            inner.clients_awaiting_callback.add_count(client, active + 1);
            drop(inner);
            self.cx.scheduler.schedule(self);
            return false;
        }

        inner.clients.add(client);
        true
    }

    fn did_add_client(self: &Rc<Self>, client: &Rc<dyn ResourceClient>) {
        if !self.is_loading() && !self.still_needs_load() {
            self.notify(client);
        }
    }

    fn notify(self: &Rc<Self>, client: &Rc<dyn ResourceClient>) {
        metric!(counter("resource.notify") += 1, "kind" => self.kind.as_str());
        client.notify_finished(self);
    }

    /// Removes one registration of `client`.
    ///
    /// When the last client leaves, the resource is either deleted or handed back to the store as
    /// a dead entry that may be pruned.
    pub fn remove_client(self: &Rc<Self>, client: &Rc<dyn ResourceClient>) {
        let _protector = Rc::clone(self);

        let cancel_callback = {
            let mut inner = self.inner.borrow_mut();
            if inner.clients_awaiting_callback.remove(client) {
                inner.clients_awaiting_callback.is_empty()
            } else {
                let removed = inner.clients.remove(client);
                debug_assert!(removed, "removing a client that was never added");
                false
            }
        };
        if cancel_callback {
            self.cx.scheduler.cancel(&**self);
        }

        if self.delete_if_possible() || self.has_clients() {
            return;
        }

        self.cx.store.mark_dead(self);
        let switching = self.inner.borrow().switching_clients;
        if !switching {
            self.all_clients_removed();
        }

        // RFC 2616 14.9.2: no-store responses have to leave volatile storage promptly. History
        // may keep insecure content around, secure content is dropped right away.
        if self.has_no_store_response() && self.url.scheme() == "https" {
            self.cx.store.remove(self);
        }
        self.cx.store.prune_if_over_budget();
    }

    fn has_no_store_response(&self) -> bool {
        self.inner
            .borrow()
            .response
            .as_ref()
            .is_some_and(|response| response.cache_control().no_store)
    }

    fn all_clients_removed(self: &Rc<Self>) {
        let loader = self.inner.borrow().loader.clone();
        if let Some(loader) = loader {
            if self.kind.cancels_load_without_clients() {
                tracing::debug!(url = %self.url, "cancelling load without clients");
                loader.cancel(None);
            }
        }
        self.unlock();
    }

    /// Moves every client waiting for its callback into the active set and notifies it.
    ///
    /// Clients removed during this pass are skipped, clients added during this pass wait for the
    /// next one.
    pub fn finish_pending_clients(self: &Rc<Self>) {
        let _protector = Rc::clone(self);

        let pending = self.inner.borrow().clients_awaiting_callback.distinct();
        for client in pending {
            let count = self
                .inner
                .borrow_mut()
                .clients_awaiting_callback
                .take_client(&client);
            if count == 0 {
                continue;
            }
            self.inner
                .borrow_mut()
                .clients
                .add_count(Rc::clone(&client), count);
            self.did_add_client(&client);
        }

        // Notifying may have finished a new client synchronously.
        let scheduled = self.cx.scheduler.is_scheduled(&**self);
        let awaiting = !self.inner.borrow().clients_awaiting_callback.is_empty();
        if scheduled && !awaiting {
            self.cx.scheduler.cancel(&**self);
        }
        debug_assert!(
            !awaiting || self.cx.scheduler.is_scheduled(&**self),
            "clients are waiting without a scheduled callback"
        );
    }

    /// Appends a chunk of the payload.
    pub fn append_data(self: &Rc<Self>, data: Bytes) {
        let encoded_size = {
            let mut inner = self.inner.borrow_mut();
            debug_assert!(
                inner.resource_to_revalidate.is_none(),
                "appending data to a revalidation probe"
            );
            if inner.resource_to_revalidate.is_some() || inner.status.is_error() {
                return;
            }
            match inner.options.buffering {
                DataBufferingPolicy::BufferData => {
                    inner.data.append(data);
                    inner.data.len()
                }
                DataBufferingPolicy::DoNotBufferData => inner.encoded_size + data.len(),
            }
        };
        self.set_encoded_size(encoded_size);
    }

    /// Replaces the whole payload.
    pub fn set_buffer(self: &Rc<Self>, data: SharedBuffer) {
        let encoded_size = {
            let mut inner = self.inner.borrow_mut();
            debug_assert!(
                inner.resource_to_revalidate.is_none(),
                "replacing the payload of a revalidation probe"
            );
            debug_assert_eq!(inner.options.buffering, DataBufferingPolicy::BufferData);
            if inner.resource_to_revalidate.is_some() || inner.status.is_error() {
                return;
            }
            let len = data.len();
            inner.data.set(Some(data));
            len
        };
        self.set_encoded_size(encoded_size);
    }

    pub fn set_encoded_size(&self, encoded_size: usize) {
        let overhead = self.overhead_size();
        let (old_size, new_size) = {
            let mut inner = self.inner.borrow_mut();
            let old_size = inner.size(overhead);
            inner.encoded_size = encoded_size;
            (old_size, inner.size(overhead))
        };
        if old_size != new_size {
            self.cx.store.update_size(self, old_size, new_size);
        }
    }

    /// Records the size of a decoded representation kept by a consumer.
    pub fn set_decoded_size(&self, decoded_size: usize) {
        let overhead = self.overhead_size();
        let (old_size, new_size) = {
            let mut inner = self.inner.borrow_mut();
            let old_size = inner.size(overhead);
            inner.decoded_size = decoded_size;
            (old_size, inner.size(overhead))
        };
        if old_size != new_size {
            self.cx.store.update_size(self, old_size, new_size);
        }
    }

    /// Handles the response headers of the bound load.
    ///
    /// For a revalidation probe, a `304` merges the probe into the revalidated entry and returns
    /// `true`; the probe then keeps no response of its own. Any other status ends the
    /// revalidation and the probe continues as a regular load.
    pub fn response_received(self: &Rc<Self>, response: ResourceResponse) -> bool {
        let _protector = Rc::clone(self);
        self.inner.borrow_mut().response_timestamp = Some(Utc::now());

        let revalidating = self.inner.borrow().resource_to_revalidate.is_some();
        if revalidating {
            if response.status().as_u16() == 304 {
                if self.revalidation_succeeded(&response) {
                    return true;
                }
                // The revalidated entry is gone and a 304 carries nothing to fall back on.
                self.inner.borrow_mut().response = Some(response);
                self.error(ResourceError::HttpStatus(304));
                return false;
            }
            self.revalidation_failed();
        }

        self.inner.borrow_mut().response = Some(response);
        false
    }

    /// Marks the load as successfully finished and notifies all clients.
    ///
    /// Must be called at most once, and never after an error.
    pub fn finish(self: &Rc<Self>, finish_time: DateTime<Utc>) {
        let _protector = Rc::clone(self);
        {
            let mut inner = self.inner.borrow_mut();
            debug_assert!(
                inner.resource_to_revalidate.is_none(),
                "finishing a pending revalidation"
            );
            debug_assert!(!inner.status.is_error(), "finishing a failed resource");
            debug_assert!(inner.load_finish_time.is_none(), "resource finished twice");
            if inner.status != ResourceStatus::Pending {
                tracing::error!(url = %self.url, status = ?inner.status, "ignoring finish");
                return;
            }
            inner.load_finish_time = Some(finish_time);
            inner.status = ResourceStatus::Cached;
            inner.loading = false;
        }
        self.check_notify();
    }

    /// Puts the resource into the error state of `error` and notifies all clients.
    ///
    /// This may be called at any time, including by consumers that fail to decode the payload.
    pub fn error(self: &Rc<Self>, error: ResourceError) {
        let _protector = Rc::clone(self);

        let revalidating = self.inner.borrow().resource_to_revalidate.is_some();
        if revalidating {
            self.revalidation_failed();
        }

        let status = error.status();
        if status == ResourceStatus::LoadError && self.cx.store.contains(self) {
            self.cx.store.remove(self);
        }

        tracing::debug!(url = %self.url, %error, "resource failed");
        {
            let mut inner = self.inner.borrow_mut();
            inner.status = status;
            inner.error = Some(error);
            inner.data.clear();
            inner.loading = false;
        }
        self.set_encoded_size(0);
        self.check_notify();
    }

    fn check_notify(self: &Rc<Self>) {
        if self.is_loading() {
            return;
        }

        let clients = self.inner.borrow().clients.distinct();
        for client in clients {
            // Skip clients that were removed by an earlier notification.
            let registered = self.inner.borrow().clients.contains(&client);
            if registered {
                self.notify(&client);
            }
        }
    }

    /// Pins the payload. Returns `false` if it was purged and needs to be loaded again.
    ///
    /// Clients that joined a purged resource do not change that, the resource has to be loaded
    /// again before its payload can be pinned.
    pub fn lock(&self) -> bool {
        self.inner.borrow_mut().data.lock()
    }

    /// Allows the store to purge the payload.
    ///
    /// Refused while anybody could still observe the payload.
    pub fn unlock(&self) -> bool {
        let in_store = self.cx.store.contains(self);
        let mut inner = self.inner.borrow_mut();
        if !inner.data.has_data() {
            return false;
        }
        if !inner.data.is_locked() {
            return true;
        }

        let observed = inner.has_clients()
            || inner.loader.is_some()
            || inner.handle_count() > 1
            || inner.proxy_resource.is_some()
            || inner.resource_to_revalidate.is_some()
            || inner.switching_clients;
        if !in_store || observed || inner.load_finish_time.is_none() || !self.kind.is_safe_to_unlock()
        {
            return false;
        }

        inner.data.unlock();
        true
    }

    /// Drops an unlocked payload. Returns the number of bytes released.
    pub fn purge(&self) -> usize {
        let released = self.inner.borrow_mut().data.purge();
        if released > 0 {
            tracing::trace!(url = %self.url, released, "purged payload");
            self.set_encoded_size(0);
        }
        released
    }

    pub fn was_purged(&self) -> bool {
        self.inner.borrow().data.was_purged()
    }

    /// Whether nothing references this resource beyond the store.
    pub fn can_delete(&self) -> bool {
        let baseline = usize::from(self.cx.store.contains(self));
        let inner = self.inner.borrow();
        !inner.has_clients()
            && inner.loader.is_none()
            && inner.handle_count() == baseline
            && inner.resource_to_revalidate.is_none()
            && inner.proxy_resource.is_none()
            && !inner.switching_clients
    }

    /// Tears the resource down if it can be deleted and the store does not hold it.
    ///
    /// Returns `true` if the resource is deleted, also when it was deleted before.
    pub fn delete_if_possible(self: &Rc<Self>) -> bool {
        if self.is_deleted() {
            return true;
        }
        if !self.can_delete() || self.cx.store.contains(self) {
            return false;
        }

        self.inner.borrow_mut().deleted = true;
        self.cx.scheduler.cancel(&**self);
        self.cx.store.unregister_live(self);
        metric!(counter("resource.deleted") += 1, "kind" => self.kind.as_str());
        tracing::trace!(url = %self.url, "resource deleted");
        true
    }

    /// Called by the bound session once it released its resources.
    pub(crate) fn loader_detached(self: &Rc<Self>, session: &LoadSession) {
        {
            let mut inner = self.inner.borrow_mut();
            let is_bound = inner
                .loader
                .as_ref()
                .is_some_and(|loader| std::ptr::eq(Rc::as_ptr(loader), session));
            if !is_bound {
                return;
            }
            inner.loader = None;
        }
        self.delete_if_possible();
    }

    fn register_handle(&self, slot: &Rc<HandleSlot>) {
        let mut inner = self.inner.borrow_mut();
        inner.handles.retain(|handle| handle.strong_count() > 0);
        inner.handles.push(Rc::downgrade(slot));
    }

    fn unregister_handle(self: &Rc<Self>, slot: &Rc<HandleSlot>) {
        self.inner.borrow_mut().handles.retain(|handle| {
            handle.strong_count() > 0 && !std::ptr::eq(handle.as_ptr(), Rc::as_ptr(slot))
        });
        self.delete_if_possible();
    }
}

impl PendingClients for Resource {
    fn flush_pending_clients(self: Rc<Self>) {
        self.finish_pending_clients();
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Resource")
            .field("url", &self.url.as_str())
            .field("kind", &self.kind)
            .field("status", &inner.status)
            .field("loading", &inner.loading)
            .field("encoded_size", &inner.encoded_size)
            .finish_non_exhaustive()
    }
}
