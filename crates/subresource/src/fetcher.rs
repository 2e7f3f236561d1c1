//! A minimal orchestrator deciding whether to reuse, revalidate or load a resource.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use url::Url;

use crate::config::DispatchPolicy;
use crate::error::ResourceError;
use crate::loader::{LoadHost, LoadSession, Transport};
use crate::resource::{LoadOptions, Resource, ResourceContext, ResourceKind};
use crate::response::ResourceResponse;
use crate::scheduler::NotificationScheduler;
use crate::store::{MemoryStore, ResourceStore};

/// How a [`Fetcher::request`] was served.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchDisposition {
    /// The stored resource is fresh, or its load is still running.
    Reuse,
    /// A probe asks the origin whether the stored resource is still valid.
    Revalidate,
    /// A new load was started.
    Load,
}

impl FetchDisposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reuse => "reuse",
            Self::Revalidate => "revalidate",
            Self::Load => "load",
        }
    }
}

impl fmt::Display for FetchDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hands out resources from a [`MemoryStore`] and drives their loads.
///
/// The fetcher is the [`LoadHost`] of every session it starts. It keeps sessions and the entries
/// they revalidate alive until the sessions are released.
///
/// A stale entry stays in the store while it is revalidated, requests in the meantime join the
/// probe. A probe answered with a new representation replaces the entry once it finished loading,
/// a probe that fails leaves it in place.
pub struct Fetcher {
    store: Rc<MemoryStore>,
    cx: ResourceContext,
    transport: Rc<dyn Transport>,
    sessions: RefCell<HashMap<u64, Rc<LoadSession>>>,
    revalidating: RefCell<HashMap<u64, Rc<Resource>>>,
    detached: Cell<bool>,
}

impl Fetcher {
    pub fn new(
        store: Rc<MemoryStore>,
        scheduler: Rc<NotificationScheduler>,
        dispatch: DispatchPolicy,
        transport: Rc<dyn Transport>,
    ) -> Rc<Self> {
        let cx = ResourceContext::new(store.clone(), scheduler, dispatch);
        Rc::new(Self {
            store,
            cx,
            transport,
            sessions: RefCell::new(HashMap::new()),
            revalidating: RefCell::new(HashMap::new()),
            detached: Cell::new(false),
        })
    }

    pub fn store(&self) -> &Rc<MemoryStore> {
        &self.store
    }

    pub fn context(&self) -> &ResourceContext {
        &self.cx
    }

    /// The number of sessions that have not been released yet.
    pub fn active_sessions(&self) -> usize {
        self.sessions.borrow().len()
    }

    /// Decides how the stored resource for `url` can be used at `now`.
    fn disposition(
        &self,
        existing: &Resource,
        kind: ResourceKind,
        now: DateTime<Utc>,
    ) -> FetchDisposition {
        if existing.kind() != kind || existing.error_occurred() {
            return FetchDisposition::Load;
        }
        // Join the running load, which includes a running revalidation.
        if existing.is_loading() {
            return FetchDisposition::Reuse;
        }
        if existing.needs_revalidation(now) {
            if existing.can_use_cache_validator() {
                return FetchDisposition::Revalidate;
            }
            return FetchDisposition::Load;
        }
        if !existing.lock() {
            return FetchDisposition::Load;
        }
        FetchDisposition::Reuse
    }

    /// Returns the resource for `url`, reusing, revalidating or loading it.
    pub fn request(
        self: &Rc<Self>,
        url: Url,
        kind: ResourceKind,
        options: LoadOptions,
    ) -> (Rc<Resource>, FetchDisposition) {
        let now = Utc::now();
        // Join a running revalidation instead of starting another one.
        let existing = self
            .store
            .get(&url)
            .map(|existing| existing.proxy_resource().unwrap_or(existing));
        let disposition = match &existing {
            Some(existing) => self.disposition(existing, kind, now),
            None => FetchDisposition::Load,
        };
        tracing::debug!(%url, %kind, %disposition, "requesting resource");

        let resource = match (existing, disposition) {
            (Some(existing), FetchDisposition::Reuse) => return (existing, disposition),
            (Some(existing), FetchDisposition::Revalidate) => {
                let probe = Resource::new(url, kind, self.cx.clone());
                probe.set_resource_to_revalidate(&existing);
                probe
            }
            _ => {
                let resource = Resource::new(url, kind, self.cx.clone());
                self.store.add(&resource);
                resource
            }
        };

        let host: Rc<dyn LoadHost> = self.clone();
        resource.load(host, self.transport.clone(), options);
        (resource, disposition)
    }

    /// Stores `probe` in place of `original` if the origin answered the revalidation with a new
    /// representation. A merged probe keeps no response of its own.
    fn supersede(&self, original: &Rc<Resource>, probe: &Rc<Resource>) {
        let replaced = probe.resource_to_revalidate().is_none()
            && probe
                .response()
                .is_some_and(|response| response.status().is_success())
            && self.store.contains(original)
            && !self.store.contains(probe);
        if replaced {
            tracing::debug!(url = %probe.url(), "revalidation delivered a new representation");
            self.store.replace(original, probe);
        }
    }

    /// Cancels all running loads. Loads requested afterwards fail right away.
    pub fn detach(&self) {
        self.detached.set(true);
        let sessions: Vec<_> = self.sessions.borrow().values().cloned().collect();
        for session in sessions {
            session.cancel(None);
        }
    }
}

impl LoadHost for Fetcher {
    fn has_transport_context(&self) -> bool {
        !self.detached.get()
    }

    fn will_start(
        &self,
        session: &Rc<LoadSession>,
        resource: &Rc<Resource>,
    ) -> Result<(), ResourceError> {
        self.sessions
            .borrow_mut()
            .insert(session.id(), session.clone());
        if let Some(original) = resource.resource_to_revalidate() {
            self.revalidating.borrow_mut().insert(session.id(), original);
        }
        Ok(())
    }

    fn did_receive_response(&self, resource: &Rc<Resource>, response: &ResourceResponse) {
        tracing::trace!(url = %resource.url(), status = %response.status(), "received response");
    }

    fn did_finish_loading(&self, resource: &Rc<Resource>, finish_time: DateTime<Utc>) {
        tracing::debug!(
            url = %resource.url(),
            size = resource.encoded_size(),
            %finish_time,
            "finished loading"
        );

        let original = resource
            .loader()
            .and_then(|session| self.revalidating.borrow().get(&session.id()).cloned());
        if let Some(original) = original {
            self.supersede(&original, resource);
        }
    }

    fn did_fail_loading(&self, resource: &Rc<Resource>, error: &ResourceError) {
        if error.is_cancellation() {
            tracing::debug!(url = %resource.url(), "load cancelled");
        } else {
            tracing::warn!(url = %resource.url(), %error, "failed to load resource");
        }
    }

    fn session_released(&self, session: &LoadSession) {
        let id = session.id();
        let released = self.sessions.borrow_mut().remove(&id);
        let original = self.revalidating.borrow_mut().remove(&id);
        drop((released, original));
    }
}
