//! The load session driving one network fetch for one [`Resource`].
//!
//! A [`LoadSession`] translates the events of a [`Transport`] into mutations of its resource and
//! notifications of its [`LoadHost`]. It validates the order of the transport events, reports the
//! outcome of the load to the host exactly once, and detaches itself from everything in
//! [`release_resources`](LoadSession::release_resources).

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::ResourceError;
use crate::resource::{Resource, ResourceKind};
use crate::response::{ResourceRequest, ResourceResponse};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Performs the actual I/O of a load.
///
/// After a successful [`start`](Self::start) the transport delivers the response, any number of
/// data chunks, and exactly one of [`did_finish_loading`](LoadSession::did_finish_loading) or
/// [`did_fail`](LoadSession::did_fail). Only `multipart/x-mixed-replace` payloads may deliver
/// further responses after data.
pub trait Transport {
    fn start(&self, session: &Rc<LoadSession>) -> Result<(), ResourceError>;

    /// Stops delivering events for `session`.
    fn cancel(&self, session: &LoadSession);
}

/// The orchestrator a session reports to.
///
/// All methods have no-op defaults. Cross-cutting concerns like telemetry hook in here.
pub trait LoadHost {
    /// Whether loads can be started at all.
    fn has_transport_context(&self) -> bool {
        true
    }

    /// Asks for permission to start `session`. An error cancels the load.
    fn will_start(
        &self,
        _session: &Rc<LoadSession>,
        _resource: &Rc<Resource>,
    ) -> Result<(), ResourceError> {
        Ok(())
    }

    fn did_receive_response(&self, _resource: &Rc<Resource>, _response: &ResourceResponse) {}

    fn did_receive_data(&self, _resource: &Rc<Resource>, _len: usize) {}

    /// Called at most once per session, mutually exclusive with `did_fail_loading`.
    fn did_finish_loading(&self, _resource: &Rc<Resource>, _finish_time: DateTime<Utc>) {}

    /// Called at most once per session, mutually exclusive with `did_finish_loading`.
    fn did_fail_loading(&self, _resource: &Rc<Resource>, _error: &ResourceError) {}

    /// The session detached from its resource and will not call back anymore.
    fn session_released(&self, _session: &LoadSession) {}
}

/// Lifecycle of a [`LoadSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Active,
    /// The outcome is decided, the session is about to release its resources.
    Finishing,
    Terminated,
}

/// Progress of the transport connection. Only ever moves forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    New,
    Started,
    ReceivedResponse,
    ReceivingData,
    FinishedLoading,
    Canceled,
    Failed,
}

impl ConnectionState {
    fn is_in_flight(self) -> bool {
        matches!(
            self,
            Self::Started | Self::ReceivedResponse | Self::ReceivingData
        )
    }
}

/// One network fetch on behalf of one [`Resource`].
pub struct LoadSession {
    id: u64,
    request: ResourceRequest,
    kind: ResourceKind,
    resource: RefCell<Weak<Resource>>,
    host: RefCell<Option<Rc<dyn LoadHost>>>,
    transport: Rc<dyn Transport>,
    state: Cell<SessionState>,
    connection: Cell<ConnectionState>,
    /// Latched once the host heard about the outcome.
    load_completed: Cell<bool>,
    multipart: Cell<bool>,
    ignore_data: Cell<bool>,
}

impl LoadSession {
    pub(crate) fn new(
        request: ResourceRequest,
        resource: &Rc<Resource>,
        host: Rc<dyn LoadHost>,
        transport: Rc<dyn Transport>,
    ) -> Rc<Self> {
        Rc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            request,
            kind: resource.kind(),
            resource: RefCell::new(Rc::downgrade(resource)),
            host: RefCell::new(Some(host)),
            transport,
            state: Cell::new(SessionState::Active),
            connection: Cell::new(ConnectionState::New),
            load_completed: Cell::new(false),
            multipart: Cell::new(false),
            ignore_data: Cell::new(false),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn request(&self) -> &ResourceRequest {
        &self.request
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.get()
    }

    pub fn is_terminated(&self) -> bool {
        self.state.get() == SessionState::Terminated
    }

    /// The resource this session loads, until the session is released.
    pub fn resource(&self) -> Option<Rc<Resource>> {
        self.resource.borrow().upgrade()
    }

    fn host(&self) -> Option<Rc<dyn LoadHost>> {
        self.host.borrow().clone()
    }

    /// Asks the host for permission and hands the request to the transport.
    pub fn start(self: &Rc<Self>) {
        let _protector = Rc::clone(self);
        if self.is_terminated() {
            return;
        }
        debug_assert_eq!(self.connection.get(), ConnectionState::New);
        let (Some(resource), Some(host)) = (self.resource(), self.host()) else {
            self.release_resources();
            return;
        };

        if let Err(error) = host.will_start(self, &resource) {
            tracing::debug!(session = self.id, %error, "host refused to start load");
            self.cancel(Some(error));
            return;
        }
        if self.state.get() != SessionState::Active {
            return;
        }

        tracing::debug!(session = self.id, url = %self.request.url, "starting load");
        metric!(counter("loader.started") += 1, "kind" => self.kind.as_str());
        self.connection.set(ConnectionState::Started);
        if let Err(error) = self.transport.start(self) {
            self.did_fail(error);
        }
    }

    /// Rejects a transport event arriving in the wrong connection state.
    fn check_transition(&self, event: &str, valid: bool) -> bool {
        if !valid {
            tracing::error!(
                session = self.id,
                connection = ?self.connection.get(),
                event,
                "dropping out of order transport event"
            );
        }
        valid
    }

    pub fn did_receive_response(self: &Rc<Self>, response: ResourceResponse) {
        if self.is_terminated() {
            return;
        }
        let connection = self.connection.get();
        // Multipart payloads interleave responses and data.
        let multipart = self.multipart.get() || response.is_multipart();
        let valid = matches!(
            connection,
            ConnectionState::Started | ConnectionState::ReceivedResponse
        ) || (multipart && connection == ConnectionState::ReceivingData);
        if !self.check_transition("response", valid) {
            return;
        }
        self.connection.set(ConnectionState::ReceivedResponse);

        let _protector = Rc::clone(self);
        let Some(resource) = self.resource() else {
            self.cancel(None);
            return;
        };

        let revalidated = resource.response_received(response.clone());
        if self.is_terminated() {
            return;
        }
        if let Some(host) = self.host() {
            host.did_receive_response(&resource, &response);
        }
        if self.is_terminated() {
            return;
        }

        if response.is_multipart() {
            if !self.kind.supports_multipart() {
                let error = ResourceError::Decode(format!(
                    "multipart responses are not supported for {} resources",
                    self.kind
                ));
                self.cancel(Some(error));
                return;
            }
            self.multipart.set(true);
        }

        // The body of a 304 belongs to nobody.
        if revalidated {
            self.ignore_data.set(true);
            return;
        }

        let status = response.status().as_u16();
        if status < 400 || self.kind.tolerates_error_status() {
            return;
        }

        self.ignore_data.set(true);
        self.state.set(SessionState::Finishing);
        let error = ResourceError::HttpStatus(status);
        self.report_failure(&resource, &error);
        resource.error(error);
        self.cancel(None);
    }

    pub fn did_receive_data(self: &Rc<Self>, data: Bytes) {
        if self.is_terminated() {
            return;
        }
        let valid = matches!(
            self.connection.get(),
            ConnectionState::ReceivedResponse | ConnectionState::ReceivingData
        );
        if !self.check_transition("data", valid) {
            return;
        }
        self.connection.set(ConnectionState::ReceivingData);
        if self.ignore_data.get() {
            return;
        }

        let _protector = Rc::clone(self);
        let Some(resource) = self.resource() else {
            self.cancel(None);
            return;
        };
        if let Some(host) = self.host() {
            host.did_receive_data(&resource, data.len());
        }
        if self.is_terminated() {
            return;
        }
        resource.append_data(data);
    }

    pub fn did_finish_loading(self: &Rc<Self>, finish_time: DateTime<Utc>) {
        if self.is_terminated() {
            return;
        }
        let valid = matches!(
            self.connection.get(),
            ConnectionState::ReceivedResponse | ConnectionState::ReceivingData
        );
        if !self.check_transition("finish", valid) {
            return;
        }
        self.connection.set(ConnectionState::FinishedLoading);
        // Cancelled after the transport finished.
        if self.state.get() != SessionState::Active {
            return;
        }

        let _protector = Rc::clone(self);
        let Some(resource) = self.resource() else {
            self.release_resources();
            return;
        };
        self.state.set(SessionState::Finishing);

        // A consumer may have failed the resource while the load was still running.
        if let Some(error) = resource.resource_error() {
            self.report_failure(&resource, &error);
        } else {
            if !self.load_completed.replace(true) {
                metric!(counter("loader.finished") += 1, "kind" => self.kind.as_str());
                metric!(
                    histogram("loader.size") = resource.encoded_size() as u64,
                    "kind" => self.kind.as_str()
                );
                if let Some(host) = self.host() {
                    host.did_finish_loading(&resource, finish_time);
                }
            }
            if self.is_terminated() {
                return;
            }
            resource.finish(finish_time);
        }

        // A client may have cancelled the load in response to the notification.
        if self.is_terminated() {
            return;
        }
        self.release_resources();
    }

    pub fn did_fail(self: &Rc<Self>, error: ResourceError) {
        if self.is_terminated() {
            return;
        }
        self.connection.set(ConnectionState::Failed);
        tracing::debug!(session = self.id, url = %self.request.url, %error, "load failed");

        let _protector = Rc::clone(self);
        self.state.set(SessionState::Finishing);
        let Some(resource) = self.resource() else {
            self.release_resources();
            return;
        };

        self.report_failure(&resource, &error);
        if self.is_terminated() {
            return;
        }
        resource.error(error);
        if self.is_terminated() {
            return;
        }
        self.release_resources();
    }

    /// Cancels the load, failing the resource with `error` or [`ResourceError::Cancelled`].
    ///
    /// Cancelling a terminated session does nothing. A session that already decided its outcome
    /// only releases its resources.
    pub fn cancel(self: &Rc<Self>, error: Option<ResourceError>) {
        match self.state.get() {
            SessionState::Terminated => return,
            SessionState::Finishing => {
                self.release_resources();
                return;
            }
            SessionState::Active => {}
        }

        let _protector = Rc::clone(self);
        let error = error.unwrap_or(ResourceError::Cancelled);
        tracing::debug!(session = self.id, url = %self.request.url, %error, "cancelling load");
        self.state.set(SessionState::Finishing);

        if self.connection.get().is_in_flight() {
            self.connection.set(ConnectionState::Canceled);
            self.transport.cancel(self);
        }

        if let Some(resource) = self.resource() {
            self.report_failure(&resource, &error);
            resource.error(error);
        }
        if !self.is_terminated() {
            self.release_resources();
        }
    }

    /// Tells the host about a failure, unless it already heard about the outcome.
    fn report_failure(&self, resource: &Rc<Resource>, error: &ResourceError) {
        if self.load_completed.replace(true) {
            return;
        }
        metric!(
            counter("loader.failed") += 1,
            "kind" => self.kind.as_str(),
            "cancelled" => if error.is_cancellation() { "true" } else { "false" }
        );
        if let Some(host) = self.host() {
            host.did_fail_loading(resource, error);
        }
    }

    /// Detaches the session from its resource, its transport and its host.
    ///
    /// Runs at most once, later calls do nothing.
    pub fn release_resources(self: &Rc<Self>) {
        if self.is_terminated() {
            return;
        }
        let _protector = Rc::clone(self);
        self.state.set(SessionState::Terminated);

        if self.connection.get().is_in_flight() {
            self.connection.set(ConnectionState::Canceled);
            self.transport.cancel(self);
        }

        let resource = self.resource.replace(Weak::new()).upgrade();
        if let Some(resource) = resource {
            resource.loader_detached(self);
        }

        let host = self.host.borrow_mut().take();
        if let Some(host) = host {
            host.session_released(self);
        }
        tracing::trace!(session = self.id, "session released");
    }
}

impl fmt::Debug for LoadSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadSession")
            .field("id", &self.id)
            .field("url", &self.request.url.as_str())
            .field("state", &self.state.get())
            .field("connection", &self.connection.get())
            .finish()
    }
}
