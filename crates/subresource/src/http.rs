//! A [`Transport`] performing loads with [`reqwest`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::config::HttpConfig;
use crate::error::ResourceError;
use crate::loader::{LoadSession, Transport};
use crate::response::ResourceResponse;

type TaskMap = Rc<RefCell<HashMap<u64, AbortHandle>>>;
type Job = (Rc<LoadSession>, reqwest::Request);

/// Loads resources over HTTP.
///
/// Every load runs as a local task spawned by the driver returned from [`run`](Self::run), which
/// has to be spawned on the [`LocalSet`](tokio::task::LocalSet) of the event loop. Loads started
/// while no driver is attached fail with [`ResourceError::NoTransportContext`].
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
    tasks: TaskMap,
    jobs: mpsc::UnboundedSender<Job>,
    /// Handed to the driver once it is attached.
    queue: RefCell<Option<mpsc::UnboundedReceiver<Job>>>,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> Result<Self, ResourceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()?;
        let (jobs, queue) = mpsc::unbounded_channel();

        Ok(Self {
            client,
            timeout: config.timeout,
            tasks: Rc::default(),
            jobs,
            queue: RefCell::new(Some(queue)),
        })
    }

    /// The number of loads currently running.
    pub fn running(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Attaches the driver spawning the loads of this transport.
    ///
    /// The driver is attached as soon as this is called, dropping the returned future detaches it
    /// for good. The future never completes.
    pub fn run(self: Rc<Self>) -> impl Future<Output = ()> {
        let queue = self.queue.borrow_mut().take();
        async move {
            let Some(mut queue) = queue else {
                tracing::error!("http transport driver attached twice");
                return;
            };
            while let Some((session, request)) = queue.recv().await {
                // Cancelled before the driver got to it.
                if session.is_terminated() {
                    continue;
                }
                let task = tokio::task::spawn_local(drive(
                    self.client.clone(),
                    request,
                    session.clone(),
                    self.timeout,
                    self.tasks.clone(),
                ));
                self.tasks
                    .borrow_mut()
                    .insert(session.id(), task.abort_handle());
            }
        }
    }
}

impl Transport for HttpTransport {
    fn start(&self, session: &Rc<LoadSession>) -> Result<(), ResourceError> {
        if self.queue.borrow().is_some() {
            tracing::debug!(session = session.id(), "no http transport driver attached");
            return Err(ResourceError::NoTransportContext);
        }

        let request = session.request();
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        let request = builder.build()?;

        self.jobs
            .send((session.clone(), request))
            .map_err(|_| ResourceError::NoTransportContext)
    }

    fn cancel(&self, session: &LoadSession) {
        let task = self.tasks.borrow_mut().remove(&session.id());
        if let Some(task) = task {
            tracing::trace!(session = session.id(), "aborting http task");
            task.abort();
        }
    }
}

async fn drive(
    client: reqwest::Client,
    request: reqwest::Request,
    session: Rc<LoadSession>,
    timeout: Duration,
    tasks: TaskMap,
) {
    let result = stream(&client, request, &session).await;
    tasks.borrow_mut().remove(&session.id());

    if let Err(error) = result {
        let error = if error.is_timeout() {
            ResourceError::Timeout(timeout)
        } else {
            ResourceError::from(error)
        };
        session.did_fail(error);
    }
}

async fn stream(
    client: &reqwest::Client,
    request: reqwest::Request,
    session: &Rc<LoadSession>,
) -> Result<(), reqwest::Error> {
    let mut response = client.execute(request).await?;
    let resource_response = ResourceResponse::new(response.url().clone(), response.status())
        .with_headers(response.headers().clone());
    session.did_receive_response(resource_response);

    while let Some(chunk) = response.chunk().await? {
        if session.is_terminated() {
            return Ok(());
        }
        session.did_receive_data(chunk);
    }

    session.did_finish_loading(Utc::now());
    Ok(())
}
