//! `RequestService`: the public face of the orchestrator.
//!
//! # Design
//! All mutable orchestration state lives in one `Ledger` behind one
//! `parking_lot::Mutex`: the session pool, the task registry and the
//! pending background completion handlers. Submission takes the lock for
//! session lookup, task creation and registration, then releases it before
//! starting the task, so the first transport event always finds the task
//! registered. Control operations snapshot the matching task handles under
//! the lock and drive them after releasing it.
//!
//! Terminal callbacks never run on the caller's thread; the callback bridge
//! delivers them from tokio's blocking pool.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::bridge::CallbackBridge;
use crate::config::{Configuration, ServiceSettings};
use crate::error::{FailureKind, ServiceError, TransportFailure};
use crate::http::{Payload, Response};
use crate::pool::SessionPool;
use crate::registry::{TaskEntry, TaskRegistry};
use crate::request::{ProgressObserver, Request};
use crate::transport::{EventSink, TaskHandle, TaskId, Transport};

/// Invoked once a background session has delivered all of its events.
pub type BackgroundHandler = Box<dyn FnOnce() + Send + 'static>;

/// Orchestration state shared by the service and the callback bridge.
pub(crate) struct Ledger {
    pub(crate) pool: SessionPool,
    pub(crate) registry: TaskRegistry,
    pub(crate) background_handlers: HashMap<String, BackgroundHandler>,
}

impl Ledger {
    pub(crate) fn new(pool: SessionPool) -> Self {
        Self {
            pool,
            registry: TaskRegistry::new(),
            background_handlers: HashMap::new(),
        }
    }
}

pub struct RequestService {
    ledger: Arc<Mutex<Ledger>>,
    events: EventSink,
    settings: ServiceSettings,
}

impl RequestService {
    /// Build a service with default settings on the current tokio runtime.
    pub fn new(transport: Arc<dyn Transport>) -> Result<Self, ServiceError> {
        let runtime = Handle::try_current().map_err(|_| ServiceError::RuntimeUnavailable)?;
        Ok(Self::with_settings(transport, ServiceSettings::default(), runtime))
    }

    /// Build a service whose callback bridge runs on `runtime`.
    pub fn with_settings(
        transport: Arc<dyn Transport>,
        settings: ServiceSettings,
        runtime: Handle,
    ) -> Self {
        let (events, stream) = EventSink::channel();
        let ledger = Arc::new(Mutex::new(Ledger::new(SessionPool::new(transport))));
        let bridge = CallbackBridge::new(Arc::clone(&ledger), runtime.clone());
        runtime.spawn(bridge.run(stream));
        Self {
            ledger,
            events,
            settings,
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Submit a data request. See `send`.
    pub fn send_data(
        &self,
        request: Request,
        configuration: Option<Configuration>,
        progress: Option<ProgressObserver>,
        completion: impl FnOnce(Result<Response, ServiceError>) + Send + 'static,
    ) -> Result<TaskId, ServiceError> {
        expect_shape(&request, "data")?;
        self.send(request, configuration, progress, completion)
    }

    /// Submit an upload request. See `send`.
    pub fn send_upload(
        &self,
        request: Request,
        configuration: Option<Configuration>,
        progress: Option<ProgressObserver>,
        completion: impl FnOnce(Result<Response, ServiceError>) + Send + 'static,
    ) -> Result<TaskId, ServiceError> {
        expect_shape(&request, "upload")?;
        self.send(request, configuration, progress, completion)
    }

    /// Submit a download request. See `send`.
    pub fn send_download(
        &self,
        request: Request,
        configuration: Option<Configuration>,
        progress: Option<ProgressObserver>,
        completion: impl FnOnce(Result<Response, ServiceError>) + Send + 'static,
    ) -> Result<TaskId, ServiceError> {
        expect_shape(&request, "download")?;
        self.send(request, configuration, progress, completion)
    }

    /// Start one transport task for `request`.
    ///
    /// Without an explicit configuration, data requests use the settings'
    /// data configuration and transfers use the transfer configuration.
    /// An `Err` here means no task was created and no callback will fire.
    /// Once `Ok` is returned, exactly one of the request's success or
    /// failure actions runs, followed by `completion`.
    pub fn send(
        &self,
        request: Request,
        configuration: Option<Configuration>,
        progress: Option<ProgressObserver>,
        completion: impl FnOnce(Result<Response, ServiceError>) + Send + 'static,
    ) -> Result<TaskId, ServiceError> {
        let configuration =
            configuration.unwrap_or_else(|| self.default_configuration(request.payload()));
        let call = request.transport_call();
        let description = format!("{:?}", request);

        let (task, inserted) = {
            let mut ledger = self.ledger.lock();
            let session = ledger.pool.session_for(&configuration, &self.events)?;
            let task = session.create_task(call)?;
            let entry = TaskEntry::new(task.clone(), request)
                .with_listener(progress, Some(Box::new(completion)));
            let inserted = ledger.registry.insert(entry);
            (task, inserted)
        };
        if let Err(err) = inserted {
            warn!("{}, cancelling it", err);
            task.cancel();
            return Err(ServiceError::Transport(TransportFailure::new(
                FailureKind::Protocol,
                err.to_string(),
            )));
        }

        debug!("task {} started for {}", task.id(), description);
        task.resume();
        Ok(task.id())
    }

    fn default_configuration(&self, payload: &Payload) -> Configuration {
        let kind = match payload {
            Payload::Data(_) => self.settings.data_configuration,
            Payload::Upload(_) | Payload::Download(_) => self.settings.transfer_configuration,
        };
        self.settings.resolve(kind)
    }

    fn matching(&self, request: &Request) -> Vec<TaskHandle> {
        self.ledger.lock().registry.tasks_matching(request)
    }

    fn require_suspend_resume(&self, operation: &'static str) -> Result<(), ServiceError> {
        if self.ledger.lock().pool.capabilities().suspend_resume {
            Ok(())
        } else {
            Err(ServiceError::Unsupported(operation))
        }
    }

    /// Suspend every running task equal to `request` and pause its progress
    /// handle. Returns the number of tasks affected.
    pub fn suspend(&self, request: &Request) -> Result<usize, ServiceError> {
        self.require_suspend_resume("suspend")?;
        let tasks = self.matching(request);
        for task in &tasks {
            task.suspend();
        }
        if let Some(progress) = request.progress() {
            progress.pause();
        }
        debug!("suspended {} task(s) for {:?}", tasks.len(), request);
        Ok(tasks.len())
    }

    pub fn resume(&self, request: &Request) -> Result<usize, ServiceError> {
        self.require_suspend_resume("resume")?;
        let tasks = self.matching(request);
        for task in &tasks {
            task.resume();
        }
        if let Some(progress) = request.progress() {
            progress.resume();
        }
        debug!("resumed {} task(s) for {:?}", tasks.len(), request);
        Ok(tasks.len())
    }

    /// Cancel every running task equal to `request`. Each one completes
    /// through its failure path with `ServiceError::Cancelled`. Cancelling
    /// a request with nothing running is a no-op.
    pub fn cancel(&self, request: &Request) -> usize {
        let tasks = self.matching(request);
        for task in &tasks {
            task.cancel();
        }
        if let Some(progress) = request.progress() {
            progress.cancel();
        }
        debug!("cancelled {} task(s) for {:?}", tasks.len(), request);
        tasks.len()
    }

    /// Cancel everything and tear down every session. Later submissions get
    /// fresh sessions. Returns the number of tasks that were running.
    pub fn cancel_all_requests(&self) -> usize {
        let mut ledger = self.ledger.lock();
        let cleared = ledger.registry.clear();
        let sessions = ledger.pool.invalidate_all(false);
        info!(
            "cancelled {} task(s) across {} session(s)",
            cleared.len(),
            sessions
        );
        cleared.len()
    }

    /// Register the handler to run once the background session with
    /// `identifier` has delivered all of its events. Replaces any handler
    /// still pending for the same identifier.
    pub fn set_background_completion_handler(
        &self,
        identifier: impl Into<String>,
        handler: impl FnOnce() + Send + 'static,
    ) {
        let identifier = identifier.into();
        let replaced = self
            .ledger
            .lock()
            .background_handlers
            .insert(identifier.clone(), Box::new(handler));
        if replaced.is_some() {
            debug!("replaced pending completion handler for {}", identifier);
        }
    }

    /// Tasks started and not yet completed.
    pub fn active_tasks(&self) -> usize {
        self.ledger.lock().registry.len()
    }

    /// Tasks swept by `cancel_all_requests` still awaiting their
    /// cancellation completion.
    pub fn cancelling_tasks(&self) -> usize {
        self.ledger.lock().registry.cancelling_len()
    }

    pub fn active_sessions(&self) -> usize {
        self.ledger.lock().pool.len()
    }
}

impl Drop for RequestService {
    fn drop(&mut self) {
        let mut ledger = self.ledger.lock();
        let cleared = ledger.registry.clear();
        let sessions = ledger.pool.invalidate_all(false);
        if !cleared.is_empty() || sessions > 0 {
            info!(
                "service dropped, cancelling {} task(s) across {} session(s)",
                cleared.len(),
                sessions
            );
        }
    }
}

fn expect_shape(request: &Request, expected: &'static str) -> Result<(), ServiceError> {
    let found = request.payload().shape();
    if found == expected {
        Ok(())
    } else {
        Err(ServiceError::PayloadMismatch { expected, found })
    }
}
