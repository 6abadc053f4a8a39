//! Callback bridge: turns transport events into registry updates and
//! terminal callbacks.
//!
//! # Design
//! Transports push `TransportEvent`s into an unbounded channel from any
//! thread. The bridge is the channel's only consumer and runs as a single
//! tokio task, so events are handled one at a time and in the order each
//! transport sent them. Registry access goes through the shared `Ledger`
//! lock, which is never held while application code runs: success,
//! failure and completion callbacks are moved to the blocking pool so a
//! slow callback cannot stall event delivery for other tasks.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::error::{RegistryError, ServiceError, TransportFailure};
use crate::http::{HttpResponse, Response, ResponseMetadata};
use crate::registry::{Removal, TaskEntry};
use crate::request::{CompletionHandler, Request};
use crate::service::Ledger;
use crate::transport::{EventStream, SessionId, TaskHandle, TaskId, TransportEvent};

pub(crate) struct CallbackBridge {
    ledger: Arc<Mutex<Ledger>>,
    runtime: Handle,
}

impl CallbackBridge {
    pub(crate) fn new(ledger: Arc<Mutex<Ledger>>, runtime: Handle) -> Self {
        Self { ledger, runtime }
    }

    /// Consume events until every sender is gone.
    pub(crate) async fn run(self, mut events: EventStream) {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        debug!("event stream closed, callback bridge exiting");
    }

    pub(crate) fn handle(&self, event: TransportEvent) {
        match event {
            TransportEvent::HeadersReceived { task, metadata } => self.on_headers(task, metadata),
            TransportEvent::BodyChunk { task, bytes } => self.on_body(task, bytes),
            TransportEvent::BytesTransferred {
                task,
                completed,
                total,
            } => self.on_bytes_transferred(task, completed, total),
            TransportEvent::DownloadFinished { task, location } => {
                self.on_download_finished(task, location)
            }
            TransportEvent::Completed { task, error } => self.on_completed(task, error),
            TransportEvent::SessionInvalidated { session, error } => {
                on_session_invalidated(session, error)
            }
            TransportEvent::BackgroundEventsFinished { identifier } => {
                self.on_background_events_finished(identifier)
            }
        }
    }

    fn on_headers(&self, task: TaskHandle, metadata: ResponseMetadata) {
        let id = task.id();
        let attached = {
            let mut ledger = self.ledger.lock();
            let response = match ledger.registry.response_for(id) {
                Some(existing) => {
                    let mut response = existing.clone();
                    response.update(metadata);
                    response
                }
                None => HttpResponse::from_metadata(metadata),
            };
            ledger.registry.attach_response(id, response)
        };
        if !attached {
            warn!("{}, aborting", RegistryError::UnknownTask(id));
            task.cancel();
        }
    }

    fn on_body(&self, task: TaskId, bytes: Bytes) {
        if !self.ledger.lock().registry.append_body(task, &bytes) {
            debug!("dropping {} byte chunk for task {} without response", bytes.len(), task);
        }
    }

    fn on_bytes_transferred(&self, task: TaskId, completed: u64, total: u64) {
        let (progress, observer) = {
            let ledger = self.ledger.lock();
            match ledger.registry.entry(task) {
                Some(entry) => (entry.progress.clone(), entry.observer.clone()),
                None => return,
            }
        };
        let snapshot = progress.update(completed, total);
        if let Some(observer) = observer {
            observer(snapshot);
        }
    }

    fn on_download_finished(&self, task: TaskId, location: PathBuf) {
        if !self.ledger.lock().registry.set_resource_location(task, &location) {
            debug!("download location for task {} has no response to land in", task);
        }
    }

    fn on_completed(&self, task: TaskId, error: Option<TransportFailure>) {
        let removal = {
            let mut ledger = self.ledger.lock();
            let removal = ledger.registry.take_finished(task);
            if let Some(Removal { drained: true, .. }) = &removal {
                let sessions = ledger.pool.invalidate_all(true);
                debug!("registry drained, released {} idle session(s)", sessions);
            }
            removal
        };

        let Some(Removal { entry, .. }) = removal else {
            warn!("{}, completion dropped", RegistryError::UnknownTask(task));
            return;
        };

        let TaskEntry {
            request,
            response,
            completion,
            ..
        } = entry;
        let outcome = match error {
            Some(failure) => Err(ServiceError::from(failure)),
            None => response
                .map(HttpResponse::finalize)
                .ok_or(ServiceError::MissingResponse),
        };
        match &outcome {
            Ok(response) => debug!("task {} finished with status {}", task, response.status),
            Err(err) => debug!("task {} failed: {}", task, err),
        }
        if matches!(outcome, Err(ServiceError::Cancelled)) {
            if let Some(progress) = request.progress() {
                progress.cancel();
            }
        }
        self.runtime
            .spawn_blocking(move || deliver(request, completion, outcome));
    }

    fn on_background_events_finished(&self, identifier: String) {
        let handler = self.ledger.lock().background_handlers.remove(&identifier);
        match handler {
            Some(handler) => {
                debug!("background session {} finished delivering events", identifier);
                self.runtime.spawn_blocking(handler);
            }
            None => debug!("no completion handler for background session {}", identifier),
        }
    }
}

fn on_session_invalidated(session: SessionId, error: Option<TransportFailure>) {
    match error {
        Some(failure) => info!("session {} invalidated: {}", session, failure),
        None => info!("session {} invalidated", session),
    }
}

/// Run the request's own action, then the submission's completion handler.
fn deliver(
    request: Request,
    completion: Option<CompletionHandler>,
    outcome: Result<Response, ServiceError>,
) {
    match &outcome {
        Ok(response) => {
            if let Some(action) = request.success_action() {
                action(response);
            }
        }
        Err(error) => {
            if let Some(action) = request.failure_action() {
                action(error);
            }
        }
    }
    if let Some(completion) = completion {
        completion(outcome);
    }
}
