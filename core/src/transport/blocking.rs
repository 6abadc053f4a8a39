//! Thread-per-task transport over ureq's blocking client.
//!
//! # Design
//! Each session owns one `ureq::Agent` built from the configuration's
//! settings, so connection pooling follows session boundaries. A task is a
//! small state machine behind a mutex; its first `resume` spawns a worker
//! thread that performs the call and streams the body back as events.
//!
//! The worker checks the task state before every event it sends and
//! between body reads, including reads of an upload's source file.
//! `suspend` parks it at the next check, `cancel`
//! marks the task finished and sends the cancellation completion itself,
//! after which the worker goes silent and exits at its next check. Sends
//! happen under the task lock, so a cancellation and a worker event can
//! never both claim to be the completion.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};
use ureq::http::Response as WireResponse;
use ureq::typestate::WithBody;
use ureq::{Agent, Body, RequestBuilder, SendBody};

use super::{
    Capabilities, EventSink, SessionHandle, SessionId, TaskHandle, TaskId, Transport,
    TransportEvent, TransportSession, TransportTask,
};
use crate::config::{Configuration, SessionSettings};
use crate::error::{FailureKind, ServiceError, TransportFailure};
use crate::http::{HttpHeader, HttpMethod, Payload, ResponseMetadata, TransportCall};

/// Read size for streamed bodies.
const CHUNK_SIZE: usize = 16 * 1024;

const DEFAULT_THREAD_NAME: &str = "courier-task";

#[derive(Debug, Clone)]
pub struct BlockingTransport {
    thread_name: String,
}

impl BlockingTransport {
    pub fn new() -> Self {
        Self {
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }

    /// Prefix for worker thread names; the task id is appended.
    pub fn with_thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }
}

impl Default for BlockingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for BlockingTransport {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            suspend_resume: true,
        }
    }

    fn create_session(
        &self,
        configuration: &Configuration,
        events: EventSink,
    ) -> Result<SessionHandle, ServiceError> {
        let session: SessionHandle = Arc::new(BlockingSession {
            shared: Arc::new(SessionShared {
                id: SessionId::new(),
                agent: build_agent(&configuration.settings()),
                events,
                background_identifier: configuration.background_identifier().map(str::to_string),
                thread_name: self.thread_name.clone(),
                valid: AtomicBool::new(true),
                invalidation_reported: AtomicBool::new(false),
                tasks: Mutex::new(HashMap::new()),
            }),
        });
        Ok(session)
    }
}

fn build_agent(settings: &SessionSettings) -> Agent {
    Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(Some(settings.timeout_for_resource))
        .timeout_recv_body(Some(settings.timeout_for_request))
        .max_idle_connections_per_host(settings.max_connections_per_host)
        .build()
        .new_agent()
}

struct SessionShared {
    id: SessionId,
    agent: Agent,
    events: EventSink,
    background_identifier: Option<String>,
    thread_name: String,
    valid: AtomicBool,
    invalidation_reported: AtomicBool,
    tasks: Mutex<HashMap<TaskId, Arc<TaskShared>>>,
}

impl SessionShared {
    fn task_finished(&self, id: TaskId) {
        let idle = {
            let mut tasks = self.tasks.lock();
            tasks.remove(&id);
            tasks.is_empty()
        };
        if !idle {
            return;
        }
        if let Some(identifier) = &self.background_identifier {
            self.events.send(TransportEvent::BackgroundEventsFinished {
                identifier: identifier.clone(),
            });
        }
        if !self.valid.load(Ordering::SeqCst) {
            self.report_invalidated();
        }
    }

    fn report_invalidated(&self) {
        if !self.invalidation_reported.swap(true, Ordering::SeqCst) {
            self.events.send(TransportEvent::SessionInvalidated {
                session: self.id,
                error: None,
            });
        }
    }
}

struct BlockingSession {
    shared: Arc<SessionShared>,
}

impl TransportSession for BlockingSession {
    fn id(&self) -> SessionId {
        self.shared.id
    }

    fn is_valid(&self) -> bool {
        self.shared.valid.load(Ordering::SeqCst)
    }

    fn create_task(&self, call: TransportCall) -> Result<TaskHandle, TransportFailure> {
        if !self.is_valid() {
            return Err(TransportFailure::new(
                FailureKind::Other,
                format!("session {} is invalidated", self.shared.id),
            ));
        }
        let task = Arc::new(TaskShared {
            id: TaskId::next(),
            call,
            state: Mutex::new(Phase::Created),
            gate: Condvar::new(),
        });
        self.shared.tasks.lock().insert(task.id, Arc::clone(&task));
        Ok(TaskHandle::new(Arc::new(BlockingTask {
            task,
            session: Arc::clone(&self.shared),
        })))
    }

    fn invalidate(&self, graceful: bool) {
        self.shared.valid.store(false, Ordering::SeqCst);
        if !graceful {
            let outstanding: Vec<Arc<TaskShared>> =
                self.shared.tasks.lock().values().cloned().collect();
            for task in outstanding {
                task.cancel(&self.shared);
            }
        }
        if self.shared.tasks.lock().is_empty() {
            self.shared.report_invalidated();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Running,
    Suspended,
    Finished,
}

struct TaskShared {
    id: TaskId,
    call: TransportCall,
    state: Mutex<Phase>,
    gate: Condvar,
}

impl TaskShared {
    /// Send `event` unless the task already finished. Returns whether the
    /// worker should keep going.
    fn emit(&self, session: &SessionShared, event: TransportEvent) -> bool {
        let phase = self.state.lock();
        if *phase == Phase::Finished {
            return false;
        }
        session.events.send(event)
    }

    /// Block while suspended. False once the task is finished.
    fn checkpoint(&self) -> bool {
        let mut phase = self.state.lock();
        while *phase == Phase::Suspended {
            self.gate.wait(&mut phase);
        }
        *phase != Phase::Finished
    }

    fn finish(&self, session: &SessionShared, error: Option<TransportFailure>) {
        {
            let mut phase = self.state.lock();
            if *phase == Phase::Finished {
                return;
            }
            *phase = Phase::Finished;
            self.gate.notify_all();
            session.events.send(TransportEvent::Completed {
                task: self.id,
                error,
            });
        }
        session.task_finished(self.id);
    }

    fn cancel(&self, session: &SessionShared) {
        self.finish(session, Some(TransportFailure::cancelled()));
    }
}

struct BlockingTask {
    task: Arc<TaskShared>,
    session: Arc<SessionShared>,
}

impl BlockingTask {
    fn handle(&self) -> TaskHandle {
        TaskHandle::new(Arc::new(BlockingTask {
            task: Arc::clone(&self.task),
            session: Arc::clone(&self.session),
        }))
    }

    fn spawn_worker(&self) {
        let handle = self.handle();
        let task = Arc::clone(&self.task);
        let session = Arc::clone(&self.session);
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", self.session.thread_name, self.task.id.as_u64()))
            .spawn(move || {
                let outcome = execute(&task, &session, handle);
                task.finish(&session, outcome.err());
            });
        if let Err(err) = spawned {
            warn!("could not start worker for task {}: {}", self.task.id, err);
            self.task.finish(&self.session, Some(TransportFailure::from(err)));
        }
    }
}

impl TransportTask for BlockingTask {
    fn id(&self) -> TaskId {
        self.task.id
    }

    fn resume(&self) {
        let start = {
            let mut phase = self.task.state.lock();
            match *phase {
                Phase::Created => {
                    *phase = Phase::Running;
                    true
                }
                Phase::Suspended => {
                    *phase = Phase::Running;
                    self.task.gate.notify_all();
                    false
                }
                Phase::Running | Phase::Finished => false,
            }
        };
        if start {
            self.spawn_worker();
        }
    }

    fn suspend(&self) {
        let mut phase = self.task.state.lock();
        if *phase == Phase::Running {
            *phase = Phase::Suspended;
        }
    }

    fn cancel(&self) {
        self.task.cancel(&self.session);
    }
}

/// Run the call to completion. `Ok` also covers a task that was cancelled
/// midway; `finish` is a no-op for it.
fn execute(task: &TaskShared, session: &SessionShared, handle: TaskHandle) -> Result<(), TransportFailure> {
    if !task.checkpoint() {
        return Ok(());
    }
    let call = &task.call;
    debug!("task {} {} {}", task.id, call.method, call.url);

    let response = match &call.payload {
        Payload::Data(Some(body)) => send(&session.agent, call, Outgoing::Bytes(&body[..]))?,
        Payload::Data(None) | Payload::Download(_) => send(&session.agent, call, Outgoing::Empty)?,
        Payload::Upload(source) => {
            let file = File::open(source)?;
            let total = file.metadata()?.len();
            if !task.emit(session, transferred(task.id, 0, total)) {
                return Ok(());
            }
            let mut reader = UploadReader {
                file,
                task,
                session,
                sent: 0,
                total,
            };
            let response = send(
                &session.agent,
                call,
                Outgoing::Stream(SendBody::from_reader(&mut reader)),
            );
            if !task.checkpoint() {
                return Ok(());
            }
            response?
        }
    };

    let metadata = metadata_from(&response, &call.url);
    let total = metadata.expected_content_length.unwrap_or(0);
    if !task.emit(session, TransportEvent::HeadersReceived { task: handle, metadata }) {
        return Ok(());
    }

    let mut reader = response.into_body().into_reader();
    let mut buf = vec![0u8; CHUNK_SIZE];
    match &call.payload {
        Payload::Download(destination) => {
            let mut file = File::create(destination)?;
            let mut written = 0u64;
            loop {
                if !task.checkpoint() {
                    return Ok(());
                }
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                file.write_all(&buf[..n])?;
                written += n as u64;
                if !task.emit(session, transferred(task.id, written, total)) {
                    return Ok(());
                }
            }
            file.flush()?;
            task.emit(session, download_finished(task.id, destination));
        }
        _ => loop {
            if !task.checkpoint() {
                return Ok(());
            }
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            let chunk = TransportEvent::BodyChunk {
                task: task.id,
                bytes: Bytes::copy_from_slice(&buf[..n]),
            };
            if !task.emit(session, chunk) {
                return Ok(());
            }
        },
    }
    Ok(())
}

/// File reader for upload bodies. Every read passes the suspend gate and
/// reports the bytes handed to the connection so far.
struct UploadReader<'a> {
    file: File,
    task: &'a TaskShared,
    session: &'a SessionShared,
    sent: u64,
    total: u64,
}

impl Read for UploadReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.task.checkpoint() {
            return Err(io::Error::other("task cancelled during upload"));
        }
        let n = self.file.read(buf)?;
        if n == 0 {
            return Ok(0);
        }
        self.sent += n as u64;
        let total = self.total.max(self.sent);
        if !self.task.emit(self.session, transferred(self.task.id, self.sent, total)) {
            return Err(io::Error::other("task cancelled during upload"));
        }
        Ok(n)
    }
}

fn transferred(task: TaskId, completed: u64, total: u64) -> TransportEvent {
    TransportEvent::BytesTransferred {
        task,
        completed,
        total,
    }
}

fn download_finished(task: TaskId, location: &Path) -> TransportEvent {
    TransportEvent::DownloadFinished {
        task,
        location: location.to_path_buf(),
    }
}

/// Request body handed to `send`.
enum Outgoing<'a> {
    Empty,
    Bytes(&'a [u8]),
    Stream(SendBody<'a>),
}

fn send(
    agent: &Agent,
    call: &TransportCall,
    body: Outgoing<'_>,
) -> Result<WireResponse<Body>, TransportFailure> {
    let url = call.url.as_str();
    let headers = &call.headers;
    let result = match call.method {
        HttpMethod::Get => with_headers(agent.get(url), headers).call(),
        HttpMethod::Head => with_headers(agent.head(url), headers).call(),
        HttpMethod::Delete => with_headers(agent.delete(url), headers).call(),
        HttpMethod::Post => send_body(with_headers(agent.post(url), headers), body),
        HttpMethod::Put => send_body(with_headers(agent.put(url), headers), body),
        HttpMethod::Patch => send_body(with_headers(agent.patch(url), headers), body),
    };
    result.map_err(failure_from)
}

fn with_headers<B>(mut builder: RequestBuilder<B>, headers: &[HttpHeader]) -> RequestBuilder<B> {
    for header in headers {
        builder = builder.header(header.name.as_str(), header.value.as_str());
    }
    builder
}

fn send_body(
    builder: RequestBuilder<WithBody>,
    body: Outgoing<'_>,
) -> Result<WireResponse<Body>, ureq::Error> {
    match body {
        Outgoing::Empty => builder.send_empty(),
        Outgoing::Bytes(bytes) => builder.send(bytes),
        Outgoing::Stream(stream) => builder.send(stream),
    }
}

fn metadata_from(response: &WireResponse<Body>, url: &str) -> ResponseMetadata {
    let headers: Vec<HttpHeader> = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| HttpHeader::new(name.as_str(), value))
        })
        .collect();
    let expected_content_length = response
        .headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok());
    ResponseMetadata {
        url: Some(url.to_string()),
        status: response.status().as_u16(),
        headers,
        mime_type: response.body().mime_type().map(str::to_string),
        expected_content_length,
    }
}

fn failure_from(err: ureq::Error) -> TransportFailure {
    let kind = match &err {
        ureq::Error::Timeout(_) => FailureKind::TimedOut,
        ureq::Error::HostNotFound | ureq::Error::ConnectionFailed => FailureKind::Connection,
        ureq::Error::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => FailureKind::TimedOut,
        ureq::Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
            FailureKind::Connection
        }
        ureq::Error::Io(_) => FailureKind::Io,
        _ => FailureKind::Protocol,
    };
    TransportFailure::new(kind, err.to_string())
}
