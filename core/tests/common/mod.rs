//! In-memory transport driven by the test itself.
//!
//! Sessions and tasks record every control call. Nothing happens on its own:
//! a test makes a task respond, fail or report progress explicitly, which
//! makes event interleavings reproducible.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use courier_core::{
    Capabilities, Configuration, EventSink, HttpHeader, RequestService, Response, ResponseMetadata,
    ServiceError, ServiceSettings, SessionHandle, SessionId, TaskHandle, TaskId, Transport,
    TransportCall, TransportEvent, TransportFailure, TransportSession, TransportTask,
};
use parking_lot::Mutex;

pub const WAIT: Duration = Duration::from_secs(5);
pub const QUIET: Duration = Duration::from_millis(200);

pub struct ScriptedTransport {
    suspend_resume: bool,
    repeat_task_ids: bool,
    sessions: Mutex<Vec<Arc<ScriptedSession>>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            suspend_resume: true,
            repeat_task_ids: false,
            sessions: Mutex::new(Vec::new()),
        })
    }

    /// Every session hands out the id of its first task again, so the
    /// registry sees a duplicate.
    pub fn repeating_task_ids() -> Arc<Self> {
        Arc::new(Self {
            suspend_resume: true,
            repeat_task_ids: true,
            sessions: Mutex::new(Vec::new()),
        })
    }

    pub fn without_suspend() -> Arc<Self> {
        Arc::new(Self {
            suspend_resume: false,
            repeat_task_ids: false,
            sessions: Mutex::new(Vec::new()),
        })
    }

    pub fn sessions(&self) -> Vec<Arc<ScriptedSession>> {
        self.sessions.lock().clone()
    }

    /// Every task created so far, in creation order.
    pub fn tasks(&self) -> Vec<Arc<ScriptedTask>> {
        self.sessions
            .lock()
            .iter()
            .flat_map(|s| s.tasks.lock().clone())
            .collect()
    }

    pub fn last_task(&self) -> Arc<ScriptedTask> {
        self.tasks().pop().expect("no task created")
    }
}

impl Transport for ScriptedTransport {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            suspend_resume: self.suspend_resume,
        }
    }

    fn create_session(
        &self,
        configuration: &Configuration,
        events: EventSink,
    ) -> Result<SessionHandle, ServiceError> {
        let session = Arc::new(ScriptedSession {
            id: SessionId::new(),
            configuration: configuration.clone(),
            events,
            repeat_task_ids: self.repeat_task_ids,
            valid: AtomicBool::new(true),
            invalidated: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        });
        self.sessions.lock().push(Arc::clone(&session));
        let handle: SessionHandle = session;
        Ok(handle)
    }
}

pub struct ScriptedSession {
    pub id: SessionId,
    pub configuration: Configuration,
    events: EventSink,
    repeat_task_ids: bool,
    valid: AtomicBool,
    invalidated: Mutex<Option<bool>>,
    tasks: Mutex<Vec<Arc<ScriptedTask>>>,
}

impl ScriptedSession {
    /// `Some(graceful)` once invalidated.
    pub fn invalidation(&self) -> Option<bool> {
        *self.invalidated.lock()
    }

    pub fn is_live(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    /// A task the service never asked for, for exercising orphan events.
    pub fn orphan_task(&self) -> Arc<ScriptedTask> {
        ScriptedTask::new(TaskId::next(), self.events.clone(), None)
    }

    pub fn emit(&self, event: TransportEvent) {
        self.events.send(event);
    }
}

impl TransportSession for ScriptedSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn is_valid(&self) -> bool {
        self.is_live()
    }

    fn create_task(&self, call: TransportCall) -> Result<TaskHandle, TransportFailure> {
        if !self.is_live() {
            return Err(TransportFailure::new(
                courier_core::FailureKind::Other,
                "session invalidated",
            ));
        }
        let mut tasks = self.tasks.lock();
        let id = match tasks.first() {
            Some(first) if self.repeat_task_ids => first.id,
            _ => TaskId::next(),
        };
        let task = ScriptedTask::new(id, self.events.clone(), Some(call));
        tasks.push(Arc::clone(&task));
        Ok(TaskHandle::new(task))
    }

    fn invalidate(&self, graceful: bool) {
        self.valid.store(false, Ordering::SeqCst);
        *self.invalidated.lock() = Some(graceful);
        if !graceful {
            for task in self.tasks.lock().iter() {
                task.cancel();
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ControlLog {
    pub resumed: usize,
    pub suspended: usize,
    pub cancelled: usize,
}

pub struct ScriptedTask {
    id: TaskId,
    pub call: Option<TransportCall>,
    events: EventSink,
    log: Mutex<ControlLog>,
    finished: AtomicBool,
}

impl ScriptedTask {
    fn new(id: TaskId, events: EventSink, call: Option<TransportCall>) -> Arc<Self> {
        Arc::new(Self {
            id,
            call,
            events,
            log: Mutex::new(ControlLog::default()),
            finished: AtomicBool::new(false),
        })
    }

    pub fn log(&self) -> ControlLog {
        *self.log.lock()
    }

    pub fn handle(self: &Arc<Self>) -> TaskHandle {
        TaskHandle::new(Arc::clone(self) as Arc<dyn TransportTask>)
    }

    pub fn headers(self: &Arc<Self>, status: u16) {
        self.events.send(TransportEvent::HeadersReceived {
            task: self.handle(),
            metadata: ResponseMetadata {
                url: self.call.as_ref().map(|c| c.url.clone()),
                status,
                headers: vec![HttpHeader::new("Content-Type", "text/plain")],
                mime_type: Some("text/plain".to_string()),
                expected_content_length: None,
            },
        });
    }

    pub fn chunk(&self, bytes: &'static [u8]) {
        self.events.send(TransportEvent::BodyChunk {
            task: self.id,
            bytes: Bytes::from_static(bytes),
        });
    }

    pub fn transferred(&self, completed: u64, total: u64) {
        self.events.send(TransportEvent::BytesTransferred {
            task: self.id,
            completed,
            total,
        });
    }

    /// Complete the task. Ignored once it already completed.
    pub fn complete(&self, error: Option<TransportFailure>) {
        if !self.finished.swap(true, Ordering::SeqCst) {
            self.events.send(TransportEvent::Completed {
                task: self.id,
                error,
            });
        }
    }

    /// Headers, one body chunk, success.
    pub fn respond(self: &Arc<Self>, status: u16, body: &'static [u8]) {
        self.headers(status);
        self.chunk(body);
        self.complete(None);
    }
}

impl TransportTask for ScriptedTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn resume(&self) {
        self.log.lock().resumed += 1;
    }

    fn suspend(&self) {
        self.log.lock().suspended += 1;
    }

    fn cancel(&self) {
        self.log.lock().cancelled += 1;
        self.complete(Some(TransportFailure::cancelled()));
    }
}

/// A runtime for the callback bridge plus a service wired to a scripted
/// transport. The service drops before the runtime.
pub struct Harness {
    pub service: RequestService,
    pub transport: Arc<ScriptedTransport>,
    pub runtime: tokio::runtime::Runtime,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_transport(ScriptedTransport::new())
    }

    pub fn with_transport(transport: Arc<ScriptedTransport>) -> Self {
        Self::with_settings(transport, ServiceSettings::default())
    }

    pub fn with_settings(transport: Arc<ScriptedTransport>, settings: ServiceSettings) -> Self {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let service = RequestService::with_settings(
            transport.clone(),
            settings,
            runtime.handle().clone(),
        );
        Self {
            service,
            transport,
            runtime,
        }
    }
}

pub type Outcome = Result<Response, ServiceError>;

/// A completion handler that forwards the outcome to the returned receiver.
pub fn completion() -> (impl FnOnce(Outcome) + Send + 'static, mpsc::Receiver<Outcome>) {
    let (tx, rx) = mpsc::channel();
    (
        move |outcome: Outcome| {
            let _ = tx.send(outcome);
        },
        rx,
    )
}

/// Wait until `condition` holds or `WAIT` elapses.
pub fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + WAIT;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
