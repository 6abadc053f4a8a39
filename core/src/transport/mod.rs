//! The seam between the orchestrator and an HTTP transport.
//!
//! # Design
//! The orchestrator never performs I/O itself. A `Transport` creates
//! sessions, a `TransportSession` creates tasks, and a `TransportTask` is
//! controlled with resume/suspend/cancel. Everything the transport learns
//! while a task runs comes back as a `TransportEvent` pushed into the
//! session's `EventSink`, from whatever thread the transport likes. The
//! sink is the only way back in, which keeps transport concurrency out of
//! the registry.
//!
//! Contract for implementors:
//! - tasks are created suspended; the first `resume` starts them;
//! - per task, events are sent in order: headers, body chunks / byte
//!   counts, then exactly one `Completed`;
//! - `cancel` must eventually produce `Completed` with a
//!   `FailureKind::Cancelled` failure unless the task already completed;
//! - `invalidate(false)` cancels every outstanding task of the session.

pub mod blocking;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::Configuration;
use crate::error::{ServiceError, TransportFailure};
use crate::http::{ResponseMetadata, TransportCall};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a transport task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Allocate a fresh id. Transports should use this so ids never collide
    /// across sessions.
    pub fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Optional features a transport may or may not provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub suspend_resume: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            suspend_resume: true,
        }
    }
}

pub trait Transport: Send + Sync {
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Build a session for `configuration`. Every event for tasks of this
    /// session must be sent through `events`.
    fn create_session(
        &self,
        configuration: &Configuration,
        events: EventSink,
    ) -> Result<SessionHandle, ServiceError>;
}

pub trait TransportSession: Send + Sync {
    fn id(&self) -> SessionId;

    fn is_valid(&self) -> bool;

    /// Create a suspended task. Fails once the session is invalidated.
    fn create_task(&self, call: TransportCall) -> Result<TaskHandle, TransportFailure>;

    /// `graceful` lets outstanding tasks finish; otherwise they are
    /// cancelled. Either way the session accepts no new tasks.
    fn invalidate(&self, graceful: bool);
}

pub trait TransportTask: Send + Sync {
    fn id(&self) -> TaskId;
    fn resume(&self);
    fn suspend(&self);
    fn cancel(&self);
}

pub type SessionHandle = Arc<dyn TransportSession>;

/// Shared handle to a transport task; equal and hashed by task id.
#[derive(Clone)]
pub struct TaskHandle(Arc<dyn TransportTask>);

impl TaskHandle {
    pub fn new(task: Arc<dyn TransportTask>) -> Self {
        TaskHandle(task)
    }

    pub fn id(&self) -> TaskId {
        self.0.id()
    }

    pub fn resume(&self) {
        self.0.resume()
    }

    pub fn suspend(&self) {
        self.0.suspend()
    }

    pub fn cancel(&self) {
        self.0.cancel()
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for TaskHandle {}

impl Hash for TaskHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskHandle({})", self.id())
    }
}

/// Everything a transport reports back to the orchestrator.
#[derive(Debug)]
pub enum TransportEvent {
    /// Status line and headers arrived. Carries the handle so the bridge
    /// can abort a task nobody is waiting for.
    HeadersReceived {
        task: TaskHandle,
        metadata: ResponseMetadata,
    },
    BodyChunk {
        task: TaskId,
        bytes: Bytes,
    },
    /// Upload bytes sent or download bytes written so far. `total` is zero
    /// when unknown.
    BytesTransferred {
        task: TaskId,
        completed: u64,
        total: u64,
    },
    DownloadFinished {
        task: TaskId,
        location: PathBuf,
    },
    Completed {
        task: TaskId,
        error: Option<TransportFailure>,
    },
    SessionInvalidated {
        session: SessionId,
        error: Option<TransportFailure>,
    },
    /// A background session delivered every event it had queued.
    BackgroundEventsFinished {
        identifier: String,
    },
}

pub type EventStream = mpsc::UnboundedReceiver<TransportEvent>;

/// Sending half of the event channel; cheap to clone and usable from any
/// thread.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSink {
    pub fn channel() -> (EventSink, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink { tx }, rx)
    }

    /// Returns false once the receiving side is gone.
    pub fn send(&self, event: TransportEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
