//! Task registry: which transport tasks are running, and for which request.
//!
//! # Design
//! The registry is a plain owned map; it does no locking of its own. The
//! orchestrator keeps it inside the `Ledger` mutex together with the
//! session pool, so register/attach/lookup/remove are atomic with respect
//! to each other and to session lookup.
//!
//! Entries live in one of two views:
//! - `live`: started and not yet completed. This is what `len`,
//!   `tasks_matching` and the lookups see.
//! - `cancelling`: entries swept out by `clear`. They are invisible to
//!   lookups, but the transport's own cancellation completion can still
//!   find them through `take_finished`, so the failure path fires exactly
//!   once for every task that was running when everything got cancelled.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::error::RegistryError;
use crate::http::HttpResponse;
use crate::progress::Progress;
use crate::request::{CompletionHandler, ProgressObserver, Request};
use crate::transport::{TaskHandle, TaskId};

/// One registered task.
pub struct TaskEntry {
    pub handle: TaskHandle,
    pub request: Request,
    pub response: Option<HttpResponse>,
    pub observer: Option<ProgressObserver>,
    pub completion: Option<CompletionHandler>,
    /// Filters byte counts for the observer. Shares the request's handle
    /// when it has one.
    pub progress: Progress,
}

impl TaskEntry {
    pub fn new(handle: TaskHandle, request: Request) -> Self {
        let progress = request.progress().cloned().unwrap_or_default();
        Self {
            handle,
            request,
            response: None,
            observer: None,
            completion: None,
            progress,
        }
    }

    pub fn with_listener(
        mut self,
        observer: Option<ProgressObserver>,
        completion: Option<CompletionHandler>,
    ) -> Self {
        self.observer = observer;
        self.completion = completion;
        self
    }
}

impl fmt::Debug for TaskEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskEntry")
            .field("task", &self.handle.id())
            .field("request", &self.request)
            .field("has_response", &self.response.is_some())
            .finish()
    }
}

/// Result of taking a task out of the registry.
#[derive(Debug)]
pub struct Removal {
    pub entry: TaskEntry,
    /// True when this removal emptied the live view.
    pub drained: bool,
}

#[derive(Debug, Default)]
pub struct TaskRegistry {
    live: HashMap<TaskId, TaskEntry>,
    cancelling: HashMap<TaskId, TaskEntry>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly created task with no response yet.
    pub fn register(&mut self, handle: TaskHandle, request: Request) -> Result<(), RegistryError> {
        self.insert(TaskEntry::new(handle, request))
    }

    pub fn insert(&mut self, entry: TaskEntry) -> Result<(), RegistryError> {
        let id = entry.handle.id();
        if self.live.contains_key(&id) || self.cancelling.contains_key(&id) {
            return Err(RegistryError::DuplicateTask(id));
        }
        self.live.insert(id, entry);
        Ok(())
    }

    /// Store `response` for `task`. Returns false, and changes nothing, when
    /// the task is not live.
    pub fn attach_response(&mut self, task: TaskId, response: HttpResponse) -> bool {
        match self.live.get_mut(&task) {
            Some(entry) => {
                entry.response = Some(response);
                true
            }
            None => false,
        }
    }

    /// Append to the task's accumulator. False when the task is unknown or
    /// has no response yet.
    pub fn append_body(&mut self, task: TaskId, chunk: &[u8]) -> bool {
        match self.live.get_mut(&task).and_then(|e| e.response.as_mut()) {
            Some(response) => {
                response.append_body(chunk);
                true
            }
            None => false,
        }
    }

    pub fn set_resource_location(&mut self, task: TaskId, location: &Path) -> bool {
        match self.live.get_mut(&task).and_then(|e| e.response.as_mut()) {
            Some(response) => {
                response.set_resource_location(location);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, task: TaskId) -> bool {
        self.live.contains_key(&task)
    }

    pub fn entry(&self, task: TaskId) -> Option<&TaskEntry> {
        self.live.get(&task)
    }

    pub fn request_for(&self, task: TaskId) -> Option<&Request> {
        self.live.get(&task).map(|e| &e.request)
    }

    pub fn response_for(&self, task: TaskId) -> Option<&HttpResponse> {
        self.live.get(&task).and_then(|e| e.response.as_ref())
    }

    pub fn pair_for(&self, task: TaskId) -> Option<(&Request, Option<&HttpResponse>)> {
        self.live
            .get(&task)
            .map(|e| (&e.request, e.response.as_ref()))
    }

    /// Every live task whose request equals `request`.
    pub fn tasks_matching(&self, request: &Request) -> Vec<TaskHandle> {
        self.live
            .values()
            .filter(|e| &e.request == request)
            .map(|e| e.handle.clone())
            .collect()
    }

    /// Remove a live task. The caller reacts to `drained` by gracefully
    /// invalidating idle sessions.
    pub fn remove(&mut self, task: TaskId) -> Option<Removal> {
        let entry = self.live.remove(&task)?;
        Some(Removal {
            entry,
            drained: self.live.is_empty(),
        })
    }

    /// Take a task out at completion, wherever it currently lives.
    pub fn take_finished(&mut self, task: TaskId) -> Option<Removal> {
        if let Some(removal) = self.remove(task) {
            return Some(removal);
        }
        self.cancelling.remove(&task).map(|entry| Removal {
            entry,
            drained: false,
        })
    }

    /// Move every live entry to the cancelling view and return their
    /// handles. The caller is responsible for the matching session
    /// invalidation.
    pub fn clear(&mut self) -> Vec<TaskHandle> {
        let handles: Vec<TaskHandle> = self.live.values().map(|e| e.handle.clone()).collect();
        self.cancelling.extend(self.live.drain());
        handles
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Entries cleared but still waiting for their cancellation completion.
    pub fn cancelling_len(&self) -> usize {
        self.cancelling.len()
    }
}
