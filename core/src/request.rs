//! Immutable request descriptions submitted to `RequestService`.
//!
//! # Design
//! A `Request` is identified by its URL, method and payload. Callbacks,
//! headers and the progress handle ride along but take no part in equality,
//! so two submissions of "the same" request can be found together by
//! `TaskRegistry::tasks_matching` and controlled as one.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::ServiceError;
use crate::http::{HttpHeader, HttpMethod, Payload, Response, TransportCall};
use crate::progress::{Progress, ProgressSnapshot};

/// Invoked with the finalized response when a task succeeds.
pub type SuccessAction = Arc<dyn Fn(&Response) + Send + Sync>;

/// Invoked with the error when a task fails or is cancelled.
pub type FailureAction = Arc<dyn Fn(&ServiceError) + Send + Sync>;

/// Per-submission progress observer. Called on the bridge, so it must be
/// cheap and must not block.
pub type ProgressObserver = Arc<dyn Fn(ProgressSnapshot) + Send + Sync>;

/// Per-submission completion callback, invoked exactly once.
pub type CompletionHandler = Box<dyn FnOnce(Result<Response, ServiceError>) + Send + 'static>;

#[derive(Clone)]
pub struct Request {
    url: String,
    method: HttpMethod,
    headers: Vec<HttpHeader>,
    payload: Payload,
    on_success: Option<SuccessAction>,
    on_failure: Option<FailureAction>,
    progress: Option<Progress>,
}

impl Request {
    /// A data request whose response body is accumulated in memory.
    pub fn data(url: impl Into<String>, method: HttpMethod) -> Self {
        Self::with_payload(url.into(), method, Payload::Data(None))
    }

    /// Upload the file at `file` as the request body.
    pub fn upload(url: impl Into<String>, method: HttpMethod, file: impl Into<PathBuf>) -> Self {
        Self::with_payload(url.into(), method, Payload::Upload(file.into()))
    }

    /// Download `url` into `destination`.
    pub fn download(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self::with_payload(url.into(), HttpMethod::Get, Payload::Download(destination.into()))
    }

    fn with_payload(url: String, method: HttpMethod, payload: Payload) -> Self {
        Self {
            url,
            method,
            headers: Vec::new(),
            payload,
            on_success: None,
            on_failure: None,
            progress: None,
        }
    }

    /// Set the in-memory body. Only meaningful for data requests; ignored
    /// for uploads and downloads.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        if let Payload::Data(slot) = &mut self.payload {
            *slot = Some(body.into());
        }
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(HttpHeader::new(name, value));
        self
    }

    pub fn on_success(mut self, action: impl Fn(&Response) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(action));
        self
    }

    pub fn on_failure(mut self, action: impl Fn(&ServiceError) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Arc::new(action));
        self
    }

    /// Attach a fresh progress handle, or drop the existing one.
    pub fn use_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled.then(Progress::new);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn headers(&self) -> &[HttpHeader] {
        &self.headers
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn progress(&self) -> Option<&Progress> {
        self.progress.as_ref()
    }

    pub fn success_action(&self) -> Option<&SuccessAction> {
        self.on_success.as_ref()
    }

    pub fn failure_action(&self) -> Option<&FailureAction> {
        self.on_failure.as_ref()
    }

    pub fn transport_call(&self) -> TransportCall {
        TransportCall {
            method: self.method,
            url: self.url.clone(),
            headers: self.headers.clone(),
            payload: self.payload.clone(),
        }
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url && self.method == other.method && self.payload == other.payload
    }
}

impl Eq for Request {}

impl Hash for Request {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
        self.method.hash(state);
        self.payload.hash(state);
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("payload", &self.payload.shape())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}
